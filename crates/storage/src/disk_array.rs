//! `DiskArray[T]`: a growable array of fixed-size elements persisted
//! across pages, with transactional `update`/`push_back` (spec.md
//! §4.5).
//!
//! Layout: element pages hold `page_size / T::SIZE` elements each;
//! a PIP (Page Index Page) chain indexes the element pages, each PIP
//! holding up to `pip_capacity()` logical element-page indices plus a
//! pointer to the next PIP. An in-memory header tracks
//! `{num_elements, num_pages, first_pip_page}`.
//!
//! Transactional isolation does not require a second physical file:
//! a write transaction grows the `FileHandle`'s logical page mapping
//! directly (new pages are invisible to any reader that doesn't know
//! their PIP slot exists), and keeps a shadow header in
//! [`DiskArray::write`] describing the larger, uncommitted view. A
//! read-only transaction only ever walks the *committed* header's PIP
//! chain, so it can never reach a page a concurrent write transaction
//! has not yet committed — which is the isolation property spec.md
//! §4.5 and §8 property 2 actually require. See `DESIGN.md` for why
//! this is preferred over literally shadowing pages into the WAL file.
//!
//! `update` on an element that lived on a page *already reachable*
//! from the committed PIP chain is the one case the paragraph above
//! doesn't cover: the shared buffer-pool frame for that page is the
//! same frame a concurrent read-only `get` would pin. Writing into it
//! directly would leak uncommitted content to readers and make
//! rollback unable to restore the old bytes. Such updates are instead
//! staged into a private, in-memory copy of the page
//! (`WriteState::overlays`) and only copied into the shared frame by
//! [`DiskArray::stage_for_commit`], which the owning transaction calls
//! immediately before handing the dirtied pages to the WAL.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use vertexdb_core::ids::PageIdx;
use vertexdb_core::{Error, Result, StorageStructureId};

use crate::buffer_manager::{BufferManager, PinPolicy};
use crate::file_handle::FileHandle;
use crate::page_sink::PageSink;

/// A fixed-size element `DiskArray` can store. Implemented for the
/// small set of element types lists storage and its metadata arrays
/// actually need (`u32` headers, `u64` ids, and small page-index
/// groups — see `crate::lists`).
pub trait DiskArrayElement: Copy + Send + Sync + 'static {
    /// On-disk width in bytes.
    const SIZE: usize;
    /// Serializes into the first `SIZE` bytes of `buf`.
    fn encode(&self, buf: &mut [u8]);
    /// Deserializes from the first `SIZE` bytes of `buf`.
    fn decode(buf: &[u8]) -> Self;
}

impl DiskArrayElement for u32 {
    const SIZE: usize = 4;
    fn encode(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }
    fn decode(buf: &[u8]) -> Self {
        u32::from_le_bytes(buf[..4].try_into().unwrap())
    }
}

impl DiskArrayElement for u64 {
    const SIZE: usize = 8;
    fn encode(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }
    fn decode(buf: &[u8]) -> Self {
        u64::from_le_bytes(buf[..8].try_into().unwrap())
    }
}

/// Which visibility a `DiskArray` read or length query should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnView {
    /// The last committed state — never observes an in-progress write
    /// transaction's pages.
    ReadOnly,
    /// The active write transaction's state, including its own
    /// uncommitted `push_back`/`update` calls.
    Write,
}

const PIP_NEXT_SENTINEL: u32 = u32::MAX;

/// In-memory header: `{num_elements, num_pages, first_pip_page}`
/// (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskArrayHeader {
    /// Logical element count.
    pub num_elements: u64,
    /// Number of element pages currently indexed by the PIP chain.
    pub num_pages: u64,
    /// Logical page index of the first PIP page, if any element page
    /// has ever been allocated.
    pub first_pip_page: Option<PageIdx>,
}

struct WriteState {
    header: DiskArrayHeader,
    touched: HashSet<PageIdx>,
    /// Number of element pages the committed header indexed when this
    /// write transaction began. Any page at or beyond this count was
    /// allocated by this transaction itself and is safe to write to
    /// directly (no committed reader's PIP walk can reach it yet).
    committed_num_pages_at_start: u64,
    /// Private shadow copies of pre-existing pages touched by
    /// `update`, keyed by logical page index. Not materialized into
    /// the shared buffer-pool frame until [`DiskArray::stage_for_commit`].
    overlays: HashMap<PageIdx, Vec<u8>>,
}

/// A transactional, page-persisted growable array of fixed-size
/// elements.
pub struct DiskArray<T: DiskArrayElement> {
    structure: StorageStructureId,
    file: Arc<FileHandle>,
    buffer_manager: Arc<BufferManager>,
    sink: Option<Arc<dyn PageSink>>,
    committed: RwLock<DiskArrayHeader>,
    write: Mutex<Option<WriteState>>,
    _marker: PhantomData<T>,
}

impl<T: DiskArrayElement> DiskArray<T> {
    /// Opens a `DiskArray` backed by `file`, starting from `header`
    /// (pass [`DiskArrayHeader::default`] for a brand-new array; pass
    /// the header persisted at the last checkpoint to reopen one).
    pub fn new(
        structure: StorageStructureId,
        file: Arc<FileHandle>,
        buffer_manager: Arc<BufferManager>,
        sink: Option<Arc<dyn PageSink>>,
        header: DiskArrayHeader,
    ) -> Self {
        DiskArray {
            structure,
            file,
            buffer_manager,
            sink,
            committed: RwLock::new(header),
            write: Mutex::new(None),
            _marker: PhantomData,
        }
    }

    fn elements_per_page(&self) -> u64 {
        (self.buffer_manager.page_size() / T::SIZE) as u64
    }

    fn pip_slots(&self) -> u64 {
        (self.buffer_manager.page_size() / 4) as u64
    }

    fn pip_capacity(&self) -> u64 {
        self.pip_slots() - 1
    }

    /// Current committed header, for persistence at checkpoint.
    pub fn committed_header(&self) -> DiskArrayHeader {
        *self.committed.read()
    }

    /// Number of elements visible under `view`.
    pub fn len(&self, view: TxnView) -> u64 {
        match view {
            TxnView::ReadOnly => self.committed.read().num_elements,
            TxnView::Write => {
                let write = self.write.lock();
                write
                    .as_ref()
                    .map(|w| w.header.num_elements)
                    .unwrap_or_else(|| self.committed.read().num_elements)
            }
        }
    }

    /// True if `len(view) == 0`.
    pub fn is_empty(&self, view: TxnView) -> bool {
        self.len(view) == 0
    }

    fn header_for(&self, view: TxnView) -> DiskArrayHeader {
        match view {
            TxnView::ReadOnly => *self.committed.read(),
            TxnView::Write => {
                let write = self.write.lock();
                write.as_ref().map(|w| w.header).unwrap_or(*self.committed.read())
            }
        }
    }

    /// Reads element `idx` as visible under `view`. Under
    /// [`TxnView::Write`], consults this transaction's page overlays
    /// first so a write transaction observes its own not-yet-staged
    /// `update`s (write-your-own-reads, spec.md §5).
    pub fn get(&self, idx: u64, view: TxnView) -> Result<T> {
        if view == TxnView::Write {
            let write_guard = self.write.lock();
            if let Some(write) = write_guard.as_ref() {
                if idx >= write.header.num_elements {
                    return Err(Error::storage(format!(
                        "DiskArray index {idx} out of range (len {})",
                        write.header.num_elements
                    )));
                }
                let page_index = idx / self.elements_per_page();
                let offset = ((idx % self.elements_per_page()) * T::SIZE as u64) as usize;
                let logical = self.locate_element_page(&write.header, page_index)?;
                if let Some(overlay) = write.overlays.get(&logical) {
                    return Ok(T::decode(&overlay[offset..offset + T::SIZE]));
                }
            }
        }
        let header = self.header_for(view);
        if idx >= header.num_elements {
            return Err(Error::storage(format!(
                "DiskArray index {idx} out of range (len {})",
                header.num_elements
            )));
        }
        let page_index = idx / self.elements_per_page();
        let offset = ((idx % self.elements_per_page()) * T::SIZE as u64) as usize;
        let logical = self.locate_element_page(&header, page_index)?;
        let frame = self
            .buffer_manager
            .pin(&self.file, logical, PinPolicy::ReadPage)?;
        let data = self.buffer_manager.frame_data(frame);
        let value = T::decode(&data[offset..offset + T::SIZE]);
        drop(data);
        self.buffer_manager.unpin(&self.file, logical);
        Ok(value)
    }

    /// Write-transaction-only: overwrites element `idx` in place.
    /// Legal for any `idx < len(Write)`, including indices on a page
    /// that exists only because of a `push_back` earlier in this same
    /// transaction.
    ///
    /// If `idx` lives on a page the committed header already indexed
    /// when this transaction began, the write lands in a private page
    /// overlay rather than the shared buffer-pool frame (see the
    /// module doc) so concurrent read-only transactions keep seeing
    /// the old bytes until [`DiskArray::stage_for_commit`] runs.
    pub fn update(&self, idx: u64, value: T) -> Result<()> {
        let mut write_guard = self.write.lock();
        let write = write_guard
            .as_mut()
            .ok_or_else(|| Error::internal("DiskArray::update called outside a write transaction"))?;
        if idx >= write.header.num_elements {
            return Err(Error::storage(format!(
                "DiskArray index {idx} out of range (len {})",
                write.header.num_elements
            )));
        }
        let page_index = idx / self.elements_per_page();
        let offset = ((idx % self.elements_per_page()) * T::SIZE as u64) as usize;
        let header = write.header;
        let logical = self.locate_element_page(&header, page_index)?;
        if page_index < write.committed_num_pages_at_start {
            self.write_overlay_element(write, logical, offset, value)?;
        } else {
            self.write_element(&mut write.touched, logical, offset, value, false)?;
        }
        Ok(())
    }

    /// Writes `value` into this transaction's private overlay copy of
    /// `logical`, cloning the page's current committed content into
    /// the overlay on first touch.
    fn write_overlay_element(
        &self,
        write: &mut WriteState,
        logical: PageIdx,
        offset: usize,
        value: T,
    ) -> Result<()> {
        if !write.overlays.contains_key(&logical) {
            let frame = self
                .buffer_manager
                .pin(&self.file, logical, PinPolicy::ReadPage)?;
            let data = self.buffer_manager.frame_data(frame).clone();
            self.buffer_manager.unpin(&self.file, logical);
            write.overlays.insert(logical, data);
        }
        let entry = write.overlays.get_mut(&logical).unwrap();
        value.encode(&mut entry[offset..offset + T::SIZE]);
        Ok(())
    }

    /// Copies every staged page overlay into its shared buffer-pool
    /// frame and registers it dirty with the page sink. Must be called
    /// once per write transaction, after every `update`/`push_back`
    /// and before the WAL snapshots dirty pages for the commit record
    /// — the transaction manager is responsible for this ordering.
    /// A no-op if no write transaction is active or no `update` landed
    /// on a pre-existing page.
    pub fn stage_for_commit(&self) -> Result<()> {
        let mut write_guard = self.write.lock();
        let Some(write) = write_guard.as_mut() else {
            return Ok(());
        };
        let overlays = std::mem::take(&mut write.overlays);
        for (logical, bytes) in overlays {
            let frame = self
                .buffer_manager
                .pin(&self.file, logical, PinPolicy::ReadPage)?;
            {
                let mut data = self.buffer_manager.frame_data_mut(frame);
                data.copy_from_slice(&bytes);
            }
            self.buffer_manager.unpin(&self.file, logical);
            if write.touched.insert(logical) {
                if let Some(sink) = &self.sink {
                    sink.register_dirty_page(self.structure, &self.file, logical, false)?;
                }
            }
        }
        Ok(())
    }

    /// Write-transaction-only: appends `value`, growing the write
    /// view's length by one. Allocates a new element page (and, if
    /// necessary, a new PIP) when the last page is full.
    pub fn push_back(&self, value: T) -> Result<()> {
        let mut write_guard = self.write.lock();
        let write = write_guard
            .as_mut()
            .ok_or_else(|| Error::internal("DiskArray::push_back called outside a write transaction"))?;
        let idx = write.header.num_elements;
        let page_index = idx / self.elements_per_page();
        let mut is_new_page = false;
        if page_index >= write.header.num_pages {
            debug_assert_eq!(page_index, write.header.num_pages);
            let logical = self.file.add_new_page()?;
            self.append_pip_entry(&mut write.header, page_index, logical)?;
            write.header.num_pages += 1;
            is_new_page = true;
            let _ = logical;
        }
        let header = write.header;
        let offset = ((idx % self.elements_per_page()) * T::SIZE as u64) as usize;
        let logical = self.locate_element_page(&header, page_index)?;
        self.write_element(&mut write.touched, logical, offset, value, is_new_page)?;
        write.header.num_elements += 1;
        Ok(())
    }

    fn write_element(
        &self,
        touched: &mut HashSet<PageIdx>,
        logical: PageIdx,
        offset: usize,
        value: T,
        is_insert: bool,
    ) -> Result<()> {
        let frame = self
            .buffer_manager
            .pin(&self.file, logical, PinPolicy::ReadPage)?;
        {
            let mut data = self.buffer_manager.frame_data_mut(frame);
            value.encode(&mut data[offset..offset + T::SIZE]);
        }
        self.buffer_manager.unpin(&self.file, logical);
        if touched.insert(logical) {
            if let Some(sink) = &self.sink {
                sink.register_dirty_page(self.structure, &self.file, logical, is_insert)?;
            }
        }
        Ok(())
    }

    /// Walks the PIP chain rooted at `header.first_pip_page` to find
    /// the logical element-page index for `page_index`.
    fn locate_element_page(&self, header: &DiskArrayHeader, page_index: u64) -> Result<PageIdx> {
        let mut pip_idx = page_index / self.pip_capacity();
        let slot = (page_index % self.pip_capacity()) as usize;
        let mut pip_logical = header
            .first_pip_page
            .ok_or_else(|| Error::internal("DiskArray has no PIP page but page_index requested"))?;
        while pip_idx > 0 {
            pip_logical = self.read_pip_next(pip_logical)?;
            pip_idx -= 1;
        }
        self.read_pip_slot(pip_logical, slot)
    }

    fn read_pip_next(&self, pip_logical: PageIdx) -> Result<PageIdx> {
        let next_slot = (self.pip_slots() - 1) as usize;
        let v = self.read_pip_slot(pip_logical, next_slot)?;
        if v == PIP_NEXT_SENTINEL {
            Err(Error::internal("DiskArray PIP chain ended before target page"))
        } else {
            Ok(v)
        }
    }

    fn read_pip_slot(&self, pip_logical: PageIdx, slot: usize) -> Result<PageIdx> {
        let frame = self
            .buffer_manager
            .pin(&self.file, pip_logical, PinPolicy::ReadPage)?;
        let data = self.buffer_manager.frame_data(frame);
        let value = u32::from_le_bytes(data[slot * 4..slot * 4 + 4].try_into().unwrap());
        drop(data);
        self.buffer_manager.unpin(&self.file, pip_logical);
        Ok(value)
    }

    fn write_pip_slot(&self, pip_logical: PageIdx, slot: usize, value: PageIdx) -> Result<()> {
        let frame = self
            .buffer_manager
            .pin(&self.file, pip_logical, PinPolicy::ReadPage)?;
        {
            let mut data = self.buffer_manager.frame_data_mut(frame);
            data[slot * 4..slot * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        self.buffer_manager.unpin(&self.file, pip_logical);
        Ok(())
    }

    /// Appends `element_page_logical` to the PIP chain slot for
    /// `page_index`, allocating a new PIP page if the chain is not
    /// yet long enough.
    fn append_pip_entry(
        &self,
        header: &mut DiskArrayHeader,
        page_index: u64,
        element_page_logical: PageIdx,
    ) -> Result<()> {
        let target_pip_idx = page_index / self.pip_capacity();
        let slot = (page_index % self.pip_capacity()) as usize;

        if header.first_pip_page.is_none() {
            debug_assert_eq!(target_pip_idx, 0);
            let pip_logical = self.allocate_pip_page()?;
            header.first_pip_page = Some(pip_logical);
        }

        let mut pip_logical = header.first_pip_page.unwrap();
        let mut pip_idx = 0u64;
        while pip_idx < target_pip_idx {
            let next_slot = (self.pip_slots() - 1) as usize;
            let next = self.read_pip_slot(pip_logical, next_slot)?;
            if next == PIP_NEXT_SENTINEL {
                let new_pip = self.allocate_pip_page()?;
                self.write_pip_slot(pip_logical, next_slot, new_pip)?;
                pip_logical = new_pip;
            } else {
                pip_logical = next;
            }
            pip_idx += 1;
        }
        self.write_pip_slot(pip_logical, slot, element_page_logical)
    }

    fn allocate_pip_page(&self) -> Result<PageIdx> {
        let logical = self.file.add_new_page()?;
        let next_slot = (self.pip_slots() - 1) as usize;
        self.write_pip_slot(logical, next_slot, PIP_NEXT_SENTINEL)?;
        for slot in 0..next_slot {
            self.write_pip_slot(logical, slot, PIP_NEXT_SENTINEL)?;
        }
        Ok(logical)
    }

    /// Begins a write transaction's shadow header. Must be called
    /// once before any `update`/`push_back` in the transaction.
    pub fn begin_write(&self) {
        let committed = *self.committed.read();
        let mut write = self.write.lock();
        *write = Some(WriteState {
            header: committed,
            touched: HashSet::new(),
            committed_num_pages_at_start: committed.num_pages,
            overlays: HashMap::new(),
        });
    }

    /// Reconciles the in-memory committed header with the write
    /// transaction's header after the WAL replayer has durably
    /// applied all of its staged pages.
    pub fn checkpoint_in_memory_if_necessary(&self) {
        let mut write = self.write.lock();
        if let Some(state) = write.take() {
            *self.committed.write() = state.header;
        }
    }

    /// Discards the write transaction's shadow header, restoring the
    /// pre-transaction committed view. Any pages allocated via
    /// `add_new_page` during the aborted transaction are left
    /// orphaned in the file (unreachable from the committed PIP
    /// chain) rather than reclaimed — see `DESIGN.md`.
    pub fn rollback_in_memory_if_necessary(&self) {
        *self.write.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_manager::BufferManager;
    use vertexdb_core::ids::TableId;
    use vertexdb_core::structure_id::StorageStructureId;

    fn make_array(page_size: usize) -> (tempfile::TempDir, DiskArray<u64>) {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(FileHandle::open(dir.path().join("da"), page_size).unwrap());
        let bm = Arc::new(BufferManager::new(page_size, 64));
        let structure = StorageStructureId::NodeIndex {
            table_id: TableId(0),
            is_overflow: false,
        };
        let da = DiskArray::<u64>::new(structure, file, bm, None, DiskArrayHeader::default());
        (dir, da)
    }

    #[test]
    fn push_back_then_read_committed_and_write_views() {
        let (_dir, da) = make_array(256);
        assert_eq!(da.len(TxnView::ReadOnly), 0);
        da.begin_write();
        for i in 0..1000u64 {
            da.push_back(i * 10).unwrap();
        }
        assert_eq!(da.len(TxnView::ReadOnly), 0);
        assert_eq!(da.len(TxnView::Write), 1000);
        for i in 0..1000u64 {
            assert_eq!(da.get(i, TxnView::Write).unwrap(), i * 10);
        }
        assert!(da.get(0, TxnView::ReadOnly).is_err());
        da.checkpoint_in_memory_if_necessary();
        assert_eq!(da.len(TxnView::ReadOnly), 1000);
        for i in 0..1000u64 {
            assert_eq!(da.get(i, TxnView::ReadOnly).unwrap(), i * 10);
        }
    }

    #[test]
    fn rollback_restores_pre_transaction_view() {
        let (_dir, da) = make_array(256);
        da.begin_write();
        for i in 0..50u64 {
            da.push_back(i).unwrap();
        }
        da.checkpoint_in_memory_if_necessary();
        let before: Vec<u64> = (0..50).map(|i| da.get(i, TxnView::ReadOnly).unwrap()).collect();

        da.begin_write();
        for i in 0..50u64 {
            da.update(i, 999).unwrap();
        }
        da.push_back(1000).unwrap();
        da.rollback_in_memory_if_necessary();

        assert_eq!(da.len(TxnView::ReadOnly), 50);
        for i in 0..50u64 {
            assert_eq!(da.get(i, TxnView::ReadOnly).unwrap(), before[i as usize]);
        }
    }

    #[test]
    fn readonly_view_is_unaffected_by_uncommitted_updates_to_existing_pages() {
        // spec.md §8 scenario 3: update every existing element under a
        // write transaction and confirm a concurrent read-only view
        // still returns the pre-transaction values throughout, while
        // the write view sees the new ones.
        let (_dir, da) = make_array(256);
        da.begin_write();
        for _ in 0..1000u64 {
            da.push_back(0).unwrap();
        }
        da.checkpoint_in_memory_if_necessary();

        da.begin_write();
        for i in 0..1000u64 {
            da.update(i, i).unwrap();
        }
        for i in 0..1000u64 {
            assert_eq!(da.get(i, TxnView::ReadOnly).unwrap(), 0);
            assert_eq!(da.get(i, TxnView::Write).unwrap(), i);
        }
        da.stage_for_commit().unwrap();
        da.checkpoint_in_memory_if_necessary();
        for i in 0..1000u64 {
            assert_eq!(da.get(i, TxnView::ReadOnly).unwrap(), i);
        }
    }

    #[test]
    fn rollback_after_updating_existing_elements_restores_exact_bytes() {
        let (_dir, da) = make_array(256);
        da.begin_write();
        for i in 0..50u64 {
            da.push_back(i * 3).unwrap();
        }
        da.checkpoint_in_memory_if_necessary();

        da.begin_write();
        for i in 0..50u64 {
            da.update(i, 999).unwrap();
        }
        da.rollback_in_memory_if_necessary();

        for i in 0..50u64 {
            assert_eq!(da.get(i, TxnView::ReadOnly).unwrap(), i * 3);
        }
    }

    #[test]
    fn update_on_wal_only_page_is_legal_in_same_transaction() {
        let (_dir, da) = make_array(256);
        da.begin_write();
        da.push_back(1).unwrap();
        da.push_back(2).unwrap();
        da.update(1, 42).unwrap();
        assert_eq!(da.get(1, TxnView::Write).unwrap(), 42);
        da.checkpoint_in_memory_if_necessary();
        assert_eq!(da.get(1, TxnView::ReadOnly).unwrap(), 42);
    }

    #[test]
    fn out_of_range_read_fails() {
        let (_dir, da) = make_array(256);
        assert!(da.get(0, TxnView::ReadOnly).is_err());
        da.begin_write();
        da.push_back(1).unwrap();
        assert!(da.get(1, TxnView::Write).is_err());
    }

    #[test]
    fn spans_multiple_pip_pages() {
        // Tiny page size forces a short pip_capacity so this test
        // exercises PIP-chain growth without pushing millions of
        // elements.
        let (_dir, da) = make_array(64);
        da.begin_write();
        for i in 0..2000u64 {
            da.push_back(i).unwrap();
        }
        da.checkpoint_in_memory_if_necessary();
        for i in (0..2000u64).step_by(97) {
            assert_eq!(da.get(i, TxnView::ReadOnly).unwrap(), i);
        }
    }
}
