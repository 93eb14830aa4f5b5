//! Variable-length lists storage (spec.md §3, §4.6): per-node list
//! headers, CSR-chunked small-list page groups, and large lists with
//! private page chains.
//!
//! Three files back one logical "list structure" (adjacency list or
//! unstructured-property list, per direction/property as named by a
//! [`vertexdb_core::StorageStructureId::Lists`]):
//! - a **headers** file: one [`ListHeader`] per node, via [`ListsHeaders`];
//! - a **metadata** file: [`ListsMetadata`]'s three/four disk arrays;
//! - a **data** file: raw bytes addressed through the page groups
//!   `ListsMetadata` maintains.
//!
//! List contents are always handled as byte blobs (`element_size`
//! bytes per logical element): an adjacency list's elements are fixed
//! width (neighbor node id, optionally paired with a rel id), while an
//! unstructured-property list's single "element" *is* the whole
//! encoded property blob for that node (`element_size == 1`). This
//! keeps one reader/writer path for both, matching how the Local
//! Update Store already stages updates as raw `PropertyListBuffer`s
//! (spec.md §3).

use std::sync::Arc;

use parking_lot::Mutex;

use vertexdb_core::config::LISTS_CHUNK_SIZE;
use vertexdb_core::ids::PageIdx;
use vertexdb_core::{Error, Result, StorageStructureId};

use crate::buffer_manager::{BufferManager, PinPolicy};
use crate::disk_array::{DiskArray, DiskArrayElement, DiskArrayHeader, TxnView};
use crate::file_handle::FileHandle;
use crate::page_sink::PageSink;

/// Default element count above which a small list is promoted to a
/// large list with its own private page chain (spec.md §4.6 step 3).
pub const DEFAULT_PROMOTION_THRESHOLD: u32 = 256;

const LARGE_FLAG: u32 = 1 << 31;
const LENGTH_BITS: u32 = 12;
const LENGTH_MASK: u32 = (1 << LENGTH_BITS) - 1;

/// A node's 32-bit list header: either `(small, csr_offset, length)` or
/// `(large, large_list_id)` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListHeader(pub u32);

impl ListHeader {
    /// An empty small list at offset 0.
    pub fn empty() -> Self {
        ListHeader::small(0, 0)
    }

    /// Builds a small-list header. `csr_offset` must fit in
    /// `31 - LENGTH_BITS` bits and `length` in `LENGTH_BITS` bits —
    /// callers must promote to large before exceeding either.
    pub fn small(csr_offset: u32, length: u32) -> Self {
        debug_assert!(length <= LENGTH_MASK);
        debug_assert!(csr_offset <= (u32::MAX >> (LENGTH_BITS + 1)));
        ListHeader((csr_offset << LENGTH_BITS) | (length & LENGTH_MASK))
    }

    /// Builds a large-list header referencing `large_list_id`.
    pub fn large(large_list_id: u32) -> Self {
        debug_assert!(large_list_id & LARGE_FLAG == 0);
        ListHeader(LARGE_FLAG | large_list_id)
    }

    /// Whether this header names a large list.
    pub fn is_large(&self) -> bool {
        self.0 & LARGE_FLAG != 0
    }

    /// `(csr_offset, length)` of a small-list header. Panics (debug)
    /// if called on a large-list header.
    pub fn small_parts(&self) -> (u32, u32) {
        debug_assert!(!self.is_large());
        (self.0 >> LENGTH_BITS, self.0 & LENGTH_MASK)
    }

    /// The large-list id of a large-list header. Panics (debug) if
    /// called on a small-list header.
    pub fn large_list_id(&self) -> u32 {
        debug_assert!(self.is_large());
        self.0 & !LARGE_FLAG
    }
}

impl DiskArrayElement for ListHeader {
    const SIZE: usize = 4;
    fn encode(&self, buf: &mut [u8]) {
        self.0.encode(buf)
    }
    fn decode(buf: &[u8]) -> Self {
        ListHeader(u32::decode(buf))
    }
}

/// `ListsHeaders`: one [`ListHeader`] per node offset.
pub type ListsHeaders = DiskArray<ListHeader>;

const PAGES_PER_GROUP: usize = 3;
const GROUP_NEXT_NONE: u32 = u32::MAX;
const CHAIN_HEAD_NONE: u32 = u32::MAX;

/// An entry in the `page_lists` pool: up to [`PAGES_PER_GROUP`] data
/// pages plus a pointer to the next group in the chain (spec.md
/// §4.6: "a free-list-threaded pool of 4-element page-index groups
/// whose last slot is a next pointer" — modeled here as 3 page slots
/// + 1 next-pointer slot, 4 `u32`s wide).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageListGroup {
    /// Data-file logical page indices held by this group.
    /// `PageIdx::MAX` marks an unused slot.
    pub pages: [PageIdx; PAGES_PER_GROUP],
    /// Index of the next group in this chain within the `page_lists`
    /// pool, or [`GROUP_NEXT_NONE`].
    pub next: u32,
}

impl PageListGroup {
    fn empty() -> Self {
        PageListGroup {
            pages: [PageIdx::MAX; PAGES_PER_GROUP],
            next: GROUP_NEXT_NONE,
        }
    }
}

impl DiskArrayElement for PageListGroup {
    const SIZE: usize = 16;
    fn encode(&self, buf: &mut [u8]) {
        for (i, p) in self.pages.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&p.to_le_bytes());
        }
        buf[12..16].copy_from_slice(&self.next.to_le_bytes());
    }
    fn decode(buf: &[u8]) -> Self {
        let mut pages = [0u32; PAGES_PER_GROUP];
        for (i, p) in pages.iter_mut().enumerate() {
            *p = u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        }
        let next = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        PageListGroup { pages, next }
    }
}

/// The three (here, four) disk arrays backing chunk page groups and
/// large-list private page chains (spec.md §4.6).
pub struct ListsMetadata {
    /// Per-chunk head index into `page_lists`, or [`CHAIN_HEAD_NONE`]
    /// for an as-yet-empty chunk.
    pub chunk_to_page_list_head: DiskArray<u32>,
    /// Per-large-list head index into `page_lists`.
    pub large_list_to_page_list_head: DiskArray<u32>,
    /// Per-large-list element count (large lists have no inline
    /// length field in their header, unlike small lists).
    pub large_list_length: DiskArray<u32>,
    /// The shared pool of page-index groups.
    pub page_lists: DiskArray<PageListGroup>,
    /// In-memory free list of `page_lists` pool slots available for
    /// reuse. Not persisted across restarts: a cold start simply never
    /// reuses groups freed by a prior process, which is safe (just
    /// less space-efficient) — see `DESIGN.md`. Kept as a plain
    /// in-memory stack, not threaded through the on-disk `next`
    /// pointers, so folding pending frees into it at commit time
    /// ([`ListsMetadata::checkpoint_in_memory_if_necessary`]) needs no
    /// further disk write.
    free_group_head: Mutex<Vec<u32>>,
    /// In-memory free list of data-file logical pages reclaimed from
    /// freed groups, preferred over allocating brand-new pages from
    /// the data file. Also not persisted; same rationale.
    free_pages: Mutex<Vec<PageIdx>>,
    /// Groups/pages freed by the *current* write transaction.
    /// Deliberately kept out of `free_group_head`/`free_pages` until
    /// the transaction durably commits: those structures back raw
    /// buffer-pool pages with no per-transaction overlay (unlike
    /// `DiskArray`'s `update`), so recycling one mid-transaction would
    /// let a fresh write physically overwrite bytes a concurrent
    /// read-only transaction is still entitled to see through the old,
    /// not-yet-replaced chunk/large-list head — and would leave
    /// rollback unable to restore them. See `DESIGN.md`.
    pending_free_groups: Mutex<Vec<u32>>,
    pending_free_pages: Mutex<Vec<PageIdx>>,
}

impl ListsMetadata {
    /// Wraps three/four already-open `DiskArray`s as one
    /// `ListsMetadata`.
    pub fn new(
        chunk_to_page_list_head: DiskArray<u32>,
        large_list_to_page_list_head: DiskArray<u32>,
        large_list_length: DiskArray<u32>,
        page_lists: DiskArray<PageListGroup>,
    ) -> Self {
        ListsMetadata {
            chunk_to_page_list_head,
            large_list_to_page_list_head,
            large_list_length,
            page_lists,
            free_group_head: Mutex::new(Vec::new()),
            free_pages: Mutex::new(Vec::new()),
            pending_free_groups: Mutex::new(Vec::new()),
            pending_free_pages: Mutex::new(Vec::new()),
        }
    }

    /// Begins the write transaction for all four underlying disk arrays.
    pub fn begin_write(&self) {
        self.chunk_to_page_list_head.begin_write();
        self.large_list_to_page_list_head.begin_write();
        self.large_list_length.begin_write();
        self.page_lists.begin_write();
    }

    /// Stages every underlying disk array's page overlays into their
    /// shared frames, ready for the WAL to snapshot. Must be called
    /// before the owning transaction hands off to the WAL for commit.
    pub fn stage_for_commit(&self) -> Result<()> {
        self.chunk_to_page_list_head.stage_for_commit()?;
        self.large_list_to_page_list_head.stage_for_commit()?;
        self.large_list_length.stage_for_commit()?;
        self.page_lists.stage_for_commit()
    }

    /// Commits: reconciles every underlying disk array's header, and
    /// folds this transaction's pending frees into the reusable pools
    /// now that they can no longer be rolled back out from under a
    /// concurrent reader.
    pub fn checkpoint_in_memory_if_necessary(&self) {
        self.chunk_to_page_list_head.checkpoint_in_memory_if_necessary();
        self.large_list_to_page_list_head.checkpoint_in_memory_if_necessary();
        self.large_list_length.checkpoint_in_memory_if_necessary();
        self.page_lists.checkpoint_in_memory_if_necessary();
        self.free_pages.lock().append(&mut self.pending_free_pages.lock());
        self.free_group_head.lock().append(&mut self.pending_free_groups.lock());
    }

    /// Rolls back every underlying disk array's shadow header and
    /// discards this transaction's pending frees — they were never
    /// folded into the reusable pools, so the old groups/pages remain
    /// exactly as the (now-reverted) headers still describe them.
    pub fn rollback_in_memory_if_necessary(&self) {
        self.chunk_to_page_list_head.rollback_in_memory_if_necessary();
        self.large_list_to_page_list_head.rollback_in_memory_if_necessary();
        self.large_list_length.rollback_in_memory_if_necessary();
        self.page_lists.rollback_in_memory_if_necessary();
        self.pending_free_groups.lock().clear();
        self.pending_free_pages.lock().clear();
    }

    /// Collects every page logical index in the chain rooted at
    /// `head`, in order.
    fn pages_in_chain(&self, head: u32, view: TxnView) -> Result<Vec<PageIdx>> {
        let mut pages = Vec::new();
        let mut cur = head;
        while cur != GROUP_NEXT_NONE {
            let group = self.page_lists.get(cur as u64, view)?;
            for p in group.pages {
                if p != PageIdx::MAX {
                    pages.push(p);
                }
            }
            cur = group.next;
        }
        Ok(pages)
    }

    /// Pages backing chunk `chunk_id`'s small-list region.
    pub fn pages_for_chunk(&self, chunk_id: u64, view: TxnView) -> Result<Vec<PageIdx>> {
        if chunk_id >= self.chunk_to_page_list_head.len(view) {
            return Ok(Vec::new());
        }
        let head = self.chunk_to_page_list_head.get(chunk_id, view)?;
        if head == CHAIN_HEAD_NONE {
            Ok(Vec::new())
        } else {
            self.pages_in_chain(head, view)
        }
    }

    /// Pages backing large list `large_list_id`'s private page chain.
    pub fn pages_for_large_list(&self, large_list_id: u32, view: TxnView) -> Result<Vec<PageIdx>> {
        let head = self
            .large_list_to_page_list_head
            .get(large_list_id as u64, view)?;
        self.pages_in_chain(head, view)
    }

    fn take_free_page(&self) -> Option<PageIdx> {
        self.free_pages.lock().pop()
    }

    fn take_free_group(&self) -> Option<u32> {
        self.free_group_head.lock().pop()
    }

    fn allocate_group(&self) -> Result<u32> {
        if let Some(idx) = self.take_free_group() {
            self.page_lists.update(idx as u64, PageListGroup::empty())?;
            Ok(idx)
        } else {
            let idx = self.page_lists.len(TxnView::Write);
            self.page_lists.push_back(PageListGroup::empty())?;
            Ok(idx as u32)
        }
    }

    /// Builds a fresh page chain (not reachable from any existing
    /// head) with exactly `num_pages` data pages, taking pages from
    /// the free-page pool before allocating new ones from `data_file`.
    /// Returns the new chain's head index into `page_lists`.
    pub fn build_chain(&self, num_pages: usize, data_file: &Arc<FileHandle>) -> Result<u32> {
        if num_pages == 0 {
            return Ok(CHAIN_HEAD_NONE);
        }
        let mut group_indices = Vec::new();
        let mut remaining = num_pages;
        while remaining > 0 {
            let take = remaining.min(PAGES_PER_GROUP);
            let mut pages = [PageIdx::MAX; PAGES_PER_GROUP];
            for p in pages.iter_mut().take(take) {
                *p = match self.take_free_page() {
                    Some(existing) => existing,
                    None => data_file.add_new_page()?,
                };
            }
            let group_idx = self.allocate_group()?;
            self.page_lists.update(
                group_idx as u64,
                PageListGroup {
                    pages,
                    next: GROUP_NEXT_NONE,
                },
            )?;
            group_indices.push(group_idx);
            remaining -= take;
        }
        for pair in group_indices.windows(2) {
            let (cur, next) = (pair[0], pair[1]);
            let mut group = self.page_lists.get(cur as u64, TxnView::Write)?;
            group.next = next;
            self.page_lists.update(cur as u64, group)?;
        }
        Ok(group_indices[0])
    }

    /// Frees every group and page in the chain rooted at `head`. The
    /// freed groups/pages are staged as *pending* (spec.md §4.6 step
    /// 5) rather than made immediately reusable: they only join the
    /// real free pools once this transaction's
    /// [`ListsMetadata::checkpoint_in_memory_if_necessary`] runs, so a
    /// concurrent read-only transaction reading the chunk/large-list
    /// this chain belonged to (via its own, still-unreplaced head)
    /// can't have its pages pulled out from under it and overwritten
    /// before this transaction is durable.
    pub fn free_chain(&self, head: u32) -> Result<()> {
        let mut cur = head;
        let mut freed_groups = Vec::new();
        while cur != GROUP_NEXT_NONE {
            let group = self.page_lists.get(cur as u64, TxnView::Write)?;
            for p in group.pages {
                if p != PageIdx::MAX {
                    self.pending_free_pages.lock().push(p);
                }
            }
            freed_groups.push(cur);
            cur = group.next;
        }
        let mut pending_groups = self.pending_free_groups.lock();
        for idx in freed_groups {
            self.page_lists.update(
                idx as u64,
                PageListGroup {
                    pages: [PageIdx::MAX; PAGES_PER_GROUP],
                    next: GROUP_NEXT_NONE,
                },
            )?;
            pending_groups.push(idx);
        }
        Ok(())
    }

    /// Sets chunk `chunk_id`'s page-group head, extending
    /// `chunk_to_page_list_head` with `CHAIN_HEAD_NONE` entries if
    /// `chunk_id` is beyond the array's current write-view length.
    pub fn set_chunk_head(&self, chunk_id: u64, head: u32) -> Result<()> {
        while self.chunk_to_page_list_head.len(TxnView::Write) <= chunk_id {
            self.chunk_to_page_list_head.push_back(CHAIN_HEAD_NONE)?;
        }
        self.chunk_to_page_list_head.update(chunk_id, head)
    }

    /// Allocates a new large-list id with `num_pages` private pages,
    /// returning the id.
    pub fn allocate_large_list(
        &self,
        num_pages: usize,
        num_elements: u32,
        data_file: &Arc<FileHandle>,
    ) -> Result<u32> {
        let head = self.build_chain(num_pages, data_file)?;
        let id = self.large_list_to_page_list_head.len(TxnView::Write) as u32;
        self.large_list_to_page_list_head.push_back(head)?;
        self.large_list_length.push_back(num_elements)?;
        Ok(id)
    }
}

/// A "no head yet" sentinel for [`ListsMetadata::chunk_to_page_list_head`].
pub const CHUNK_HEAD_NONE: u32 = CHAIN_HEAD_NONE;

/// A complete list structure: headers + metadata + a byte-addressable
/// data file, for one adjacency direction or one unstructured/
/// structured property list.
pub struct Lists {
    structure: StorageStructureId,
    /// Bytes per logical element (1 for unstructured property blobs,
    /// a fixed width for adjacency entries).
    pub element_size: usize,
    /// Element-count threshold above which a small list promotes to large.
    pub promotion_threshold: u32,
    /// Per-node headers.
    pub headers: ListsHeaders,
    /// Chunk/large-list page-group bookkeeping.
    pub metadata: ListsMetadata,
    data_file: Arc<FileHandle>,
    buffer_manager: Arc<BufferManager>,
    sink: Option<Arc<dyn PageSink>>,
}

impl Lists {
    /// Assembles a `Lists` structure from its three already-open
    /// pieces.
    pub fn new(
        structure: StorageStructureId,
        element_size: usize,
        promotion_threshold: u32,
        headers: ListsHeaders,
        metadata: ListsMetadata,
        data_file: Arc<FileHandle>,
        buffer_manager: Arc<BufferManager>,
        sink: Option<Arc<dyn PageSink>>,
    ) -> Self {
        Lists {
            structure,
            element_size,
            promotion_threshold,
            headers,
            metadata,
            data_file,
            buffer_manager,
            sink,
        }
    }

    fn chunk_id(&self, node_offset: u64) -> u64 {
        node_offset / LISTS_CHUNK_SIZE
    }

    /// Reads the full list content for `node_offset` as a byte blob,
    /// under `view`.
    pub fn read_list(&self, node_offset: u64, view: TxnView) -> Result<Vec<u8>> {
        if node_offset >= self.headers.len(view) {
            return Ok(Vec::new());
        }
        let header = self.headers.get(node_offset, view)?;
        if header.is_large() {
            let id = header.large_list_id();
            let len = self.metadata.large_list_length.get(id as u64, view)? as usize;
            let pages = self.metadata.pages_for_large_list(id, view)?;
            self.read_bytes(&pages, 0, len * self.element_size)
        } else {
            let (offset, length) = header.small_parts();
            let pages = self
                .metadata
                .pages_for_chunk(self.chunk_id(node_offset), view)?;
            self.read_bytes(
                &pages,
                offset as usize * self.element_size,
                length as usize * self.element_size,
            )
        }
    }

    fn read_bytes(&self, pages: &[PageIdx], byte_offset: usize, byte_len: usize) -> Result<Vec<u8>> {
        let page_size = self.buffer_manager.page_size();
        let mut out = vec![0u8; byte_len];
        let mut remaining = byte_len;
        let mut cur = byte_offset;
        let mut pos = 0usize;
        while remaining > 0 {
            let page_slot = cur / page_size;
            let in_page = cur % page_size;
            let logical = *pages
                .get(page_slot)
                .ok_or_else(|| Error::internal("list byte range exceeds allocated pages"))?;
            let take = remaining.min(page_size - in_page);
            let frame = self
                .buffer_manager
                .pin(&self.data_file, logical, PinPolicy::ReadPage)?;
            {
                let data = self.buffer_manager.frame_data(frame);
                out[pos..pos + take].copy_from_slice(&data[in_page..in_page + take]);
            }
            self.buffer_manager.unpin(&self.data_file, logical);
            cur += take;
            pos += take;
            remaining -= take;
        }
        Ok(out)
    }

    /// Writes `bytes` into `pages` starting at `byte_offset`,
    /// registering each touched page with the WAL sink.
    pub fn write_bytes(
        &self,
        pages: &[PageIdx],
        byte_offset: usize,
        bytes: &[u8],
        is_insert: bool,
    ) -> Result<()> {
        let page_size = self.buffer_manager.page_size();
        let mut remaining = bytes.len();
        let mut cur = byte_offset;
        let mut pos = 0usize;
        while remaining > 0 {
            let page_slot = cur / page_size;
            let in_page = cur % page_size;
            let logical = *pages
                .get(page_slot)
                .ok_or_else(|| Error::internal("list byte range exceeds allocated pages"))?;
            let take = remaining.min(page_size - in_page);
            let frame = self
                .buffer_manager
                .pin(&self.data_file, logical, PinPolicy::ReadPage)?;
            {
                let mut data = self.buffer_manager.frame_data_mut(frame);
                data[in_page..in_page + take].copy_from_slice(&bytes[pos..pos + take]);
            }
            self.buffer_manager.unpin(&self.data_file, logical);
            if let Some(sink) = &self.sink {
                sink.register_dirty_page(self.structure, &self.data_file, logical, is_insert)?;
            }
            cur += take;
            pos += take;
            remaining -= take;
        }
        Ok(())
    }

    /// The data file backing this list structure's pages.
    pub fn data_file(&self) -> &Arc<FileHandle> {
        &self.data_file
    }

    /// Page size of the buffer pool this structure reads/writes
    /// through.
    pub fn page_size(&self) -> usize {
        self.buffer_manager.page_size()
    }

    /// Begins the write transaction for the headers array and the
    /// metadata arrays together.
    pub fn begin_write(&self) {
        self.headers.begin_write();
        self.metadata.begin_write();
    }

    /// Materializes header-array overlays into shared buffer-pool
    /// frames and registers them with the WAL sink. Must run after
    /// [`ListsUpdateIterator::commit_all`](crate::lists_update_iterator::ListsUpdateIterator::commit_all)
    /// and before the WAL snapshots dirty pages for the commit record.
    pub fn stage_for_commit(&self) -> Result<()> {
        self.headers.stage_for_commit()?;
        self.metadata.stage_for_commit()
    }

    /// Reconciles headers and metadata in-memory headers after WAL
    /// replay has durably applied this transaction's staged pages.
    pub fn checkpoint_in_memory_if_necessary(&self) {
        self.headers.checkpoint_in_memory_if_necessary();
        self.metadata.checkpoint_in_memory_if_necessary();
    }

    /// Discards this transaction's shadow headers for both headers
    /// and metadata arrays.
    pub fn rollback_in_memory_if_necessary(&self) {
        self.headers.rollback_in_memory_if_necessary();
        self.metadata.rollback_in_memory_if_necessary();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_small_round_trips() {
        let h = ListHeader::small(1000, 42);
        assert!(!h.is_large());
        assert_eq!(h.small_parts(), (1000, 42));
    }

    #[test]
    fn header_large_round_trips() {
        let h = ListHeader::large(777);
        assert!(h.is_large());
        assert_eq!(h.large_list_id(), 777);
    }

    #[test]
    fn page_list_group_encode_decode() {
        let g = PageListGroup {
            pages: [1, 2, PageIdx::MAX],
            next: 9,
        };
        let mut buf = [0u8; 16];
        g.encode(&mut buf);
        let back = PageListGroup::decode(&buf);
        assert_eq!(back.pages, g.pages);
        assert_eq!(back.next, g.next);
    }
}
