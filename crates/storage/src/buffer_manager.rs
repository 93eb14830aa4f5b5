//! Pin/unpin buffer pool over fixed-size frames, with two-handed
//! clock/MARK eviction.
//!
//! Mirrors spec.md §4.2: one hand sweeps `UNLOCKED` frames to `MARKED`,
//! the other sweeps `MARKED` frames to eviction (flushing first if
//! dirty). No frame with a nonzero pin count is ever chosen as a
//! victim.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::file_handle::FileHandle;
use crate::page_state::{FrameState, PageState};
use vertexdb_core::ids::{FrameIdx, PageIdx};
use vertexdb_core::{Error, Result};

/// Whether `pin` should read the page's existing content from disk or
/// leave the frame's buffer untouched (for freshly allocated pages
/// whose content is about to be overwritten wholesale).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinPolicy {
    /// Populate the frame from disk.
    ReadPage,
    /// Leave the frame's content as-is (typically zeroed).
    DontReadPage,
}

/// The (file, logical page) key identifying what a frame currently
/// holds. `file_key` is the owning `FileHandle`'s `Arc` pointer
/// identity, stable for as long as the caller holds that `Arc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FrameKey {
    file_key: usize,
    logical_page_idx: PageIdx,
}

struct Frame {
    state: PageState,
    data: RwLock<Vec<u8>>,
    pin_count: AtomicU32,
    owner: RwLock<Option<FrameKey>>,
}

impl Frame {
    fn new(page_size: usize) -> Self {
        Frame {
            state: PageState::new(),
            data: RwLock::new(vec![0u8; page_size]),
            pin_count: AtomicU32::new(0),
            owner: RwLock::new(None),
        }
    }
}

/// A fixed-capacity pool of page frames shared across all open files.
pub struct BufferManager {
    page_size: usize,
    frames: Vec<Frame>,
    page_table: DashMap<FrameKey, FrameIdx>,
    file_registry: DashMap<usize, Arc<FileHandle>>,
    clock_hand_mark: AtomicUsize,
    clock_hand_evict: AtomicUsize,
}

fn file_key(file_handle: &Arc<FileHandle>) -> usize {
    Arc::as_ptr(file_handle) as usize
}

impl BufferManager {
    /// Builds a buffer pool with `capacity` frames, each `page_size`
    /// bytes.
    pub fn new(page_size: usize, capacity: usize) -> Self {
        let frames = (0..capacity).map(|_| Frame::new(page_size)).collect();
        BufferManager {
            page_size,
            frames,
            page_table: DashMap::new(),
            file_registry: DashMap::new(),
            clock_hand_mark: AtomicUsize::new(0),
            clock_hand_evict: AtomicUsize::new(0),
        }
    }

    /// Page size served by this pool.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of frames in the pool.
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Pins `logical_page_idx` of `file_handle`, faulting it in if
    /// necessary. Returns the frame index; the caller must call
    /// [`unpin`](Self::unpin) exactly once per successful `pin`.
    pub fn pin(
        &self,
        file_handle: &Arc<FileHandle>,
        logical_page_idx: PageIdx,
        policy: PinPolicy,
    ) -> Result<FrameIdx> {
        let key = FrameKey {
            file_key: file_key(file_handle),
            logical_page_idx,
        };
        self.file_registry
            .entry(key.file_key)
            .or_insert_with(|| Arc::clone(file_handle));
        if let Some(entry) = self.page_table.get(&key) {
            let frame_idx = *entry;
            drop(entry);
            self.frames[frame_idx as usize]
                .pin_count
                .fetch_add(1, Ordering::AcqRel);
            return Ok(frame_idx);
        }
        let frame_idx = self.find_free_or_evict(file_handle)?;
        let frame = &self.frames[frame_idx as usize];
        let old = frame.state.load();
        frame.state.spin_lock();
        let _ = old;
        if policy == PinPolicy::ReadPage {
            let physical = file_handle.physical_page_idx(logical_page_idx)?;
            let mut buf = frame.data.write();
            file_handle.read_physical_page(physical, &mut buf)?;
        }
        *frame.owner.write() = Some(key);
        frame.pin_count.store(1, Ordering::Release);
        frame.state.unlock();
        self.page_table.insert(key, frame_idx);
        Ok(frame_idx)
    }

    /// Releases one pin on `logical_page_idx` of `file_handle`. The
    /// frame becomes eligible for eviction once its pin count reaches
    /// zero, but is not flushed until actually chosen as a victim.
    pub fn unpin(&self, file_handle: &Arc<FileHandle>, logical_page_idx: PageIdx) {
        let key = FrameKey {
            file_key: file_key(file_handle),
            logical_page_idx,
        };
        if let Some(entry) = self.page_table.get(&key) {
            let frame_idx = *entry;
            self.frames[frame_idx as usize]
                .pin_count
                .fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Read access to a pinned frame's backing buffer.
    pub fn frame_data(&self, frame_idx: FrameIdx) -> parking_lot::RwLockReadGuard<'_, Vec<u8>> {
        self.frames[frame_idx as usize].data.read()
    }

    /// Write access to a pinned frame's backing buffer. Marks the
    /// frame dirty.
    pub fn frame_data_mut(&self, frame_idx: FrameIdx) -> parking_lot::RwLockWriteGuard<'_, Vec<u8>> {
        let frame = &self.frames[frame_idx as usize];
        let old = frame.state.load();
        frame.state.spin_lock();
        let _ = old;
        frame.state.set_dirty();
        frame.state.unlock();
        frame.data.write()
    }

    /// Flushes every dirty frame belonging to `file_handle` to disk,
    /// used at checkpoint.
    pub fn flush_all_dirty_pages(&self, file_handle: &Arc<FileHandle>) -> Result<()> {
        let key = file_key(file_handle);
        for frame in &self.frames {
            let owner = *frame.owner.read();
            let Some(owner) = owner else { continue };
            if owner.file_key != key {
                continue;
            }
            if !frame.state.is_dirty() {
                continue;
            }
            self.flush_frame(frame, file_handle, owner.logical_page_idx)?;
        }
        Ok(())
    }

    /// Evicts every frame belonging to `file_handle` from the pool,
    /// without requiring they be unpinned first pin-checked — used
    /// when a file (e.g. the WAL) is deleted outright and its frames
    /// must not be flushed back to a now-gone file.
    pub fn remove_file_pages_from_frames(&self, file_handle: &Arc<FileHandle>) {
        let key = file_key(file_handle);
        self.page_table.retain(|k, _| k.file_key != key);
        for frame in &self.frames {
            let mut owner = frame.owner.write();
            if owner.map(|o| o.file_key) == Some(key) {
                *owner = None;
                frame.state.clear_dirty_without_lock();
                frame.state.reset_to_evicted();
            }
        }
    }

    fn flush_frame(
        &self,
        frame: &Frame,
        file_handle: &Arc<FileHandle>,
        logical_page_idx: PageIdx,
    ) -> Result<()> {
        let physical = file_handle.physical_page_idx(logical_page_idx)?;
        let buf = frame.data.read();
        file_handle.write_physical_page(physical, &buf)?;
        drop(buf);
        frame.state.clear_dirty_without_lock();
        Ok(())
    }

    fn find_free_or_evict(&self, file_handle: &Arc<FileHandle>) -> Result<FrameIdx> {
        if let Some(idx) = self
            .frames
            .iter()
            .position(|f| f.state.state() == FrameState::Evicted)
        {
            return Ok(idx as FrameIdx);
        }
        self.clock_sweep(file_handle)
    }

    /// Two-handed clock sweep: the mark hand advances over frames
    /// transitioning `UNLOCKED -> MARKED`; the evict hand advances
    /// over frames transitioning `MARKED -> EVICTED`, flushing first
    /// if dirty. Runs both hands until a victim is produced.
    fn clock_sweep(&self, file_handle: &Arc<FileHandle>) -> Result<FrameIdx> {
        let n = self.frames.len();
        if n == 0 {
            return Err(Error::storage("buffer pool has zero capacity"));
        }
        let mut spins = 0usize;
        loop {
            let mark_idx = self.clock_hand_mark.fetch_add(1, Ordering::AcqRel) % n;
            let mark_frame = &self.frames[mark_idx];
            if mark_frame.pin_count.load(Ordering::Acquire) == 0 {
                let old = mark_frame.state.load();
                if PageState::state_of(old) == FrameState::Unlocked {
                    let _ = mark_frame.try_mark(old);
                }
            }

            let evict_idx = self.clock_hand_evict.fetch_add(1, Ordering::AcqRel) % n;
            let evict_frame = &self.frames[evict_idx];
            if evict_frame.pin_count.load(Ordering::Acquire) == 0 {
                let old = evict_frame.state.load();
                if PageState::state_of(old) == FrameState::Marked
                    && evict_frame.try_clear_mark(old)
                {
                    let old = evict_frame.load_locked();
                    let owner = *evict_frame.owner.read();
                    if let Some(owner) = owner {
                        if evict_frame.state.is_dirty() {
                            // The victim may belong to a different file than
                            // the one we're pinning for (the pool is shared
                            // across every file a `Catalog` opens) — look its
                            // handle up in `file_registry` rather than only
                            // flushing when it happens to match `file_handle`.
                            if owner.file_key == file_key(file_handle) {
                                self.flush_frame(evict_frame, file_handle, owner.logical_page_idx)?;
                            } else if let Some(owner_handle) = self.file_registry.get(&owner.file_key) {
                                self.flush_frame(evict_frame, owner_handle.value(), owner.logical_page_idx)?;
                            } else {
                                return Err(Error::internal(
                                    "evicting a dirty frame whose owning file is not in file_registry",
                                ));
                            }
                        }
                    }
                    let _ = old;
                    self.page_table.retain(|_, v| *v != evict_idx as FrameIdx);
                    *evict_frame.owner.write() = None;
                    evict_frame.state.reset_to_evicted();
                    return Ok(evict_idx as FrameIdx);
                }
            }

            spins += 1;
            if spins > n * 4 {
                return Err(Error::storage(
                    "buffer pool exhausted: no unpinned frame available for eviction",
                ));
            }
        }
    }
}

impl PageState {
    /// Locks and immediately returns the pre-lock word, used by the
    /// evict hand which already holds exclusive knowledge that the
    /// frame is unreachable by other pinners (pin_count == 0 observed
    /// under the page table lock).
    fn load_locked(&self) -> u64 {
        let old = self.load();
        self.spin_lock();
        old
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn pin_then_unpin_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fh = Arc::new(FileHandle::open(dir.path().join("data"), 4096).unwrap());
        let logical = fh.add_new_page().unwrap();
        let bm = BufferManager::new(4096, 4);
        let frame_idx = bm.pin(&fh, logical, PinPolicy::DontReadPage).unwrap();
        {
            let mut data = bm.frame_data_mut(frame_idx);
            data[0] = 42;
        }
        assert_eq!(bm.frame_data(frame_idx)[0], 42);
        bm.unpin(&fh, logical);
    }

    #[test]
    fn repinning_same_page_returns_same_frame() {
        let dir = tempfile::tempdir().unwrap();
        let fh = Arc::new(FileHandle::open(dir.path().join("data"), 4096).unwrap());
        let logical = fh.add_new_page().unwrap();
        let bm = BufferManager::new(4096, 4);
        let f0 = bm.pin(&fh, logical, PinPolicy::DontReadPage).unwrap();
        let f1 = bm.pin(&fh, logical, PinPolicy::DontReadPage).unwrap();
        assert_eq!(f0, f1);
        bm.unpin(&fh, logical);
        bm.unpin(&fh, logical);
    }

    #[test]
    fn flush_all_dirty_pages_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let fh = Arc::new(FileHandle::open(dir.path().join("data"), 4096).unwrap());
        let logical = fh.add_new_page().unwrap();
        let bm = BufferManager::new(4096, 4);
        let frame_idx = bm.pin(&fh, logical, PinPolicy::DontReadPage).unwrap();
        bm.frame_data_mut(frame_idx)[0] = 7;
        bm.flush_all_dirty_pages(&fh).unwrap();
        let physical = fh.physical_page_idx(logical).unwrap();
        let mut buf = vec![0u8; 4096];
        fh.read_physical_page(physical, &mut buf).unwrap();
        assert_eq!(buf[0], 7);
        bm.unpin(&fh, logical);
    }

    #[test]
    fn eviction_recycles_frames_beyond_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let fh = Arc::new(FileHandle::open(dir.path().join("data"), 4096).unwrap());
        let bm = BufferManager::new(4096, 2);
        let mut logicals = Vec::new();
        for _ in 0..5 {
            let logical = fh.add_new_page().unwrap();
            let frame_idx = bm.pin(&fh, logical, PinPolicy::DontReadPage).unwrap();
            bm.unpin(&fh, logical);
            logicals.push((logical, frame_idx));
        }
        // No assertion on exact frame reuse pattern; this exercises the
        // sweep loop under more logical pages than frames without
        // panicking or deadlocking.
        assert_eq!(logicals.len(), 5);
    }
}
