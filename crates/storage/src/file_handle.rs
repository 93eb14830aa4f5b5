//! Logical-to-physical page mapping and free-page tracking for a
//! single on-disk file.
//!
//! A [`FileHandle`] grows monotonically: physical pages are appended,
//! never renumbered, though freed physical slots are recycled through
//! the free-page bitmap before the file is extended. During a write
//! transaction, an "original" handle (committed pages) and a
//! "WAL-version" shadow handle (this transaction's uncommitted pages,
//! physically stored in the WAL file) coexist — see
//! `vertexdb-durability` for how the shadow handle's pages are staged.

use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use vertexdb_core::ids::PageIdx;
use vertexdb_core::{Error, Result};

/// A simple growable bitmap of freed physical page indices, checked
/// before extending the file with a brand-new page.
#[derive(Debug, Default)]
struct FreePageBitmap {
    free: Vec<PageIdx>,
}

impl FreePageBitmap {
    fn take(&mut self) -> Option<PageIdx> {
        self.free.pop()
    }

    fn put(&mut self, page_idx: PageIdx) {
        self.free.push(page_idx);
    }
}

/// Maps logical page indices to physical page indices within a single
/// backing file, and tracks which physical pages are free for reuse.
pub struct FileHandle {
    file: Mutex<File>,
    path: PathBuf,
    page_size: usize,
    logical_to_physical: RwLock<Vec<PageIdx>>,
    free_pages: Mutex<FreePageBitmap>,
    num_physical_pages: AtomicU64,
}

impl FileHandle {
    /// Opens (creating if necessary) the file at `path` as a page
    /// store with the given page size.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        vertexdb_core::config::validate_page_size(page_size)?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        let len = file.metadata().map_err(|e| Error::io(&path, e))?.len();
        let num_physical_pages = len / page_size as u64;
        Ok(FileHandle {
            file: Mutex::new(file),
            path,
            page_size,
            logical_to_physical: RwLock::new((0..num_physical_pages as PageIdx).collect()),
            free_pages: Mutex::new(FreePageBitmap::default()),
            num_physical_pages: AtomicU64::new(num_physical_pages),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of logical pages currently mapped.
    pub fn num_pages(&self) -> usize {
        self.logical_to_physical.read().len()
    }

    /// Physical page index backing `logical_page_idx`.
    pub fn physical_page_idx(&self, logical_page_idx: PageIdx) -> Result<PageIdx> {
        self.logical_to_physical
            .read()
            .get(logical_page_idx as usize)
            .copied()
            .ok_or_else(|| Error::storage(format!("logical page {logical_page_idx} out of range")))
    }

    /// Reassigns the physical page backing `logical_page_idx`. Used
    /// when promoting a WAL-staged page to its final location.
    pub fn set_physical_page_idx(&self, logical_page_idx: PageIdx, physical_page_idx: PageIdx) {
        let mut map = self.logical_to_physical.write();
        if logical_page_idx as usize >= map.len() {
            map.resize(logical_page_idx as usize + 1, 0);
        }
        map[logical_page_idx as usize] = physical_page_idx;
    }

    /// Allocates a new logical page, mapped to either a recycled
    /// physical slot or a freshly appended one, and returns its
    /// logical index.
    pub fn add_new_page(&self) -> Result<PageIdx> {
        let physical = self.allocate_physical_page()?;
        let mut map = self.logical_to_physical.write();
        let logical = map.len() as PageIdx;
        map.push(physical);
        Ok(logical)
    }

    fn allocate_physical_page(&self) -> Result<PageIdx> {
        if let Some(recycled) = self.free_pages.lock().take() {
            return Ok(recycled);
        }
        let idx = self.num_physical_pages.fetch_add(1, Ordering::AcqRel) as PageIdx;
        let file = self.file.lock();
        let offset = idx as u64 * self.page_size as u64;
        file.set_len(offset + self.page_size as u64)
            .map_err(|e| Error::io(&self.path, e))?;
        Ok(idx)
    }

    /// Returns a physical page to the free list for reuse by a future
    /// `add_new_page`. Does not shrink the file.
    pub fn free_physical_page(&self, physical_page_idx: PageIdx) {
        self.free_pages.lock().put(physical_page_idx);
    }

    /// Reads the physical page `physical_page_idx` into `buf`, which
    /// must be exactly `page_size()` bytes.
    pub fn read_physical_page(&self, physical_page_idx: PageIdx, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        let mut file = self.file.lock();
        let offset = physical_page_idx as u64 * self.page_size as u64;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io(&self.path, e))?;
        file.read_exact(buf).map_err(|e| Error::io(&self.path, e))
    }

    /// Writes `buf` (exactly `page_size()` bytes) to physical page
    /// `physical_page_idx`.
    pub fn write_physical_page(&self, physical_page_idx: PageIdx, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        let mut file = self.file.lock();
        let offset = physical_page_idx as u64 * self.page_size as u64;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io(&self.path, e))?;
        file.write_all(buf).map_err(|e| Error::io(&self.path, e))
    }

    /// Flushes OS buffers for this file without fsync (matching the
    /// teacher's `flush()` / `fsync()` split in WAL writing).
    pub fn flush(&self) -> Result<()> {
        self.file
            .lock()
            .flush()
            .map_err(|e| Error::io(&self.path, e))
    }

    /// Forces durable fsync of this file.
    pub fn sync_all(&self) -> Result<()> {
        self.file
            .lock()
            .sync_all()
            .map_err(|e| Error::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_new_page_grows_file() {
        let dir = tempfile::tempdir().unwrap();
        let fh = FileHandle::open(dir.path().join("data"), 4096).unwrap();
        assert_eq!(fh.num_pages(), 0);
        let p0 = fh.add_new_page().unwrap();
        let p1 = fh.add_new_page().unwrap();
        assert_eq!(p0, 0);
        assert_eq!(p1, 1);
        assert_eq!(fh.num_pages(), 2);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let fh = FileHandle::open(dir.path().join("data"), 4096).unwrap();
        let logical = fh.add_new_page().unwrap();
        let physical = fh.physical_page_idx(logical).unwrap();
        let mut page = vec![0u8; 4096];
        page[0] = 0xAB;
        page[4095] = 0xCD;
        fh.write_physical_page(physical, &page).unwrap();
        let mut buf = vec![0u8; 4096];
        fh.read_physical_page(physical, &mut buf).unwrap();
        assert_eq!(buf, page);
    }

    #[test]
    fn freed_physical_page_is_recycled() {
        let dir = tempfile::tempdir().unwrap();
        let fh = FileHandle::open(dir.path().join("data"), 4096).unwrap();
        let l0 = fh.add_new_page().unwrap();
        let p0 = fh.physical_page_idx(l0).unwrap();
        fh.free_physical_page(p0);
        let l1 = fh.add_new_page().unwrap();
        let p1 = fh.physical_page_idx(l1).unwrap();
        assert_eq!(p0, p1);
    }

    #[test]
    fn reopen_recovers_existing_page_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        {
            let fh = FileHandle::open(&path, 4096).unwrap();
            fh.add_new_page().unwrap();
            fh.add_new_page().unwrap();
        }
        let fh = FileHandle::open(&path, 4096).unwrap();
        assert_eq!(fh.num_pages(), 2);
    }
}
