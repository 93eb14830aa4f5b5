//! The seam between paged storage and the write-ahead log.
//!
//! `vertexdb-storage` structures (the [`crate::disk_array::DiskArray`]
//! and, through it, lists storage) need to tell *something* "this page
//! became dirty as part the current write transaction" without
//! depending on `vertexdb-durability` (which itself depends on
//! `vertexdb-storage` for `FileHandle`/`BufferManager` — a dependency
//! the other way round would cycle). [`PageSink`] is that seam: it is
//! implemented by `vertexdb-durability::wal::Wal` and injected into
//! storage structures at construction time.
//!
//! Registration is cheap and synchronous — it just records *which*
//! pages are dirty for the active transaction. The expensive part
//! (snapshotting each page's final content into the WAL file and
//! appending `PAGE_UPDATE_OR_INSERT` records) happens once, at commit
//! time, when the WAL walks its registered dirty-page set. This
//! avoids staging a stale snapshot on a page's *first* touch and
//! missing later writes to the same page within the same transaction.

use std::sync::Arc;

use vertexdb_core::ids::PageIdx;
use vertexdb_core::{Result, StorageStructureId};

use crate::file_handle::FileHandle;

/// Registers dirty pages produced by a write transaction so they can
/// be staged to the WAL at commit. Implemented by
/// `vertexdb-durability::wal::Wal`.
pub trait PageSink: Send + Sync {
    /// Records that `logical_page_idx` of `file` was written (or, if
    /// `is_insert`, newly allocated) by the current write transaction
    /// and is tagged with `structure` for WAL record reconstruction.
    /// Idempotent: registering the same `(file, logical_page_idx)`
    /// twice in one transaction is a no-op after the first call.
    fn register_dirty_page(
        &self,
        structure: StorageStructureId,
        file: &Arc<FileHandle>,
        logical_page_idx: PageIdx,
        is_insert: bool,
    ) -> Result<()>;
}

/// A [`PageSink`] that drops every registration, for unit tests of
/// storage structures in isolation from the durability crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPageSink;

impl PageSink for NullPageSink {
    fn register_dirty_page(
        &self,
        _structure: StorageStructureId,
        _file: &Arc<FileHandle>,
        _logical_page_idx: PageIdx,
        _is_insert: bool,
    ) -> Result<()> {
        Ok(())
    }
}
