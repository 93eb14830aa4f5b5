//! Redo of WAL records against storage files (spec.md §4.4).
//!
//! Two modes, selected by the caller at replay time:
//! - [`ReplayMode::Checkpoint`]: run right after a commit, in the same
//!   process that made it. [`crate::wal::Wal::commit`] already writes
//!   each record's final content straight into the target file's
//!   buffer-pool frame (our documented deviation from a WAL-local
//!   shadow file — see the `wal` module doc), so the frame already
//!   holds the committed bytes; replay here only needs to flush those
//!   dirty frames durably and ensure any inserted page's logical slot
//!   exists.
//! - [`ReplayMode::Recovery`]: run at startup against a non-empty WAL
//!   left by a crash. There is no live buffer pool to flush — this
//!   process never held those frames — so replay copies each record's
//!   content directly into the target file via [`FileHandle`].
//!
//! Both modes replay strictly in log order and stop at the last
//! `Commit` record ([`crate::wal::committed_prefix`]); anything after
//! it belongs to a transaction that never finished and is discarded.
//! Re-running either mode over the same WAL is a no-op the second time
//! (the written bytes are already exactly what's being written), which
//! is what "idempotent on the page level" (spec.md §4.4) requires.
//!
//! Catalog-side fixups for DDL and `COPY_*` records are out of scope
//! here (the catalog persistence format is an explicit Non-goal) but
//! the replay loop still needs somewhere to hand those records off to;
//! [`ReplayTarget`] is that seam, with no-op defaults so a caller that
//! doesn't yet have a catalog layer can replay page records alone.

use std::sync::Arc;

use vertexdb_core::ids::{PageIdx, TableId, TransactionId};
use vertexdb_core::{Result, StorageStructureId};
use vertexdb_storage::{BufferManager, FileHandle};

use crate::wal::{committed_prefix, Wal, WalRecord};

/// Resolves a [`StorageStructureId`] to the open [`FileHandle`] backing
/// it, and receives non-page records the replay loop doesn't itself
/// know how to apply. A catalog layer implements this; all methods but
/// [`ReplayTarget::file_for`] default to a no-op so replay can run
/// before one exists.
pub trait ReplayTarget {
    /// The file whose pages `structure` addresses.
    fn file_for(&self, structure: StorageStructureId) -> Result<Arc<FileHandle>>;

    /// A `TABLE_STATISTICS` record: the replayer should rewrite the
    /// stats file for the given table kind.
    fn on_table_statistics(&self, _is_node_table: bool) -> Result<()> {
        Ok(())
    }
    /// A `CATALOG` record: the catalog file changed.
    fn on_catalog(&self) -> Result<()> {
        Ok(())
    }
    /// A node table was created.
    fn on_node_table(&self, _table_id: TableId) -> Result<()> {
        Ok(())
    }
    /// A relationship table was created.
    fn on_rel_table(&self, _table_id: TableId) -> Result<()> {
        Ok(())
    }
    /// A bulk `COPY` into a node table completed; rename staged output
    /// to its final path.
    fn on_copy_node(&self, _table_id: TableId) -> Result<()> {
        Ok(())
    }
    /// A bulk `COPY` into a relationship table completed.
    fn on_copy_rel(&self, _table_id: TableId) -> Result<()> {
        Ok(())
    }
    /// A table was dropped.
    fn on_drop_table(&self, _table_id: TableId, _is_node_table: bool) -> Result<()> {
        Ok(())
    }
}

/// Which of the two replay strategies described in the module doc to
/// run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Post-commit, same process: target frames already hold the
    /// committed content; just flush and ensure inserted pages exist.
    Checkpoint,
    /// Process restart against a leftover WAL: no live frames, so
    /// content is copied from the record into the file directly.
    Recovery,
}

/// Outcome counters from one [`WalReplayer::replay`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Total records read from the WAL, including any discarded
    /// trailing uncommitted tail.
    pub records_read: usize,
    /// Records after the last `Commit`, discarded as an implicit
    /// rollback (spec.md §4.3).
    pub records_discarded_uncommitted: usize,
    /// `PageUpdateOrInsert` records redone.
    pub page_records_applied: usize,
    /// `Commit` records encountered in the replayed prefix.
    pub commits_applied: usize,
}

/// Drives WAL redo against a [`ReplayTarget`], per the module doc.
pub struct WalReplayer<'a, T: ReplayTarget> {
    wal: &'a Wal,
    buffer_manager: Arc<BufferManager>,
    target: &'a T,
}

impl<'a, T: ReplayTarget> WalReplayer<'a, T> {
    /// Builds a replayer over `wal`, applying pages through
    /// `buffer_manager` (for [`ReplayMode::Checkpoint`]'s flush step)
    /// and resolving non-page bookkeeping through `target`.
    pub fn new(wal: &'a Wal, buffer_manager: Arc<BufferManager>, target: &'a T) -> Self {
        WalReplayer {
            wal,
            buffer_manager,
            target,
        }
    }

    /// Replays the WAL's committed prefix in `mode`, then clears the
    /// WAL file. Safe to call on an empty WAL (a no-op past the clear).
    pub fn replay(&self, mode: ReplayMode) -> Result<ReplayStats> {
        let records = self.wal.read_all()?;
        let committed = committed_prefix(&records);
        let mut stats = ReplayStats {
            records_read: records.len(),
            records_discarded_uncommitted: records.len() - committed.len(),
            ..ReplayStats::default()
        };

        let mut touched_files: Vec<Arc<FileHandle>> = Vec::new();
        for record in committed {
            self.apply_record(record, mode, &mut stats, &mut touched_files)?;
        }

        if mode == ReplayMode::Checkpoint {
            for file in &touched_files {
                self.buffer_manager.flush_all_dirty_pages(file)?;
            }
        }
        for file in &touched_files {
            file.flush()?;
        }
        self.wal.clear()?;
        Ok(stats)
    }

    fn apply_record(
        &self,
        record: &WalRecord,
        mode: ReplayMode,
        stats: &mut ReplayStats,
        touched_files: &mut Vec<Arc<FileHandle>>,
    ) -> Result<()> {
        match record {
            WalRecord::PageUpdateOrInsert {
                structure,
                page_idx_in_original_file,
                content,
                ..
            } => {
                let file = self.target.file_for(*structure)?;
                self.apply_page(&file, *page_idx_in_original_file, content, mode)?;
                if !touched_files.iter().any(|f| Arc::ptr_eq(f, &file)) {
                    touched_files.push(file);
                }
                stats.page_records_applied += 1;
            }
            WalRecord::Commit { .. } => {
                stats.commits_applied += 1;
            }
            WalRecord::TableStatistics { is_node_table } => {
                self.target.on_table_statistics(*is_node_table)?;
            }
            WalRecord::Catalog => self.target.on_catalog()?,
            WalRecord::NodeTable { table_id } => self.target.on_node_table(*table_id)?,
            WalRecord::RelTable { table_id } => self.target.on_rel_table(*table_id)?,
            WalRecord::CopyNode { table_id } => self.target.on_copy_node(*table_id)?,
            WalRecord::CopyRel { table_id } => self.target.on_copy_rel(*table_id)?,
            WalRecord::DropTable {
                table_id,
                is_node_table,
            } => self.target.on_drop_table(*table_id, *is_node_table)?,
        }
        Ok(())
    }

    /// Ensures `logical` exists in `file` (idempotent: a no-op once it
    /// does), then, in [`ReplayMode::Recovery`] only, writes `content`
    /// into it directly.
    fn apply_page(
        &self,
        file: &Arc<FileHandle>,
        logical: PageIdx,
        content: &[u8],
        mode: ReplayMode,
    ) -> Result<()> {
        while file.num_pages() <= logical as usize {
            file.add_new_page()?;
        }
        if mode == ReplayMode::Recovery {
            let physical = file.physical_page_idx(logical)?;
            file.write_physical_page(physical, content)?;
        }
        Ok(())
    }
}

/// A transaction id the replayer has just redone, surfaced so a
/// transaction manager booting against a recovered WAL can initialize
/// its next-id counter past it.
pub fn max_committed_transaction_id(wal: &Wal) -> Result<Option<TransactionId>> {
    let records = wal.read_all()?;
    let committed = committed_prefix(&records);
    Ok(committed
        .iter()
        .filter_map(|r| match r {
            WalRecord::Commit { transaction_id } => Some(*transaction_id),
            _ => None,
        })
        .max())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::DurabilityMode;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use vertexdb_core::ids::TableId;
    use vertexdb_storage::disk_array::{DiskArray, DiskArrayHeader, TxnView};
    use vertexdb_storage::PageSink;

    struct MapTarget {
        files: Mutex<HashMap<StorageStructureId, Arc<FileHandle>>>,
    }

    impl MapTarget {
        fn new() -> Self {
            MapTarget {
                files: Mutex::new(HashMap::new()),
            }
        }

        fn register(&self, structure: StorageStructureId, file: Arc<FileHandle>) {
            self.files.lock().unwrap().insert(structure, file);
        }
    }

    impl ReplayTarget for MapTarget {
        fn file_for(&self, structure: StorageStructureId) -> Result<Arc<FileHandle>> {
            self.files
                .lock()
                .unwrap()
                .get(&structure)
                .cloned()
                .ok_or_else(|| vertexdb_core::Error::internal("no file registered for structure"))
        }
    }

    fn structure() -> StorageStructureId {
        StorageStructureId::NodeIndex {
            table_id: TableId(1),
            is_overflow: false,
        }
    }

    #[test]
    fn checkpoint_replay_flushes_dirty_frames_and_clears_wal() {
        let dir = tempfile::tempdir().unwrap();
        let bm = Arc::new(BufferManager::new(256, 64));
        let data_file = Arc::new(FileHandle::open(dir.path().join("data"), 256).unwrap());
        let wal = Wal::open(dir.path().join("wal.log"), Arc::clone(&bm), DurabilityMode::Strict).unwrap();

        let da = DiskArray::<u64>::new(
            structure(),
            Arc::clone(&data_file),
            Arc::clone(&bm),
            Some(wal.clone() as Arc<dyn PageSink>),
            DiskArrayHeader::default(),
        );
        da.begin_write();
        da.push_back(99).unwrap();
        wal.commit(TransactionId(1)).unwrap();
        da.checkpoint_in_memory_if_necessary();

        let target = MapTarget::new();
        target.register(structure(), Arc::clone(&data_file));
        let replayer = WalReplayer::new(&wal, Arc::clone(&bm), &target);
        let stats = replayer.replay(ReplayMode::Checkpoint).unwrap();

        assert_eq!(stats.page_records_applied, 1);
        assert_eq!(stats.commits_applied, 1);
        assert!(wal.read_all().unwrap().is_empty());

        // The committed page is durable on disk even though no frame
        // write happened through this replayer (checkpoint mode skips
        // the raw copy — the frame already held it).
        let physical = data_file.physical_page_idx(0).unwrap();
        let mut buf = vec![0u8; 256];
        data_file.read_physical_page(physical, &mut buf).unwrap();
        assert_eq!(u64::from_le_bytes(buf[0..8].try_into().unwrap()), 99);
    }

    #[test]
    fn recovery_replay_reconstructs_file_from_wal_alone() {
        let dir = tempfile::tempdir().unwrap();
        let bm = Arc::new(BufferManager::new(256, 64));
        let data_file = Arc::new(FileHandle::open(dir.path().join("data"), 256).unwrap());
        let wal = Wal::open(dir.path().join("wal.log"), Arc::clone(&bm), DurabilityMode::Strict).unwrap();

        let da = DiskArray::<u64>::new(
            structure(),
            Arc::clone(&data_file),
            Arc::clone(&bm),
            Some(wal.clone() as Arc<dyn PageSink>),
            DiskArrayHeader::default(),
        );
        da.begin_write();
        da.push_back(7).unwrap();
        wal.commit(TransactionId(1)).unwrap();
        da.checkpoint_in_memory_if_necessary();

        // Simulate a crash restart: a brand-new buffer pool and file
        // handle over the same on-disk paths, with the WAL untouched.
        drop(bm);
        let fresh_bm = Arc::new(BufferManager::new(256, 64));
        let fresh_file = Arc::new(FileHandle::open(dir.path().join("data"), 256).unwrap());
        let reopened_wal = Wal::open(dir.path().join("wal.log"), Arc::clone(&fresh_bm), DurabilityMode::Strict).unwrap();

        let target = MapTarget::new();
        target.register(structure(), Arc::clone(&fresh_file));
        let replayer = WalReplayer::new(&reopened_wal, Arc::clone(&fresh_bm), &target);
        let stats = replayer.replay(ReplayMode::Recovery).unwrap();

        assert_eq!(stats.page_records_applied, 1);
        let physical = fresh_file.physical_page_idx(0).unwrap();
        let mut buf = vec![0u8; 256];
        fresh_file.read_physical_page(physical, &mut buf).unwrap();
        assert_eq!(u64::from_le_bytes(buf[0..8].try_into().unwrap()), 7);
        let _ = TxnView::ReadOnly;
    }

    #[test]
    fn uncommitted_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let bm = Arc::new(BufferManager::new(256, 64));
        let data_file = Arc::new(FileHandle::open(dir.path().join("data"), 256).unwrap());
        let wal = Wal::open(dir.path().join("wal.log"), Arc::clone(&bm), DurabilityMode::Strict).unwrap();

        let da = DiskArray::<u64>::new(
            structure(),
            Arc::clone(&data_file),
            Arc::clone(&bm),
            Some(wal.clone() as Arc<dyn PageSink>),
            DiskArrayHeader::default(),
        );
        da.begin_write();
        da.push_back(1).unwrap();
        wal.commit(TransactionId(1)).unwrap();
        da.checkpoint_in_memory_if_necessary();

        // A second, never-committed transaction's page record.
        da.begin_write();
        da.push_back(2).unwrap();
        wal.append_ddl_record(WalRecord::Catalog).unwrap();
        let _ = &da;

        let target = MapTarget::new();
        target.register(structure(), Arc::clone(&data_file));
        let replayer = WalReplayer::new(&wal, Arc::clone(&bm), &target);
        let stats = replayer.replay(ReplayMode::Recovery).unwrap();

        assert_eq!(stats.commits_applied, 1);
        assert!(stats.records_discarded_uncommitted >= 1);
    }

    #[test]
    fn max_committed_transaction_id_reports_last_commit() {
        let dir = tempfile::tempdir().unwrap();
        let bm = Arc::new(BufferManager::new(256, 64));
        let data_file = Arc::new(FileHandle::open(dir.path().join("data"), 256).unwrap());
        let wal = Wal::open(dir.path().join("wal.log"), Arc::clone(&bm), DurabilityMode::Strict).unwrap();
        let da = DiskArray::<u64>::new(
            structure(),
            data_file,
            Arc::clone(&bm),
            Some(wal.clone() as Arc<dyn PageSink>),
            DiskArrayHeader::default(),
        );
        da.begin_write();
        da.push_back(1).unwrap();
        wal.commit(TransactionId(5)).unwrap();
        da.checkpoint_in_memory_if_necessary();

        assert_eq!(max_committed_transaction_id(&wal).unwrap(), Some(TransactionId(5)));
    }
}
