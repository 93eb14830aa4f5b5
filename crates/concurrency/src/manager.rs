//! Serial single-writer transaction manager (spec.md §5).
//!
//! ## Commit sequence
//!
//! ```text
//! 1. begin_write_transaction() — fails with a conflict error if a
//!    write transaction is already active (at most one at a time).
//! 2. Caller registers every DiskArray/Lists it touches via
//!    WriteTransaction::register, which opens that structure's shadow
//!    header.
//! 3. Caller performs its updates (DiskArray::update/push_back,
//!    LocalUpdateStore::stage_*, ListsUpdateIterator::commit_all).
//! 4. WriteTransaction::commit():
//!    a. stage_for_commit() on every registered participant — moves
//!       page overlays into shared buffer-pool frames.
//!    b. Wal::commit(txn_id) — the durability point. Snapshots every
//!       dirty page's final content into the WAL and fsyncs per the
//!       configured DurabilityMode.
//!    c. Waits for every read-only transaction that was already active
//!       when commit began to finish, so they keep observing
//!       pre-commit state for their whole lifetime (spec.md §5).
//!    d. WalReplayer::replay(Checkpoint) — flushes the now-durable
//!       dirty frames and clears the WAL.
//!    e. checkpoint_in_memory_if_necessary() on every participant —
//!       publishes the new committed header.
//! ```
//!
//! If step (b) fails, the transaction rolls back: `Wal::rollback()`
//! discards the pending dirty-page set and every participant's
//! `rollback_in_memory_if_necessary()` restores its pre-transaction
//! header. Steps (a)-(b) never partially apply to disk — nothing is
//! written to the WAL file until (b) runs, and (a) only touches
//! in-memory frames.
//!
//! Read-only transactions never take the write lock; they simply read
//! through `TxnView::ReadOnly`, which always resolves against whatever
//! `committed` header each structure currently holds. Waiting out
//! pre-commit readers in step (c) is this crate's way of keeping that
//! simple read path honest about "see old state until they finish" —
//! see `DESIGN.md`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use vertexdb_core::ids::TransactionId;
use vertexdb_core::{Error, Result};
use vertexdb_durability::{max_committed_transaction_id, DurabilityMode, ReplayMode, ReplayTarget, Wal, WalReplayer};
use vertexdb_storage::BufferManager;

use crate::transaction::{ReadOnlyTransaction, WriteTransaction};

/// Coordinates the single write lock, the WAL, and checkpoint replay.
///
/// `T` is the [`ReplayTarget`] that resolves a `StorageStructureId` to
/// its open file — supplied by whatever owns the catalog (out of
/// scope here; see `vertexdb_durability::ReplayTarget`'s doc).
pub struct TransactionManager<T: ReplayTarget + Send + Sync> {
    next_txn_id: AtomicU64,
    write_active: AtomicBool,
    active_read_only: DashSet<TransactionId>,
    read_only_drained: Condvar,
    read_only_drained_lock: Mutex<()>,
    wal: Arc<Wal>,
    buffer_manager: Arc<BufferManager>,
    target: T,
}

impl<T: ReplayTarget + Send + Sync> TransactionManager<T> {
    /// Opens (or recovers) the transaction manager backing `wal_path`.
    ///
    /// If the WAL already holds committed records from a crashed
    /// process, they are replayed in [`ReplayMode::Recovery`] before
    /// the manager becomes usable, and `next_txn_id` is seeded past
    /// the highest transaction id found, so a freshly started write
    /// transaction can never reuse an id already durable in the
    /// recovered WAL.
    pub fn open(
        wal_path: impl AsRef<std::path::Path>,
        buffer_manager: Arc<BufferManager>,
        durability_mode: DurabilityMode,
        target: T,
    ) -> Result<Self> {
        let wal = Wal::open(wal_path, Arc::clone(&buffer_manager), durability_mode)?;
        let max_recovered = if !wal.read_all()?.is_empty() {
            let max_recovered = max_committed_transaction_id(&wal)?;
            let replayer = WalReplayer::new(&wal, Arc::clone(&buffer_manager), &target);
            let stats = replayer.replay(ReplayMode::Recovery)?;
            debug!(
                page_records = stats.page_records_applied,
                commits = stats.commits_applied,
                discarded = stats.records_discarded_uncommitted,
                "replayed WAL on open"
            );
            max_recovered
        } else {
            None
        };
        let next_txn_id = max_recovered.map(|id| id.0 + 1).unwrap_or(1);
        Ok(TransactionManager {
            next_txn_id: AtomicU64::new(next_txn_id),
            write_active: AtomicBool::new(false),
            active_read_only: DashSet::new(),
            read_only_drained: Condvar::new(),
            read_only_drained_lock: Mutex::new(()),
            wal,
            buffer_manager,
            target,
        })
    }

    fn allocate_txn_id(&self) -> TransactionId {
        TransactionId(self.next_txn_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Begins a read-only transaction. Always succeeds — any number of
    /// read-only transactions may run concurrently, each seeing the
    /// committed state current when its reads happen (and, across a
    /// concurrent commit, never later than the commit that started
    /// before it per the wait in [`TransactionManager::commit`]).
    pub fn begin_read_only_transaction(self: &Arc<Self>) -> ReadOnlyTransaction<T> {
        let id = self.allocate_txn_id();
        self.active_read_only.insert(id);
        ReadOnlyTransaction::new(Arc::clone(self), id)
    }

    /// Begins a write transaction, or fails with a
    /// [`Error::TransactionManager`] conflict if one is already active.
    pub fn begin_write_transaction(self: &Arc<Self>) -> Result<WriteTransaction<T>> {
        if self
            .write_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::txn("a write transaction is already active"));
        }
        let id = self.allocate_txn_id();
        Ok(WriteTransaction::new(Arc::clone(self), id))
    }

    pub(crate) fn end_read_only(&self, id: TransactionId) {
        self.active_read_only.remove(&id);
        let _guard = self.read_only_drained_lock.lock();
        self.read_only_drained.notify_all();
    }

    /// Waits until every id in `pre_commit_readers` has finished.
    fn drain_pre_commit_readers(&self, pre_commit_readers: &[TransactionId]) {
        let mut guard = self.read_only_drained_lock.lock();
        while pre_commit_readers.iter().any(|id| self.active_read_only.contains(id)) {
            self.read_only_drained.wait(&mut guard);
        }
    }

    pub(crate) fn commit(&self, txn: &WriteTransaction<T>) -> Result<()> {
        let pre_commit_readers: Vec<TransactionId> = self.active_read_only.iter().map(|id| *id).collect();

        for participant in txn.participants() {
            participant.stage_for_commit()?;
        }

        if let Err(err) = self.wal.commit(txn.id()) {
            warn!(txn = %txn.id(), error = %err, "WAL commit failed, rolling back");
            self.wal.rollback();
            for participant in txn.participants() {
                participant.rollback_in_memory_if_necessary();
            }
            self.write_active.store(false, Ordering::Release);
            return Err(err);
        }

        self.drain_pre_commit_readers(&pre_commit_readers);

        let replayer = WalReplayer::new(&self.wal, Arc::clone(&self.buffer_manager), &self.target);
        let replay_result = replayer.replay(ReplayMode::Checkpoint);
        for participant in txn.participants() {
            participant.checkpoint_in_memory_if_necessary();
        }
        self.write_active.store(false, Ordering::Release);
        replay_result.map(|_| ())
    }

    pub(crate) fn rollback(&self, txn: &WriteTransaction<T>) {
        self.wal.rollback();
        for participant in txn.participants() {
            participant.rollback_in_memory_if_necessary();
        }
        self.write_active.store(false, Ordering::Release);
    }

    /// Number of read-only transactions currently open. Exposed for
    /// tests and diagnostics.
    pub fn active_read_only_count(&self) -> usize {
        self.active_read_only.len()
    }

    /// Whether a write transaction currently holds the write lock.
    pub fn write_transaction_active(&self) -> bool {
        self.write_active.load(Ordering::Acquire)
    }

    /// The WAL this manager commits through, as the [`vertexdb_storage::PageSink`]
    /// that storage structures (`DiskArray`, `Lists`) register their dirty
    /// pages with. Callers opening a structure against this manager's
    /// database pass this as its `sink`.
    pub fn page_sink(&self) -> Arc<dyn vertexdb_storage::PageSink> {
        Arc::clone(&self.wal) as Arc<dyn vertexdb_storage::PageSink>
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::thread;
    use std::time::Duration;
    use vertexdb_core::ids::TableId;
    use vertexdb_core::structure_id::StorageStructureId;
    use vertexdb_storage::disk_array::DiskArrayHeader;
    use vertexdb_storage::{DiskArray, FileHandle};

    struct SingleFileTarget {
        structure: StorageStructureId,
        file: StdArc<FileHandle>,
    }

    impl ReplayTarget for SingleFileTarget {
        fn file_for(&self, structure: StorageStructureId) -> Result<StdArc<FileHandle>> {
            assert_eq!(structure, self.structure);
            Ok(StdArc::clone(&self.file))
        }
    }

    fn structure() -> StorageStructureId {
        StorageStructureId::NodeIndex {
            table_id: TableId(7),
            is_overflow: false,
        }
    }

    fn make_manager() -> (tempfile::TempDir, StdArc<TransactionManager<SingleFileTarget>>, StdArc<DiskArray<u64>>) {
        let dir = tempfile::tempdir().unwrap();
        let bm = StdArc::new(BufferManager::new(256, 64));
        let file = StdArc::new(FileHandle::open(dir.path().join("data"), 256).unwrap());
        let manager = StdArc::new(
            TransactionManager::open(
                dir.path().join("wal.log"),
                StdArc::clone(&bm),
                DurabilityMode::Strict,
                SingleFileTarget {
                    structure: structure(),
                    file: StdArc::clone(&file),
                },
            )
            .unwrap(),
        );
        let da = StdArc::new(DiskArray::<u64>::new(
            structure(),
            StdArc::clone(&file),
            StdArc::clone(&bm),
            Some(manager.wal_for_test()),
            DiskArrayHeader::default(),
        ));
        (dir, manager, da)
    }

    impl<T: ReplayTarget + Send + Sync> TransactionManager<T> {
        fn wal_for_test(&self) -> StdArc<dyn vertexdb_storage::PageSink> {
            StdArc::clone(&self.wal) as StdArc<dyn vertexdb_storage::PageSink>
        }
    }

    #[test]
    fn second_write_transaction_conflicts() {
        let (_dir, manager, _da) = make_manager();
        let _first = manager.begin_write_transaction().unwrap();
        let second = manager.begin_write_transaction();
        assert!(second.is_err());
    }

    #[test]
    fn commit_publishes_new_state_and_releases_write_lock() {
        let (_dir, manager, da) = make_manager();
        let txn = manager.begin_write_transaction().unwrap();
        txn.register(StdArc::clone(&da) as StdArc<dyn crate::Participant>);
        da.push_back(42).unwrap();
        txn.commit().unwrap();

        assert!(!manager.write_transaction_active());
        assert_eq!(
            da.get(0, vertexdb_storage::disk_array::TxnView::ReadOnly).unwrap(),
            42
        );

        let again = manager.begin_write_transaction();
        assert!(again.is_ok());
    }

    #[test]
    fn rollback_restores_committed_header_and_releases_write_lock() {
        let (_dir, manager, da) = make_manager();
        let txn = manager.begin_write_transaction().unwrap();
        txn.register(StdArc::clone(&da) as StdArc<dyn crate::Participant>);
        da.push_back(1).unwrap();
        txn.rollback();

        assert!(!manager.write_transaction_active());
        assert_eq!(da.len(vertexdb_storage::disk_array::TxnView::ReadOnly), 0);
    }

    #[test]
    fn commit_waits_for_pre_commit_readers_before_checkpointing() {
        let (_dir, manager, da) = make_manager();
        let reader = manager.begin_read_only_transaction();
        assert_eq!(manager.active_read_only_count(), 1);

        let writer_manager = StdArc::clone(&manager);
        let writer_da = StdArc::clone(&da);
        let handle = thread::spawn(move || {
            let txn = writer_manager.begin_write_transaction().unwrap();
            txn.register(StdArc::clone(&writer_da) as StdArc<dyn crate::Participant>);
            writer_da.push_back(5).unwrap();
            txn.commit().unwrap();
        });

        // Give the writer a moment to reach the drain point.
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        reader.finish();
        handle.join().unwrap();
        assert_eq!(manager.active_read_only_count(), 0);
    }
}
