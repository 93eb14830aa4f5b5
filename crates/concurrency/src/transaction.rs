//! Transaction handles returned by [`crate::manager::TransactionManager`].

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use vertexdb_core::ids::TransactionId;
use vertexdb_core::Result;
use vertexdb_durability::ReplayTarget;

use crate::manager::TransactionManager;
use crate::participant::Participant;

/// A read-only transaction: observes committed state only, never
/// takes the write lock, and never traverses a concurrent writer's
/// uncommitted pages (spec.md §5).
///
/// Held open for as long as the caller needs a stable read snapshot;
/// dropping it (or calling [`ReadOnlyTransaction::finish`] explicitly)
/// unblocks any commit that started while this transaction was open
/// and is waiting to checkpoint.
pub struct ReadOnlyTransaction<T: ReplayTarget + Send + Sync> {
    manager: Arc<TransactionManager<T>>,
    id: TransactionId,
    finished: bool,
}

impl<T: ReplayTarget + Send + Sync> ReadOnlyTransaction<T> {
    pub(crate) fn new(manager: Arc<TransactionManager<T>>, id: TransactionId) -> Self {
        ReadOnlyTransaction {
            manager,
            id,
            finished: false,
        }
    }

    /// This transaction's id.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Ends the transaction. Equivalent to dropping it; provided so
    /// callers can end it explicitly without waiting for scope exit.
    pub fn finish(mut self) {
        self.finish_inner();
    }

    fn finish_inner(&mut self) {
        if !self.finished {
            self.finished = true;
            self.manager.end_read_only(self.id);
        }
    }
}

impl<T: ReplayTarget + Send + Sync> Drop for ReadOnlyTransaction<T> {
    fn drop(&mut self) {
        self.finish_inner();
    }
}

/// A write transaction: holds the single write lock for its lifetime.
/// Callers register every [`Participant`] (a `DiskArray` column or a
/// `Lists` structure) they intend to touch before writing to it, then
/// call [`WriteTransaction::commit`] or [`WriteTransaction::rollback`]
/// exactly once.
pub struct WriteTransaction<T: ReplayTarget + Send + Sync> {
    manager: Arc<TransactionManager<T>>,
    id: TransactionId,
    participants: Mutex<Vec<Arc<dyn Participant>>>,
    finished: bool,
}

impl<T: ReplayTarget + Send + Sync> WriteTransaction<T> {
    pub(crate) fn new(manager: Arc<TransactionManager<T>>, id: TransactionId) -> Self {
        WriteTransaction {
            manager,
            id,
            participants: Mutex::new(Vec::new()),
            finished: false,
        }
    }

    /// This transaction's id.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Registers a storage structure this transaction will write to,
    /// opening its shadow header immediately.
    pub fn register(&self, participant: Arc<dyn Participant>) {
        participant.begin_write();
        self.participants.lock().push(participant);
    }

    pub(crate) fn participants(&self) -> Vec<Arc<dyn Participant>> {
        self.participants.lock().clone()
    }

    /// Commits: stages every registered participant, writes the WAL
    /// commit record, waits out pre-commit readers, checkpoints, and
    /// releases the write lock. On any failure the transaction is
    /// rolled back instead and the error is returned.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.manager.commit(&self)
    }

    /// Discards every registered participant's uncommitted state and
    /// releases the write lock without writing anything to the WAL.
    pub fn rollback(mut self) {
        self.finished = true;
        self.manager.rollback(&self);
    }
}

impl<T: ReplayTarget + Send + Sync> Drop for WriteTransaction<T> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(txn = %self.id, "write transaction dropped without commit/rollback, rolling back");
            self.manager.rollback(self);
        }
    }
}
