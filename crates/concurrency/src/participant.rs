//! The seam between a write transaction and the storage structures it
//! touches.
//!
//! [`vertexdb_storage::DiskArray`] and [`vertexdb_storage::Lists`]
//! already expose the four calls a commit/rollback needs
//! (`begin_write`, `stage_for_commit`, `checkpoint_in_memory_if_necessary`,
//! `rollback_in_memory_if_necessary`) as inherent methods; [`Participant`]
//! just lets [`crate::transaction::WriteTransaction`] hold a
//! heterogeneous list of them (one array per column, one `Lists` per
//! adjacency/list-shaped property) without knowing their concrete
//! types.

use vertexdb_core::Result;
use vertexdb_storage::{DiskArray, DiskArrayElement, Lists};

/// A storage structure that takes part in the write-transaction
/// lifecycle. Implemented for every `DiskArray<T>` and for `Lists`;
/// a write transaction registers every structure it touches and the
/// transaction manager drives all of them through the same sequence.
pub trait Participant: Send + Sync {
    /// Opens this structure's shadow header for the active write
    /// transaction.
    fn begin_write(&self);

    /// Materializes this transaction's page overlays into shared
    /// buffer-pool frames and registers them with the WAL sink.
    fn stage_for_commit(&self) -> Result<()>;

    /// Reconciles the in-memory committed header once the WAL
    /// replayer has durably applied this transaction's pages.
    fn checkpoint_in_memory_if_necessary(&self);

    /// Discards this transaction's shadow header, restoring the
    /// pre-transaction committed view.
    fn rollback_in_memory_if_necessary(&self);
}

impl<T: DiskArrayElement> Participant for DiskArray<T> {
    fn begin_write(&self) {
        DiskArray::begin_write(self)
    }

    fn stage_for_commit(&self) -> Result<()> {
        DiskArray::stage_for_commit(self)
    }

    fn checkpoint_in_memory_if_necessary(&self) {
        DiskArray::checkpoint_in_memory_if_necessary(self)
    }

    fn rollback_in_memory_if_necessary(&self) {
        DiskArray::rollback_in_memory_if_necessary(self)
    }
}

impl Participant for Lists {
    fn begin_write(&self) {
        Lists::begin_write(self)
    }

    fn stage_for_commit(&self) -> Result<()> {
        Lists::stage_for_commit(self)
    }

    fn checkpoint_in_memory_if_necessary(&self) {
        Lists::checkpoint_in_memory_if_necessary(self)
    }

    fn rollback_in_memory_if_necessary(&self) {
        Lists::rollback_in_memory_if_necessary(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vertexdb_core::ids::TableId;
    use vertexdb_core::structure_id::StorageStructureId;
    use vertexdb_storage::disk_array::DiskArrayHeader;
    use vertexdb_storage::{BufferManager, FileHandle};

    #[test]
    fn disk_array_participant_round_trips_through_trait_object() {
        let dir = tempfile::tempdir().unwrap();
        let bm = Arc::new(BufferManager::new(256, 16));
        let file = Arc::new(FileHandle::open(dir.path().join("da"), 256).unwrap());
        let structure = StorageStructureId::NodeIndex {
            table_id: TableId(0),
            is_overflow: false,
        };
        let da: Arc<dyn Participant> = Arc::new(DiskArray::<u64>::new(
            structure,
            file,
            bm,
            None,
            DiskArrayHeader::default(),
        ));
        da.begin_write();
        da.stage_for_commit().unwrap();
        da.checkpoint_in_memory_if_necessary();
    }
}
