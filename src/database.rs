//! [`Database`]: owns the buffer manager, catalog, and transaction
//! manager for one data directory (spec.md §9 "Global state": "the
//! Database object owns BufferManager, Catalog, WAL, StorageManager;
//! a Connection borrows from it").

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use vertexdb_concurrency::TransactionManager;
use vertexdb_core::config::StorageConfig;
use vertexdb_core::Result;
use vertexdb_durability::DurabilityMode;
use vertexdb_storage::BufferManager;

use crate::catalog::Catalog;

/// An open property-graph database: one data directory, one buffer
/// pool, one WAL, one serial-writer transaction manager.
///
/// Construct [`crate::Connection`]s from a `Database` to run
/// transactions and (in a full build) queries; the `Database` itself
/// holds no transaction state of its own.
pub struct Database {
    data_dir: PathBuf,
    config: StorageConfig,
    buffer_manager: Arc<BufferManager>,
    catalog: Catalog,
    txn_manager: Arc<TransactionManager<Catalog>>,
}

impl Database {
    /// Opens (creating if necessary) the database at `path`, replaying
    /// any WAL left by a prior unclean shutdown (spec.md §4.4 recovery
    /// mode) before returning.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StorageConfig::default(), DurabilityMode::default())
    }

    /// Opens the database with an explicit [`StorageConfig`] and
    /// [`DurabilityMode`].
    pub fn open_with_config(path: impl AsRef<Path>, config: StorageConfig, durability_mode: DurabilityMode) -> Result<Self> {
        vertexdb_core::config::validate_page_size(config.page_size)?;
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir).map_err(|e| vertexdb_core::Error::io(&data_dir, e))?;

        let buffer_manager = Arc::new(BufferManager::new(config.page_size, config.buffer_pool_capacity));
        let catalog = Catalog::new(&data_dir, config.page_size);
        let wal_path = data_dir.join("wal.log");

        let txn_manager = Arc::new(TransactionManager::open(
            wal_path,
            Arc::clone(&buffer_manager),
            durability_mode,
            catalog.clone(),
        )?);

        info!(data_dir = %data_dir.display(), page_size = config.page_size, "database opened");

        Ok(Database {
            data_dir,
            config,
            buffer_manager,
            catalog,
            txn_manager,
        })
    }

    /// The directory this database's files live under.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The storage configuration this database was opened with.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// The shared buffer pool backing every storage structure opened
    /// against this database.
    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }

    /// The file-path resolver standing in for the (out-of-scope)
    /// planner-side catalog; storage structures use it to open their
    /// backing files via [`crate::catalog::Catalog::file_for`].
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn txn_manager(&self) -> &Arc<TransactionManager<Catalog>> {
        &self.txn_manager
    }

    /// The WAL this database commits through, as the
    /// [`vertexdb_storage::PageSink`] a caller opening a `DiskArray` or
    /// `Lists` structure against this database's files should pass as
    /// that structure's sink.
    pub fn page_sink(&self) -> Arc<dyn vertexdb_storage::PageSink> {
        self.txn_manager.page_sink()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_data_dir_and_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("db");
        let db = Database::open(&db_path).unwrap();
        assert!(db_path.exists());
        assert!(db_path.join("wal.log").exists());
    }

    #[test]
    fn reopen_after_clean_shutdown_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _db = Database::open(dir.path()).unwrap();
        }
        let _db2 = Database::open(dir.path()).unwrap();
    }
}
