//! A minimal file-path resolver standing in for the catalog (spec.md
//! §1 excludes "the catalog persistence format" as an external
//! collaborator; this crate only needs the narrow seam the WAL
//! replayer calls through — [`vertexdb_durability::ReplayTarget`]).
//!
//! [`Catalog`] maps a [`StorageStructureId`] to a deterministic path
//! under the database's data directory and lazily opens (and caches)
//! the backing [`FileHandle`]. It does not persist table schemas,
//! property types, or table names — those belong to the planner-side
//! catalog this crate stubs out (SPEC_FULL.md §2: "`vertexdb` (root)
//! ... stub collaborators (catalog, planner input shape)").

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use vertexdb_core::structure_id::{ListFileType, ListType, RelDirection, StorageStructureId};
use vertexdb_core::Result;
use vertexdb_durability::ReplayTarget;
use vertexdb_storage::FileHandle;

/// Resolves [`StorageStructureId`]s to open [`FileHandle`]s, one per
/// distinct on-disk file, under a single data directory.
///
/// Cheap to clone: the open-file cache is reference-counted, so the
/// same `Catalog` can be handed to a [`vertexdb_concurrency::TransactionManager`]
/// (which owns its `ReplayTarget` by value) while the [`crate::Database`]
/// keeps its own handle for opening files outside a transaction.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    data_dir: PathBuf,
    page_size: usize,
    files: DashMap<StorageStructureId, Arc<FileHandle>>,
}

impl Catalog {
    /// Roots a new catalog at `data_dir`. The directory must already
    /// exist; [`crate::Database::open`] creates it.
    pub fn new(data_dir: impl Into<PathBuf>, page_size: usize) -> Self {
        Catalog {
            inner: Arc::new(CatalogInner {
                data_dir: data_dir.into(),
                page_size,
                files: DashMap::new(),
            }),
        }
    }

    /// The data directory this catalog resolves paths under.
    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    /// Opens (if not already open) and returns the file backing
    /// `structure`.
    pub fn file_for(&self, structure: StorageStructureId) -> Result<Arc<FileHandle>> {
        if let Some(existing) = self.inner.files.get(&structure) {
            return Ok(Arc::clone(existing.value()));
        }
        let path = self.inner.data_dir.join(file_name(structure));
        let handle = Arc::new(FileHandle::open(&path, self.inner.page_size)?);
        self.inner.files.insert(structure, Arc::clone(&handle));
        Ok(handle)
    }
}

impl ReplayTarget for Catalog {
    fn file_for(&self, structure: StorageStructureId) -> Result<Arc<FileHandle>> {
        Catalog::file_for(self, structure)
    }
}

/// Builds a deterministic, human-legible file name for a storage
/// structure. Real table/property names live in the stubbed-out
/// planner-side catalog; here we only need stability and uniqueness
/// per distinct structure, matching spec.md §6 ("Per-column file +
/// optional overflow file for every structured node/relationship
/// property"; "Per-list file + metadata file + headers file + optional
/// overflow file for every list-shaped property or adjacency
/// structure").
fn file_name(structure: StorageStructureId) -> String {
    match structure {
        StorageStructureId::StructuredNodePropertyColumn {
            table_id,
            property_id,
            is_overflow,
        } => {
            let suffix = if is_overflow { ".ovf" } else { ".col" };
            format!("t{}-p{}{suffix}", table_id.0, property_id)
        }
        StorageStructureId::Lists {
            table_id,
            list_type,
            file_type,
            direction,
            property_id,
            is_overflow,
        } => {
            let list_type = match list_type {
                ListType::UnstructuredNodeProperty => "uprop",
                ListType::Adj => "adj",
                ListType::RelProperty => "rprop",
            };
            let file_type = match file_type {
                ListFileType::Headers => "headers",
                ListFileType::Metadata => "metadata",
                ListFileType::BaseLists => "data",
            };
            let direction = match direction {
                Some(RelDirection::Forward) => "-fwd",
                Some(RelDirection::Backward) => "-bwd",
                None => "",
            };
            let property = property_id.map(|p| format!("-p{p}")).unwrap_or_default();
            let suffix = if is_overflow { ".ovf" } else { ".lst" };
            format!("t{}-{list_type}{direction}{property}-{file_type}{suffix}", table_id.0)
        }
        StorageStructureId::NodeIndex { table_id, is_overflow } => {
            let suffix = if is_overflow { ".ovf" } else { ".idx" };
            format!("t{}-index{suffix}", table_id.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vertexdb_core::ids::TableId;

    #[test]
    fn file_names_are_stable_and_distinct() {
        let a = StorageStructureId::StructuredNodePropertyColumn {
            table_id: TableId(1),
            property_id: 0,
            is_overflow: false,
        };
        let b = StorageStructureId::StructuredNodePropertyColumn {
            table_id: TableId(1),
            property_id: 1,
            is_overflow: false,
        };
        assert_ne!(file_name(a), file_name(b));
        assert_eq!(file_name(a), file_name(a));
    }

    #[test]
    fn catalog_caches_file_handles() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new(dir.path(), 4096);
        let structure = StorageStructureId::NodeIndex {
            table_id: TableId(3),
            is_overflow: false,
        };
        let first = catalog.file_for(structure).unwrap();
        let second = catalog.file_for(structure).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
