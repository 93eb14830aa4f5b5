//! `StorageStructureId`: a discriminated union identifying which
//! on-disk file (and sub-file, for list-shaped structures) a page
//! belongs to.
//!
//! Lives in `vertexdb-core` rather than `vertexdb-durability` (where
//! the WAL record that carries it is defined) because both
//! `vertexdb-storage` and `vertexdb-durability` need to name it:
//! storage's [`crate::disk_array`]-style structures tag their dirty
//! pages with a `StorageStructureId` when registering them with a
//! [`crate::page_sink::PageSink`], and durability's WAL record format
//! embeds the same value. Putting it in the shared core crate avoids
//! a dependency cycle.

use serde::{Deserialize, Serialize};

use crate::ids::TableId;

/// Which kind of list a `Lists`-variant `StorageStructureId` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListType {
    /// An unstructured (schema-less) node property list.
    UnstructuredNodeProperty,
    /// An adjacency list (forward or backward, see [`RelDirection`]).
    Adj,
    /// A structured relationship property list, stored per-direction
    /// alongside the adjacency list it corresponds to.
    RelProperty,
}

/// Which physical sub-file of a list structure a page belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListFileType {
    /// The per-node `ListsHeaders` file (§3: 32-bit small/large header).
    Headers,
    /// The `ListsMetadata` file (chunk-to-page-list and page-lists pool).
    Metadata,
    /// The page-group / private-page-list data file holding list
    /// contents themselves.
    BaseLists,
}

/// Forward or backward adjacency direction, for relationship list
/// structures which maintain independent lists per direction (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelDirection {
    /// Lists keyed by the source node of each relationship.
    Forward,
    /// Lists keyed by the destination node of each relationship.
    Backward,
}

/// Identifies the on-disk file a WAL page record applies to, with
/// enough identifying detail to reconstruct a file path (spec.md
/// §4.3: "carries enough identifiers ... to reconstruct the file
/// path").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageStructureId {
    /// A structured (fixed-width) node-table property column.
    StructuredNodePropertyColumn {
        /// Owning node table.
        table_id: TableId,
        /// Property index within the table's schema.
        property_id: u32,
        /// Whether this page belongs to the column's overflow file
        /// rather than the fixed-width column file itself.
        is_overflow: bool,
    },
    /// A list-shaped structure: adjacency list, unstructured property
    /// list, or relationship property list.
    Lists {
        /// Owning node or relationship table.
        table_id: TableId,
        /// Which kind of list.
        list_type: ListType,
        /// Which sub-file within the list structure.
        file_type: ListFileType,
        /// Adjacency direction, present only for `Adj`/`RelProperty`.
        direction: Option<RelDirection>,
        /// Property index, present only for property lists (not
        /// adjacency lists, which have no associated property id).
        property_id: Option<u32>,
        /// Whether this page belongs to the overflow file.
        is_overflow: bool,
    },
    /// A per-table hash index over node keys.
    NodeIndex {
        /// Owning node table.
        table_id: TableId,
        /// Whether this page belongs to the index's overflow file.
        is_overflow: bool,
    },
}
