//! Identifier newtypes used across the paged storage and execution layers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A physical page index within a single storage file.
pub type PageIdx = u32;

/// An in-memory buffer-pool frame index.
pub type FrameIdx = u32;

/// A logical node offset within a node table (row number).
pub type NodeOffset = u64;

/// A monotonically increasing transaction identifier, assigned by the
/// transaction manager when a transaction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

/// Whether a transaction may mutate storage.
///
/// Mirrors spec.md §5: only one write transaction may be active at a
/// time (serial single-writer), while any number of read-only
/// transactions may run concurrently against their own page snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    /// Observes committed state only; never acquires the write lock.
    ReadOnly,
    /// Holds the single write lock for its lifetime.
    Write,
}

/// A table identifier, scoped to either the node or relationship
/// catalog namespace. The catalog itself is an external collaborator;
/// this crate only needs a stable, comparable handle to address table
/// storage files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table#{}", self.0)
    }
}
