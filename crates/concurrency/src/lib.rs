//! Transaction and transaction-manager: serial single-writer MVCC over
//! pages (spec.md §5).
//!
//! Module map:
//! - [`participant`]: the seam a `DiskArray`/`Lists` structure crosses
//!   to take part in a write transaction's commit/rollback.
//! - [`transaction`]: [`ReadOnlyTransaction`] and [`WriteTransaction`]
//!   handles.
//! - [`manager`]: [`TransactionManager`], which serializes writers,
//!   drives the WAL commit, and checkpoints via the WAL replayer.

#![warn(missing_docs)]

pub mod manager;
pub mod participant;
pub mod transaction;

pub use manager::TransactionManager;
pub use participant::Participant;
pub use transaction::{ReadOnlyTransaction, WriteTransaction};
