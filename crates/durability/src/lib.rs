//! Write-ahead log and checkpoint/recovery replay (spec.md §4.3, §4.4).
//!
//! Module map:
//! - [`wal`]: record framing, append/commit/rollback, the [`PageSink`]
//!   implementation storage structures write dirty pages through.
//! - [`wal_replayer`]: redo of a committed WAL prefix against storage
//!   files, at checkpoint or at process restart.

#![warn(missing_docs)]

pub mod wal;
pub mod wal_replayer;

pub use vertexdb_storage::PageSink;
pub use wal::{committed_prefix, read_wal_records, DurabilityMode, Wal, WalRecord};
pub use wal_replayer::{max_committed_transaction_id, ReplayMode, ReplayStats, ReplayTarget, WalReplayer};
