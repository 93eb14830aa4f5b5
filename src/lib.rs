//! # VertexDB
//!
//! The storage and execution substrate of a property-graph database
//! engine: buffer-managed paged storage with a write-ahead log and
//! checkpoint/recovery, a transactional update path for variable-length
//! lists (adjacency lists and unstructured-property lists), and the
//! query execution primitives that depend on tight memory layout — a
//! hash-aggregation table, a radix-sort key encoder with multi-thread
//! merge, and the factorized tuple table both draw on.
//!
//! This crate does not implement a query language. The Cypher parser,
//! logical planner, CLI, CSV bulk loader, and catalog persistence
//! format are external collaborators (spec.md §1); [`Database`] and
//! [`Connection`] wire together everything below that boundary —
//! buffer manager, catalog (a thin file-path resolver standing in for
//! the real one), and transaction manager — and the subsystem crates
//! are reusable directly by a caller that owns its own operator
//! pipeline.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vertexdb::{Connection, Database};
//!
//! fn main() -> vertexdb_core::Result<()> {
//!     let db = Arc::new(Database::open("./my-graph")?);
//!     let conn = Connection::new(db);
//!
//!     let txn = conn.begin_write_transaction()?;
//!     // ... register DiskArray/Lists participants, perform updates ...
//!     txn.commit()?;
//!
//!     let read_txn = conn.begin_read_only_transaction();
//!     // ... read committed state ...
//!     read_txn.finish();
//!     Ok(())
//! }
//! ```
//!
//! # Workspace Layout
//!
//! | Crate | Responsibility |
//! |---|---|
//! | [`vertexdb_core`] | shared error taxonomy, ids, scalar `Value`, page-size config |
//! | [`vertexdb_storage`] | `PageState`, `BufferManager`/`FileHandle`, `DiskArray`, lists storage, local update store |
//! | [`vertexdb_durability`] | write-ahead log, checkpoint/recovery replayer |
//! | [`vertexdb_concurrency`] | transaction handles, the serial-writer transaction manager |
//! | [`vertexdb_execution`] | factorized table, order-by key encoder, radix sort + key-block merger, aggregate hash table |
//! | `vertexdb` (this crate) | `Database`/`Connection` facade, file-path catalog stub |

#![warn(missing_docs)]

pub mod catalog;
pub mod connection;
pub mod database;
pub mod query;

pub use catalog::Catalog;
pub use connection::Connection;
pub use database::Database;
pub use query::{LogicalPlan, PreparedStatement, QueryParameters, QueryResult};

// Re-export the subsystem crates so a caller that wants the primitives
// directly (bypassing the `Connection::query`/`execute` stubs) doesn't
// need to add every workspace crate as its own dependency.
pub use vertexdb_concurrency as concurrency;
pub use vertexdb_core as core;
pub use vertexdb_durability as durability;
pub use vertexdb_execution as execution;
pub use vertexdb_storage as storage;
