//! [`Connection`]: the per-session handle a client uses to begin
//! transactions and run queries against a [`crate::Database`] (spec.md
//! §6 "Connection API").
//!
//! Mirrors spec.md §9's "Global state" design note: the `Database`
//! owns the shared subsystems; a `Connection` only borrows from it and
//! tracks which thread-pool size this session's parallel pipelines
//! (radix sort, key-block merge) should use.

use std::sync::Arc;

use vertexdb_concurrency::{ReadOnlyTransaction, WriteTransaction};
use vertexdb_core::{Error, Result};

use crate::catalog::Catalog;
use crate::database::Database;
use crate::query::{LogicalPlan, PreparedStatement, QueryParameters, QueryResult};

/// Default worker-thread count for a connection's parallel pipelines,
/// matching `std::thread::available_parallelism`'s typical fallback.
const DEFAULT_NUM_THREADS: usize = 4;

/// A client session against a [`Database`]. `BEGIN [READ|WRITE]
/// TRANSACTION`, `COMMIT`, and `ROLLBACK` are operations on the
/// transaction handles this returns, per spec.md §6.
pub struct Connection {
    database: Arc<Database>,
    max_num_threads: usize,
}

impl Connection {
    /// Opens a new connection against `database`.
    pub fn new(database: Arc<Database>) -> Self {
        Connection {
            database,
            max_num_threads: DEFAULT_NUM_THREADS,
        }
    }

    /// Begins a read-only transaction. Always succeeds; any number may
    /// run concurrently (spec.md §5).
    pub fn begin_read_only_transaction(&self) -> ReadOnlyTransaction<Catalog> {
        self.database.txn_manager().begin_read_only_transaction()
    }

    /// Begins a write transaction, failing with
    /// [`Error::TransactionManager`] if one is already active elsewhere
    /// against this database (spec.md §5: at most one write transaction
    /// at a time).
    pub fn begin_write_transaction(&self) -> Result<WriteTransaction<Catalog>> {
        self.database.txn_manager().begin_write_transaction()
    }

    /// Sets the worker-thread count this connection's parallel
    /// pipelines (order-by's radix sort + key-block merge, per-thread
    /// hash-aggregate build) should target. Takes effect on the next
    /// query; does not affect transactions already in flight.
    pub fn set_max_num_threads(&mut self, n: usize) {
        self.max_num_threads = n.max(1);
    }

    /// The worker-thread count this connection currently targets.
    pub fn max_num_threads(&self) -> usize {
        self.max_num_threads
    }

    /// Runs `text` to completion. Out of scope for this crate (spec.md
    /// §1 excludes the Cypher parser and logical planner): this always
    /// fails with a [`Error::Binder`] explaining that a planner must be
    /// supplied via [`Connection::execute`] instead.
    pub fn query(&self, text: &str) -> Result<QueryResult> {
        let _ = text;
        Err(Error::Binder(
            "Connection::query requires a Cypher parser/planner, which is out of scope for this crate \
             (spec.md §1); use Connection::execute with a LogicalPlan produced by an external planner"
                .to_string(),
        ))
    }

    /// Wraps an already-compiled [`LogicalPlan`] as a [`PreparedStatement`].
    /// The plan's construction (parsing, binding, optimization) is the
    /// external planner's responsibility; this crate only re-executes
    /// it with fresh parameters.
    pub fn prepare(&self, plan: LogicalPlan) -> Result<PreparedStatement> {
        Ok(PreparedStatement { plan })
    }

    /// Executes a prepared statement's plan against `params`. The
    /// execution pipeline itself (operator dispatch above the
    /// factorized table / hash-aggregate / order-by primitives this
    /// crate implements) is an external collaborator; see SPEC_FULL.md
    /// §2 for the crate boundary.
    pub fn execute(&self, stmt: &PreparedStatement, params: QueryParameters) -> Result<QueryResult> {
        let _ = params;
        let _ = &stmt.plan;
        Err(Error::Runtime(
            "Connection::execute has no operator pipeline wired up in this crate; \
             the core substrate (factorized table, hash-aggregate, order-by, storage) is \
             exercised directly by callers that own their own pipeline"
                .to_string(),
        ))
    }
}
