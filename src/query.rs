//! Stand-ins for the query text surface spec.md §6 names but excludes
//! from this crate's scope ("the Cypher parser and logical planner...
//! the expression evaluator beyond aggregate function contracts" —
//! spec.md §1). [`Connection::query`]/[`Connection::prepare`] accept
//! the *shape* the core consumes — `{logical_plan, parameters}` — so a
//! planner crate can be dropped in without changing this crate's
//! surface, but they do not themselves parse or plan anything.

use std::collections::HashMap;

use vertexdb_core::value::Value;

/// Placeholder for a compiled logical plan. A real planner crate would
/// produce this from Cypher text; here it is an opaque operator-chain
/// description the core's pipeline would execute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogicalPlan {
    /// Free-form plan description, for debugging/tests only.
    pub description: String,
}

/// Named query parameters bound into a [`LogicalPlan`] at execution.
pub type QueryParameters = HashMap<String, Value>;

/// A prepared statement: a [`LogicalPlan`] ready to be re-executed with
/// different [`QueryParameters`].
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub(crate) plan: LogicalPlan,
}

/// The result of running a query: column names plus the row tuples
/// produced by the pipeline's root operator. A full build would back
/// this by a [`vertexdb_execution::FactorizedTable`] scan; the core
/// crate only guarantees the shape since tuple production depends on
/// the (out-of-scope) operator chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Output column names, in projection order.
    pub column_names: Vec<String>,
    /// Output rows, each with one [`Value`] per column.
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Number of rows produced.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether this result has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
