//! Query execution primitives whose performance lives or dies on tight
//! memory layout (spec.md §4.7-§4.10): the factorized tuple table,
//! the order-by key encoder, radix sort with multi-thread merge, and
//! the aggregate hash table.
//!
//! Module map:
//! - [`factorized_table`]: [`FactorizedTable`], the row-major tuple
//!   container shared by hash-aggregate and order-by.
//! - [`order_by_encoder`]: [`OrderByKeyEncoder`], producing
//!   memcmp-comparable key blocks from a tuple stream.
//! - [`radix_sort`]: per-thread LSD radix sort with string-tie
//!   resolution via the factorized table.
//! - [`key_block_merger`]: the morsel-driven k-way merge across
//!   sorted key blocks.
//! - [`aggregate`]: the `AggregateFunction` contract and the built-in
//!   `COUNT`/`SUM`/`AVG`/`MIN`/`MAX` implementations.
//! - [`aggregate_hash_table`]: [`aggregate_hash_table::AggregateHashTable`],
//!   the linear-probing group-by table built on top of the
//!   factorized table.

#![warn(missing_docs)]

pub mod aggregate;
pub mod aggregate_hash_table;
pub mod factorized_table;
pub mod key_block_merger;
pub mod order_by_encoder;
pub mod radix_sort;

pub use aggregate::AggregateFunction;
pub use aggregate_hash_table::AggregateHashTable;
pub use factorized_table::{ColumnSchema, ColumnType, FactorizedTable, TableSchema, TuplePtr};
pub use key_block_merger::{KeyBlockMergeTaskDispatcher, MergedKeyBlocks, StringKeyColInfo};
pub use order_by_encoder::{OrderByColumn, OrderByKeyEncoder};
pub use radix_sort::RadixSort;
