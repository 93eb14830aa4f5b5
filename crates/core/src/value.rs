//! The scalar value type shared by the order-by encoder and the
//! aggregate hash table.
//!
//! Parsing date/time/interval literals from source text is an external
//! collaborator's job (spec.md's Cypher-layer exclusion) — this type
//! only needs to carry already-parsed values and know how to compare
//! and encode them.

use chrono::{NaiveDate, NaiveDateTime};
use std::cmp::Ordering;

/// An interval expressed as whole months plus microseconds, matching
/// the original engine's `interval_t` decomposition (calendar months
/// are not of fixed duration, so they are kept separate from the
/// sub-day component).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    /// Number of whole months.
    pub months: i32,
    /// Sub-month duration in microseconds.
    pub micros: i64,
}

/// A scalar column value.
///
/// `Null` is a distinct variant rather than `Option<Value>` wrapping
/// every arm: the order-by encoder needs to special-case nullness
/// uniformly across every underlying type, and a flattened enum keeps
/// that one match arm instead of nested `Option` handling at every
/// call site.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL-style null.
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit IEEE-754 double.
    Double(f64),
    /// Calendar date with no time component.
    Date(NaiveDate),
    /// Timestamp with microsecond precision, no timezone.
    Timestamp(NaiveDateTime),
    /// A month/microsecond interval.
    Interval(Interval),
    /// A UTF-8 string. Short strings (<= 12 bytes) are encoded inline
    /// by the order-by encoder; longer strings spill to an overflow
    /// buffer and are encoded by prefix only.
    String(String),
}

impl Value {
    /// True if this value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A short, stable type tag used for error messages and the
    /// binder-facing type-mismatch checks upstream collaborators rely
    /// on.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOL",
            Value::Int32(_) => "INT32",
            Value::Int64(_) => "INT64",
            Value::Double(_) => "DOUBLE",
            Value::Date(_) => "DATE",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Interval(_) => "INTERVAL",
            Value::String(_) => "STRING",
        }
    }
}

/// Total order over values of the *same* underlying type, with `Null`
/// always comparing equal to itself and incomparable to non-null
/// values through this function (callers that need a null-ordering
/// policy apply it themselves — see `vertexdb-execution::order_by_encoder`,
/// which encodes nulls as a distinguished leading byte rather than
/// relying on this impl).
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.partial_cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.partial_cmp(b),
            (Value::Interval(a), Value::Interval(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}
