//! The `AggregateFunction` contract and the built-in
//! `COUNT_STAR`/`COUNT`/`SUM`/`AVG`/`MIN`/`MAX` implementations
//! (spec.md §4.10, §9).
//!
//! spec.md §9 explicitly sanctions replacing the original's deep
//! `AggregateFunction` class hierarchy with "a record of function
//! pointers (or a small trait)". We use a small trait object
//! (`Box<dyn AggregateFunction>`) per function descriptor; `DISTINCT`
//! is not part of this trait at all — it's a flag the hash table
//! interprets by consulting a secondary per-function hash table, per
//! spec.md §4.10.

use vertexdb_core::Value;

/// `{state_size, init, update_pos/update_all, combine, finalize}`,
/// matching `aggregate_function.h` in the original engine. Functions
/// are stateless; all accumulation lives in the byte buffer the hash
/// table hands back on each call.
pub trait AggregateFunction: Send + Sync {
    /// Byte width of this function's state.
    fn state_size(&self) -> usize;

    /// Writes the "no rows seen yet" state into `out`.
    fn init(&self, out: &mut [u8]);

    /// Folds one input value into `state`, `multiplicity` times (the
    /// row's duplication factor from upstream factorization).
    fn update(&self, state: &mut [u8], input: &Value, multiplicity: u64);

    /// Merges `other` into `state` (used by [`AggregateHashTable::merge`](crate::aggregate_hash_table::AggregateHashTable::merge)).
    fn combine(&self, state: &mut [u8], other: &[u8]);

    /// Converts the accumulator into its final output value. Called
    /// once per group at the end of execution; must not be called
    /// twice on the same state (e.g. `AVG` cannot un-divide).
    fn finalize(&self, state: &[u8]) -> Value;

    /// Short name, for error messages and `EXPLAIN`-style output.
    fn name(&self) -> &'static str;
}

fn is_null_flag(state: &[u8]) -> bool {
    state[0] != 0
}

fn set_null_flag(state: &mut [u8], is_null: bool) {
    state[0] = is_null as u8;
}

/// `COUNT(*)`: counts rows regardless of nullness. State: `{count: u64}`.
pub struct CountStar;

impl AggregateFunction for CountStar {
    fn state_size(&self) -> usize {
        8
    }
    fn init(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&0u64.to_le_bytes());
    }
    fn update(&self, state: &mut [u8], _input: &Value, multiplicity: u64) {
        let count = u64::from_le_bytes(state[0..8].try_into().unwrap());
        state[0..8].copy_from_slice(&(count + multiplicity).to_le_bytes());
    }
    fn combine(&self, state: &mut [u8], other: &[u8]) {
        let a = u64::from_le_bytes(state[0..8].try_into().unwrap());
        let b = u64::from_le_bytes(other[0..8].try_into().unwrap());
        state[0..8].copy_from_slice(&(a + b).to_le_bytes());
    }
    fn finalize(&self, state: &[u8]) -> Value {
        Value::Int64(i64::from_le_bytes(state[0..8].try_into().unwrap()))
    }
    fn name(&self) -> &'static str {
        "COUNT_STAR"
    }
}

/// `COUNT(expr)`: counts non-null values. State: `{count: u64}`.
pub struct Count;

impl AggregateFunction for Count {
    fn state_size(&self) -> usize {
        8
    }
    fn init(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&0u64.to_le_bytes());
    }
    fn update(&self, state: &mut [u8], input: &Value, multiplicity: u64) {
        if input.is_null() {
            return;
        }
        let count = u64::from_le_bytes(state[0..8].try_into().unwrap());
        state[0..8].copy_from_slice(&(count + multiplicity).to_le_bytes());
    }
    fn combine(&self, state: &mut [u8], other: &[u8]) {
        let a = u64::from_le_bytes(state[0..8].try_into().unwrap());
        let b = u64::from_le_bytes(other[0..8].try_into().unwrap());
        state[0..8].copy_from_slice(&(a + b).to_le_bytes());
    }
    fn finalize(&self, state: &[u8]) -> Value {
        Value::Int64(i64::from_le_bytes(state[0..8].try_into().unwrap()))
    }
    fn name(&self) -> &'static str {
        "COUNT"
    }
}

fn value_as_f64(value: &Value) -> f64 {
    match value {
        Value::Int32(i) => *i as f64,
        Value::Int64(i) => *i as f64,
        Value::Double(d) => *d,
        _ => 0.0,
    }
}

/// `SUM(expr)`: state `{is_null: u8 (padding), sum: f64}`. Like the
/// original's `AvgState`, `is_null` distinguishes "no non-null rows
/// seen yet" from a legitimate sum of zero.
pub struct Sum;

impl AggregateFunction for Sum {
    fn state_size(&self) -> usize {
        16
    }
    fn init(&self, out: &mut [u8]) {
        set_null_flag(out, true);
        out[8..16].copy_from_slice(&0f64.to_le_bytes());
    }
    fn update(&self, state: &mut [u8], input: &Value, multiplicity: u64) {
        if input.is_null() {
            return;
        }
        let v = value_as_f64(input) * multiplicity as f64;
        let sum = f64::from_le_bytes(state[8..16].try_into().unwrap());
        state[8..16].copy_from_slice(&(sum + v).to_le_bytes());
        set_null_flag(state, false);
    }
    fn combine(&self, state: &mut [u8], other: &[u8]) {
        if is_null_flag(other) {
            return;
        }
        let other_sum = f64::from_le_bytes(other[8..16].try_into().unwrap());
        if is_null_flag(state) {
            state[8..16].copy_from_slice(&other_sum.to_le_bytes());
        } else {
            let sum = f64::from_le_bytes(state[8..16].try_into().unwrap());
            state[8..16].copy_from_slice(&(sum + other_sum).to_le_bytes());
        }
        set_null_flag(state, false);
    }
    fn finalize(&self, state: &[u8]) -> Value {
        if is_null_flag(state) {
            Value::Null
        } else {
            Value::Double(f64::from_le_bytes(state[8..16].try_into().unwrap()))
        }
    }
    fn name(&self) -> &'static str {
        "SUM"
    }
}

/// `AVG(expr)`: state `{is_null: u8, sum: f64, count: u64}`;
/// `finalize` divides sum by count, matching `avg.h` in the original.
pub struct Avg;

impl AggregateFunction for Avg {
    fn state_size(&self) -> usize {
        24
    }
    fn init(&self, out: &mut [u8]) {
        set_null_flag(out, true);
        out[8..16].copy_from_slice(&0f64.to_le_bytes());
        out[16..24].copy_from_slice(&0u64.to_le_bytes());
    }
    fn update(&self, state: &mut [u8], input: &Value, multiplicity: u64) {
        if input.is_null() {
            return;
        }
        let v = value_as_f64(input);
        let sum = f64::from_le_bytes(state[8..16].try_into().unwrap());
        let count = u64::from_le_bytes(state[16..24].try_into().unwrap());
        state[8..16].copy_from_slice(&(sum + v * multiplicity as f64).to_le_bytes());
        state[16..24].copy_from_slice(&(count + multiplicity).to_le_bytes());
        set_null_flag(state, false);
    }
    fn combine(&self, state: &mut [u8], other: &[u8]) {
        if is_null_flag(other) {
            return;
        }
        let other_sum = f64::from_le_bytes(other[8..16].try_into().unwrap());
        let other_count = u64::from_le_bytes(other[16..24].try_into().unwrap());
        let sum = f64::from_le_bytes(state[8..16].try_into().unwrap());
        let count = u64::from_le_bytes(state[16..24].try_into().unwrap());
        state[8..16].copy_from_slice(&(sum + other_sum).to_le_bytes());
        state[16..24].copy_from_slice(&(count + other_count).to_le_bytes());
        set_null_flag(state, false);
    }
    fn finalize(&self, state: &[u8]) -> Value {
        if is_null_flag(state) {
            return Value::Null;
        }
        let sum = f64::from_le_bytes(state[8..16].try_into().unwrap());
        let count = u64::from_le_bytes(state[16..24].try_into().unwrap());
        Value::Double(sum / count as f64)
    }
    fn name(&self) -> &'static str {
        "AVG"
    }
}

/// Shared `MIN`/`MAX` state machinery: `{is_null: u8, value: f64}`.
/// Non-numeric key types are out of scope for this execution
/// primitive (spec.md §1 excludes the full expression evaluator; the
/// planner only routes numeric columns here).
struct MinMax {
    is_max: bool,
}

impl AggregateFunction for MinMax {
    fn state_size(&self) -> usize {
        16
    }
    fn init(&self, out: &mut [u8]) {
        set_null_flag(out, true);
        out[8..16].copy_from_slice(&0f64.to_le_bytes());
    }
    fn update(&self, state: &mut [u8], input: &Value, _multiplicity: u64) {
        if input.is_null() {
            return;
        }
        let v = value_as_f64(input);
        if is_null_flag(state) {
            state[8..16].copy_from_slice(&v.to_le_bytes());
            set_null_flag(state, false);
            return;
        }
        let cur = f64::from_le_bytes(state[8..16].try_into().unwrap());
        let keep_new = if self.is_max { v > cur } else { v < cur };
        if keep_new {
            state[8..16].copy_from_slice(&v.to_le_bytes());
        }
    }
    fn combine(&self, state: &mut [u8], other: &[u8]) {
        if is_null_flag(other) {
            return;
        }
        let other_v = f64::from_le_bytes(other[8..16].try_into().unwrap());
        self.update(state, &Value::Double(other_v), 1);
    }
    fn finalize(&self, state: &[u8]) -> Value {
        if is_null_flag(state) {
            Value::Null
        } else {
            Value::Double(f64::from_le_bytes(state[8..16].try_into().unwrap()))
        }
    }
    fn name(&self) -> &'static str {
        if self.is_max {
            "MAX"
        } else {
            "MIN"
        }
    }
}

/// Builds the `MIN` aggregate function.
pub fn min() -> Box<dyn AggregateFunction> {
    Box::new(MinMax { is_max: false })
}

/// Builds the `MAX` aggregate function.
pub fn max() -> Box<dyn AggregateFunction> {
    Box::new(MinMax { is_max: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(func: &dyn AggregateFunction, values: &[Value]) -> Value {
        let mut state = vec![0u8; func.state_size()];
        func.init(&mut state);
        for v in values {
            func.update(&mut state, v, 1);
        }
        func.finalize(&state)
    }

    #[test]
    fn count_star_counts_all_rows() {
        let result = run(&CountStar, &[Value::Null, Value::Int64(1), Value::Int64(2)]);
        assert_eq!(result, Value::Int64(3));
    }

    #[test]
    fn count_skips_nulls() {
        let result = run(&Count, &[Value::Null, Value::Int64(1), Value::Int64(2)]);
        assert_eq!(result, Value::Int64(2));
    }

    #[test]
    fn sum_and_avg() {
        let values: Vec<Value> = (1..=4).map(Value::Int64).collect();
        assert_eq!(run(&Sum, &values), Value::Double(10.0));
        assert_eq!(run(&Avg, &values), Value::Double(2.5));
    }

    #[test]
    fn min_max() {
        let values = vec![Value::Int64(5), Value::Int64(-3), Value::Int64(9)];
        assert_eq!(run(&*min(), &values), Value::Double(-3.0));
        assert_eq!(run(&*max(), &values), Value::Double(9.0));
    }

    #[test]
    fn combine_merges_partial_states() {
        let mut a = vec![0u8; Sum.state_size()];
        Sum.init(&mut a);
        Sum.update(&mut a, &Value::Int64(3), 1);
        let mut b = vec![0u8; Sum.state_size()];
        Sum.init(&mut b);
        Sum.update(&mut b, &Value::Int64(4), 1);
        Sum.combine(&mut a, &b);
        assert_eq!(Sum.finalize(&a), Value::Double(7.0));
    }

    #[test]
    fn all_null_sum_is_null() {
        let result = run(&Sum, &[Value::Null, Value::Null]);
        assert_eq!(result, Value::Null);
    }
}
