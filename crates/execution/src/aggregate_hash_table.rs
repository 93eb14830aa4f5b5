//! Linear-probing hash-aggregation table (spec.md §4.10), ported from
//! `aggregate_hash_table.h`/`.cpp`.
//!
//! An entry holds `[group_key_1, ..., group_key_N, agg_state_1, ...,
//! agg_state_M]`. Group keys live in a [`FactorizedTable`] (one flat
//! row per group); aggregate states live in a parallel byte buffer
//! indexed the same way, since their width comes from
//! [`AggregateFunction::state_size`] rather than a
//! [`crate::factorized_table::ColumnType`] the table schema
//! understands. `HashSlot{hash, entry}` resolves collisions by linear
//! probing, same as the original; `entry` is an index into this
//! table's row-order arrays rather than a raw pointer, since this is
//! safe Rust.

use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};

use vertexdb_core::value::Interval;
use vertexdb_core::{Error, Result, Value};

use crate::aggregate::AggregateFunction;
use crate::factorized_table::{ColumnBatch, ColumnSchema, ColumnType, FactorizedTable, TableSchema, TuplePtr};

/// `HashSlot{hash, entry}`: `entry` is `None` for an unused slot,
/// `Some(row)` otherwise, where `row` indexes this table's
/// `entries`/`agg_states` arrays.
#[derive(Debug, Clone, Copy)]
struct HashSlot {
    hash: u64,
    entry: Option<u32>,
}

fn hash_value(value: &Value, hasher: &mut FxHasher) {
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Int32(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Int64(i) => {
            3u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Double(d) => {
            4u8.hash(hasher);
            d.to_bits().hash(hasher);
        }
        Value::Date(d) => {
            5u8.hash(hasher);
            d.hash(hasher);
        }
        Value::Timestamp(t) => {
            6u8.hash(hasher);
            t.hash(hasher);
        }
        Value::Interval(Interval { months, micros }) => {
            7u8.hash(hasher);
            months.hash(hasher);
            micros.hash(hasher);
        }
        Value::String(s) => {
            8u8.hash(hasher);
            s.hash(hasher);
        }
    }
}

fn hash_keys(keys: &[Value]) -> u64 {
    let mut hasher = FxHasher::default();
    for key in keys {
        hash_value(key, &mut hasher);
    }
    hasher.finish()
}

/// A simplified stand-in for the original's nested per-function
/// `distinctHashTables`: tracks which `(group, input)` pairs a
/// `DISTINCT` aggregate has already folded in, so a repeated value
/// within the same group is skipped on every later `append` (spec.md
/// §4.10).
#[derive(Default)]
struct DistinctTracker {
    seen: FxHashMap<u64, Vec<Vec<Value>>>,
}

impl DistinctTracker {
    /// Returns `true` (and records the pair) the first time `key` is
    /// seen; `false` on every later repeat.
    fn insert_if_new(&mut self, key: Vec<Value>) -> bool {
        let hash = hash_keys(&key);
        let bucket = self.seen.entry(hash).or_default();
        if bucket.iter().any(|existing| existing == &key) {
            false
        } else {
            bucket.push(key);
            true
        }
    }
}

const INITIAL_NUM_SLOTS: usize = 64;

/// The hash-aggregation table described by spec.md §4.10.
pub struct AggregateHashTable {
    group_key_types: Vec<ColumnType>,
    agg_functions: Vec<Box<dyn AggregateFunction>>,
    distinct_flags: Vec<bool>,
    agg_state_offsets: Vec<usize>,
    agg_state_width: usize,
    table: FactorizedTable,
    agg_states: Vec<u8>,
    entries: Vec<TuplePtr>,
    hash_slots: Vec<HashSlot>,
    distinct_trackers: Vec<DistinctTracker>,
}

impl AggregateHashTable {
    /// Builds an empty table for the given group-by key types and
    /// aggregate functions; `distinct_flags[i]` marks whether
    /// `agg_functions[i]` is a `DISTINCT` aggregate.
    pub fn new(
        group_key_types: Vec<ColumnType>,
        agg_functions: Vec<Box<dyn AggregateFunction>>,
        distinct_flags: Vec<bool>,
    ) -> Self {
        assert_eq!(agg_functions.len(), distinct_flags.len());
        let mut agg_state_offsets = Vec::with_capacity(agg_functions.len());
        let mut offset = 0usize;
        for func in &agg_functions {
            agg_state_offsets.push(offset);
            offset += func.state_size();
        }
        let schema = TableSchema::new(
            group_key_types
                .iter()
                .map(|t| ColumnSchema::flat(*t))
                .collect(),
        );
        let num_functions = agg_functions.len();
        AggregateHashTable {
            group_key_types,
            agg_functions,
            distinct_flags,
            agg_state_offsets,
            agg_state_width: offset,
            table: FactorizedTable::new(schema),
            agg_states: Vec::new(),
            entries: Vec::new(),
            hash_slots: vec![HashSlot { hash: 0, entry: None }; INITIAL_NUM_SLOTS],
            distinct_trackers: (0..num_functions).map(|_| DistinctTracker::default()).collect(),
        }
    }

    /// Number of distinct groups held.
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    fn state_slice(&self, row: u32, func_idx: usize) -> (usize, usize) {
        let base = row as usize * self.agg_state_width;
        let start = base + self.agg_state_offsets[func_idx];
        let end = start + self.agg_functions[func_idx].state_size();
        (start, end)
    }

    fn keys_match(&self, row: u32, group_keys: &[Value]) -> bool {
        let ptr = self.entries[row as usize];
        (0..self.group_key_types.len()).all(|i| self.table.column_value(ptr, i) == group_keys[i])
    }

    fn find_entry(&self, group_keys: &[Value], hash: u64) -> Option<u32> {
        if self.hash_slots.is_empty() {
            return None;
        }
        let num_slots = self.hash_slots.len();
        let mut slot_idx = (hash as usize) % num_slots;
        loop {
            match self.hash_slots[slot_idx].entry {
                None => return None,
                Some(row) => {
                    if self.hash_slots[slot_idx].hash == hash && self.keys_match(row, group_keys) {
                        return Some(row);
                    }
                }
            }
            slot_idx = (slot_idx + 1) % num_slots;
        }
    }

    fn fill_hash_slot(&mut self, hash: u64, row: u32) {
        let num_slots = self.hash_slots.len();
        let mut slot_idx = (hash as usize) % num_slots;
        loop {
            if self.hash_slots[slot_idx].entry.is_none() {
                self.hash_slots[slot_idx] = HashSlot {
                    hash,
                    entry: Some(row),
                };
                return;
            }
            slot_idx = (slot_idx + 1) % num_slots;
        }
    }

    fn resize(&mut self, new_num_slots: usize) {
        let mut hash_slots = vec![HashSlot { hash: 0, entry: None }; new_num_slots];
        std::mem::swap(&mut self.hash_slots, &mut hash_slots);
        for slot in hash_slots {
            if let Some(row) = slot.entry {
                self.fill_hash_slot(slot.hash, row);
            }
        }
    }

    fn resize_if_necessary(&mut self) {
        if (self.entries.len() + 1) * 2 > self.hash_slots.len() {
            self.resize(self.hash_slots.len() * 2);
        }
    }

    fn create_entry(&mut self, group_keys: &[Value], hash: u64) -> Result<u32> {
        self.resize_if_necessary();
        let batches: Vec<ColumnBatch> = group_keys.iter().cloned().map(ColumnBatch::Flat).collect();
        let ptr = self.table.append(&batches)?;
        let row = self.entries.len() as u32;
        self.entries.push(ptr);
        let state_start = self.agg_states.len();
        self.agg_states.resize(state_start + self.agg_state_width, 0);
        for (func, &offset) in self.agg_functions.iter().zip(&self.agg_state_offsets) {
            let start = state_start + offset;
            func.init(&mut self.agg_states[start..start + func.state_size()]);
        }
        self.fill_hash_slot(hash, row);
        Ok(row)
    }

    fn find_or_create_entry(&mut self, group_keys: &[Value]) -> Result<u32> {
        let hash = hash_keys(group_keys);
        match self.find_entry(group_keys, hash) {
            Some(row) => Ok(row),
            None => self.create_entry(group_keys, hash),
        }
    }

    /// Folds one input row into its group's aggregate states,
    /// creating the group if it hasn't been seen before (spec.md
    /// §4.10). `agg_inputs[i]` feeds `agg_functions[i]`; `multiplicity`
    /// is the row's duplication factor from upstream factorization.
    pub fn append(&mut self, group_keys: &[Value], agg_inputs: &[Value], multiplicity: u64) -> Result<()> {
        if group_keys.len() != self.group_key_types.len() {
            return Err(Error::runtime(format!(
                "append: expected {} group-by keys, got {}",
                self.group_key_types.len(),
                group_keys.len()
            )));
        }
        if agg_inputs.len() != self.agg_functions.len() {
            return Err(Error::runtime(format!(
                "append: expected {} aggregate inputs, got {}",
                self.agg_functions.len(),
                agg_inputs.len()
            )));
        }
        let row = self.find_or_create_entry(group_keys)?;
        for i in 0..self.agg_functions.len() {
            if self.distinct_flags[i] {
                let mut dedup_key = group_keys.to_vec();
                dedup_key.push(agg_inputs[i].clone());
                if !self.distinct_trackers[i].insert_if_new(dedup_key) {
                    continue;
                }
            }
            let (start, end) = self.state_slice(row, i);
            self.agg_functions[i].update(&mut self.agg_states[start..end], &agg_inputs[i], multiplicity);
        }
        Ok(())
    }

    /// Merges `other`'s groups into `self`, combining aggregate states
    /// under matching group-by keys (spec.md §4.10's `merge`). Used to
    /// fold each worker thread's partial hash table into the final
    /// result.
    pub fn merge(&mut self, other: AggregateHashTable) -> Result<()> {
        for row in 0..other.entries.len() as u32 {
            let ptr = other.entries[row as usize];
            let group_keys: Vec<Value> = (0..other.group_key_types.len())
                .map(|i| other.table.column_value(ptr, i))
                .collect();
            let dst_row = self.find_or_create_entry(&group_keys)?;
            for i in 0..self.agg_functions.len() {
                let (src_start, src_end) = other.state_slice(row, i);
                let (dst_start, dst_end) = self.state_slice(dst_row, i);
                let other_state = other.agg_states[src_start..src_end].to_vec();
                self.agg_functions[i].combine(&mut self.agg_states[dst_start..dst_end], &other_state);
            }
        }
        Ok(())
    }

    /// Returns `(group_key_values, finalized_aggregate_values)` for
    /// every group, in insertion order.
    pub fn finalize_all(&self) -> Vec<(Vec<Value>, Vec<Value>)> {
        (0..self.entries.len() as u32)
            .map(|row| {
                let ptr = self.entries[row as usize];
                let keys: Vec<Value> = (0..self.group_key_types.len())
                    .map(|i| self.table.column_value(ptr, i))
                    .collect();
                let values: Vec<Value> = (0..self.agg_functions.len())
                    .map(|i| {
                        let (start, end) = self.state_slice(row, i);
                        self.agg_functions[i].finalize(&self.agg_states[start..end])
                    })
                    .collect();
                (keys, values)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{max, Avg, CountStar, Sum};

    fn find_group<'a>(
        rows: &'a [(Vec<Value>, Vec<Value>)],
        key: &Value,
    ) -> &'a (Vec<Value>, Vec<Value>) {
        rows.iter().find(|(keys, _)| &keys[0] == key).unwrap()
    }

    #[test]
    fn groups_rows_and_counts_per_group() {
        let mut table = AggregateHashTable::new(
            vec![ColumnType::Int64],
            vec![Box::new(CountStar)],
            vec![false],
        );
        for group in [1i64, 2, 1, 1, 2] {
            table
                .append(&[Value::Int64(group)], &[Value::Null], 1)
                .unwrap();
        }
        assert_eq!(table.num_entries(), 2);
        let results = table.finalize_all();
        assert_eq!(find_group(&results, &Value::Int64(1)).1, vec![Value::Int64(3)]);
        assert_eq!(find_group(&results, &Value::Int64(2)).1, vec![Value::Int64(2)]);
    }

    #[test]
    fn resizes_past_initial_capacity() {
        let mut table = AggregateHashTable::new(
            vec![ColumnType::Int64],
            vec![Box::new(CountStar)],
            vec![false],
        );
        for i in 0..500i64 {
            table.append(&[Value::Int64(i)], &[Value::Null], 1).unwrap();
        }
        assert_eq!(table.num_entries(), 500);
        let results = table.finalize_all();
        assert!(results
            .iter()
            .all(|(_, values)| values[0] == Value::Int64(1)));
    }

    #[test]
    fn sum_and_avg_accumulate_per_group() {
        let mut table = AggregateHashTable::new(
            vec![ColumnType::Bool],
            vec![Box::new(Sum), Box::new(Avg)],
            vec![false, false],
        );
        for v in [1i64, 2, 3, 4] {
            table
                .append(
                    &[Value::Bool(true)],
                    &[Value::Int64(v), Value::Int64(v)],
                    1,
                )
                .unwrap();
        }
        let results = table.finalize_all();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, vec![Value::Double(10.0), Value::Double(2.5)]);
    }

    #[test]
    fn distinct_aggregate_ignores_repeated_values() {
        let mut table = AggregateHashTable::new(
            vec![ColumnType::Bool],
            vec![Box::new(CountStar)],
            vec![true],
        );
        for v in [5i64, 5, 5, 6] {
            table
                .append(&[Value::Bool(true)], &[Value::Int64(v)], 1)
                .unwrap();
        }
        let results = table.finalize_all();
        // COUNT(DISTINCT x) over {5,5,5,6} == 2.
        assert_eq!(results[0].1, vec![Value::Int64(2)]);
    }

    #[test]
    fn merge_combines_partial_tables() {
        let mut a = AggregateHashTable::new(vec![ColumnType::Int64], vec![Box::new(Sum)], vec![false]);
        a.append(&[Value::Int64(1)], &[Value::Int64(10)], 1).unwrap();
        let mut b = AggregateHashTable::new(vec![ColumnType::Int64], vec![Box::new(Sum)], vec![false]);
        b.append(&[Value::Int64(1)], &[Value::Int64(5)], 1).unwrap();
        b.append(&[Value::Int64(2)], &[Value::Int64(7)], 1).unwrap();

        a.merge(b).unwrap();
        let results = a.finalize_all();
        assert_eq!(find_group(&results, &Value::Int64(1)).1, vec![Value::Double(15.0)]);
        assert_eq!(find_group(&results, &Value::Int64(2)).1, vec![Value::Double(7.0)]);
    }

    #[test]
    fn max_aggregate_tracks_largest_value() {
        let mut table = AggregateHashTable::new(vec![ColumnType::Bool], vec![max()], vec![false]);
        for v in [3i64, 9, -4, 9] {
            table.append(&[Value::Bool(false)], &[Value::Int64(v)], 1).unwrap();
        }
        let results = table.finalize_all();
        assert_eq!(results[0].1, vec![Value::Double(9.0)]);
    }
}
