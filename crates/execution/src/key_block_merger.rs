//! Morsel-driven k-way merge across the per-thread sorted key blocks
//! produced by [`crate::radix_sort::RadixSort`] (spec.md §4.9), ported
//! from `key_block_merger.h`/`.cpp`.
//!
//! Each worker thread radix-sorts its own key block independently;
//! this module repeatedly merges the two oldest not-yet-merged blocks
//! pairwise until one fully sorted block remains. Within one pair, the
//! merge itself is split into batches ("morsels") of up to
//! [`KeyBlockMergeTaskDispatcher::DEFAULT_BATCH_SIZE`] left-side rows
//! each, with the matching right-side range found by binary search —
//! the morsels land on disjoint, contiguous output ranges, so they run
//! concurrently via `rayon` rather than one thread at a time.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Mutex;

use rayon::prelude::*;

use crate::factorized_table::TuplePtr;
use crate::order_by_encoder::{decode_tail, encoding_size, ColumnType, TAIL_WIDTH};
use crate::radix_sort::StringLookup;

/// One sorted run of encoded tuples: either a single thread's
/// radix-sorted key block, or the result of merging two such runs.
pub struct MergedKeyBlocks {
    tuples: Vec<u8>,
    entry_size: usize,
}

impl MergedKeyBlocks {
    /// Wraps an already-sorted key block (typically one worker
    /// thread's [`crate::radix_sort::RadixSort::sort_key_block`]
    /// output) as a unit the dispatcher can merge.
    pub fn from_sorted_block(tuples: Vec<u8>, entry_size: usize) -> Self {
        assert_eq!(tuples.len() % entry_size, 0, "key block holds a fractional tuple");
        MergedKeyBlocks { tuples, entry_size }
    }

    /// Number of tuples held.
    pub fn num_tuples(&self) -> usize {
        self.tuples.len() / self.entry_size
    }

    /// Consumes the block, returning its raw encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.tuples
    }
}

/// Describes one `STRING` `ORDER BY` column's location within the
/// encoded tuple, so the merge comparator can fall back to a full
/// value lookup when the encoded prefix ties. Non-string key columns
/// need no entry here: their encoded bytes are always memcmp-safe on
/// their own (spec.md §4.8's non-goal on unstructured-property keys
/// means this list only ever holds `STRING` columns in this crate).
#[derive(Debug, Clone, Copy)]
pub struct StringKeyColInfo {
    /// Byte offset of this column's encoding within one tuple.
    pub offset_in_tuple: usize,
    /// This column's index among the `ORDER BY` columns, passed
    /// through to [`StringLookup::lookup`].
    pub key_col_idx: usize,
    /// `true` for `ASC`, `false` for `DESC`.
    pub ascending: bool,
}

impl StringKeyColInfo {
    fn encoded_end(&self) -> usize {
        self.offset_in_tuple + encoding_size(ColumnType::String)
    }
}

fn is_null_marker(byte: u8, ascending: bool) -> bool {
    if ascending {
        byte == 0xFF
    } else {
        byte == 0x00
    }
}

struct KeyBlockMerger<'a> {
    entry_size: usize,
    string_cols: &'a [StringKeyColInfo],
    lookup: &'a dyn StringLookup,
}

impl<'a> KeyBlockMerger<'a> {
    /// Mirrors `compareTupleBuffer`: `true` iff `left` sorts after
    /// `right` and should therefore yield the merge cursor to `right`.
    fn left_greater(&self, left: &[u8], right: &[u8]) -> bool {
        if self.string_cols.is_empty() {
            let cmp_len = self.entry_size - TAIL_WIDTH;
            return left[..cmp_len] > right[..cmp_len];
        }
        let mut last_compared = 0usize;
        for info in self.string_cols {
            let end = info.encoded_end();
            match left[last_compared..end].cmp(&right[last_compared..end]) {
                Ordering::Greater => return true,
                Ordering::Less => return false,
                Ordering::Equal => {
                    let left_null = is_null_marker(left[info.offset_in_tuple], info.ascending);
                    let right_null = is_null_marker(right[info.offset_in_tuple], info.ascending);
                    if left_null && right_null {
                        last_compared = end;
                        continue;
                    }
                    let left_str = self.lookup_full(left, info.key_col_idx);
                    let right_str = self.lookup_full(right, info.key_col_idx);
                    match left_str.cmp(&right_str) {
                        Ordering::Equal => {
                            last_compared = end;
                            continue;
                        }
                        Ordering::Greater => return info.ascending,
                        Ordering::Less => return !info.ascending,
                    }
                }
            }
        }
        // Every string column tied on its full value too: leave the
        // tie unresolved, which keeps the left tuple first (stable).
        false
    }

    fn lookup_full(&self, tuple: &[u8], key_col_idx: usize) -> String {
        let tail = &tuple[self.entry_size - TAIL_WIDTH..];
        let (_ft_idx, block_idx, block_offset) = decode_tail(tail);
        self.lookup.lookup(
            key_col_idx,
            TuplePtr {
                block_idx,
                offset_in_block: block_offset,
            },
        )
    }
}

/// One batch of work: merge `left[left.0..left.1)` against
/// `right[right.0..right.1)`. Output ranges tile `0..left_n+right_n`
/// exactly, so morsels can be merged into disjoint slices of one
/// result buffer.
#[derive(Debug, Clone, Copy)]
struct Morsel {
    left: (usize, usize),
    right: (usize, usize),
}

struct MergeCursor {
    left_next: usize,
    right_next: usize,
}

/// Ports `KeyBlockMergeTask::findRightKeyBlockIdx`: the rightmost row
/// index in `right[start_idx..=last_idx]` whose value is smaller than
/// `left_end`, with its successor (or end of range) not smaller.
fn find_right_key_block_idx(
    merger: &KeyBlockMerger,
    right: &[u8],
    entry_size: usize,
    start_idx: usize,
    last_idx: usize,
    left_end: &[u8],
) -> Option<usize> {
    if start_idx > last_idx {
        return None;
    }
    let mut start = start_idx as i64;
    let mut end = last_idx as i64;
    while start <= end {
        let cur = ((start + end) / 2) as usize;
        let cur_buf = &right[cur * entry_size..(cur + 1) * entry_size];
        if merger.left_greater(left_end, cur_buf) {
            let is_last = cur == last_idx;
            let next_is_ge = if is_last {
                true
            } else {
                let next_buf = &right[(cur + 1) * entry_size..(cur + 2) * entry_size];
                !merger.left_greater(left_end, next_buf)
            };
            if is_last || next_is_ge {
                return Some(cur);
            }
            start = cur as i64 + 1;
        } else {
            end = cur as i64 - 1;
        }
    }
    None
}

/// Batch size for `findRightKeyBlockIdx` binary searches: how many
/// left-side rows get one binary search on the right side.
const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Ports `KeyBlockMergeTask::getMorsel`.
fn next_morsel(
    merger: &KeyBlockMerger,
    entry_size: usize,
    batch_size: usize,
    left: &[u8],
    right: &[u8],
    cur: &mut MergeCursor,
) -> Option<Morsel> {
    let left_n = left.len() / entry_size;
    let right_n = right.len() / entry_size;

    if cur.right_next >= right_n {
        if cur.left_next >= left_n {
            return None;
        }
        let m = Morsel {
            left: (cur.left_next, left_n),
            right: (right_n, right_n),
        };
        cur.left_next = left_n;
        return Some(m);
    }
    if cur.left_next >= left_n {
        return None;
    }

    let left_start = cur.left_next;
    cur.left_next += batch_size;

    if cur.left_next >= left_n {
        let m = Morsel {
            left: (left_start, left_n),
            right: (cur.right_next, right_n),
        };
        cur.right_next = right_n;
        return Some(m);
    }

    let left_end_tuple = &left[(cur.left_next - 1) * entry_size..cur.left_next * entry_size];
    let right_end_idx = find_right_key_block_idx(
        merger,
        right,
        entry_size,
        cur.right_next,
        right_n - 1,
        left_end_tuple,
    );
    let range_end = match right_end_idx {
        None => cur.right_next,
        Some(idx) => idx + 1,
    };
    let m = Morsel {
        left: (left_start, cur.left_next),
        right: (cur.right_next, range_end),
    };
    if right_end_idx.is_some() {
        cur.right_next = range_end;
    }
    Some(m)
}

/// Merges `left[range.0..range.1)` against `right[range.0..range.1)`
/// into `out`, a plain two-pointer merge (`KeyBlockMerger::mergeKeyBlocks`).
fn merge_range(merger: &KeyBlockMerger, left: &[u8], right: &[u8], entry_size: usize, out: &mut [u8]) {
    let left_n = left.len() / entry_size;
    let right_n = right.len() / entry_size;
    let mut li = 0usize;
    let mut ri = 0usize;
    let mut oi = 0usize;
    while li < left_n && ri < right_n {
        let l = &left[li * entry_size..(li + 1) * entry_size];
        let r = &right[ri * entry_size..(ri + 1) * entry_size];
        if merger.left_greater(l, r) {
            out[oi * entry_size..(oi + 1) * entry_size].copy_from_slice(r);
            ri += 1;
        } else {
            out[oi * entry_size..(oi + 1) * entry_size].copy_from_slice(l);
            li += 1;
        }
        oi += 1;
    }
    while li < left_n {
        out[oi * entry_size..(oi + 1) * entry_size]
            .copy_from_slice(&left[li * entry_size..(li + 1) * entry_size]);
        li += 1;
        oi += 1;
    }
    while ri < right_n {
        out[oi * entry_size..(oi + 1) * entry_size]
            .copy_from_slice(&right[ri * entry_size..(ri + 1) * entry_size]);
        ri += 1;
        oi += 1;
    }
}

/// Splits `buf` into consecutive, disjoint mutable sub-slices of the
/// given lengths (which must sum to `buf.len()`).
fn split_into_regions(mut buf: &mut [u8], lens: &[usize]) -> Vec<&mut [u8]> {
    let mut regions = Vec::with_capacity(lens.len());
    for &len in lens {
        let (head, tail) = buf.split_at_mut(len);
        regions.push(head);
        buf = tail;
    }
    regions
}

fn merge_pair(merger: &KeyBlockMerger, batch_size: usize, left: &MergedKeyBlocks, right: &MergedKeyBlocks) -> MergedKeyBlocks {
    let entry_size = merger.entry_size;
    let mut cur = MergeCursor {
        left_next: 0,
        right_next: 0,
    };
    let mut morsels = Vec::new();
    while let Some(m) = next_morsel(merger, entry_size, batch_size, &left.tuples, &right.tuples, &mut cur) {
        morsels.push(m);
    }

    let total_tuples = left.num_tuples() + right.num_tuples();
    let mut out = vec![0u8; total_tuples * entry_size];
    let lens: Vec<usize> = morsels
        .iter()
        .map(|m| ((m.left.1 - m.left.0) + (m.right.1 - m.right.0)) * entry_size)
        .collect();
    let regions = split_into_regions(&mut out, &lens);

    regions
        .into_par_iter()
        .zip(morsels.par_iter())
        .for_each(|(region, m)| {
            let l = &left.tuples[m.left.0 * entry_size..m.left.1 * entry_size];
            let r = &right.tuples[m.right.0 * entry_size..m.right.1 * entry_size];
            merge_range(merger, l, r, entry_size, region);
        });

    MergedKeyBlocks {
        tuples: out,
        entry_size,
    }
}

/// Drains a FIFO queue of sorted key blocks down to one, merging the
/// two oldest blocks at a time (spec.md §4.9). Each pairwise merge
/// fans out across `rayon` over disjoint morsels of the output, so
/// "multi-thread merge" happens within a pair rather than across
/// pairs — pairs are drained in a fixed order for determinism.
pub struct KeyBlockMergeTaskDispatcher {
    entry_size: usize,
    batch_size: usize,
    string_cols: Vec<StringKeyColInfo>,
    queue: Mutex<VecDeque<MergedKeyBlocks>>,
}

impl KeyBlockMergeTaskDispatcher {
    /// Default morsel batch size, matching the original engine's
    /// `KeyBlockMergeTask::batch_size`.
    pub const DEFAULT_BATCH_SIZE: usize = DEFAULT_BATCH_SIZE;

    /// Builds a dispatcher over the given sorted blocks.
    pub fn new(entry_size: usize, string_cols: Vec<StringKeyColInfo>, blocks: Vec<MergedKeyBlocks>) -> Self {
        Self::with_batch_size(entry_size, string_cols, blocks, Self::DEFAULT_BATCH_SIZE)
    }

    /// As [`Self::new`], with an explicit morsel batch size (used by
    /// tests to force multiple morsels per pair without huge fixtures).
    pub fn with_batch_size(
        entry_size: usize,
        string_cols: Vec<StringKeyColInfo>,
        blocks: Vec<MergedKeyBlocks>,
        batch_size: usize,
    ) -> Self {
        for block in &blocks {
            assert_eq!(block.entry_size, entry_size);
        }
        KeyBlockMergeTaskDispatcher {
            entry_size,
            batch_size,
            string_cols,
            queue: Mutex::new(blocks.into_iter().collect()),
        }
    }

    fn pop_pair(&self) -> Option<(MergedKeyBlocks, MergedKeyBlocks)> {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() < 2 {
            return None;
        }
        let left = queue.pop_front().unwrap();
        let right = queue.pop_front().unwrap();
        Some((left, right))
    }

    fn push_result(&self, block: MergedKeyBlocks) {
        self.queue.lock().unwrap().push_back(block);
    }

    /// Merges every queued block down to one, fully sorted
    /// [`MergedKeyBlocks`], resolving `STRING` column ties through
    /// `lookup`.
    pub fn merge_all(&self, lookup: &dyn StringLookup) -> MergedKeyBlocks {
        let merger = KeyBlockMerger {
            entry_size: self.entry_size,
            string_cols: &self.string_cols,
            lookup,
        };
        while let Some((left, right)) = self.pop_pair() {
            let merged = merge_pair(&merger, self.batch_size, &left, &right);
            self.push_result(merged);
        }
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .expect("dispatcher must be constructed with at least one block")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factorized_table::ColumnType;
    use crate::order_by_encoder::{OrderByColumn, OrderByKeyEncoder};
    use crate::radix_sort::RadixSort;
    use std::collections::HashMap;
    use vertexdb_core::Value;

    struct NoStrings;
    impl StringLookup for NoStrings {
        fn lookup(&self, _key_col_idx: usize, _ptr: TuplePtr) -> String {
            String::new()
        }
    }

    fn sorted_block(ft_idx: u8, values: &[i64], col: OrderByColumn, entry_size: &mut usize) -> MergedKeyBlocks {
        let mut encoder = OrderByKeyEncoder::new(vec![col], ft_idx);
        for (i, v) in values.iter().enumerate() {
            encoder.encode_tuple(
                &[Value::Int64(*v)],
                TuplePtr {
                    block_idx: 0,
                    offset_in_block: i as u32,
                },
            );
        }
        *entry_size = encoder.num_bytes_per_tuple();
        let mut blocks = encoder.into_blocks();
        let mut bytes = blocks.pop().unwrap_or_default();
        let sorter = RadixSort::new(vec![col], *entry_size);
        sorter.sort_key_block(&mut bytes, &NoStrings);
        MergedKeyBlocks::from_sorted_block(bytes, *entry_size)
    }

    fn tail_order(bytes: &[u8], entry_size: usize) -> Vec<u32> {
        let tail_offset = entry_size - TAIL_WIDTH;
        (0..bytes.len() / entry_size)
            .map(|i| decode_tail(&bytes[i * entry_size + tail_offset..(i + 1) * entry_size]).2)
            .collect()
    }

    #[test]
    fn merges_two_sorted_int_blocks_into_one_order() {
        let col = OrderByColumn {
            col_type: ColumnType::Int64,
            ascending: true,
        };
        let mut entry_size = 0;
        let left = sorted_block(0, &[1, 5, 9, 20], col, &mut entry_size);
        let right = sorted_block(1, &[2, 3, 21], col, &mut entry_size);

        let dispatcher = KeyBlockMergeTaskDispatcher::new(entry_size, vec![], vec![left, right]);
        let merged = dispatcher.merge_all(&NoStrings);
        assert_eq!(merged.num_tuples(), 7);
        let bytes = merged.into_bytes();
        let compare_len = entry_size - TAIL_WIDTH;
        for i in 0..6 {
            let a = &bytes[i * entry_size..i * entry_size + compare_len];
            let b = &bytes[(i + 1) * entry_size..(i + 1) * entry_size + compare_len];
            assert!(a <= b);
        }
    }

    #[test]
    fn merge_uses_small_morsels_without_losing_rows() {
        let col = OrderByColumn {
            col_type: ColumnType::Int64,
            ascending: true,
        };
        let mut entry_size = 0;
        let left_vals: Vec<i64> = (0..50).step_by(2).collect();
        let right_vals: Vec<i64> = (1..50).step_by(2).collect();
        let left = sorted_block(0, &left_vals, col, &mut entry_size);
        let right = sorted_block(1, &right_vals, col, &mut entry_size);

        let dispatcher =
            KeyBlockMergeTaskDispatcher::with_batch_size(entry_size, vec![], vec![left, right], 4);
        let merged = dispatcher.merge_all(&NoStrings);
        assert_eq!(merged.num_tuples(), 50);
        let bytes = merged.into_bytes();
        let compare_len = entry_size - TAIL_WIDTH;
        for i in 0..49 {
            let a = &bytes[i * entry_size..i * entry_size + compare_len];
            let b = &bytes[(i + 1) * entry_size..(i + 1) * entry_size + compare_len];
            assert!(a <= b);
        }
    }

    struct MapLookup(HashMap<(u32, u32), String>);
    impl StringLookup for MapLookup {
        fn lookup(&self, _key_col_idx: usize, ptr: TuplePtr) -> String {
            self.0
                .get(&(ptr.block_idx, ptr.offset_in_block))
                .cloned()
                .unwrap_or_default()
        }
    }

    #[test]
    fn merge_resolves_string_ties_across_blocks() {
        // Both blocks hold one row whose 12-byte prefix ties; only the
        // lookup can tell "...a" sorts before "...b".
        let col = OrderByColumn {
            col_type: ColumnType::String,
            ascending: true,
        };
        let long_a = format!("{}{}", "x".repeat(12), "a");
        let long_b = format!("{}{}", "x".repeat(12), "b");

        let mut left_encoder = OrderByKeyEncoder::new(vec![col], 0);
        left_encoder.encode_tuple(
            &[Value::String(long_b.clone())],
            TuplePtr {
                block_idx: 0,
                offset_in_block: 0,
            },
        );
        let entry_size = left_encoder.num_bytes_per_tuple();
        let left = MergedKeyBlocks::from_sorted_block(
            left_encoder.into_blocks().pop().unwrap(),
            entry_size,
        );

        let mut right_encoder = OrderByKeyEncoder::new(vec![col], 1);
        right_encoder.encode_tuple(
            &[Value::String(long_a.clone())],
            TuplePtr {
                block_idx: 0,
                offset_in_block: 0,
            },
        );
        let right = MergedKeyBlocks::from_sorted_block(
            right_encoder.into_blocks().pop().unwrap(),
            entry_size,
        );

        let mut map = HashMap::new();
        map.insert((0u32, 0u32), long_b.clone());
        map.insert((1u32, 0u32), long_a.clone());

        let string_cols = vec![StringKeyColInfo {
            offset_in_tuple: 0,
            key_col_idx: 0,
            ascending: true,
        }];
        let dispatcher = KeyBlockMergeTaskDispatcher::new(entry_size, string_cols, vec![left, right]);
        let merged = dispatcher.merge_all(&MapLookup(map));
        let bytes = merged.into_bytes();
        let order = tail_order(&bytes, entry_size);
        // long_a (right block, row 0) sorts first.
        assert_eq!(order, vec![0, 0]);
        let tail_offset = entry_size - TAIL_WIDTH;
        let first_ft = decode_tail(&bytes[tail_offset..entry_size]).0;
        assert_eq!(first_ft, 1); // ft_idx 1 == the right encoder's tag
    }

    #[test]
    fn single_block_is_returned_unchanged() {
        let col = OrderByColumn {
            col_type: ColumnType::Int64,
            ascending: true,
        };
        let mut entry_size = 0;
        let only = sorted_block(0, &[3, 1, 2], col, &mut entry_size);
        let dispatcher = KeyBlockMergeTaskDispatcher::new(entry_size, vec![], vec![only]);
        let merged = dispatcher.merge_all(&NoStrings);
        assert_eq!(merged.num_tuples(), 3);
    }
}
