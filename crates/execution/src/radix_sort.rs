//! Per-thread LSD radix sort over one encoded key block, with string
//! columns tie-broken by a full-value comparison sort (spec.md §4.9).
//!
//! Ported from `radix_sort.cpp`: the algorithm walks the `ORDER BY`
//! columns left to right, radix-sorting the comparable prefix seen so
//! far whenever it reaches a `STRING` column (whose encoded prefix
//! alone cannot always distinguish two values) or the last column.
//! Ties that survive a `STRING` column's radix pass are resolved by
//! comparing the full string values through the tail-metadata lookup;
//! ties radix sort itself cannot resolve are queued and re-examined
//! at the next column.

use std::collections::VecDeque;

use crate::factorized_table::TuplePtr;
use crate::order_by_encoder::{decode_tail, encoding_size, OrderByColumn, TAIL_WIDTH};

/// A contiguous, inclusive range of row indices (within one key
/// block) known to be tied on every byte compared so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TieRange {
    start: usize,
    end: usize,
}

impl TieRange {
    fn len(&self) -> usize {
        self.end - self.start + 1
    }
}

/// Looks up the full string value addressed by a sort key's tail
/// metadata, for resolving ties radix sort's fixed-width prefix
/// cannot. Implemented by the caller's factorized-table wrapper so
/// this crate's sort core stays independent of how tuples are stored.
pub trait StringLookup {
    /// Returns the full string stored at `ptr` for key column
    /// `key_col_idx`.
    fn lookup(&self, key_col_idx: usize, ptr: TuplePtr) -> String;
}

/// Sorts one thread's encoded key block in place.
pub struct RadixSort {
    columns: Vec<OrderByColumn>,
    entry_size: usize,
}

impl RadixSort {
    /// Builds a sorter for the given `ORDER BY` columns; `entry_size`
    /// is the full per-tuple byte width (key columns + tail),
    /// matching [`crate::order_by_encoder::OrderByKeyEncoder::num_bytes_per_tuple`].
    pub fn new(columns: Vec<OrderByColumn>, entry_size: usize) -> Self {
        RadixSort {
            columns,
            entry_size,
        }
    }

    /// Sorts `block` (a whole number of `entry_size`-byte tuples) so
    /// that its comparable prefix is non-decreasing under `memcmp`,
    /// with string-column ties broken via `lookup`.
    pub fn sort_key_block(&self, block: &mut [u8], lookup: &dyn StringLookup) {
        assert_eq!(block.len() % self.entry_size, 0);
        let num_rows = block.len() / self.entry_size;
        if num_rows < 2 {
            return;
        }
        let mut ties: VecDeque<TieRange> = VecDeque::new();
        ties.push_back(TieRange {
            start: 0,
            end: num_rows - 1,
        });
        let mut num_bytes_sorted = 0usize;
        let mut num_bytes_to_sort = 0usize;

        for (col_idx, col) in self.columns.iter().enumerate() {
            num_bytes_to_sort += encoding_size(col.col_type);
            let is_string = matches!(col.col_type, crate::factorized_table::ColumnType::String);
            let is_last = col_idx == self.columns.len() - 1;
            if !is_string && !is_last {
                continue;
            }

            let num_ties_this_round = ties.len();
            for _ in 0..num_ties_this_round {
                let tie = ties.pop_front().unwrap();
                self.radix_sort_range(block, tie, num_bytes_sorted, num_bytes_to_sort);
                if is_string {
                    let new_ties = self.find_ties(
                        block,
                        tie,
                        num_bytes_sorted + num_bytes_to_sort,
                        num_bytes_to_sort,
                    );
                    for new_tie in new_ties {
                        self.solve_string_ties(block, new_tie, col_idx, col.ascending, lookup, &mut ties);
                    }
                } else {
                    // Last column and not a string: any remaining
                    // ties are genuinely equal rows. Leave them be —
                    // spec.md §8 property 6 only promises stable
                    // per-thread insertion order for them, which the
                    // counting sort already preserves.
                }
            }
            if ties.is_empty() {
                return;
            }
            num_bytes_sorted += num_bytes_to_sort;
            num_bytes_to_sort = 0;
        }
    }

    fn radix_sort_range(
        &self,
        block: &mut [u8],
        tie: TieRange,
        num_bytes_sorted: usize,
        num_bytes_to_sort: usize,
    ) {
        let entry_size = self.entry_size;
        let num_rows = tie.len();
        let rows = &mut block[tie.start * entry_size..(tie.end + 1) * entry_size];
        let mut tmp = vec![0u8; rows.len()];
        let mut in_tmp = false;

        for cur_byte_idx in 1..=num_bytes_to_sort {
            let byte_offset = num_bytes_sorted + num_bytes_to_sort - cur_byte_idx;
            let (source, target): (&[u8], &mut [u8]) = if in_tmp {
                (&tmp[..], &mut *rows)
            } else {
                (&*rows, &mut tmp[..])
            };
            let mut count = [0u64; 256];
            for j in 0..num_rows {
                count[source[j * entry_size + byte_offset] as usize] += 1;
            }
            let mut max_counter = count[0];
            for v in 1..256 {
                max_counter = max_counter.max(count[v]);
                count[v] += count[v - 1];
            }
            // Every row shares this byte value: radix sort on it is a
            // no-op, skip straight to the next byte.
            if max_counter == num_rows as u64 {
                continue;
            }
            for j in (0..num_rows).rev() {
                let b = source[j * entry_size + byte_offset];
                count[b as usize] -= 1;
                let target_row = count[b as usize] as usize;
                let src = j * entry_size;
                let dst = target_row * entry_size;
                target[dst..dst + entry_size].copy_from_slice(&source[src..src + entry_size]);
            }
            in_tmp = !in_tmp;
        }
        if in_tmp {
            rows.copy_from_slice(&tmp);
        }
    }

    fn find_ties(
        &self,
        block: &[u8],
        tie: TieRange,
        compare_end_offset: usize,
        num_bytes_to_sort: usize,
    ) -> Vec<TieRange> {
        let entry_size = self.entry_size;
        let compare_start = compare_end_offset - num_bytes_to_sort;
        let rows = &block[tie.start * entry_size..(tie.end + 1) * entry_size];
        let num_rows = tie.len();
        let mut result = Vec::new();
        let mut i = 0usize;
        while i + 1 < num_rows {
            let mut j = i + 1;
            while j < num_rows
                && rows[i * entry_size + compare_start..i * entry_size + compare_end_offset]
                    == rows[j * entry_size + compare_start..j * entry_size + compare_end_offset]
            {
                j += 1;
            }
            j -= 1;
            if i != j {
                result.push(TieRange {
                    start: tie.start + i,
                    end: tie.start + j,
                });
            }
            i = j + 1;
        }
        result
    }

    fn solve_string_ties(
        &self,
        block: &mut [u8],
        tie: TieRange,
        col_idx: usize,
        ascending: bool,
        lookup: &dyn StringLookup,
        ties_out: &mut VecDeque<TieRange>,
    ) {
        let entry_size = self.entry_size;
        let tail_offset = entry_size - TAIL_WIDTH;
        let mut rows: Vec<Vec<u8>> = (tie.start..=tie.end)
            .map(|i| block[i * entry_size..(i + 1) * entry_size].to_vec())
            .collect();
        let mut keyed: Vec<(String, Vec<u8>)> = rows
            .drain(..)
            .map(|row| {
                let (_ft_idx, block_idx, block_offset) = decode_tail(&row[tail_offset..]);
                let ptr = TuplePtr {
                    block_idx,
                    offset_in_block: block_offset,
                };
                (lookup.lookup(col_idx, ptr), row)
            })
            .collect();
        if ascending {
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
        } else {
            keyed.sort_by(|a, b| b.0.cmp(&a.0));
        }
        for (offset, (_, row)) in keyed.iter().enumerate() {
            let dst = (tie.start + offset) * entry_size;
            block[dst..dst + entry_size].copy_from_slice(row);
        }
        // Ranges that tied on the full string value too: reported
        // back so the caller can try the next ORDER BY column on them.
        let mut i = 0usize;
        while i + 1 < keyed.len() {
            let mut j = i + 1;
            while j < keyed.len() && keyed[i].0 == keyed[j].0 {
                j += 1;
            }
            j -= 1;
            if i != j {
                ties_out.push_back(TieRange {
                    start: tie.start + i,
                    end: tie.start + j,
                });
            }
            i = j + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factorized_table::ColumnType;
    use crate::order_by_encoder::OrderByKeyEncoder;
    use vertexdb_core::Value;

    struct NoStrings;
    impl StringLookup for NoStrings {
        fn lookup(&self, _key_col_idx: usize, _ptr: TuplePtr) -> String {
            String::new()
        }
    }

    fn encode_all(columns: Vec<OrderByColumn>, rows: &[Vec<Value>]) -> (Vec<u8>, usize) {
        let mut encoder = OrderByKeyEncoder::new(columns.clone(), 0);
        for (i, row) in rows.iter().enumerate() {
            encoder.encode_tuple(
                row,
                TuplePtr {
                    block_idx: 0,
                    offset_in_block: i as u32,
                },
            );
        }
        let entry_size = encoder.num_bytes_per_tuple();
        let mut blocks = encoder.into_blocks();
        (blocks.pop().unwrap(), entry_size)
    }

    #[test]
    fn sorts_int64_ascending() {
        let col = OrderByColumn {
            col_type: ColumnType::Int64,
            ascending: true,
        };
        let rows: Vec<Vec<Value>> = vec![5, -3, 100, 0, -1]
            .into_iter()
            .map(|i| vec![Value::Int64(i)])
            .collect();
        let (mut block, entry_size) = encode_all(vec![col], &rows);
        let sorter = RadixSort::new(vec![col], entry_size);
        sorter.sort_key_block(&mut block, &NoStrings);
        let tail_offset = entry_size - TAIL_WIDTH;
        let order: Vec<u32> = (0..5)
            .map(|i| decode_tail(&block[i * entry_size + tail_offset..(i + 1) * entry_size]).2)
            .collect();
        assert_eq!(order, vec![1, 4, 3, 0, 2]); // -3,-1,0,5,100 by original index
    }

    #[test]
    fn comparable_prefix_is_non_decreasing() {
        let col = OrderByColumn {
            col_type: ColumnType::Int64,
            ascending: true,
        };
        let rows: Vec<Vec<Value>> = (0..50)
            .rev()
            .map(|i| vec![Value::Int64(i)])
            .collect();
        let (mut block, entry_size) = encode_all(vec![col], &rows);
        let sorter = RadixSort::new(vec![col], entry_size);
        sorter.sort_key_block(&mut block, &NoStrings);
        let compare_len = entry_size - TAIL_WIDTH;
        for i in 0..49 {
            let a = &block[i * entry_size..i * entry_size + compare_len];
            let b = &block[(i + 1) * entry_size..(i + 1) * entry_size + compare_len];
            assert!(a <= b);
        }
    }

    struct MapLookup(std::collections::HashMap<u32, String>);
    impl StringLookup for MapLookup {
        fn lookup(&self, _key_col_idx: usize, ptr: TuplePtr) -> String {
            self.0.get(&ptr.offset_in_block).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn string_ties_resolved_via_lookup() {
        // Two rows share the same 12-byte prefix but differ further
        // in; prefix alone would tie, the lookup must break it.
        let long_a = format!("{}{}", "x".repeat(12), "a");
        let long_b = format!("{}{}", "x".repeat(12), "b");
        let col = OrderByColumn {
            col_type: ColumnType::String,
            ascending: true,
        };
        let rows = vec![
            vec![Value::String(long_b.clone())],
            vec![Value::String(long_a.clone())],
        ];
        let (mut block, entry_size) = encode_all(vec![col], &rows);
        let mut map = std::collections::HashMap::new();
        map.insert(0u32, long_b.clone());
        map.insert(1u32, long_a.clone());
        let sorter = RadixSort::new(vec![col], entry_size);
        sorter.sort_key_block(&mut block, &MapLookup(map));
        let tail_offset = entry_size - TAIL_WIDTH;
        let first_tail = decode_tail(&block[0..entry_size].get(tail_offset..).unwrap());
        // long_a < long_b, so row index 1 (long_a) must sort first.
        assert_eq!(first_tail.2, 1);
    }
}
