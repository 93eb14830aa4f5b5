//! `OrderByKeyEncoder`: encodes a tuple's key columns into a single
//! memcmp-comparable binary string (spec.md §4.8).
//!
//! Ported from `order_by_key_encoder.cpp`'s `encodeVector`/
//! `encodeFlatVector`/`flipBytesIfNecessary` structure: each column
//! contributes `1 + width(type)` bytes (a leading null byte, then a
//! big-endian order-preserving transform of the value); a descending
//! column has every byte it contributed — including the null byte —
//! bitwise inverted afterwards. The null byte is written as
//! `0x00` (present) or `0xFF` (null) *before* that inversion, which is
//! what gives ascending-NULL-last / descending-NULL-first (see
//! `DESIGN.md`, open question 1).

use vertexdb_core::value::Interval;
use vertexdb_core::Value;

use crate::factorized_table::{ColumnType, TuplePtr};

/// One column of the `ORDER BY` clause: its scalar type and sort
/// direction.
#[derive(Debug, Clone, Copy)]
pub struct OrderByColumn {
    /// The column's scalar type (drives both byte width and the
    /// encoding transform).
    pub col_type: ColumnType,
    /// `true` for `ASC`, `false` for `DESC`.
    pub ascending: bool,
}

/// Fixed short-string prefix length encoded inline; strings longer
/// than this tie-break via the factorized-table lookup (spec.md §4.8).
pub const STRING_PREFIX_LEN: usize = 12;

/// Byte width contributed by one column, including its leading null
/// byte (spec.md §4.8's table, "width beyond null byte" + 1).
pub fn encoding_size(col_type: ColumnType) -> usize {
    1 + match col_type {
        ColumnType::Bool => 1,
        ColumnType::Int32 => 4,
        ColumnType::Date => 4,
        ColumnType::Int64 => 8,
        ColumnType::Double => 8,
        ColumnType::Timestamp => 8,
        ColumnType::Interval => 16,
        // One marker byte (short/long) + 12-byte prefix.
        ColumnType::String => 1 + STRING_PREFIX_LEN,
    }
}

/// Tail metadata width: `{factorized_table_id: 1, block_idx: 3,
/// block_offset: 4}` = 8 bytes, not inverted and excluded from
/// `memcmp` comparisons (spec.md §4.8).
pub const TAIL_WIDTH: usize = 8;

/// Encodes a tuple stream into fixed-size key blocks.
///
/// One encoder belongs to a single worker thread; `ft_idx` is that
/// thread's unique tag in the tail metadata so a sort key can be
/// traced back to the correct per-thread factorized table during
/// string tie-breaking (spec.md §4.8's "each worker has its own
/// encoder with a unique `factorized_table_id`").
pub struct OrderByKeyEncoder {
    columns: Vec<OrderByColumn>,
    ft_idx: u8,
    num_bytes_per_tuple: usize,
    blocks: Vec<Vec<u8>>,
    tuples_per_block: usize,
}

impl OrderByKeyEncoder {
    /// Max tuples held in one key block — deliberately small so tests
    /// can exercise multi-block behavior without huge fixtures; a
    /// real deployment sizes this from `LARGE_PAGE_SIZE / tuple_size`
    /// as the original does.
    pub const DEFAULT_TUPLES_PER_BLOCK: usize = 4096;

    /// Creates an encoder for the given key columns and worker tag.
    pub fn new(columns: Vec<OrderByColumn>, ft_idx: u8) -> Self {
        Self::with_tuples_per_block(columns, ft_idx, Self::DEFAULT_TUPLES_PER_BLOCK)
    }

    /// As [`Self::new`], with an explicit tuples-per-block (used by
    /// tests to force multiple key blocks).
    pub fn with_tuples_per_block(
        columns: Vec<OrderByColumn>,
        ft_idx: u8,
        tuples_per_block: usize,
    ) -> Self {
        let num_bytes_per_tuple =
            columns.iter().map(|c| encoding_size(c.col_type)).sum::<usize>() + TAIL_WIDTH;
        OrderByKeyEncoder {
            columns,
            ft_idx,
            num_bytes_per_tuple,
            blocks: vec![Vec::new()],
            tuples_per_block,
        }
    }

    /// Bytes contributed per tuple, including tail metadata.
    pub fn num_bytes_per_tuple(&self) -> usize {
        self.num_bytes_per_tuple
    }

    fn tuples_in_last_block(&self) -> usize {
        self.blocks.last().unwrap().len() / self.num_bytes_per_tuple
    }

    fn allocate_block_if_full(&mut self) {
        if self.tuples_in_last_block() == self.tuples_per_block {
            self.blocks.push(Vec::new());
        }
    }

    /// Encodes one tuple's key columns plus its tail pointer into the
    /// current key block. `tuple_ptr` is the row's location in the
    /// (per-thread) factorized table holding the full tuple — *not*
    /// a position in this key block — so a later tie-break can look
    /// the full row back up (spec.md §4.8).
    pub fn encode_tuple(&mut self, key_values: &[Value], tuple_ptr: TuplePtr) {
        assert_eq!(key_values.len(), self.columns.len());
        self.allocate_block_if_full();
        let block = self.blocks.last_mut().unwrap();
        for (value, col) in key_values.iter().zip(&self.columns) {
            let start = block.len();
            block.resize(start + encoding_size(col.col_type), 0);
            encode_column(value, *col, &mut block[start..]);
        }
        let tail_start = block.len();
        block.resize(tail_start + TAIL_WIDTH, 0);
        encode_tail(
            self.ft_idx,
            tuple_ptr.block_idx,
            tuple_ptr.offset_in_block,
            &mut block[tail_start..],
        );
    }

    /// The completed key blocks, each holding a whole number of
    /// fixed-size encoded tuples.
    pub fn into_blocks(self) -> Vec<Vec<u8>> {
        self.blocks.into_iter().filter(|b| !b.is_empty()).collect()
    }

    /// Column descriptors, for callers that need to re-derive widths
    /// (radix sort, key-block merger).
    pub fn columns(&self) -> &[OrderByColumn] {
        &self.columns
    }
}

fn flip_sign(byte: u8) -> u8 {
    byte ^ 0x80
}

fn encode_column(value: &Value, col: OrderByColumn, out: &mut [u8]) {
    let width = encoding_size(col.col_type);
    if value.is_null() {
        for b in out[..width].iter_mut() {
            *b = 0xFF;
        }
    } else {
        out[0] = 0x00;
        encode_non_null(value, col.col_type, &mut out[1..width]);
    }
    if !col.ascending {
        for b in out[..width].iter_mut() {
            *b = !*b;
        }
    }
}

fn encode_non_null(value: &Value, col_type: ColumnType, out: &mut [u8]) {
    match (col_type, value) {
        (ColumnType::Bool, Value::Bool(b)) => out[0] = *b as u8,
        (ColumnType::Int32, Value::Int32(i)) => {
            out[0..4].copy_from_slice(&i.to_be_bytes());
            out[0] = flip_sign(out[0]);
        }
        (ColumnType::Int64, Value::Int64(i)) => {
            out[0..8].copy_from_slice(&i.to_be_bytes());
            out[0] = flip_sign(out[0]);
        }
        (ColumnType::Double, Value::Double(d)) => encode_double(*d, out),
        (ColumnType::Date, Value::Date(d)) => {
            let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
            let days = (*d - epoch).num_days() as i32;
            out[0..4].copy_from_slice(&days.to_be_bytes());
            out[0] = flip_sign(out[0]);
        }
        (ColumnType::Timestamp, Value::Timestamp(ts)) => {
            let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            let micros = (*ts - epoch).num_microseconds().unwrap_or(0);
            out[0..8].copy_from_slice(&micros.to_be_bytes());
            out[0] = flip_sign(out[0]);
        }
        (ColumnType::Interval, Value::Interval(iv)) => encode_interval(iv, out),
        (ColumnType::String, Value::String(s)) => encode_string(s, out),
        _ => panic!("order-by column type mismatch"),
    }
}

fn encode_double(d: f64, out: &mut [u8]) {
    out[0..8].copy_from_slice(&d.to_be_bytes());
    if d < 0.0 {
        for b in out[0..8].iter_mut() {
            *b = !*b;
        }
    } else {
        out[0] = flip_sign(out[0]);
    }
}

fn encode_interval(iv: &Interval, out: &mut [u8]) {
    // Normalize to (months, days, micros) with days <= 30 and
    // micros < 1 day, matching Interval::NormalizeIntervalEntries in
    // the original. This crate's `Interval` stores only
    // `{months, micros}`; days are folded out of the leftover micros.
    const MICROS_PER_DAY: i64 = 24 * 60 * 60 * 1_000_000;
    let days = (iv.micros / MICROS_PER_DAY) as i32;
    let rem_micros = iv.micros % MICROS_PER_DAY;
    out[0..4].copy_from_slice(&iv.months.to_be_bytes());
    out[0] = flip_sign(out[0]);
    out[4..8].copy_from_slice(&days.to_be_bytes());
    out[4] = flip_sign(out[4]);
    out[8..16].copy_from_slice(&rem_micros.to_be_bytes());
    out[8] = flip_sign(out[8]);
}

fn encode_string(s: &str, out: &mut [u8]) {
    let bytes = s.as_bytes();
    let prefix_len = bytes.len().min(STRING_PREFIX_LEN);
    out[1..1 + prefix_len].copy_from_slice(&bytes[..prefix_len]);
    for b in out[1 + prefix_len..1 + STRING_PREFIX_LEN].iter_mut() {
        *b = 0;
    }
    // Marker byte: 0x00 for a string fully captured by the prefix,
    // 0xFF if it overflows and needs the tail-pointer lookup to
    // break ties (mirrors `ku_string_t::isShortString`).
    out[0] = if bytes.len() <= STRING_PREFIX_LEN {
        0x00
    } else {
        0xFF
    };
}

fn encode_tail(ft_idx: u8, block_idx: u32, block_offset: u32, out: &mut [u8]) {
    out[0] = ft_idx;
    out[1..4].copy_from_slice(&block_idx.to_le_bytes()[..3]);
    out[4..8].copy_from_slice(&block_offset.to_le_bytes());
}

/// Decodes the tail metadata written by [`encode_tail`].
pub fn decode_tail(buf: &[u8]) -> (u8, u32, u32) {
    let ft_idx = buf[0];
    let mut block_idx_bytes = [0u8; 4];
    block_idx_bytes[..3].copy_from_slice(&buf[1..4]);
    let block_idx = u32::from_le_bytes(block_idx_bytes);
    let block_offset = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    (ft_idx, block_idx, block_offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_one(columns: Vec<OrderByColumn>, values: &[Value]) -> Vec<u8> {
        let mut encoder = OrderByKeyEncoder::new(columns, 0);
        encoder.encode_tuple(
            values,
            TuplePtr {
                block_idx: 0,
                offset_in_block: 0,
            },
        );
        encoder.into_blocks().into_iter().next().unwrap()
    }

    #[test]
    fn ascending_int64_orders_naturally() {
        let col = OrderByColumn {
            col_type: ColumnType::Int64,
            ascending: true,
        };
        let low = encode_one(vec![col], &[Value::Int64(-5)]);
        let high = encode_one(vec![col], &[Value::Int64(5)]);
        assert!(low < high);
    }

    #[test]
    fn descending_flips_order() {
        let col = OrderByColumn {
            col_type: ColumnType::Int64,
            ascending: false,
        };
        let low = encode_one(vec![col], &[Value::Int64(-5)]);
        let high = encode_one(vec![col], &[Value::Int64(5)]);
        assert!(low > high);
    }

    #[test]
    fn ascending_null_sorts_last() {
        let col = OrderByColumn {
            col_type: ColumnType::Int64,
            ascending: true,
        };
        let null_key = encode_one(vec![col], &[Value::Null]);
        let value_key = encode_one(vec![col], &[Value::Int64(i64::MAX)]);
        assert!(null_key > value_key);
    }

    #[test]
    fn descending_null_sorts_first() {
        let col = OrderByColumn {
            col_type: ColumnType::Int64,
            ascending: false,
        };
        let null_key = encode_one(vec![col], &[Value::Null]);
        let value_key = encode_one(vec![col], &[Value::Int64(i64::MIN)]);
        assert!(null_key < value_key);
    }

    #[test]
    fn double_ordering_matches_natural_order() {
        let col = OrderByColumn {
            col_type: ColumnType::Double,
            ascending: true,
        };
        let neg = encode_one(vec![col], &[Value::Double(-1.5)]);
        let zero = encode_one(vec![col], &[Value::Double(0.0)]);
        let pos = encode_one(vec![col], &[Value::Double(1.5)]);
        assert!(neg < zero);
        assert!(zero < pos);
    }

    #[test]
    fn string_prefix_orders_before_tiebreak_needed() {
        let col = OrderByColumn {
            col_type: ColumnType::String,
            ascending: true,
        };
        let a = encode_one(vec![col], &[Value::String("apple".into())]);
        let b = encode_one(vec![col], &[Value::String("banana".into())]);
        assert!(a < b);
    }

    #[test]
    fn multi_column_key_respects_tuple_ordering_spec_scenario() {
        // spec.md §8 scenario 4: {INT64 ASC, STRING DESC}.
        let cols = vec![
            OrderByColumn {
                col_type: ColumnType::Int64,
                ascending: true,
            },
            OrderByColumn {
                col_type: ColumnType::String,
                ascending: false,
            },
        ];
        let rows = [
            vec![Value::Int64(41), Value::String("b".into())],
            vec![Value::Int64(-132), Value::String("a".into())],
            vec![Value::Int64(41), Value::String("a".into())],
            vec![Value::Null, Value::String("z".into())],
        ];
        let mut keys: Vec<(Vec<u8>, usize)> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| (encode_one(cols.clone(), row), i))
            .collect();
        keys.sort_by(|a, b| a.0[..a.0.len() - TAIL_WIDTH].cmp(&b.0[..b.0.len() - TAIL_WIDTH]));
        let order: Vec<usize> = keys.iter().map(|(_, i)| *i).collect();
        assert_eq!(order, vec![1, 0, 2, 3]);
    }

    #[test]
    fn tail_metadata_round_trips() {
        let mut encoder = OrderByKeyEncoder::new(
            vec![OrderByColumn {
                col_type: ColumnType::Int64,
                ascending: true,
            }],
            7,
        );
        encoder.encode_tuple(
            &[Value::Int64(1)],
            TuplePtr {
                block_idx: 0,
                offset_in_block: 0,
            },
        );
        let blocks = encoder.into_blocks();
        let tuple_width = encoding_size(ColumnType::Int64) + TAIL_WIDTH;
        let tail = &blocks[0][tuple_width - TAIL_WIDTH..tuple_width];
        assert_eq!(decode_tail(tail), (7, 0, 0));
    }

    #[test]
    fn allocates_new_block_when_full() {
        let mut encoder = OrderByKeyEncoder::with_tuples_per_block(
            vec![OrderByColumn {
                col_type: ColumnType::Int64,
                ascending: true,
            }],
            0,
            2,
        );
        for i in 0..5i64 {
            encoder.encode_tuple(
                &[Value::Int64(i)],
                TuplePtr {
                    block_idx: 0,
                    offset_in_block: 0,
                },
            );
        }
        let blocks = encoder.into_blocks();
        // 5 tuples at 2 per block -> 3 blocks (2, 2, 1).
        assert_eq!(blocks.len(), 3);
    }
}
