//! `FactorizedTable`: the row-major tuple container shared by
//! hash-aggregate and order-by (spec.md §4.7).
//!
//! A table has a fixed schema: each column is either *flat* (one
//! value per tuple, inlined in the row) or *unflat* (the row holds a
//! 16-byte descriptor into an overflow buffer). Strings are always
//! stored behind a 16-byte descriptor too — short strings (<= 12
//! bytes) inline their bytes in the descriptor itself, longer ones
//! spill to the overflow buffer, mirroring the original engine's
//! `gf_string_t`/`ku_string_t` short-string optimization.
//!
//! Rows are packed into fixed-size tuple blocks so that scanning a
//! contiguous run of tuples is a single memcpy-friendly walk, and so
//! that a `(block_idx, offset_in_block)` pair is a stable pointer that
//! survives further appends (blocks are never reallocated once full).

use vertexdb_core::value::Interval;
use vertexdb_core::{Error, Result, Value};

/// A few tens of KiB per tuple block, matching spec.md §4.7's "tuple
/// blocks of a few tens of KiB".
pub const DEFAULT_BLOCK_SIZE_BYTES: usize = 32 * 1024;

/// The scalar type a column holds. Every column, flat or unflat, has
/// exactly one of these; list/string-list unflat columns encode their
/// per-element type the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// `bool`, encoded as 1 byte.
    Bool,
    /// `i32`, encoded as 4 bytes.
    Int32,
    /// `i64`, encoded as 8 bytes.
    Int64,
    /// `f64`, encoded as 8 bytes.
    Double,
    /// Date, stored as the underlying `i32` day count (4 bytes).
    Date,
    /// Timestamp, stored as the underlying `i64` microsecond count (8 bytes).
    Timestamp,
    /// Interval, stored as `{months: i32, micros: i64}` (16 bytes to
    /// keep alignment with the 16-byte descriptor width used
    /// elsewhere in the row).
    Interval,
    /// UTF-8 string, always behind a 16-byte descriptor.
    String,
}

impl ColumnType {
    /// Fixed in-row width when used as a *flat* scalar column (not a
    /// string, which always uses [`InlineString::ENCODED_WIDTH`]).
    fn fixed_width(self) -> usize {
        match self {
            ColumnType::Bool => 1,
            ColumnType::Int32 => 4,
            ColumnType::Date => 4,
            ColumnType::Int64 => 8,
            ColumnType::Double => 8,
            ColumnType::Timestamp => 8,
            ColumnType::Interval => 16,
            ColumnType::String => InlineString::ENCODED_WIDTH,
        }
    }
}

/// A single column's schema entry: `{is_unflat, data_chunk_id,
/// byte_width}` per spec.md §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSchema {
    /// The scalar type this column carries (or, for an unflat column,
    /// the type of each entry in its list).
    pub col_type: ColumnType,
    /// Whether this column stores one value per row (`false`) or a
    /// descriptor into the overflow buffer (`true`).
    pub is_unflat: bool,
    /// Which source data chunk this column's selected-size is tied
    /// to. Columns sharing a `data_chunk_id` must be appended with
    /// the same batch length.
    pub data_chunk_id: u32,
}

impl ColumnSchema {
    /// A flat scalar column.
    pub fn flat(col_type: ColumnType) -> Self {
        ColumnSchema {
            col_type,
            is_unflat: false,
            data_chunk_id: 0,
        }
    }

    /// An unflat (list-descriptor) column sourced from `data_chunk_id`.
    pub fn unflat(col_type: ColumnType, data_chunk_id: u32) -> Self {
        ColumnSchema {
            col_type,
            is_unflat: true,
            data_chunk_id,
        }
    }

    /// In-row byte width of this column (excluding the null bit).
    pub fn byte_width(&self) -> usize {
        if self.is_unflat {
            UnflatDescriptor::ENCODED_WIDTH
        } else {
            self.col_type.fixed_width()
        }
    }
}

/// The row layout for a [`FactorizedTable`]: a null bitmap followed by
/// each column's fixed-width slot, in schema order.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Column definitions, in row order.
    pub columns: Vec<ColumnSchema>,
    col_offsets: Vec<usize>,
    row_size: usize,
}

impl TableSchema {
    /// Builds a schema and pre-computes each column's byte offset.
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        let null_bitmap_bytes = (columns.len() + 7) / 8;
        let mut offset = null_bitmap_bytes;
        let mut col_offsets = Vec::with_capacity(columns.len());
        for col in &columns {
            col_offsets.push(offset);
            offset += col.byte_width();
        }
        TableSchema {
            columns,
            col_offsets,
            row_size: offset,
        }
    }

    /// Total row size in bytes, including the null bitmap.
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// Byte offset of the null bitmap (always 0).
    pub fn null_bitmap_bytes(&self) -> usize {
        (self.columns.len() + 7) / 8
    }

    /// Byte offset of column `idx` within a row.
    pub fn col_offset(&self, idx: usize) -> usize {
        self.col_offsets[idx]
    }
}

/// A short-string-optimized 16-byte descriptor, matching the original
/// engine's `gf_string_t`: strings of 12 bytes or fewer are stored
/// entirely inline (no overflow read needed); longer strings store a
/// 4-byte prefix plus a pointer into the overflow buffer.
#[derive(Debug, Clone, Copy)]
pub struct InlineString {
    len: u32,
    prefix: [u8; 4],
    /// Inline tail (short strings) or `{buffer_idx: u32, offset: u32}`
    /// (long strings).
    tail: [u8; 8],
}

impl InlineString {
    /// Encoded width: 4 (len) + 4 (prefix) + 8 (tail) bytes.
    pub const ENCODED_WIDTH: usize = 16;
    const INLINE_CAPACITY: usize = 12; // prefix + tail

    fn is_short(&self) -> bool {
        (self.len as usize) <= Self::INLINE_CAPACITY
    }

    fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.len.to_le_bytes());
        out[4..8].copy_from_slice(&self.prefix);
        out[8..16].copy_from_slice(&self.tail);
    }

    fn decode(buf: &[u8]) -> Self {
        let len = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&buf[4..8]);
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&buf[8..16]);
        InlineString { len, prefix, tail }
    }
}

/// The 16-byte unflat-column descriptor: `{length, overflow_pointer,
/// source_data_chunk_id}` per spec.md §4.7.
#[derive(Debug, Clone, Copy)]
struct UnflatDescriptor {
    length: u32,
    buffer_idx: u32,
    offset: u32,
    source_data_chunk_id: u32,
}

impl UnflatDescriptor {
    const ENCODED_WIDTH: usize = 16;

    fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..8].copy_from_slice(&self.buffer_idx.to_le_bytes());
        out[8..12].copy_from_slice(&self.offset.to_le_bytes());
        out[12..16].copy_from_slice(&self.source_data_chunk_id.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        UnflatDescriptor {
            length: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            buffer_idx: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            offset: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            source_data_chunk_id: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        }
    }
}

/// One column's input for [`FactorizedTable::append`]: either a
/// single value replicated across the batch, or one value per row of
/// the batch (for an unflat column).
#[derive(Debug, Clone)]
pub enum ColumnBatch {
    /// A flat value, replicated to every row appended by this call.
    Flat(Value),
    /// One value per appended row; all `Unflat` batches in the same
    /// `append` call must have equal length.
    Unflat(Vec<Value>),
}

/// A stable handle to one tuple, valid for the lifetime of the table
/// (tuple blocks are append-only; a block is never moved or
/// reallocated once tuples have been written into it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TuplePtr {
    /// Index of the tuple block.
    pub block_idx: u32,
    /// Row offset within that block.
    pub offset_in_block: u32,
}

struct TupleBlock {
    data: Vec<u8>,
    num_tuples: usize,
    capacity: usize,
}

/// The row-major tuple store described by spec.md §4.7.
pub struct FactorizedTable {
    schema: TableSchema,
    blocks: Vec<TupleBlock>,
    overflow_buffers: Vec<Vec<u8>>,
    num_tuples: u64,
    tuples_per_block: usize,
}

impl FactorizedTable {
    /// Creates an empty table for the given schema.
    pub fn new(schema: TableSchema) -> Self {
        let row_size = schema.row_size().max(1);
        let tuples_per_block = (DEFAULT_BLOCK_SIZE_BYTES / row_size).max(1);
        FactorizedTable {
            schema,
            blocks: Vec::new(),
            overflow_buffers: vec![Vec::new()],
            num_tuples: 0,
            tuples_per_block,
        }
    }

    /// The table's schema.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Total number of tuples appended so far.
    pub fn num_tuples(&self) -> u64 {
        self.num_tuples
    }

    fn current_block_mut(&mut self) -> &mut TupleBlock {
        let row_size = self.schema.row_size();
        let tuples_per_block = self.tuples_per_block;
        if self
            .blocks
            .last()
            .map(|b| b.num_tuples == b.capacity)
            .unwrap_or(true)
        {
            self.blocks.push(TupleBlock {
                data: vec![0u8; row_size * tuples_per_block],
                num_tuples: 0,
                capacity: tuples_per_block,
            });
        }
        self.blocks.last_mut().unwrap()
    }

    fn push_overflow(&mut self, bytes: &[u8]) -> (u32, u32) {
        let buf = self.overflow_buffers.last_mut().unwrap();
        let offset = buf.len() as u32;
        buf.extend_from_slice(bytes);
        ((self.overflow_buffers.len() - 1) as u32, offset)
    }

    /// Appends `n` tuples, where `n` is the length of the `Unflat`
    /// batches (which must all agree), or 1 if every column is
    /// `Flat`. Returns the pointer to the first appended tuple.
    pub fn append(&mut self, columns: &[ColumnBatch]) -> Result<TuplePtr> {
        if columns.len() != self.schema.columns.len() {
            return Err(Error::runtime(format!(
                "append: expected {} columns, got {}",
                self.schema.columns.len(),
                columns.len()
            )));
        }
        let mut n: Option<usize> = None;
        for (batch, col) in columns.iter().zip(&self.schema.columns) {
            if let ColumnBatch::Unflat(values) = batch {
                if !col.is_unflat {
                    return Err(Error::runtime(
                        "append: Unflat batch supplied for a flat schema column",
                    ));
                }
                match n {
                    None => n = Some(values.len()),
                    Some(existing) if existing != values.len() => {
                        return Err(Error::runtime(
                            "append: unflat column batches must share one selected size \
                             (more than one unflat data chunk passed in a single append)",
                        ));
                    }
                    _ => {}
                }
            }
        }
        let n = n.unwrap_or(1);

        let first_ptr = {
            let block = self.current_block_mut();
            TuplePtr {
                block_idx: (self.blocks.len() - 1) as u32,
                offset_in_block: block.num_tuples as u32,
            }
        };

        for row in 0..n {
            let mut row_bytes = vec![0u8; self.schema.row_size()];
            for (col_idx, (batch, col)) in columns.iter().zip(&self.schema.columns).enumerate() {
                let value = match batch {
                    ColumnBatch::Flat(v) => v,
                    ColumnBatch::Unflat(values) => &values[row],
                };
                self.encode_column(col_idx, *col, value, &mut row_bytes)?;
            }
            let block = self.current_block_mut();
            let row_size = row_bytes.len();
            let start = block.num_tuples * row_size;
            block.data[start..start + row_size].copy_from_slice(&row_bytes);
            block.num_tuples += 1;
            self.num_tuples += 1;
        }
        Ok(first_ptr)
    }

    fn encode_column(
        &mut self,
        col_idx: usize,
        col: ColumnSchema,
        value: &Value,
        row_bytes: &mut [u8],
    ) -> Result<()> {
        let offset = self.schema.col_offset(col_idx);
        let width = col.byte_width();
        let null_byte_idx = col_idx / 8;
        let null_bit = 1u8 << (col_idx % 8);
        if value.is_null() {
            row_bytes[null_byte_idx] |= null_bit;
            return Ok(());
        }
        if col.is_unflat {
            let (bytes, length) = encode_raw(value, col.col_type)?;
            let (buffer_idx, buf_offset) = self.push_overflow(&bytes);
            let desc = UnflatDescriptor {
                length: length as u32,
                buffer_idx,
                offset: buf_offset,
                source_data_chunk_id: col.data_chunk_id,
            };
            desc.encode(&mut row_bytes[offset..offset + width]);
            return Ok(());
        }
        match col.col_type {
            ColumnType::String => {
                let s = match value {
                    Value::String(s) => s.as_str(),
                    _ => return Err(Error::runtime("expected STRING value")),
                };
                let bytes = s.as_bytes();
                let mut prefix = [0u8; 4];
                let plen = bytes.len().min(4);
                prefix[..plen].copy_from_slice(&bytes[..plen]);
                let tail = if bytes.len() <= InlineString::INLINE_CAPACITY {
                    let mut t = [0u8; 8];
                    if bytes.len() > 4 {
                        t[..bytes.len() - 4].copy_from_slice(&bytes[4..]);
                    }
                    t
                } else {
                    let (buffer_idx, buf_offset) = self.push_overflow(bytes);
                    let mut t = [0u8; 8];
                    t[0..4].copy_from_slice(&buffer_idx.to_le_bytes());
                    t[4..8].copy_from_slice(&buf_offset.to_le_bytes());
                    t
                };
                let desc = InlineString {
                    len: bytes.len() as u32,
                    prefix,
                    tail,
                };
                desc.encode(&mut row_bytes[offset..offset + width]);
            }
            other => {
                let (bytes, _) = encode_raw(value, other)?;
                row_bytes[offset..offset + width].copy_from_slice(&bytes);
            }
        }
        Ok(())
    }

    fn decode_column(&self, col_idx: usize, col: ColumnSchema, row_bytes: &[u8]) -> Value {
        let null_byte_idx = col_idx / 8;
        let null_bit = 1u8 << (col_idx % 8);
        if row_bytes[null_byte_idx] & null_bit != 0 {
            return Value::Null;
        }
        let offset = self.schema.col_offset(col_idx);
        let width = col.byte_width();
        let slot = &row_bytes[offset..offset + width];
        if col.is_unflat {
            let desc = UnflatDescriptor::decode(slot);
            let buf = &self.overflow_buffers[desc.buffer_idx as usize];
            let bytes = &buf[desc.offset as usize..(desc.offset + desc.length) as usize];
            return decode_raw(bytes, col.col_type);
        }
        match col.col_type {
            ColumnType::String => {
                let desc = InlineString::decode(slot);
                if desc.is_short() {
                    let mut bytes = Vec::with_capacity(desc.len as usize);
                    bytes.extend_from_slice(&desc.prefix[..(desc.len as usize).min(4)]);
                    if desc.len > 4 {
                        bytes.extend_from_slice(&desc.tail[..desc.len as usize - 4]);
                    }
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                } else {
                    let buffer_idx = u32::from_le_bytes(desc.tail[0..4].try_into().unwrap());
                    let offset = u32::from_le_bytes(desc.tail[4..8].try_into().unwrap());
                    let buf = &self.overflow_buffers[buffer_idx as usize];
                    let bytes = &buf[offset as usize..(offset + desc.len) as usize];
                    Value::String(String::from_utf8_lossy(bytes).into_owned())
                }
            }
            other => decode_raw(slot, other),
        }
    }

    /// Reads `count` tuples starting at tuple index `start` into
    /// `target_columns` (one `Vec<Value>` per requested column,
    /// cleared and filled in place). `count` must be 1 if any
    /// requested column is unflat (spec.md §4.7).
    pub fn scan(
        &self,
        col_indices: &[usize],
        start: u64,
        count: u64,
        target_columns: &mut [Vec<Value>],
    ) -> Result<()> {
        if col_indices.iter().any(|&i| self.schema.columns[i].is_unflat) && count != 1 {
            return Err(Error::runtime(
                "scan: count must be 1 when any output column is unflat",
            ));
        }
        if start + count > self.num_tuples {
            return Err(Error::runtime("scan: out of range"));
        }
        for target in target_columns.iter_mut() {
            target.clear();
        }
        for i in 0..count {
            let ptr = self.tuple_idx_to_ptr(start + i);
            let row_bytes = self.row_bytes(ptr);
            for (slot, &col_idx) in target_columns.iter_mut().zip(col_indices) {
                slot.push(self.decode_column(col_idx, self.schema.columns[col_idx], row_bytes));
            }
        }
        Ok(())
    }

    fn tuple_idx_to_ptr(&self, idx: u64) -> TuplePtr {
        TuplePtr {
            block_idx: (idx / self.tuples_per_block as u64) as u32,
            offset_in_block: (idx % self.tuples_per_block as u64) as u32,
        }
    }

    fn row_bytes(&self, ptr: TuplePtr) -> &[u8] {
        let row_size = self.schema.row_size();
        let block = &self.blocks[ptr.block_idx as usize];
        let start = ptr.offset_in_block as usize * row_size;
        &block.data[start..start + row_size]
    }

    fn row_bytes_mut(&mut self, ptr: TuplePtr) -> &mut [u8] {
        let row_size = self.schema.row_size();
        let block = &mut self.blocks[ptr.block_idx as usize];
        let start = ptr.offset_in_block as usize * row_size;
        &mut block.data[start..start + row_size]
    }

    /// Returns the raw row bytes at `ptr` (used by the aggregate hash
    /// table to re-enter already-created entries and the order-by key
    /// encoder's tail metadata to address a tuple).
    pub fn tuple_bytes(&self, ptr: TuplePtr) -> &[u8] {
        self.row_bytes(ptr)
    }

    /// Mutable raw row bytes at `ptr`, for in-place aggregate state
    /// updates.
    pub fn tuple_bytes_mut(&mut self, ptr: TuplePtr) -> &mut [u8] {
        self.row_bytes_mut(ptr)
    }

    /// Decodes a single column's value directly from a raw tuple
    /// pointer (used by the order-by string tie-breaker and the
    /// key-block merger to recover full string values).
    pub fn column_value(&self, ptr: TuplePtr, col_idx: usize) -> Value {
        self.decode_column(col_idx, self.schema.columns[col_idx], self.row_bytes(ptr))
    }

    /// Gather by pointer: for each `tuple_ptrs[i]`, decode
    /// `col_indices` into `target_columns[*][i]` (used by hash-join /
    /// hash-aggregate probe paths).
    pub fn lookup(
        &self,
        col_indices: &[usize],
        tuple_ptrs: &[TuplePtr],
        target_columns: &mut [Vec<Value>],
    ) {
        for target in target_columns.iter_mut() {
            target.clear();
        }
        for &ptr in tuple_ptrs {
            let row_bytes = self.row_bytes(ptr);
            for (slot, &col_idx) in target_columns.iter_mut().zip(col_indices) {
                slot.push(self.decode_column(col_idx, self.schema.columns[col_idx], row_bytes));
            }
        }
    }

    /// Moves `other`'s tuple blocks and overflow buffers into `self`.
    /// Existing `TuplePtr`s into `other` are no longer valid after
    /// this call (the blocks are renumbered by the count of blocks
    /// already in `self`); overflow-buffer *bytes* are moved without
    /// copying, but each moved row's buffer-index field is patched by
    /// `self.overflow_buffers.len()` so the descriptors still resolve
    /// to the right buffer — an O(#rows), not O(#bytes), operation.
    pub fn merge(&mut self, mut other: FactorizedTable) {
        let buffer_shift = self.overflow_buffers.len() as u32;
        for block in &mut other.blocks {
            let row_size = other.schema.row_size();
            for tuple_idx in 0..block.num_tuples {
                let row = &mut block.data[tuple_idx * row_size..(tuple_idx + 1) * row_size];
                for (col_idx, col) in other.schema.columns.iter().enumerate() {
                    let null_byte_idx = col_idx / 8;
                    let null_bit = 1u8 << (col_idx % 8);
                    if row[null_byte_idx] & null_bit != 0 {
                        continue;
                    }
                    let offset = other.schema.col_offset(col_idx);
                    if col.is_unflat {
                        let slot = &mut row[offset..offset + UnflatDescriptor::ENCODED_WIDTH];
                        let mut desc = UnflatDescriptor::decode(slot);
                        desc.buffer_idx += buffer_shift;
                        desc.encode(slot);
                    } else if col.col_type == ColumnType::String {
                        let slot = &mut row[offset..offset + InlineString::ENCODED_WIDTH];
                        let desc = InlineString::decode(slot);
                        if !desc.is_short() {
                            let buffer_idx =
                                u32::from_le_bytes(desc.tail[0..4].try_into().unwrap());
                            let shifted = (buffer_idx + buffer_shift).to_le_bytes();
                            slot[8..12].copy_from_slice(&shifted);
                        }
                    }
                }
            }
        }
        self.blocks.append(&mut other.blocks);
        self.overflow_buffers.append(&mut other.overflow_buffers);
        self.num_tuples += other.num_tuples;
    }
}

fn encode_raw(value: &Value, col_type: ColumnType) -> Result<(Vec<u8>, usize)> {
    let bytes = match (col_type, value) {
        (ColumnType::Bool, Value::Bool(b)) => vec![*b as u8],
        (ColumnType::Int32, Value::Int32(i)) => i.to_le_bytes().to_vec(),
        (ColumnType::Int64, Value::Int64(i)) => i.to_le_bytes().to_vec(),
        (ColumnType::Double, Value::Double(d)) => d.to_le_bytes().to_vec(),
        (ColumnType::Date, Value::Date(d)) => {
            let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
            let days = (*d - epoch).num_days() as i32;
            days.to_le_bytes().to_vec()
        }
        (ColumnType::Timestamp, Value::Timestamp(ts)) => {
            let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            let micros = (*ts - epoch).num_microseconds().unwrap_or(0);
            micros.to_le_bytes().to_vec()
        }
        (ColumnType::Interval, Value::Interval(iv)) => encode_interval(iv),
        (ColumnType::String, Value::String(s)) => s.as_bytes().to_vec(),
        _ => return Err(Error::runtime("value type does not match column type")),
    };
    let len = bytes.len();
    Ok((bytes, len))
}

fn encode_interval(iv: &Interval) -> Vec<u8> {
    let mut out = vec![0u8; 16];
    out[0..4].copy_from_slice(&iv.months.to_le_bytes());
    out[8..16].copy_from_slice(&iv.micros.to_le_bytes());
    out
}

fn decode_raw(bytes: &[u8], col_type: ColumnType) -> Value {
    match col_type {
        ColumnType::Bool => Value::Bool(bytes[0] != 0),
        ColumnType::Int32 => Value::Int32(i32::from_le_bytes(bytes[0..4].try_into().unwrap())),
        ColumnType::Int64 => Value::Int64(i64::from_le_bytes(bytes[0..8].try_into().unwrap())),
        ColumnType::Double => Value::Double(f64::from_le_bytes(bytes[0..8].try_into().unwrap())),
        ColumnType::Date => {
            let days = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
            let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
            Value::Date(epoch + chrono::Duration::days(days as i64))
        }
        ColumnType::Timestamp => {
            let micros = i64::from_le_bytes(bytes[0..8].try_into().unwrap());
            let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            Value::Timestamp(epoch + chrono::Duration::microseconds(micros))
        }
        ColumnType::Interval => {
            let months = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
            let micros = i64::from_le_bytes(bytes[8..16].try_into().unwrap());
            Value::Interval(Interval { months, micros })
        }
        ColumnType::String => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_two_int64() -> TableSchema {
        TableSchema::new(vec![
            ColumnSchema::flat(ColumnType::Int64),
            ColumnSchema::flat(ColumnType::Int64),
        ])
    }

    #[test]
    fn append_and_scan_flat_tuples() {
        let mut table = FactorizedTable::new(schema_two_int64());
        for i in 0..5i64 {
            table
                .append(&[
                    ColumnBatch::Flat(Value::Int64(i)),
                    ColumnBatch::Flat(Value::Int64(i * 10)),
                ])
                .unwrap();
        }
        assert_eq!(table.num_tuples(), 5);
        let mut cols = vec![Vec::new(), Vec::new()];
        table.scan(&[0, 1], 0, 5, &mut cols).unwrap();
        assert_eq!(cols[0], (0..5).map(Value::Int64).collect::<Vec<_>>());
        assert_eq!(
            cols[1],
            (0..5).map(|i| Value::Int64(i * 10)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn null_values_round_trip() {
        let mut table = FactorizedTable::new(schema_two_int64());
        table
            .append(&[
                ColumnBatch::Flat(Value::Null),
                ColumnBatch::Flat(Value::Int64(7)),
            ])
            .unwrap();
        let mut cols = vec![Vec::new(), Vec::new()];
        table.scan(&[0, 1], 0, 1, &mut cols).unwrap();
        assert_eq!(cols[0][0], Value::Null);
        assert_eq!(cols[1][0], Value::Int64(7));
    }

    #[test]
    fn short_and_long_strings_round_trip() {
        let schema = TableSchema::new(vec![ColumnSchema::flat(ColumnType::String)]);
        let mut table = FactorizedTable::new(schema);
        table
            .append(&[ColumnBatch::Flat(Value::String("short".into()))])
            .unwrap();
        let long = "x".repeat(200);
        table
            .append(&[ColumnBatch::Flat(Value::String(long.clone()))])
            .unwrap();
        let mut cols = vec![Vec::new()];
        table.scan(&[0], 0, 2, &mut cols).unwrap();
        assert_eq!(cols[0][0], Value::String("short".into()));
        assert_eq!(cols[0][1], Value::String(long));
    }

    #[test]
    fn unflat_column_batch_shares_selected_size() {
        let schema = TableSchema::new(vec![
            ColumnSchema::flat(ColumnType::Int64),
            ColumnSchema::unflat(ColumnType::Int64, 0),
        ]);
        let mut table = FactorizedTable::new(schema);
        table
            .append(&[
                ColumnBatch::Flat(Value::Int64(1)),
                ColumnBatch::Unflat(vec![Value::Int64(10), Value::Int64(20), Value::Int64(30)]),
            ])
            .unwrap();
        assert_eq!(table.num_tuples(), 3);
        let mut cols = vec![Vec::new()];
        table.scan(&[1], 1, 1, &mut cols).unwrap();
        assert_eq!(cols[0][0], Value::Int64(20));
    }

    #[test]
    fn mismatched_unflat_lengths_rejected() {
        let schema = TableSchema::new(vec![
            ColumnSchema::unflat(ColumnType::Int64, 0),
            ColumnSchema::unflat(ColumnType::Int64, 1),
        ]);
        let mut table = FactorizedTable::new(schema);
        let result = table.append(&[
            ColumnBatch::Unflat(vec![Value::Int64(1), Value::Int64(2)]),
            ColumnBatch::Unflat(vec![Value::Int64(1)]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn merge_moves_blocks_and_preserves_values() {
        let mut a = FactorizedTable::new(schema_two_int64());
        let mut b = FactorizedTable::new(schema_two_int64());
        a.append(&[
            ColumnBatch::Flat(Value::Int64(1)),
            ColumnBatch::Flat(Value::Int64(2)),
        ])
        .unwrap();
        b.append(&[
            ColumnBatch::Flat(Value::Int64(3)),
            ColumnBatch::Flat(Value::Int64(4)),
        ])
        .unwrap();
        a.merge(b);
        assert_eq!(a.num_tuples(), 2);
        let mut cols = vec![Vec::new(), Vec::new()];
        a.scan(&[0, 1], 0, 2, &mut cols).unwrap();
        assert_eq!(cols[0], vec![Value::Int64(1), Value::Int64(3)]);
        assert_eq!(cols[1], vec![Value::Int64(2), Value::Int64(4)]);
    }

    #[test]
    fn merge_preserves_long_string_overflow() {
        let schema = || TableSchema::new(vec![ColumnSchema::flat(ColumnType::String)]);
        let mut a = FactorizedTable::new(schema());
        let mut b = FactorizedTable::new(schema());
        let long_a = "a".repeat(100);
        let long_b = "b".repeat(100);
        a.append(&[ColumnBatch::Flat(Value::String(long_a.clone()))])
            .unwrap();
        b.append(&[ColumnBatch::Flat(Value::String(long_b.clone()))])
            .unwrap();
        a.merge(b);
        let mut cols = vec![Vec::new()];
        a.scan(&[0], 0, 2, &mut cols).unwrap();
        assert_eq!(cols[0][0], Value::String(long_a));
        assert_eq!(cols[0][1], Value::String(long_b));
    }
}
