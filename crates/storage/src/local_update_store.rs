//! Thread-local-per-transaction staging of list updates before commit
//! (spec.md §3, §4.6): `chunk_id -> node_offset -> PropertyListBuffer`.
//!
//! Populated by `set`/`remove`/`insert` during a write transaction,
//! consumed chunk-by-chunk by [`crate::lists_update_iterator`] at
//! commit, and cleared on commit or rollback.
//!
//! Ownership note (spec.md §9): appending to an existing list (the
//! `insert` path) needs the list's *current* content to append onto,
//! which only the owning [`crate::lists::Lists`] structure can read.
//! Rather than have `LocalUpdateStore` hold a reference back to its
//! owning `Lists` — a literal ownership cycle — `insert` takes the
//! current content as a parameter; callers fetch it via
//! `Lists::read_list` immediately before staging, which is exactly
//! the "borrowed reference held for the duration of a transaction"
//! the design note describes, just expressed as a borrow at the call
//! site instead of a stored field.

use std::collections::HashMap;

use parking_lot::Mutex;

/// A resizable byte buffer holding one node's updated list, encoded
/// in the on-disk layout (spec.md §3). `Vec<u8>` already tracks
/// length/capacity; this thin wrapper exists so the type name matches
/// the structure the design describes and gives call sites a place to
/// hang list-specific helpers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyListBuffer {
    data: Vec<u8>,
}

impl PropertyListBuffer {
    /// Wraps an already-encoded buffer.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        PropertyListBuffer { data }
    }

    /// The encoded bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Byte length of the encoded list.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Allocated capacity of the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// True if the staged list is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Per-transaction staging area for list updates, keyed by chunk then
/// node offset. Not thread-safe on its own (a single `Mutex` guards
/// the whole map) — matching spec.md §5's note that the owning list
/// structure serializes access itself rather than relying on
/// fine-grained concurrency here, since only one write transaction is
/// ever active.
#[derive(Default)]
pub struct LocalUpdateStore {
    inner: Mutex<HashMap<u64, HashMap<u64, PropertyListBuffer>>>,
}

impl LocalUpdateStore {
    /// An empty store, as at the start of a write transaction.
    pub fn new() -> Self {
        LocalUpdateStore::default()
    }

    /// Replaces `node_offset`'s staged list wholesale (a property
    /// `SET` or a full adjacency-list replace).
    pub fn stage_set(&self, chunk_id: u64, node_offset: u64, data: Vec<u8>) {
        self.inner
            .lock()
            .entry(chunk_id)
            .or_default()
            .insert(node_offset, PropertyListBuffer::from_bytes(data));
    }

    /// Stages `node_offset`'s list as empty (a property or
    /// relationship-list deletion).
    pub fn stage_remove(&self, chunk_id: u64, node_offset: u64) {
        self.stage_set(chunk_id, node_offset, Vec::new());
    }

    /// Appends `extra` to `node_offset`'s list, starting from
    /// `current` (the list's content as of the start of this call —
    /// see the module doc for why this is a parameter rather than a
    /// stored back-reference). If `node_offset` already has a staged
    /// buffer in this transaction, appends onto *that* instead of
    /// `current`, so repeated inserts within one transaction
    /// accumulate correctly.
    pub fn stage_insert(&self, chunk_id: u64, node_offset: u64, current: &[u8], extra: &[u8]) {
        let mut guard = self.inner.lock();
        let chunk = guard.entry(chunk_id).or_default();
        let buf = chunk
            .entry(node_offset)
            .or_insert_with(|| PropertyListBuffer::from_bytes(current.to_vec()));
        buf.data.extend_from_slice(extra);
    }

    /// The staged buffer for `(chunk_id, node_offset)`, if any.
    pub fn get(&self, chunk_id: u64, node_offset: u64) -> Option<PropertyListBuffer> {
        self.inner
            .lock()
            .get(&chunk_id)
            .and_then(|c| c.get(&node_offset))
            .cloned()
    }

    /// Every chunk id with at least one staged update, unordered.
    pub fn chunks_with_updates(&self) -> Vec<u64> {
        self.inner.lock().keys().copied().collect()
    }

    /// `(node_offset, buffer)` pairs staged for `chunk_id`, sorted in
    /// ascending `node_offset` order — the order
    /// `ListsUpdateIterator` requires (spec.md §4.6 invariant 1).
    pub fn updates_for_chunk(&self, chunk_id: u64) -> Vec<(u64, PropertyListBuffer)> {
        let guard = self.inner.lock();
        let mut entries: Vec<_> = guard
            .get(&chunk_id)
            .map(|c| c.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default();
        entries.sort_by_key(|(offset, _)| *offset);
        entries
    }

    /// Clears all staged updates — called on commit (after the
    /// iterator has consumed them) and on rollback.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// True if no chunk has a staged update.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().values().all(|c| c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let store = LocalUpdateStore::new();
        store.stage_set(0, 5, vec![1, 2, 3]);
        assert_eq!(store.get(0, 5).unwrap().data(), &[1, 2, 3]);
    }

    #[test]
    fn insert_appends_onto_current_then_onto_itself() {
        let store = LocalUpdateStore::new();
        store.stage_insert(0, 5, &[1, 2], &[3, 4]);
        assert_eq!(store.get(0, 5).unwrap().data(), &[1, 2, 3, 4]);
        store.stage_insert(0, 5, &[9, 9], &[5, 6]);
        assert_eq!(store.get(0, 5).unwrap().data(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn updates_for_chunk_sorted_ascending() {
        let store = LocalUpdateStore::new();
        store.stage_set(2, 30, vec![1]);
        store.stage_set(2, 10, vec![2]);
        store.stage_set(2, 20, vec![3]);
        let offsets: Vec<u64> = store
            .updates_for_chunk(2)
            .into_iter()
            .map(|(o, _)| o)
            .collect();
        assert_eq!(offsets, vec![10, 20, 30]);
    }

    #[test]
    fn clear_empties_all_chunks() {
        let store = LocalUpdateStore::new();
        store.stage_set(0, 1, vec![1]);
        store.stage_set(1, 2, vec![2]);
        store.clear();
        assert!(store.is_empty());
        assert!(store.chunks_with_updates().is_empty());
    }
}
