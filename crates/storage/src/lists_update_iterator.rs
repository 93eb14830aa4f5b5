//! CSR reconstruction at commit time (spec.md §4.6, §9).
//!
//! For every chunk that has at least one staged update in the
//! [`LocalUpdateStore`], [`ListsUpdateIterator`] rebuilds that chunk's
//! small-list region from scratch: it walks node offsets in ascending
//! order, pulling each node's content either from the Local Update
//! Store (if staged) or from the old page group (if untouched),
//! concatenates the results into a fresh scratch buffer, and writes
//! that buffer into a newly allocated page group. Lists that have
//! grown past the promotion threshold are lifted out into large lists
//! — deferred to the end of chunk processing, per the design note, so
//! the promoted list's old bytes are excluded from (and don't inflate)
//! the new small-list page group before the old page group is freed.

use std::collections::HashSet;

use vertexdb_core::config::LISTS_CHUNK_SIZE;
use vertexdb_core::Result;

use crate::disk_array::TxnView;
use crate::lists::{Lists, ListHeader, CHUNK_HEAD_NONE};
use crate::local_update_store::LocalUpdateStore;

/// Drives CSR reconstruction for every chunk with a staged update.
/// One instance is used per commit; it tracks which node offsets it
/// has already processed to enforce spec.md §4.6's "each node-offset
/// processed at most once per commit" invariant.
pub struct ListsUpdateIterator<'a> {
    lists: &'a Lists,
    update_store: &'a LocalUpdateStore,
    processed: HashSet<u64>,
}

impl<'a> ListsUpdateIterator<'a> {
    /// Builds an iterator over `lists`'s staged updates in
    /// `update_store`. Caller must have already called
    /// `lists.begin_write()` for this transaction.
    pub fn new(lists: &'a Lists, update_store: &'a LocalUpdateStore) -> Self {
        ListsUpdateIterator {
            lists,
            update_store,
            processed: HashSet::new(),
        }
    }

    /// Reconstructs every chunk with a staged update. `num_nodes` is
    /// the node table's current row count, needed to know where the
    /// last (possibly partial) chunk ends.
    pub fn commit_all(&mut self, num_nodes: u64) -> Result<()> {
        let mut chunk_ids = self.update_store.chunks_with_updates();
        chunk_ids.sort_unstable();
        for chunk_id in chunk_ids {
            self.commit_chunk(chunk_id, num_nodes)?;
        }
        Ok(())
    }

    fn commit_chunk(&mut self, chunk_id: u64, num_nodes: u64) -> Result<()> {
        let chunk_start = chunk_id * LISTS_CHUNK_SIZE;
        let chunk_end = (chunk_start + LISTS_CHUNK_SIZE).min(num_nodes);
        if chunk_start >= chunk_end {
            return Ok(());
        }

        let updates = self.update_store.updates_for_chunk(chunk_id);
        let mut updates = updates.into_iter().peekable();

        let element_size = self.lists.element_size;
        let mut region: Vec<u8> = Vec::new();
        let mut headers: Vec<(u64, ListHeader)> = Vec::with_capacity((chunk_end - chunk_start) as usize);
        let mut to_promote: Vec<(u64, Vec<u8>)> = Vec::new();

        for node_offset in chunk_start..chunk_end {
            debug_assert!(
                self.processed.insert(node_offset),
                "node offset {node_offset} processed twice in one commit"
            );
            let content = match updates.peek() {
                Some((offset, _)) if *offset == node_offset => {
                    let (_, buf) = updates.next().unwrap();
                    buf.data().to_vec()
                }
                _ => self.lists.read_list(node_offset, TxnView::ReadOnly)?,
            };

            let num_elements = (content.len() / element_size.max(1)) as u32;
            if num_elements >= self.lists.promotion_threshold {
                to_promote.push((node_offset, content));
                headers.push((node_offset, ListHeader::empty()));
            } else {
                let csr_offset = (region.len() / element_size.max(1)) as u32;
                region.extend_from_slice(&content);
                headers.push((node_offset, ListHeader::small(csr_offset, num_elements)));
            }
        }

        // Free the old page group now that every untouched list in
        // this chunk has been read out of it.
        let old_head = if chunk_id < self.lists.metadata.chunk_to_page_list_head.len(TxnView::Write) {
            self.lists
                .metadata
                .chunk_to_page_list_head
                .get(chunk_id, TxnView::Write)?
        } else {
            CHUNK_HEAD_NONE
        };
        if old_head != CHUNK_HEAD_NONE {
            self.lists.metadata.free_chain(old_head)?;
        }

        // Promotions: allocate each promoted list's private page
        // chain only after the old chunk pages are freed, so the
        // freed pages are available for reuse by the promotion itself
        // or by the new small-list page group built below.
        for (node_offset, content) in to_promote {
            let num_elements = (content.len() / element_size.max(1)) as u32;
            let page_size = self.lists.page_size();
            let num_pages = ((content.len() + page_size - 1) / page_size).max(1);
            let large_id =
                self.lists
                    .metadata
                    .allocate_large_list(num_pages, num_elements, self.lists.data_file())?;
            let pages = self.lists.metadata.pages_for_large_list(large_id, TxnView::Write)?;
            self.lists.write_bytes(&pages, 0, &content, true)?;
            if let Some(entry) = headers.iter_mut().find(|(o, _)| *o == node_offset) {
                entry.1 = ListHeader::large(large_id);
            }
        }

        // New small-list page group for this chunk's reconstructed region.
        let page_size = self.lists.page_size();
        let num_pages_needed = (region.len() + page_size - 1) / page_size;
        let new_head = self
            .lists
            .metadata
            .build_chain(num_pages_needed, self.lists.data_file())?;
        self.lists.metadata.set_chunk_head(chunk_id, new_head)?;
        if !region.is_empty() {
            let pages = self.lists.metadata.pages_for_chunk(chunk_id, TxnView::Write)?;
            self.lists.write_bytes(&pages, 0, &region, true)?;
        }

        // Commit headers, growing the headers array to cover any
        // node offsets new to this transaction.
        for (node_offset, header) in headers {
            while self.lists.headers.len(TxnView::Write) <= node_offset {
                self.lists.headers.push_back(ListHeader::empty())?;
            }
            self.lists.headers.update(node_offset, header)?;
        }

        Ok(())
    }
}
