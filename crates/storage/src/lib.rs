//! Buffer-managed paged storage: page states, file handles, disk
//! arrays, and the variable-length lists storage used by adjacency
//! lists and unstructured node properties.
//!
//! Module map (spec.md §4):
//! - [`page_state`]: the lock-free per-page `{dirty, state, version}` word.
//! - [`file_handle`]: logical→physical page mapping and free-page tracking.
//! - [`buffer_manager`]: pin/unpin, two-handed clock eviction.
//! - [`page_sink`]: the seam storage structures use to register dirty
//!   pages with the WAL without depending on `vertexdb-durability`.
//! - [`disk_array`]: `DiskArray[T]`, the transactional growable array
//!   every other structure in this crate is built from.
//! - [`lists`]: `ListsHeaders`, `ListsMetadata`, and CSR/large-list reads.
//! - [`local_update_store`]: per-transaction staging of list updates.
//! - [`lists_update_iterator`]: CSR reconstruction at commit.

#![warn(missing_docs)]

pub mod buffer_manager;
pub mod disk_array;
pub mod file_handle;
pub mod lists;
pub mod lists_update_iterator;
pub mod local_update_store;
pub mod page_sink;
pub mod page_state;

pub use buffer_manager::{BufferManager, PinPolicy};
pub use disk_array::{DiskArray, DiskArrayElement, DiskArrayHeader, TxnView};
pub use file_handle::FileHandle;
pub use lists::{ListHeader, Lists, ListsHeaders, ListsMetadata, PageListGroup};
pub use lists_update_iterator::ListsUpdateIterator;
pub use local_update_store::{LocalUpdateStore, PropertyListBuffer};
pub use page_sink::{NullPageSink, PageSink};
pub use page_state::{FrameState, PageState};
