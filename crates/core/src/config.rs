//! Page size and other tunables shared across the storage, durability,
//! and execution crates.

/// Default page size in bytes: 4 KiB, matching the original engine's
/// `DEFAULT_PAGE_SIZE` and the common OS page size.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page size this crate will accept. Below this, the
/// per-page PIP (page-index-page) overhead dominates.
pub const MIN_PAGE_SIZE: usize = 1024;

/// Largest page size this crate will accept.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Number of nodes per CSR chunk in lists storage (spec.md §4.6): lists
/// storage groups adjacency/property lists into fixed-size chunks of
/// 512 consecutive node offsets for the small-list CSR layout.
pub const LISTS_CHUNK_SIZE: u64 = 512;

/// Validates a requested page size against [`MIN_PAGE_SIZE`]..=[`MAX_PAGE_SIZE`]
/// and requires it be a power of two, since the buffer manager uses
/// shifts rather than division to compute page offsets.
pub fn validate_page_size(page_size: usize) -> crate::Result<()> {
    if page_size < MIN_PAGE_SIZE || page_size > MAX_PAGE_SIZE {
        return Err(crate::Error::storage(format!(
            "page size {page_size} out of range [{MIN_PAGE_SIZE}, {MAX_PAGE_SIZE}]"
        )));
    }
    if !page_size.is_power_of_two() {
        return Err(crate::Error::storage(format!(
            "page size {page_size} is not a power of two"
        )));
    }
    Ok(())
}

/// Storage-wide configuration, mirroring the teacher's
/// `StorageConfig`-style struct: one small, `Default`-able struct per
/// subsystem rather than a single monolithic settings object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Page size in bytes. Must satisfy [`validate_page_size`].
    pub page_size: usize,
    /// Maximum number of frames the buffer manager may hold resident.
    pub buffer_pool_capacity: usize,
    /// Number of WAL bytes appended before a checkpoint is triggered
    /// automatically. `None` disables automatic checkpointing.
    pub checkpoint_wal_threshold_bytes: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool_capacity: 1024,
            checkpoint_wal_threshold_bytes: Some(64 * 1024 * 1024),
        }
    }
}
