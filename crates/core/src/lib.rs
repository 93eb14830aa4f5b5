//! Shared types for VertexDB's storage and execution substrate.
//!
//! This crate defines the foundational types used throughout the system:
//! - [`error::Error`]: the unified error taxonomy (§7 of the design doc)
//! - [`ids`]: page, node-offset, transaction, and table identifiers
//! - [`value`]: the scalar value type shared by the order-by encoder and
//!   the aggregate hash table
//! - [`config`]: page size and other compile-time/runtime tunables

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod ids;
pub mod structure_id;
pub mod value;

pub use error::{Error, Result};
pub use structure_id::StorageStructureId;
