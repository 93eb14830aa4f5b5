//! Unified error taxonomy for the storage and execution substrate.

use std::path::PathBuf;

/// Result alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// The root error type returned across crate boundaries.
///
/// Each downstream crate (`vertexdb-storage`, `vertexdb-durability`,
/// `vertexdb-concurrency`, `vertexdb-execution`) defines its own
/// `#[from]`-convertible error variants internally where useful, but
/// converges on this enum at its public API surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A value could not be converted between types (e.g. truncation
    /// when appending an oversized string into a fixed-width slot).
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A request referenced a column, table, or binding that does not
    /// exist or has the wrong arity/type. Raised by collaborators that
    /// sit above this crate (binder/planner); carried here so storage
    /// and execution errors can be reported through one type.
    #[error("binder error: {0}")]
    Binder(String),

    /// An error raised while executing a physical operator (e.g. a
    /// hash table resize failure, an encoder overflow).
    #[error("runtime error: {0}")]
    Runtime(String),

    /// An error from the paged storage layer: buffer manager, file
    /// handle, disk array, or lists storage.
    #[error("storage error: {0}")]
    Storage(String),

    /// An error from the WAL, replayer, or transaction manager.
    #[error("transaction manager error: {0}")]
    TransactionManager(String),

    /// An invariant the code assumes was violated; indicates a bug
    /// rather than bad input.
    #[error("internal error: {0}")]
    Internal(String),

    /// An I/O failure while reading or writing a storage file.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The file the operation was performed against.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A `bincode` (de)serialization failure while framing a WAL
    /// record or disk-array element.
    #[error("serialization error: {0}")]
    Serialization(#[from] Box<bincode::ErrorKind>),
}

impl Error {
    /// Wraps an I/O error with the path that was being operated on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for constructing a [`Error::Storage`] variant.
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Shorthand for constructing a [`Error::Internal`] variant.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Shorthand for constructing a [`Error::Runtime`] variant.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime(msg.into())
    }

    /// Shorthand for constructing a [`Error::TransactionManager`] variant.
    pub fn txn(msg: impl Into<String>) -> Self {
        Error::TransactionManager(msg.into())
    }
}
