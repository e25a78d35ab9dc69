//! Error types for the Folio library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`FolioError`] enum. Constructor helpers keep call sites short:
//!
//! ```
//! use folio::error::{FolioError, Result};
//!
//! fn check_order(previous: u32, next: u32) -> Result<()> {
//!     if next <= previous {
//!         return Err(FolioError::corrupt(format!("docs out of order ({next} <= {previous})")));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_order(3, 2).is_err());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Folio operations.
#[derive(Error, Debug)]
pub enum FolioError {
    /// I/O errors (file operations, mmap, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Index-related errors
    #[error("Index error: {0}")]
    Index(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Field-related errors (malformed field content, unknown field)
    #[error("Field error: {0}")]
    Field(String),

    /// Analysis-related errors
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// On-disk structures violate their invariants.
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// A lock could not be obtained before its timeout expired.
    #[error("Lock obtain timed out: {name}")]
    LockObtainFailed { name: String },

    /// No `segments` file exists in the directory.
    #[error("No index found: {0}")]
    IndexNotFound(String),

    /// The reader's snapshot is older than the index on disk.
    #[error("IndexReader out of date and no longer valid for deletion")]
    StaleReader,

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with FolioError.
pub type Result<T> = std::result::Result<T, FolioError>;

impl FolioError {
    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        FolioError::Index(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        FolioError::Storage(msg.into())
    }

    /// Create a new field error.
    pub fn field<S: Into<String>>(msg: S) -> Self {
        FolioError::Field(msg.into())
    }

    /// Create a new analysis error.
    pub fn analysis<S: Into<String>>(msg: S) -> Self {
        FolioError::Analysis(msg.into())
    }

    /// Create a new corruption error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        FolioError::CorruptIndex(msg.into())
    }

    /// Create a new lock timeout error.
    pub fn lock_obtain_failed<S: Into<String>>(name: S) -> Self {
        FolioError::LockObtainFailed { name: name.into() }
    }

    /// Create a new missing-index error.
    pub fn index_not_found<S: Into<String>>(msg: S) -> Self {
        FolioError::IndexNotFound(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        FolioError::InvalidOperation(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        FolioError::Other(msg.into())
    }

    /// Whether the error is a transient "busy" condition the caller may retry.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, FolioError::LockObtainFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = FolioError::index("Test index error");
        assert_eq!(error.to_string(), "Index error: Test index error");

        let error = FolioError::corrupt("term out of order");
        assert_eq!(error.to_string(), "Corrupt index: term out of order");

        let error = FolioError::lock_obtain_failed("write.lock");
        assert_eq!(error.to_string(), "Lock obtain timed out: write.lock");
        assert!(error.is_lock_timeout());
    }

    #[test]
    fn test_stale_reader_message() {
        assert_eq!(
            FolioError::StaleReader.to_string(),
            "IndexReader out of date and no longer valid for deletion"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let folio_error = FolioError::from(io_error);

        match folio_error {
            FolioError::Io(_) => {}
            _ => panic!("Expected IO error variant"),
        }
    }
}
