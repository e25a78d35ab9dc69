//! Storage abstraction layer for Folio.
//!
//! An index lives in a flat namespace of named files. This module exposes the
//! directory facade shared by the writer, the readers and the compound-file
//! packer, so that on-disk and in-memory indexes are interchangeable.
//!
//! # Architecture
//!
//! - **Storage trait**: Unified interface for all storage backends
//! - **StorageInput / StorageOutput**: positioned byte streams
//! - **LockManager / StorageLock**: named, cross-process exclusive locks
//! - **StorageConfig enum**: Type-safe configuration for supported backends
//! - **StorageFactory**: Helper for constructing concrete storage instances
//!
//! # Storage Types
//!
//! ## FileStorage
//! - One directory on disk
//! - Inputs are memory-mapped, so cloning an input is a cheap positional view
//! - Locks are lock files created with `create_new`
//!
//! ## MemoryStorage
//! - Immutable byte buffers shared behind `Arc`
//! - Used by the writer to buffer freshly inverted documents
//!
//! # Example
//!
//! ```
//! use folio::storage::{StorageConfig, StorageFactory};
//! use folio::storage::memory::MemoryStorageConfig;
//! use std::io::{Read, Write};
//!
//! # fn main() -> folio::error::Result<()> {
//! let storage = StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default()))?;
//!
//! let mut output = storage.create_output("_0.fnm")?;
//! output.write_all(b"abc")?;
//! output.close()?;
//!
//! let mut input = storage.open_input("_0.fnm")?;
//! let mut buffer = Vec::new();
//! input.read_to_end(&mut buffer)?;
//! assert_eq!(buffer, b"abc");
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FolioError, Result};

pub mod compound;
pub mod file;
pub mod lock;
pub mod memory;
pub mod structured;

/// File metadata information.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes.
    pub size: u64,

    /// Last modified time (milliseconds since epoch).
    pub modified: u64,

    /// Whether the file is read-only.
    pub readonly: bool,
}

/// A trait for storage backends that can store and retrieve data.
///
/// Files are written once through [`StorageOutput`] and read many times
/// through [`StorageInput`]. Implementations must make a file visible to
/// `open_input` only after its output has been closed.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open a file for reading.
    ///
    /// The returned input starts at position 0. The file must exist.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create a file for writing, truncating any previous content.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files in the storage, sorted by name.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Get file metadata.
    fn metadata(&self, name: &str) -> Result<FileMetadata>;

    /// Last modified time of a file (milliseconds since epoch).
    fn file_modified(&self, name: &str) -> Result<u64> {
        Ok(self.metadata(name)?.modified)
    }

    /// Set the modified time of a file to now.
    fn touch_file(&self, name: &str) -> Result<()>;

    /// Rename a file, replacing any existing file with the new name.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// The lock manager scoped to this storage.
    fn lock_manager(&self) -> &dyn LockManager;

    /// Sync all pending writes to storage.
    fn sync(&self) -> Result<()>;

    /// Close the storage and release resources.
    fn close(&self) -> Result<()>;
}

/// A trait for reading data from storage.
///
/// Inputs are a shared, immutable view of the file plus a private read
/// position. [`clone_input`](StorageInput::clone_input) copies the position
/// only; clones never influence each other.
pub trait StorageInput: Read + Seek + Send + Sync + std::fmt::Debug {
    /// Get the size of the input stream.
    fn size(&self) -> u64;

    /// Current read position.
    fn position(&self) -> u64;

    /// Clone this input stream.
    fn clone_input(&self) -> Box<dyn StorageInput>;

    /// Close the input stream.
    fn close(&mut self) -> Result<()>;
}

/// A trait for writing data to storage.
pub trait StorageOutput: Write + Seek + Send + std::fmt::Debug {
    /// Flush and sync the output to storage.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Get the current position in the output stream.
    fn position(&self) -> u64;

    /// Close the output stream, publishing its content.
    fn close(&mut self) -> Result<()>;
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn position(&self) -> u64 {
        self.as_ref().position()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

impl StorageInput for Box<dyn StorageInput> {
    fn size(&self) -> u64 {
        self.as_ref().size()
    }

    fn position(&self) -> u64 {
        self.as_ref().position()
    }

    fn clone_input(&self) -> Box<dyn StorageInput> {
        self.as_ref().clone_input()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

impl Clone for Box<dyn StorageInput> {
    fn clone(&self) -> Self {
        self.as_ref().clone_input()
    }
}

/// A lock manager for coordinating access to storage.
pub trait LockManager: Send + Sync + std::fmt::Debug {
    /// Create an unobtained lock handle with the given name.
    fn make_lock(&self, name: &str) -> Box<dyn StorageLock>;

    /// Check if a lock with the given name is currently held by anyone.
    fn lock_exists(&self, name: &str) -> bool;

    /// Forcibly clear a lock, regardless of its holder.
    fn force_release(&self, name: &str) -> Result<()>;
}

/// A lock on a resource in storage.
///
/// Handles start unobtained. Dropping an obtained handle releases it.
pub trait StorageLock: Send + std::fmt::Debug {
    /// Get the name of the lock.
    fn name(&self) -> &str;

    /// Attempt to obtain the lock once, without waiting.
    fn try_obtain(&mut self) -> Result<bool>;

    /// Release the lock if this handle holds it.
    fn release(&mut self) -> Result<()>;

    /// Whether this handle currently holds the lock.
    fn is_held(&self) -> bool;
}

/// Whether two storage handles refer to the same storage instance.
pub fn same_storage(a: &Arc<dyn Storage>, b: &Arc<dyn Storage>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Configuration for storage backends.
///
/// ```
/// use folio::storage::StorageConfig;
/// use folio::storage::file::FileStorageConfig;
///
/// let config = StorageConfig::File(FileStorageConfig::new("/data/index"));
/// assert_eq!(config.storage_type_name(), "File");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// File-based storage configuration (includes path)
    File(file::FileStorageConfig),

    /// Memory-based storage configuration
    Memory(memory::MemoryStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(memory::MemoryStorageConfig::default())
    }
}

impl StorageConfig {
    /// Get a human-readable name for the storage type.
    pub fn storage_type_name(&self) -> &str {
        match self {
            StorageConfig::File(_) => "File",
            StorageConfig::Memory(_) => "Memory",
        }
    }
}

/// A factory for creating storage instances.
pub struct StorageFactory;

impl StorageFactory {
    /// Create a new storage instance with the given configuration.
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::Memory(mem_config) => {
                let storage = memory::MemoryStorage::new(mem_config);
                Ok(Arc::new(storage))
            }
            StorageConfig::File(file_config) => {
                let path = file_config.path.clone();
                let storage = file::FileStorage::new(&path, file_config)?;
                Ok(Arc::new(storage))
            }
        }
    }
}

/// Error types specific to storage operations.
#[derive(Debug, Clone)]
pub enum StorageError {
    /// File not found.
    FileNotFound(String),

    /// I/O error.
    IoError(String),

    /// Storage is closed.
    StorageClosed,

    /// Operation not supported by this storage.
    Unsupported(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::FileNotFound(name) => write!(f, "File not found: {name}"),
            StorageError::IoError(msg) => write!(f, "I/O error: {msg}"),
            StorageError::StorageClosed => write!(f, "Storage is closed"),
            StorageError::Unsupported(op) => write!(f, "Unsupported operation: {op}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for FolioError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unsupported(_) => FolioError::invalid_operation(err.to_string()),
            _ => FolioError::storage(err.to_string()),
        }
    }
}

/// Read a whole file into memory.
pub fn read_file(storage: &dyn Storage, name: &str) -> Result<Vec<u8>> {
    let mut input = storage.open_input(name)?;
    let mut buffer = Vec::with_capacity(input.size() as usize);
    input.read_to_end(&mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::FileNotFound("_0.tis".to_string());
        assert_eq!(err.to_string(), "File not found: _0.tis");

        let err = StorageError::StorageClosed;
        assert_eq!(err.to_string(), "Storage is closed");

        let err: FolioError = StorageError::Unsupported("delete_file".to_string()).into();
        assert!(matches!(err, FolioError::InvalidOperation(_)));
    }

    #[test]
    fn test_same_storage() {
        let a: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
        let b: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
        let a2 = Arc::clone(&a);

        assert!(same_storage(&a, &a2));
        assert!(!same_storage(&a, &b));
    }

    #[test]
    fn test_config_serde() {
        let config = StorageConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"type\":\"Memory\""));

        let parsed: StorageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.storage_type_name(), "Memory");
    }
}
