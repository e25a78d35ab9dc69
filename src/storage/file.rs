//! File-based storage implementation.
//!
//! Each storage is one directory. Inputs memory-map the file once and hand out
//! positional views over the shared mapping; outputs go through a buffered
//! writer. Locks are plain files created atomically with `create_new`, which
//! makes them visible to every process that opens the same directory.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use memmap2::{Mmap, MmapOptions};
use serde::{Deserialize, Serialize};

use crate::error::{FolioError, Result};
use crate::storage::memory::{MemoryInput, resolve_seek};
use crate::storage::{
    FileMetadata, LockManager, Storage, StorageError, StorageInput, StorageLock, StorageOutput,
};

/// Configuration for [`FileStorage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStorageConfig {
    /// Directory holding the index files.
    pub path: PathBuf,

    /// Buffer size for output streams.
    pub buffer_size: usize,

    /// Whether closing an output fsyncs it.
    pub sync_on_close: bool,
}

impl FileStorageConfig {
    /// Create a configuration for the given directory with default settings.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileStorageConfig {
            path: path.as_ref().to_path_buf(),
            buffer_size: 65536,
            sync_on_close: true,
        }
    }
}

/// A file-based storage implementation.
#[derive(Debug)]
pub struct FileStorage {
    /// The root directory for storage.
    directory: PathBuf,
    /// Storage configuration.
    config: FileStorageConfig,
    /// Lock manager for coordinating access.
    lock_manager: FileLockManager,
    /// Whether the storage is closed.
    closed: AtomicBool,
}

impl FileStorage {
    /// Create a new file storage in the given directory, creating it if needed.
    pub fn new<P: AsRef<Path>>(directory: P, config: FileStorageConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();

        if !directory.exists() {
            std::fs::create_dir_all(&directory)
                .map_err(|e| FolioError::storage(format!("Failed to create directory: {e}")))?;
        }

        if !directory.is_dir() {
            return Err(FolioError::storage(format!(
                "Path is not a directory: {}",
                directory.display()
            )));
        }

        let lock_manager = FileLockManager::new(directory.clone());

        Ok(FileStorage {
            directory,
            config,
            lock_manager,
            closed: AtomicBool::new(false),
        })
    }

    /// Open the given directory with default settings.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let config = FileStorageConfig::new(directory.as_ref());
        Self::new(directory, config)
    }

    /// The directory backing this storage.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::StorageClosed.into())
        } else {
            Ok(())
        }
    }
}

fn map_not_found(name: &str, e: std::io::Error) -> FolioError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::FileNotFound(name.to_string()).into()
    } else {
        StorageError::IoError(format!("{name}: {e}")).into()
    }
}

fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        self.check_closed()?;

        let path = self.file_path(name);
        let file = File::open(&path).map_err(|e| map_not_found(name, e))?;
        let len = file.metadata().map_err(|e| map_not_found(name, e))?.len();

        // Zero-length files cannot be mapped on every platform.
        if len == 0 {
            return Ok(Box::new(MemoryInput::new(Arc::from(Vec::new()))));
        }

        // The mapping stays valid after the file is unlinked, which is what
        // lets open readers outlive merges that delete their segments.
        let mmap = unsafe {
            MmapOptions::new()
                .map(&file)
                .map_err(|e| FolioError::storage(format!("Failed to mmap file {name}: {e}")))?
        };

        Ok(Box::new(MmapInput::new(Arc::new(mmap))))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        self.check_closed()?;

        let path = self.file_path(name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| StorageError::IoError(format!("{name}: {e}")))?;

        Ok(Box::new(FileOutput::new(
            file,
            self.config.buffer_size,
            self.config.sync_on_close,
        )))
    }

    fn file_exists(&self, name: &str) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        self.file_path(name).exists()
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.check_closed()?;

        let path = self.file_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::IoError(format!("Failed to delete {name}: {e}")).into()),
        }
    }

    fn list_files(&self) -> Result<Vec<String>> {
        self.check_closed()?;

        let mut files = Vec::new();

        for entry in
            std::fs::read_dir(&self.directory).map_err(|e| StorageError::IoError(e.to_string()))?
        {
            let entry = entry.map_err(|e| StorageError::IoError(e.to_string()))?;
            let path = entry.path();

            if path.is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    files.push(name.to_string());
                }
            }
        }

        files.sort();
        Ok(files)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        Ok(self.metadata(name)?.size)
    }

    fn metadata(&self, name: &str) -> Result<FileMetadata> {
        self.check_closed()?;

        let metadata = self
            .file_path(name)
            .metadata()
            .map_err(|e| map_not_found(name, e))?;

        let modified = metadata
            .modified()
            .map(millis_since_epoch)
            .unwrap_or_default();

        Ok(FileMetadata {
            size: metadata.len(),
            modified,
            readonly: metadata.permissions().readonly(),
        })
    }

    fn touch_file(&self, name: &str) -> Result<()> {
        self.check_closed()?;

        let file = OpenOptions::new()
            .write(true)
            .open(self.file_path(name))
            .map_err(|e| map_not_found(name, e))?;
        file.set_modified(SystemTime::now())?;
        Ok(())
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.check_closed()?;

        std::fs::rename(self.file_path(old_name), self.file_path(new_name)).map_err(|e| {
            StorageError::IoError(format!("Failed to rename {old_name} to {new_name}: {e}"))
        })?;

        Ok(())
    }

    fn lock_manager(&self) -> &dyn LockManager {
        &self.lock_manager
    }

    fn sync(&self) -> Result<()> {
        self.check_closed()?;
        // Outputs sync themselves on close.
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// A memory-mapped input: shared mapping plus private position.
#[derive(Debug, Clone)]
pub struct MmapInput {
    mmap: Arc<Mmap>,
    position: usize,
}

impl MmapInput {
    fn new(mmap: Arc<Mmap>) -> Self {
        MmapInput { mmap, position: 0 }
    }
}

impl Read for MmapInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let data: &[u8] = &self.mmap;
        let remaining = &data[self.position.min(data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }
}

impl Seek for MmapInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.position = resolve_seek(pos, self.position as u64, self.mmap.len() as u64)? as usize;
        Ok(self.position as u64)
    }
}

impl StorageInput for MmapInput {
    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn clone_input(&self) -> Box<dyn StorageInput> {
        Box::new(self.clone())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A file output implementation.
#[derive(Debug)]
pub struct FileOutput {
    writer: BufWriter<File>,
    sync_on_close: bool,
    position: u64,
    closed: bool,
}

impl FileOutput {
    fn new(file: File, buffer_size: usize, sync_on_close: bool) -> Self {
        FileOutput {
            writer: BufWriter::with_capacity(buffer_size, file),
            sync_on_close,
            position: 0,
            closed: false,
        }
    }
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let bytes_written = self.writer.write(buf)?;
        self.position += bytes_written as u64;
        Ok(bytes_written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl Seek for FileOutput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = self.writer.seek(pos)?;
        self.position = new_pos;
        Ok(new_pos)
    }
}

impl StorageOutput for FileOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| FolioError::storage(format!("Failed to flush: {e}")))?;

        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| FolioError::storage(format!("Failed to sync: {e}")))?;

        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.sync_on_close {
            self.flush_and_sync()
        } else {
            self.writer.flush()?;
            Ok(())
        }
    }
}

impl Drop for FileOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Lock manager backed by lock files inside the storage directory.
#[derive(Debug)]
pub struct FileLockManager {
    directory: PathBuf,
}

impl FileLockManager {
    fn new(directory: PathBuf) -> Self {
        FileLockManager { directory }
    }
}

impl LockManager for FileLockManager {
    fn make_lock(&self, name: &str) -> Box<dyn StorageLock> {
        Box::new(FileLock {
            name: name.to_string(),
            path: self.directory.join(name),
            obtained: false,
        })
    }

    fn lock_exists(&self, name: &str) -> bool {
        self.directory.join(name).exists()
    }

    fn force_release(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.directory.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FolioError::storage(format!("Failed to release lock {name}: {e}"))),
        }
    }
}

#[derive(Debug)]
struct FileLock {
    name: String,
    path: PathBuf,
    obtained: bool,
}

impl StorageLock for FileLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_obtain(&mut self) -> Result<bool> {
        if self.obtained {
            return Ok(true);
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => {
                self.obtained = true;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(FolioError::storage(format!(
                "Failed to create lock file {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn release(&mut self) -> Result<()> {
        if self.obtained {
            self.obtained = false;
            std::fs::remove_file(&self.path)
                .map_err(|e| FolioError::storage(format!("Failed to release lock: {e}")))?;
        }
        Ok(())
    }

    fn is_held(&self) -> bool {
        self.obtained
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (TempDir, FileStorage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::open(temp_dir.path()).unwrap();
        (temp_dir, storage)
    }

    #[test]
    fn test_create_and_read_file() {
        let (_temp_dir, storage) = create_test_storage();

        let mut output = storage.create_output("test.bin").unwrap();
        output.write_all(b"Hello, World!").unwrap();
        output.close().unwrap();

        let mut input = storage.open_input("test.bin").unwrap();
        let mut buffer = Vec::new();
        input.read_to_end(&mut buffer).unwrap();

        assert_eq!(buffer, b"Hello, World!");
        assert_eq!(input.size(), 13);
        assert_eq!(storage.file_size("test.bin").unwrap(), 13);
    }

    #[test]
    fn test_empty_file_opens() {
        let (_temp_dir, storage) = create_test_storage();

        let mut output = storage.create_output("empty").unwrap();
        output.close().unwrap();

        let input = storage.open_input("empty").unwrap();
        assert_eq!(input.size(), 0);
    }

    #[test]
    fn test_missing_file() {
        let (_temp_dir, storage) = create_test_storage();

        assert!(!storage.file_exists("nonexistent"));
        let err = storage.open_input("nonexistent").unwrap_err();
        assert!(err.to_string().contains("File not found"));
        storage.delete_file("nonexistent").unwrap();
    }

    #[test]
    fn test_input_survives_delete() {
        let (_temp_dir, storage) = create_test_storage();

        let mut output = storage.create_output("_0.frq").unwrap();
        output.write_all(&[7u8; 32]).unwrap();
        output.close().unwrap();

        let mut input = storage.open_input("_0.frq").unwrap();
        if storage.delete_file("_0.frq").is_ok() {
            let mut buffer = Vec::new();
            input.read_to_end(&mut buffer).unwrap();
            assert_eq!(buffer, vec![7u8; 32]);
        }
    }

    #[test]
    fn test_rename_replaces_target() {
        let (_temp_dir, storage) = create_test_storage();

        for (name, data) in [("segments", b"old".as_slice()), ("segments.new", b"new")] {
            let mut output = storage.create_output(name).unwrap();
            output.write_all(data).unwrap();
            output.close().unwrap();
        }

        storage.rename_file("segments.new", "segments").unwrap();
        assert_eq!(storage.list_files().unwrap(), vec!["segments".to_string()]);

        let mut buffer = Vec::new();
        storage
            .open_input("segments")
            .unwrap()
            .read_to_end(&mut buffer)
            .unwrap();
        assert_eq!(buffer, b"new");
    }

    #[test]
    fn test_lock_files() {
        let (_temp_dir, storage) = create_test_storage();
        let manager = storage.lock_manager();

        let mut lock = manager.make_lock("commit.lock");
        assert!(lock.try_obtain().unwrap());
        assert!(manager.lock_exists("commit.lock"));

        let mut other = manager.make_lock("commit.lock");
        assert!(!other.try_obtain().unwrap());

        lock.release().unwrap();
        assert!(!manager.lock_exists("commit.lock"));
        assert!(other.try_obtain().unwrap());

        manager.force_release("commit.lock").unwrap();
        assert!(!manager.lock_exists("commit.lock"));
    }
}
