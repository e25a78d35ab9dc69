//! In-memory storage implementation.
//!
//! The writer buffers freshly inverted single-document segments here before
//! they are merged to the target directory. Files are immutable `Arc<[u8]>`
//! buffers once their output is closed, so any number of inputs can read the
//! same file concurrently without copying.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{
    FileMetadata, LockManager, Storage, StorageError, StorageInput, StorageLock, StorageOutput,
};

/// Configuration for [`MemoryStorage`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStorageConfig {
    /// Initial capacity of each output buffer in bytes.
    pub initial_buffer_size: usize,
}

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Arc<[u8]>,
    modified: u64,
}

#[derive(Debug, Default)]
struct FileTable {
    files: HashMap<String, MemoryFile>,
    clock: u64,
}

impl FileTable {
    /// Millisecond timestamps that never repeat or go backwards.
    fn tick(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.clock = now.max(self.clock + 1);
        self.clock
    }
}

/// An in-memory storage implementation.
#[derive(Debug)]
pub struct MemoryStorage {
    files: Arc<Mutex<FileTable>>,
    lock_manager: MemoryLockManager,
    config: MemoryStorageConfig,
    closed: AtomicBool,
}

impl MemoryStorage {
    /// Create a new memory storage.
    pub fn new(config: MemoryStorageConfig) -> Self {
        MemoryStorage {
            files: Arc::new(Mutex::new(FileTable::default())),
            lock_manager: MemoryLockManager::default(),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Create a new memory storage with default configuration.
    pub fn new_default() -> Self {
        Self::new(MemoryStorageConfig::default())
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::StorageClosed.into())
        } else {
            Ok(())
        }
    }

    /// Get the number of files stored.
    pub fn file_count(&self) -> usize {
        self.files.lock().files.len()
    }

    /// Get the total size of all files.
    pub fn total_size(&self) -> u64 {
        let table = self.files.lock();
        table.files.values().map(|f| f.data.len() as u64).sum()
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        self.check_closed()?;

        let table = self.files.lock();
        let file = table
            .files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;

        Ok(Box::new(MemoryInput::new(Arc::clone(&file.data))))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        self.check_closed()?;

        Ok(Box::new(MemoryOutput::new(
            name.to_string(),
            Arc::clone(&self.files),
            self.config.initial_buffer_size,
        )))
    }

    fn file_exists(&self, name: &str) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        self.files.lock().files.contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.check_closed()?;

        self.files.lock().files.remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        self.check_closed()?;

        let table = self.files.lock();
        let mut names: Vec<String> = table.files.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        Ok(self.metadata(name)?.size)
    }

    fn metadata(&self, name: &str) -> Result<FileMetadata> {
        self.check_closed()?;

        let table = self.files.lock();
        let file = table
            .files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;

        Ok(FileMetadata {
            size: file.data.len() as u64,
            modified: file.modified,
            readonly: false,
        })
    }

    fn touch_file(&self, name: &str) -> Result<()> {
        self.check_closed()?;

        let mut table = self.files.lock();
        let now = table.tick();
        let file = table
            .files
            .get_mut(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;
        file.modified = now;
        Ok(())
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.check_closed()?;

        let mut table = self.files.lock();
        let file = table
            .files
            .remove(old_name)
            .ok_or_else(|| StorageError::FileNotFound(old_name.to_string()))?;

        table.files.insert(new_name.to_string(), file);
        Ok(())
    }

    fn lock_manager(&self) -> &dyn LockManager {
        &self.lock_manager
    }

    fn sync(&self) -> Result<()> {
        self.check_closed()
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// A memory-based input: shared buffer plus private position.
#[derive(Debug, Clone)]
pub struct MemoryInput {
    data: Arc<[u8]>,
    position: usize,
}

impl MemoryInput {
    /// Wrap a shared buffer.
    pub fn new(data: Arc<[u8]>) -> Self {
        MemoryInput { data, position: 0 }
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = &self.data[self.position.min(self.data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.position = resolve_seek(pos, self.position as u64, self.data.len() as u64)? as usize;
        Ok(self.position as u64)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> u64 {
        self.data.len() as u64
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

/// Compute the absolute target of a seek, rejecting negative positions.
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, len: u64) -> std::io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => return Ok(offset),
        SeekFrom::Current(delta) => current as i128 + delta as i128,
        SeekFrom::End(delta) => len as i128 + delta as i128,
    };
    if target < 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "seek to a negative position",
        ));
    }
    Ok(target as u64)
}

/// A memory-based output. Content becomes visible when the output is closed.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: Arc<Mutex<FileTable>>,
    position: usize,
    closed: bool,
}

impl MemoryOutput {
    fn new(name: String, files: Arc<Mutex<FileTable>>, capacity: usize) -> Self {
        MemoryOutput {
            name,
            buffer: Vec::with_capacity(capacity),
            files,
            position: 0,
            closed: false,
        }
    }

    fn publish(&mut self) {
        let mut table = self.files.lock();
        let modified = table.tick();
        let data: Arc<[u8]> = Arc::from(std::mem::take(&mut self.buffer).into_boxed_slice());
        table
            .files
            .insert(self.name.clone(), MemoryFile { data, modified });
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other("Output is closed"));
        }

        let end = self.position + buf.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[self.position..end].copy_from_slice(buf);
        self.position = end;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryOutput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        if self.closed {
            return Err(std::io::Error::other("Output is closed"));
        }

        self.position =
            resolve_seek(pos, self.position as u64, self.buffer.len() as u64)? as usize;
        Ok(self.position as u64)
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.publish();
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Lock manager for memory storage; locks are names in a shared set.
#[derive(Debug, Default)]
pub struct MemoryLockManager {
    held: Arc<Mutex<HashSet<String>>>,
}

impl LockManager for MemoryLockManager {
    fn make_lock(&self, name: &str) -> Box<dyn StorageLock> {
        Box::new(MemoryLock {
            name: name.to_string(),
            held: Arc::clone(&self.held),
            obtained: false,
        })
    }

    fn lock_exists(&self, name: &str) -> bool {
        self.held.lock().contains(name)
    }

    fn force_release(&self, name: &str) -> Result<()> {
        self.held.lock().remove(name);
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryLock {
    name: String,
    held: Arc<Mutex<HashSet<String>>>,
    obtained: bool,
}

impl StorageLock for MemoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_obtain(&mut self) -> Result<bool> {
        if self.obtained {
            return Ok(true);
        }
        self.obtained = self.held.lock().insert(self.name.clone());
        Ok(self.obtained)
    }

    fn release(&mut self) -> Result<()> {
        if self.obtained {
            self.held.lock().remove(&self.name);
            self.obtained = false;
        }
        Ok(())
    }

    fn is_held(&self) -> bool {
        self.obtained
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(storage: &MemoryStorage, name: &str, data: &[u8]) {
        let mut output = storage.create_output(name).unwrap();
        output.write_all(data).unwrap();
        output.close().unwrap();
    }

    #[test]
    fn test_create_and_read_file() {
        let storage = MemoryStorage::new_default();
        write_file(&storage, "test.bin", b"Hello, World!");

        let mut input = storage.open_input("test.bin").unwrap();
        let mut buffer = Vec::new();
        input.read_to_end(&mut buffer).unwrap();

        assert_eq!(buffer, b"Hello, World!");
        assert_eq!(input.size(), 13);
        assert_eq!(storage.file_count(), 1);
        assert_eq!(storage.total_size(), 13);
    }

    #[test]
    fn test_output_invisible_until_closed() {
        let storage = MemoryStorage::new_default();
        let mut output = storage.create_output("pending").unwrap();
        output.write_all(b"abc").unwrap();
        assert!(!storage.file_exists("pending"));
        output.close().unwrap();
        assert!(storage.file_exists("pending"));
    }

    #[test]
    fn test_seek_back_and_patch() {
        let storage = MemoryStorage::new_default();
        let mut output = storage.create_output("patched").unwrap();
        output.write_all(&[0, 0, 0, 0, 9, 9]).unwrap();
        output.seek(SeekFrom::Start(0)).unwrap();
        output.write_all(&[1, 2]).unwrap();
        assert_eq!(output.position(), 2);
        output.close().unwrap();

        let mut input = storage.open_input("patched").unwrap();
        let mut buffer = Vec::new();
        input.read_to_end(&mut buffer).unwrap();
        assert_eq!(buffer, vec![1, 2, 0, 0, 9, 9]);
    }

    #[test]
    fn test_cloned_inputs_are_independent() {
        let storage = MemoryStorage::new_default();
        write_file(&storage, "data", b"0123456789");

        let mut input = storage.open_input("data").unwrap();
        input.seek(SeekFrom::Start(4)).unwrap();
        let mut clone = input.clone_input();

        let mut a = [0u8; 2];
        input.read_exact(&mut a).unwrap();
        assert_eq!(&a, b"45");
        assert_eq!(clone.position(), 4);

        let mut b = [0u8; 3];
        clone.read_exact(&mut b).unwrap();
        assert_eq!(&b, b"456");
        assert_eq!(input.position(), 6);
    }

    #[test]
    fn test_rename_delete_and_touch() {
        let storage = MemoryStorage::new_default();
        write_file(&storage, "a.tmp", b"x");

        let before = storage.file_modified("a.tmp").unwrap();
        storage.touch_file("a.tmp").unwrap();
        assert!(storage.file_modified("a.tmp").unwrap() > before);

        storage.rename_file("a.tmp", "a.del").unwrap();
        assert!(!storage.file_exists("a.tmp"));
        assert!(storage.file_exists("a.del"));

        storage.delete_file("a.del").unwrap();
        storage.delete_file("a.del").unwrap();
        assert!(storage.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_locks_are_exclusive() {
        let storage = MemoryStorage::new_default();
        let mut first = storage.lock_manager().make_lock("write.lock");
        let mut second = storage.lock_manager().make_lock("write.lock");

        assert!(first.try_obtain().unwrap());
        assert!(!second.try_obtain().unwrap());
        assert!(storage.lock_manager().lock_exists("write.lock"));

        drop(first);
        assert!(second.try_obtain().unwrap());
        second.release().unwrap();
        assert!(!storage.lock_manager().lock_exists("write.lock"));
    }

    #[test]
    fn test_closed_storage_rejects_operations() {
        let storage = MemoryStorage::new_default();
        storage.close().unwrap();
        assert!(storage.create_output("x").is_err());
        assert!(!storage.file_exists("x"));
    }
}
