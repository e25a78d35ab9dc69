//! Compound files: a segment's component files packed into one `.cfs` blob.
//!
//! Layout:
//!
//! ```text
//! vint   entry count
//! entry* (u64 data offset, string file name)
//! data*  concatenated file bodies, in entry order
//! ```
//!
//! Offsets are written as zero placeholders and patched once every body has
//! been appended. An entry's length is the distance to the next entry's
//! offset, or to the end of the blob for the last entry.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::debug;

use crate::error::{FolioError, Result};
use crate::storage::memory::resolve_seek;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{
    FileMetadata, LockManager, Storage, StorageError, StorageInput, StorageLock, StorageOutput,
};

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Builds a compound file from files already present in a storage.
#[derive(Debug)]
pub struct CompoundFileWriter {
    storage: Arc<dyn Storage>,
    file_name: String,
    entries: Vec<String>,
    seen: HashSet<String>,
}

impl CompoundFileWriter {
    pub fn new(storage: Arc<dyn Storage>, file_name: impl Into<String>) -> Self {
        CompoundFileWriter {
            storage,
            file_name: file_name.into(),
            entries: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Name of the compound file being built.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Queue a file for packing. Each name may be added once.
    pub fn add_file(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if !self.seen.insert(name.clone()) {
            return Err(FolioError::invalid_operation(format!(
                "file {name} already added to {}",
                self.file_name
            )));
        }
        self.entries.push(name);
        Ok(())
    }

    /// Write the compound file. The source files are left in place.
    pub fn close(self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(FolioError::invalid_operation(format!(
                "no entries to pack into {}",
                self.file_name
            )));
        }

        let mut writer = StructWriter::new(self.storage.create_output(&self.file_name)?);
        writer.write_vint(self.entries.len() as u32)?;

        let mut directory_offsets = Vec::with_capacity(self.entries.len());
        for name in &self.entries {
            directory_offsets.push(writer.position());
            writer.write_u64(0)?;
            writer.write_string(name)?;
        }

        let mut data_offsets = Vec::with_capacity(self.entries.len());
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        for name in &self.entries {
            data_offsets.push(writer.position());
            let mut input = self.storage.open_input(name)?;
            let expected = input.size();
            let mut copied = 0u64;
            loop {
                let n = input.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                writer.write_raw(&buffer[..n])?;
                copied += n as u64;
            }
            if copied != expected {
                return Err(FolioError::storage(format!(
                    "short copy of {name}: {copied} of {expected} bytes"
                )));
            }
        }

        let end = writer.position();
        for (directory_offset, data_offset) in directory_offsets.iter().zip(&data_offsets) {
            writer.seek(*directory_offset)?;
            writer.write_u64(*data_offset)?;
        }
        writer.seek(end)?;
        writer.close()?;

        debug!(file = %self.file_name, entries = self.entries.len(), bytes = end, "wrote compound file");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    offset: u64,
    length: u64,
}

/// A read-only storage view over one compound file.
#[derive(Debug)]
pub struct CompoundStorage {
    base: Arc<dyn Storage>,
    file_name: String,
    stream: Box<dyn StorageInput>,
    entries: HashMap<String, Entry>,
    locks: ReadOnlyLockManager,
}

impl CompoundStorage {
    /// Open `file_name` in `base` and load its directory.
    pub fn open(base: Arc<dyn Storage>, file_name: &str) -> Result<Self> {
        let stream = base.open_input(file_name)?;
        let total = stream.size();
        let mut reader = StructReader::new(stream.clone_input());

        let count = reader.read_vint()? as usize;
        let mut ordered: Vec<(String, u64)> = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = reader.read_u64()?;
            let name = reader.read_string()?;
            ordered.push((name, offset));
        }

        let mut entries = HashMap::with_capacity(count);
        for (i, (name, offset)) in ordered.iter().enumerate() {
            let end = ordered.get(i + 1).map_or(total, |(_, next)| *next);
            if end < *offset || end > total {
                return Err(FolioError::corrupt(format!(
                    "compound entry {name} in {file_name} has invalid bounds {offset}..{end}"
                )));
            }
            entries.insert(
                name.clone(),
                Entry {
                    offset: *offset,
                    length: end - offset,
                },
            );
        }

        Ok(CompoundStorage {
            base,
            file_name: file_name.to_string(),
            stream,
            entries,
            locks: ReadOnlyLockManager,
        })
    }

    /// Name of the underlying compound file.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    fn entry(&self, name: &str) -> Result<Entry> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::FileNotFound(format!("{name} in {}", self.file_name)).into())
    }

    fn unsupported<T>(&self, op: &str) -> Result<T> {
        Err(StorageError::Unsupported(format!("{op} on compound file {}", self.file_name)).into())
    }
}

impl Storage for CompoundStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let entry = self.entry(name)?;
        Ok(Box::new(CompoundInput::new(
            self.stream.clone_input(),
            entry.offset,
            entry.length,
        )?))
    }

    fn create_output(&self, _name: &str) -> Result<Box<dyn StorageOutput>> {
        self.unsupported("create_output")
    }

    fn file_exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn delete_file(&self, _name: &str) -> Result<()> {
        self.unsupported("delete_file")
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        Ok(self.entry(name)?.length)
    }

    fn metadata(&self, name: &str) -> Result<FileMetadata> {
        let entry = self.entry(name)?;
        let base = self.base.metadata(&self.file_name)?;
        Ok(FileMetadata {
            size: entry.length,
            modified: base.modified,
            readonly: true,
        })
    }

    fn file_modified(&self, _name: &str) -> Result<u64> {
        self.base.file_modified(&self.file_name)
    }

    fn touch_file(&self, _name: &str) -> Result<()> {
        self.base.touch_file(&self.file_name)
    }

    fn rename_file(&self, _old_name: &str, _new_name: &str) -> Result<()> {
        self.unsupported("rename_file")
    }

    fn lock_manager(&self) -> &dyn LockManager {
        &self.locks
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A bounded view `[offset, offset + length)` of the compound stream.
#[derive(Debug)]
pub struct CompoundInput {
    base: Box<dyn StorageInput>,
    offset: u64,
    length: u64,
    position: u64,
}

impl CompoundInput {
    fn new(mut base: Box<dyn StorageInput>, offset: u64, length: u64) -> Result<Self> {
        base.seek(SeekFrom::Start(offset))?;
        Ok(CompoundInput {
            base,
            offset,
            length,
            position: 0,
        })
    }
}

impl Read for CompoundInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.length.saturating_sub(self.position);
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        let read = self.base.read(&mut buf[..n])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for CompoundInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = resolve_seek(pos, self.position, self.length)?;
        self.base.seek(SeekFrom::Start(self.offset + target))?;
        self.position = target;
        Ok(target)
    }
}

impl StorageInput for CompoundInput {
    fn size(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn clone_input(&self) -> Box<dyn StorageInput> {
        Box::new(CompoundInput {
            base: self.base.clone_input(),
            offset: self.offset,
            length: self.length,
            position: self.position,
        })
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct ReadOnlyLockManager;

impl LockManager for ReadOnlyLockManager {
    fn make_lock(&self, name: &str) -> Box<dyn StorageLock> {
        Box::new(ReadOnlyLock {
            name: name.to_string(),
        })
    }

    fn lock_exists(&self, _name: &str) -> bool {
        false
    }

    fn force_release(&self, name: &str) -> Result<()> {
        Err(StorageError::Unsupported(format!("force_release({name}) on compound file")).into())
    }
}

#[derive(Debug)]
struct ReadOnlyLock {
    name: String,
}

impl StorageLock for ReadOnlyLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_obtain(&mut self) -> Result<bool> {
        Err(StorageError::Unsupported(format!("lock {} on compound file", self.name)).into())
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_held(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::read_file;
    use std::io::Write;

    fn storage_with(files: &[(&str, &[u8])]) -> Arc<dyn Storage> {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        for (name, data) in files {
            let mut output = storage.create_output(name).unwrap();
            output.write_all(data).unwrap();
            output.close().unwrap();
        }
        storage
    }

    #[test]
    fn test_pack_and_read_entries() {
        let storage = storage_with(&[("a.fnm", b"fields"), ("a.frq", b""), ("a.prx", b"0123456789")]);

        let mut writer = CompoundFileWriter::new(Arc::clone(&storage), "a.cfs");
        writer.add_file("a.fnm").unwrap();
        writer.add_file("a.frq").unwrap();
        writer.add_file("a.prx").unwrap();
        writer.close().unwrap();

        let cfs = CompoundStorage::open(Arc::clone(&storage), "a.cfs").unwrap();
        assert_eq!(cfs.list_files().unwrap(), vec!["a.fnm", "a.frq", "a.prx"]);
        assert_eq!(cfs.file_size("a.prx").unwrap(), 10);
        assert_eq!(cfs.file_size("a.frq").unwrap(), 0);
        assert_eq!(read_file(&cfs, "a.fnm").unwrap(), b"fields");
        assert_eq!(read_file(&cfs, "a.prx").unwrap(), b"0123456789");
    }

    #[test]
    fn test_sub_stream_is_bounded_and_seekable() {
        let storage = storage_with(&[("x", b"abc"), ("y", b"defgh")]);
        let mut writer = CompoundFileWriter::new(Arc::clone(&storage), "_1.cfs");
        writer.add_file("x").unwrap();
        writer.add_file("y").unwrap();
        writer.close().unwrap();

        let cfs = CompoundStorage::open(storage, "_1.cfs").unwrap();
        let mut input = cfs.open_input("x").unwrap();
        let mut all = Vec::new();
        input.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"abc");

        let mut input = cfs.open_input("y").unwrap();
        input.seek(SeekFrom::Start(3)).unwrap();
        let mut clone = input.clone_input();
        let mut tail = Vec::new();
        input.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, b"gh");

        clone.seek(SeekFrom::Start(0)).unwrap();
        let mut head = [0u8; 2];
        clone.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"de");
        assert_eq!(input.position(), 5);
    }

    #[test]
    fn test_mutations_unsupported() {
        let storage = storage_with(&[("x", b"abc")]);
        let mut writer = CompoundFileWriter::new(Arc::clone(&storage), "c.cfs");
        writer.add_file("x").unwrap();
        writer.close().unwrap();

        let cfs = CompoundStorage::open(storage, "c.cfs").unwrap();
        assert!(matches!(
            cfs.delete_file("x"),
            Err(FolioError::InvalidOperation(_))
        ));
        assert!(cfs.create_output("z").is_err());
        assert!(cfs.rename_file("x", "y").is_err());
        assert!(cfs.lock_manager().make_lock("write.lock").try_obtain().is_err());
        assert!(cfs.open_input("missing").is_err());
    }

    #[test]
    fn test_duplicate_and_empty_entries_rejected() {
        let storage = storage_with(&[("x", b"abc")]);
        let mut writer = CompoundFileWriter::new(Arc::clone(&storage), "d.cfs");
        writer.add_file("x").unwrap();
        assert!(writer.add_file("x").is_err());

        let empty = CompoundFileWriter::new(storage, "e.cfs");
        assert!(empty.close().is_err());
    }
}
