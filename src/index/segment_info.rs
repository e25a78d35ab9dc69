//! The segment list and its durable form, the `segments` file.
//!
//! ```text
//! u32    magic "FSEG"
//! u32    format
//! u64    version      bumped on every commit
//! u64    name counter
//! vint   segment count
//! (string name, u32 doc count)*
//! u32    CRC32 of everything above
//! ```
//!
//! The file is written to `segments.new` and renamed over `segments`, so a
//! crash mid-write leaves the previous list intact.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::{FolioError, Result};
use crate::index::{SEGMENTS_FILE, segment_file_name};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};
use crate::util::to_base36;

const SEGMENTS_MAGIC: u32 = 0x4653_4547;
const SEGMENTS_FORMAT: u32 = 1;
const SEGMENTS_TEMP_FILE: &str = "segments.new";

/// One segment: its name, size and the storage holding its files.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub name: String,
    pub doc_count: u32,
    pub storage: Arc<dyn Storage>,
}

impl SegmentInfo {
    pub fn new(name: impl Into<String>, doc_count: u32, storage: Arc<dyn Storage>) -> Self {
        SegmentInfo {
            name: name.into(),
            doc_count,
            storage,
        }
    }

    pub fn has_deletions(&self) -> bool {
        self.storage.file_exists(&segment_file_name(&self.name, "del"))
    }

    pub fn uses_compound_file(&self) -> bool {
        self.storage.file_exists(&segment_file_name(&self.name, "cfs"))
    }
}

/// The ordered segment list of an index.
#[derive(Debug, Clone)]
pub struct SegmentInfos {
    segments: Vec<SegmentInfo>,
    /// Source of unique segment names.
    pub counter: u64,
    /// Bumped by every successful [`write`](Self::write).
    pub version: u64,
}

impl Default for SegmentInfos {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentInfos {
    /// An empty list whose version starts at the current time, so that a
    /// recreated index never reuses an old version number.
    pub fn new() -> Self {
        let version = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        SegmentInfos {
            segments: Vec::new(),
            counter: 0,
            version,
        }
    }

    /// Allocate a fresh segment name.
    pub fn new_segment_name(&mut self) -> String {
        let name = format!("_{}", to_base36(self.counter));
        self.counter += 1;
        name
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SegmentInfo> {
        self.segments.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentInfo> {
        self.segments.iter()
    }

    pub fn as_slice(&self) -> &[SegmentInfo] {
        &self.segments
    }

    pub fn push(&mut self, info: SegmentInfo) {
        self.segments.push(info);
    }

    /// Replace `range` of the list with a single segment.
    pub fn replace_range(&mut self, range: std::ops::Range<usize>, info: SegmentInfo) {
        self.segments.splice(range, std::iter::once(info));
    }

    pub fn retain(&mut self, keep: impl FnMut(&SegmentInfo) -> bool) {
        self.segments.retain(keep);
    }

    /// Total documents across all segments, deletions included.
    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|info| info.doc_count as u64).sum()
    }

    /// Load the segment list of the index in `storage`. Every segment is
    /// attributed to `storage`.
    pub fn read(storage: &Arc<dyn Storage>) -> Result<Self> {
        if !storage.file_exists(SEGMENTS_FILE) {
            return Err(FolioError::index_not_found(format!("no {SEGMENTS_FILE} file")));
        }
        let mut reader = StructReader::with_checksum(storage.open_input(SEGMENTS_FILE)?);

        if reader.read_u32()? != SEGMENTS_MAGIC {
            return Err(FolioError::corrupt("segments file has a bad magic number"));
        }
        let format = reader.read_u32()?;
        if format != SEGMENTS_FORMAT {
            return Err(FolioError::corrupt(format!("unknown segments format {format}")));
        }

        let version = reader.read_u64()?;
        let counter = reader.read_u64()?;
        let count = reader.read_vint()?;
        let mut segments = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = reader.read_string()?;
            let doc_count = reader.read_u32()?;
            segments.push(SegmentInfo::new(name, doc_count, Arc::clone(storage)));
        }
        reader.verify_checksum()?;

        Ok(SegmentInfos {
            segments,
            counter,
            version,
        })
    }

    /// Persist the list, bumping the version. Callers hold the commit lock.
    pub fn write(&mut self, storage: &dyn Storage) -> Result<()> {
        self.version += 1;

        let mut writer = StructWriter::with_checksum(storage.create_output(SEGMENTS_TEMP_FILE)?);
        writer.write_u32(SEGMENTS_MAGIC)?;
        writer.write_u32(SEGMENTS_FORMAT)?;
        writer.write_u64(self.version)?;
        writer.write_u64(self.counter)?;
        writer.write_vint(self.segments.len() as u32)?;
        for info in &self.segments {
            writer.write_string(&info.name)?;
            writer.write_u32(info.doc_count)?;
        }
        writer.close()?;

        storage.rename_file(SEGMENTS_TEMP_FILE, SEGMENTS_FILE)?;
        debug!(version = self.version, segments = self.segments.len(), "wrote segments file");
        Ok(())
    }

    /// Version of the index in `storage`, without loading the whole list.
    pub fn read_current_version(storage: &dyn Storage) -> Result<u64> {
        if !storage.file_exists(SEGMENTS_FILE) {
            return Err(FolioError::index_not_found(format!("no {SEGMENTS_FILE} file")));
        }
        let mut reader = StructReader::new(storage.open_input(SEGMENTS_FILE)?);
        if reader.read_u32()? != SEGMENTS_MAGIC {
            return Err(FolioError::corrupt("segments file has a bad magic number"));
        }
        reader.read_u32()?;
        reader.read_u64()
    }
}

impl<'a> IntoIterator for &'a SegmentInfos {
    type Item = &'a SegmentInfo;
    type IntoIter = std::slice::Iter<'a, SegmentInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::{StorageOutput, read_file};
    use std::io::Write;

    fn storage() -> Arc<dyn Storage> {
        Arc::new(MemoryStorage::new_default())
    }

    #[test]
    fn test_segment_names_are_base36() {
        let mut infos = SegmentInfos::new();
        let names: Vec<String> = (0..37).map(|_| infos.new_segment_name()).collect();
        assert_eq!(names[0], "_0");
        assert_eq!(names[10], "_a");
        assert_eq!(names[35], "_z");
        assert_eq!(names[36], "_10");
        assert_eq!(infos.counter, 37);
    }

    #[test]
    fn test_write_read() {
        let storage = storage();
        let mut infos = SegmentInfos::new();
        for doc_count in [10, 3, 1] {
            let name = infos.new_segment_name();
            infos.push(SegmentInfo::new(name, doc_count, Arc::clone(&storage)));
        }
        let before = infos.version;
        infos.write(storage.as_ref()).unwrap();
        assert_eq!(infos.version, before + 1);
        assert!(!storage.file_exists(SEGMENTS_TEMP_FILE));

        let loaded = SegmentInfos::read(&storage).unwrap();
        assert_eq!(loaded.version, infos.version);
        assert_eq!(loaded.counter, 3);
        assert_eq!(loaded.doc_count(), 14);
        let names: Vec<&str> = loaded.iter().map(|info| info.name.as_str()).collect();
        assert_eq!(names, vec!["_0", "_1", "_2"]);
        assert_eq!(SegmentInfos::read_current_version(storage.as_ref()).unwrap(), infos.version);
    }

    #[test]
    fn test_missing_index() {
        let storage = storage();
        assert!(matches!(SegmentInfos::read(&storage), Err(FolioError::IndexNotFound(_))));
        assert!(matches!(
            SegmentInfos::read_current_version(storage.as_ref()),
            Err(FolioError::IndexNotFound(_))
        ));
    }

    #[test]
    fn test_corruption_detected() {
        let storage = storage();
        let mut infos = SegmentInfos::new();
        infos.push(SegmentInfo::new("_0", 4, Arc::clone(&storage)));
        infos.write(storage.as_ref()).unwrap();

        let mut bytes = read_file(storage.as_ref(), SEGMENTS_FILE).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0x01;
        let mut output = storage.create_output(SEGMENTS_FILE).unwrap();
        output.write_all(&bytes).unwrap();
        output.close().unwrap();

        assert!(matches!(SegmentInfos::read(&storage), Err(FolioError::CorruptIndex(_))));
    }

    #[test]
    fn test_replace_range() {
        let storage = storage();
        let mut infos = SegmentInfos::new();
        for i in 0..4 {
            infos.push(SegmentInfo::new(format!("_{i}"), 1, Arc::clone(&storage)));
        }
        infos.replace_range(1..4, SegmentInfo::new("_9", 3, Arc::clone(&storage)));
        let names: Vec<&str> = infos.iter().map(|info| info.name.as_str()).collect();
        assert_eq!(names, vec!["_0", "_9"]);
    }
}
