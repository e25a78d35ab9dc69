//! The index writer.
//!
//! [`IndexWriter`] owns an index directory for its whole lifetime by holding
//! `write.lock`. Each added document is inverted into its own one-document
//! segment in a private in-memory storage, then the merge policy folds
//! segments together:
//!
//! - segments are merged in tiers: as soon as a run of trailing segments, each
//!   smaller than `merge_factor^k` documents, holds at least `merge_factor^k`
//!   documents in total, the run is merged into one segment;
//! - [`optimize`](IndexWriter::optimize) merges until a single segment
//!   without deletions remains;
//! - [`close`](IndexWriter::close) flushes the remaining in-memory segments
//!   to the directory.
//!
//! Every change to the segment list is merged into a copy of the list,
//! written under `commit.lock`, and only then swapped in; a failed merge
//! leaves both the in-memory and the on-disk list as they were. Files of
//! merged-away segments are deleted after the commit. Deletions that fail
//! (a reader on some platforms keeps them open) are recorded in the
//! `deletable` file and retried on every later commit.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::analyzer::Analyzer;
use crate::analysis::analyzer::standard::StandardAnalyzer;
use crate::document::Document;
use crate::error::{FolioError, Result};
use crate::index::document_writer::DocumentWriter;
use crate::index::merger::SegmentMerger;
use crate::index::norms::{DefaultSimilarity, Similarity};
use crate::index::reader::{self, IndexReader};
use crate::index::segment_info::{SegmentInfo, SegmentInfos};
use crate::index::segment_reader::SegmentReader;
use crate::index::{DELETABLE_FILE, SEGMENTS_FILE};
use crate::storage::lock::{COMMIT_LOCK_NAME, LockGuard, LockTimeouts, WRITE_LOCK_NAME, with_lock};
use crate::storage::memory::MemoryStorage;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, same_storage};

const DELETABLE_MAGIC: u32 = 0x4644_454C;
const DELETABLE_FORMAT: u32 = 1;
const DELETABLE_TEMP_FILE: &str = "deletable.new";

fn default_analyzer() -> Arc<dyn Analyzer> {
    Arc::new(StandardAnalyzer::new())
}

fn default_similarity() -> Arc<dyn Similarity> {
    Arc::new(DefaultSimilarity)
}

/// Configuration for [`IndexWriter`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexWriterConfig {
    /// Segments per merge tier, and the fan-in of `optimize`. At least 2.
    pub merge_factor: u32,

    /// Segments holding this many documents or more are never merged by the
    /// tiered policy.
    pub max_merge_docs: u32,

    /// Tokens indexed per field; the rest of the field is ignored.
    pub max_field_length: u32,

    /// Pack merged segments into compound files.
    pub use_compound_file: bool,

    /// Timeouts for `write.lock` and `commit.lock`.
    pub lock_timeouts: LockTimeouts,

    /// Analyzer used by [`IndexWriter::add_document`].
    #[serde(skip, default = "default_analyzer")]
    pub analyzer: Arc<dyn Analyzer>,

    /// Length normalization for the norms files.
    #[serde(skip, default = "default_similarity")]
    pub similarity: Arc<dyn Similarity>,
}

impl Default for IndexWriterConfig {
    fn default() -> Self {
        IndexWriterConfig {
            merge_factor: 10,
            max_merge_docs: u32::MAX,
            max_field_length: 10_000,
            use_compound_file: false,
            lock_timeouts: LockTimeouts::default(),
            analyzer: default_analyzer(),
            similarity: default_similarity(),
        }
    }
}

impl fmt::Debug for IndexWriterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexWriterConfig")
            .field("merge_factor", &self.merge_factor)
            .field("max_merge_docs", &self.max_merge_docs)
            .field("max_field_length", &self.max_field_length)
            .field("use_compound_file", &self.use_compound_file)
            .field("lock_timeouts", &self.lock_timeouts)
            .field("analyzer", &self.analyzer.name())
            .field("similarity", &self.similarity)
            .finish()
    }
}

#[derive(Debug)]
struct WriterState {
    segment_infos: SegmentInfos,
}

/// Adds documents to an index and merges its segments.
///
/// All methods take `&self`; the writer can be shared between threads.
/// Documents are inverted outside the writer's internal lock, so concurrent
/// `add_document` calls only serialize on merging.
#[derive(Debug)]
pub struct IndexWriter {
    storage: Arc<dyn Storage>,
    ram_storage: Arc<dyn Storage>,
    config: IndexWriterConfig,
    state: Mutex<WriterState>,
    write_lock: Mutex<Option<LockGuard>>,
    closed: AtomicBool,
}

impl IndexWriter {
    /// Open a writer on `storage`. With `create`, any existing index is
    /// replaced by an empty one; otherwise the index must exist.
    ///
    /// Fails with [`FolioError::LockObtainFailed`] when another writer, or a
    /// reader with pending deletions, holds the index.
    pub fn open(storage: Arc<dyn Storage>, create: bool, config: IndexWriterConfig) -> Result<Self> {
        if config.merge_factor < 2 {
            return Err(FolioError::invalid_operation(format!(
                "merge factor must be at least 2, got {}",
                config.merge_factor
            )));
        }

        let timeouts = config.lock_timeouts;
        let write_lock = LockGuard::obtain(
            storage.as_ref(),
            WRITE_LOCK_NAME,
            timeouts.write_timeout(),
            timeouts.poll_interval(),
        )?;

        let segment_infos = with_lock(
            storage.as_ref(),
            COMMIT_LOCK_NAME,
            timeouts.commit_timeout(),
            timeouts.poll_interval(),
            || {
                if !create {
                    return SegmentInfos::read(&storage);
                }

                let mut infos = SegmentInfos::new();
                let previous = if storage.file_exists(SEGMENTS_FILE) {
                    match SegmentInfos::read(&storage) {
                        Ok(previous) => Some(previous),
                        Err(e) => {
                            warn!(error = %e, "replacing unreadable index");
                            None
                        }
                    }
                } else {
                    None
                };
                if let Some(previous) = &previous {
                    // New names must not collide with the old segments' files.
                    infos.counter = previous.counter;
                    infos.version = infos.version.max(previous.version);
                }
                infos.write(storage.as_ref())?;
                if let Some(previous) = previous {
                    delete_segments(&storage, previous.as_slice());
                }
                Ok(infos)
            },
        )?;

        info!(
            create,
            segments = segment_infos.len(),
            version = segment_infos.version,
            "opened index writer"
        );

        Ok(IndexWriter {
            storage,
            ram_storage: Arc::new(MemoryStorage::new_default()),
            config,
            state: Mutex::new(WriterState { segment_infos }),
            write_lock: Mutex::new(Some(write_lock)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &IndexWriterConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Add a document using the configured analyzer.
    pub fn add_document(&self, doc: &Document) -> Result<()> {
        self.add_document_with_analyzer(doc, Arc::clone(&self.config.analyzer))
    }

    /// Add a document using `analyzer` for its tokenized fields.
    pub fn add_document_with_analyzer(&self, doc: &Document, analyzer: Arc<dyn Analyzer>) -> Result<()> {
        self.check_open()?;
        let segment = self.state.lock().segment_infos.new_segment_name();

        let inverter = DocumentWriter::new(
            analyzer,
            Arc::clone(&self.config.similarity),
            self.config.max_field_length,
        );
        if let Err(e) = inverter.add_document(self.ram_storage.as_ref(), &segment, doc) {
            remove_segment_files(self.ram_storage.as_ref(), &segment);
            return Err(e);
        }

        let mut state = match self.lock_open() {
            Ok(state) => state,
            Err(e) => {
                remove_segment_files(self.ram_storage.as_ref(), &segment);
                return Err(e);
            }
        };
        state
            .segment_infos
            .push(SegmentInfo::new(segment, 1, Arc::clone(&self.ram_storage)));
        self.maybe_merge_segments(&mut state)
    }

    /// Documents in the index, including buffered and deleted ones.
    pub fn doc_count(&self) -> u64 {
        self.state.lock().segment_infos.doc_count()
    }

    /// Segments in the index, including buffered ones.
    pub fn segment_count(&self) -> usize {
        self.state.lock().segment_infos.len()
    }

    /// Document count of every segment, in order.
    pub fn segment_doc_counts(&self) -> Vec<u32> {
        self.state
            .lock()
            .segment_infos
            .iter()
            .map(|info| info.doc_count)
            .collect()
    }

    /// Merge the whole index into a single segment.
    pub fn optimize(&self) -> Result<()> {
        let mut state = self.lock_open()?;
        self.optimize_locked(&mut state)
    }

    /// Merge the indexes in `storages` into this one. This index is
    /// optimized first and the result is a single segment.
    pub fn add_indexes(&self, storages: &[Arc<dyn Storage>]) -> Result<()> {
        let readers = storages
            .iter()
            .map(|storage| {
                reader::open_with_config(
                    Arc::clone(storage),
                    reader::ReaderConfig {
                        lock_timeouts: self.config.lock_timeouts,
                    },
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let sources: Vec<&dyn IndexReader> = readers.iter().map(|reader| reader.as_ref()).collect();
        self.add_indexes_readers(&sources)?;

        for reader in readers {
            reader.close()?;
        }
        Ok(())
    }

    /// Merge the live documents of `readers` into this index. This index is
    /// optimized first and the result is a single segment.
    pub fn add_indexes_readers(&self, readers: &[&dyn IndexReader]) -> Result<()> {
        let mut state = self.lock_open()?;
        self.optimize_locked(&mut state)?;

        let len = state.segment_infos.len();
        self.merge_segments(&mut state, 0..len, readers)?;
        self.optimize_locked(&mut state)
    }

    /// Flush buffered documents and release the write lock. Idempotent.
    pub fn close(&self) -> Result<()> {
        let flushed = {
            // Set under the state lock so no add can slip in after the flush.
            let mut state = self.state.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            self.flush_ram_segments(&mut state)
        };
        let released = match self.write_lock.lock().take() {
            Some(guard) => guard.release(),
            None => Ok(()),
        };
        info!(segments = self.segment_count(), "closed index writer");
        flushed?;
        released
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FolioError::invalid_operation("index writer is closed"));
        }
        Ok(())
    }

    /// The segment list, provided the writer is still open.
    fn lock_open(&self) -> Result<MutexGuard<'_, WriterState>> {
        let state = self.state.lock();
        self.check_open()?;
        Ok(state)
    }

    fn is_ram(&self, info: &SegmentInfo) -> bool {
        same_storage(&info.storage, &self.ram_storage)
    }

    /// Tiered merging: merge the longest run of trailing segments that are
    /// each below the target size once they add up to it, then move on to
    /// the next tier.
    fn maybe_merge_segments(&self, state: &mut WriterState) -> Result<()> {
        let merge_factor = self.config.merge_factor as u64;
        let mut target = merge_factor;

        while target <= self.config.max_merge_docs as u64 {
            let infos = &state.segment_infos;
            let mut min_segment = infos.len();
            let mut merge_docs = 0;
            while min_segment > 0 {
                let doc_count = infos.as_slice()[min_segment - 1].doc_count as u64;
                if doc_count >= target {
                    break;
                }
                merge_docs += doc_count;
                min_segment -= 1;
            }

            if merge_docs < target {
                break;
            }
            let len = infos.len();
            self.merge_segments(state, min_segment..len, &[])?;
            target *= merge_factor;
        }
        Ok(())
    }

    /// Move the trailing in-memory segments to the directory. The last
    /// on-disk segment joins the merge while the result stays within one
    /// merge factor.
    fn flush_ram_segments(&self, state: &mut WriterState) -> Result<()> {
        let infos = state.segment_infos.as_slice();
        let len = infos.len();
        let mut min_segment = len;
        let mut doc_count = 0;
        while min_segment > 0 && self.is_ram(&infos[min_segment - 1]) {
            doc_count += infos[min_segment - 1].doc_count as u64;
            min_segment -= 1;
        }
        if min_segment == len {
            return Ok(());
        }
        if min_segment > 0
            && doc_count + infos[min_segment - 1].doc_count as u64 <= self.config.merge_factor as u64
        {
            min_segment -= 1;
        }

        debug!(segments = len - min_segment, docs = doc_count, "flushing buffered segments");
        self.merge_segments(state, min_segment..len, &[])
    }

    fn optimize_locked(&self, state: &mut WriterState) -> Result<()> {
        self.flush_ram_segments(state)?;
        while self.needs_optimize(&state.segment_infos) {
            let len = state.segment_infos.len();
            let min_segment = len.saturating_sub(self.config.merge_factor as usize);
            self.merge_segments(state, min_segment..len, &[])?;
        }
        info!(docs = state.segment_infos.doc_count(), "optimized index");
        Ok(())
    }

    fn needs_optimize(&self, infos: &SegmentInfos) -> bool {
        match infos.as_slice() {
            [] => false,
            [info] => {
                info.has_deletions()
                    || !same_storage(&info.storage, &self.storage)
                    || info.uses_compound_file() != self.config.use_compound_file
            }
            _ => true,
        }
    }

    /// Merge the segments in `range`, followed by `extra` readers, into one
    /// new segment that takes the range's place in the list.
    fn merge_segments(
        &self,
        state: &mut WriterState,
        range: Range<usize>,
        extra: &[&dyn IndexReader],
    ) -> Result<()> {
        let merged_name = state.segment_infos.new_segment_name();
        let sources: Vec<SegmentInfo> = state.segment_infos.as_slice()[range.clone()].to_vec();

        let (doc_count, outputs) = {
            let readers = sources
                .iter()
                .map(SegmentReader::open)
                .collect::<Result<Vec<_>>>()?;
            let mut merger = SegmentMerger::new(
                Arc::clone(&self.storage),
                merged_name.clone(),
                self.config.use_compound_file,
            );
            for reader in &readers {
                merger.add(reader);
            }
            for reader in extra {
                merger.add(*reader);
            }

            match merger.merge() {
                Ok(stats) => (stats.docs_merged, merger.output_files()),
                Err(e) => {
                    merger.abort();
                    return Err(e);
                }
            }
        };

        let mut merged = state.segment_infos.clone();
        merged.replace_range(
            range,
            SegmentInfo::new(merged_name.clone(), doc_count, Arc::clone(&self.storage)),
        );
        let obsolete: Vec<SegmentInfo> = sources
            .into_iter()
            .filter(|info| self.is_ram(info) || same_storage(&info.storage, &self.storage))
            .collect();

        if let Err(e) = self.commit(&mut merged, &obsolete) {
            for file in &outputs {
                if let Err(e) = self.storage.delete_file(file) {
                    warn!(file, error = %e, "failed to remove uncommitted segment file");
                }
            }
            return Err(e);
        }

        info!(
            segment = %merged_name,
            docs = doc_count,
            merged = obsolete.len() + extra.len(),
            "merged segments"
        );
        state.segment_infos = merged;
        Ok(())
    }

    /// Write `infos` under the commit lock, then delete `obsolete` segments.
    /// Buffered segments are never written to the segments file.
    fn commit(&self, infos: &mut SegmentInfos, obsolete: &[SegmentInfo]) -> Result<()> {
        let timeouts = self.config.lock_timeouts;
        with_lock(
            self.storage.as_ref(),
            COMMIT_LOCK_NAME,
            timeouts.commit_timeout(),
            timeouts.poll_interval(),
            || {
                let mut durable = infos.clone();
                durable.retain(|info| !self.is_ram(info));
                durable.write(self.storage.as_ref())?;
                infos.version = durable.version;

                delete_segments(&self.storage, obsolete);
                Ok(())
            },
        )
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close index writer");
        }
    }
}

/// Every file belonging to `segment` in `storage`.
fn segment_files(storage: &dyn Storage, segment: &str) -> Result<Vec<String>> {
    let prefix = format!("{segment}.");
    Ok(storage
        .list_files()?
        .into_iter()
        .filter(|name| name.starts_with(&prefix))
        .collect())
}

fn remove_segment_files(storage: &dyn Storage, segment: &str) {
    let files = match segment_files(storage, segment) {
        Ok(files) => files,
        Err(e) => {
            warn!(segment, error = %e, "failed to list segment files");
            return;
        }
    };
    for file in files {
        if let Err(e) = storage.delete_file(&file) {
            warn!(file, error = %e, "failed to delete file");
        }
    }
}

/// Delete the files of `obsolete` segments. Directory files that cannot be
/// deleted go to the `deletable` list, which is retried first. Failures are
/// logged, never returned: the commit they follow has already happened.
fn delete_segments(storage: &Arc<dyn Storage>, obsolete: &[SegmentInfo]) {
    let mut deletable = Vec::new();
    match read_deletable(storage.as_ref()) {
        Ok(pending) => delete_files(storage.as_ref(), &pending, &mut deletable),
        Err(e) => warn!(error = %e, "ignoring unreadable {DELETABLE_FILE} file"),
    }

    for info in obsolete {
        if same_storage(&info.storage, storage) {
            match segment_files(storage.as_ref(), &info.name) {
                Ok(files) => delete_files(storage.as_ref(), &files, &mut deletable),
                Err(e) => warn!(segment = %info.name, error = %e, "failed to list segment files"),
            }
        } else {
            remove_segment_files(info.storage.as_ref(), &info.name);
        }
    }

    if let Err(e) = write_deletable(storage.as_ref(), &deletable) {
        warn!(error = %e, "failed to write {DELETABLE_FILE} file");
    }
}

fn delete_files(storage: &dyn Storage, files: &[String], deletable: &mut Vec<String>) {
    for file in files {
        if !storage.file_exists(file) {
            continue;
        }
        if let Err(e) = storage.delete_file(file) {
            if storage.file_exists(file) {
                warn!(file, error = %e, "deferring deletion");
                deletable.push(file.clone());
            }
        }
    }
}

/// Names queued for deletion. A missing file is an empty list.
pub fn read_deletable(storage: &dyn Storage) -> Result<Vec<String>> {
    if !storage.file_exists(DELETABLE_FILE) {
        return Ok(Vec::new());
    }
    let mut reader = StructReader::with_checksum(storage.open_input(DELETABLE_FILE)?);
    if reader.read_u32()? != DELETABLE_MAGIC {
        return Err(FolioError::corrupt("deletable file has a bad magic number"));
    }
    let format = reader.read_u32()?;
    if format != DELETABLE_FORMAT {
        return Err(FolioError::corrupt(format!("unknown deletable format {format}")));
    }
    let count = reader.read_vint()?;
    let mut names = Vec::with_capacity(count as usize);
    for _ in 0..count {
        names.push(reader.read_string()?);
    }
    reader.verify_checksum()?;
    Ok(names)
}

fn write_deletable(storage: &dyn Storage, names: &[String]) -> Result<()> {
    if names.is_empty() {
        if storage.file_exists(DELETABLE_FILE) {
            storage.delete_file(DELETABLE_FILE)?;
        }
        return Ok(());
    }

    let mut writer = StructWriter::with_checksum(storage.create_output(DELETABLE_TEMP_FILE)?);
    writer.write_u32(DELETABLE_MAGIC)?;
    writer.write_u32(DELETABLE_FORMAT)?;
    writer.write_vint(names.len() as u32)?;
    for name in names {
        writer.write_string(name)?;
    }
    writer.close()?;
    storage.rename_file(DELETABLE_TEMP_FILE, DELETABLE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Field;
    use crate::index::term::Term;
    use crate::storage::lock::LockTimeouts;
    use crate::storage::{FileMetadata, LockManager, StorageInput, StorageOutput};
    use std::collections::HashSet;

    fn quick_config() -> IndexWriterConfig {
        IndexWriterConfig {
            lock_timeouts: LockTimeouts {
                write_lock_timeout_ms: 20,
                commit_lock_timeout_ms: 200,
                poll_interval_ms: 5,
            },
            ..IndexWriterConfig::default()
        }
    }

    fn memory() -> Arc<dyn Storage> {
        Arc::new(MemoryStorage::new_default())
    }

    fn doc(n: usize) -> Document {
        Document::new()
            .with_field(Field::keyword("id", n.to_string()))
            .with_field(Field::text("body", format!("word{} common", n % 7)))
    }

    /// Memory storage whose deletes and creates can be made to fail.
    #[derive(Debug)]
    struct FlakyStorage {
        inner: MemoryStorage,
        undeletable: parking_lot::Mutex<HashSet<String>>,
        fail_create: parking_lot::Mutex<Option<String>>,
    }

    impl FlakyStorage {
        fn new() -> Self {
            FlakyStorage {
                inner: MemoryStorage::new_default(),
                undeletable: parking_lot::Mutex::new(HashSet::new()),
                fail_create: parking_lot::Mutex::new(None),
            }
        }
    }

    impl Storage for FlakyStorage {
        fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
            self.inner.open_input(name)
        }
        fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
            if self.fail_create.lock().as_deref() == Some(name) {
                return Err(FolioError::storage(format!("cannot create {name}")));
            }
            self.inner.create_output(name)
        }
        fn file_exists(&self, name: &str) -> bool {
            self.inner.file_exists(name)
        }
        fn delete_file(&self, name: &str) -> Result<()> {
            if self.undeletable.lock().contains(name) {
                return Err(FolioError::storage(format!("{name} is in use")));
            }
            self.inner.delete_file(name)
        }
        fn list_files(&self) -> Result<Vec<String>> {
            self.inner.list_files()
        }
        fn file_size(&self, name: &str) -> Result<u64> {
            self.inner.file_size(name)
        }
        fn metadata(&self, name: &str) -> Result<FileMetadata> {
            self.inner.metadata(name)
        }
        fn touch_file(&self, name: &str) -> Result<()> {
            self.inner.touch_file(name)
        }
        fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
            self.inner.rename_file(old_name, new_name)
        }
        fn lock_manager(&self) -> &dyn LockManager {
            self.inner.lock_manager()
        }
        fn sync(&self) -> Result<()> {
            self.inner.sync()
        }
        fn close(&self) -> Result<()> {
            self.inner.close()
        }
    }

    #[test]
    fn test_config_defaults_and_serde() {
        let config = IndexWriterConfig::default();
        assert_eq!(config.merge_factor, 10);
        assert_eq!(config.max_merge_docs, u32::MAX);
        assert_eq!(config.max_field_length, 10_000);
        assert!(!config.use_compound_file);

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("analyzer"));
        let parsed: IndexWriterConfig =
            serde_json::from_str(r#"{"merge_factor": 4, "use_compound_file": true}"#).unwrap();
        assert_eq!(parsed.merge_factor, 4);
        assert!(parsed.use_compound_file);
        assert_eq!(parsed.max_field_length, 10_000);
        assert_eq!(parsed.analyzer.name(), config.analyzer.name());
    }

    #[test]
    fn test_open_rejects_bad_merge_factor() {
        let config = IndexWriterConfig {
            merge_factor: 1,
            ..quick_config()
        };
        assert!(IndexWriter::open(memory(), true, config).is_err());
    }

    #[test]
    fn test_open_missing_index_releases_lock() {
        let storage = memory();
        let err = IndexWriter::open(Arc::clone(&storage), false, quick_config()).unwrap_err();
        assert!(matches!(err, FolioError::IndexNotFound(_)));
        assert!(!storage.lock_manager().lock_exists(WRITE_LOCK_NAME));
        IndexWriter::open(storage, true, quick_config()).unwrap();
    }

    #[test]
    fn test_single_writer_per_index() {
        let storage = memory();
        let writer = IndexWriter::open(Arc::clone(&storage), true, quick_config()).unwrap();
        let err = IndexWriter::open(Arc::clone(&storage), false, quick_config()).unwrap_err();
        assert!(err.is_lock_timeout());

        writer.close().unwrap();
        assert!(writer.add_document(&doc(0)).is_err());
        IndexWriter::open(storage, false, quick_config()).unwrap();
    }

    #[test]
    fn test_tiered_merging() {
        let storage = memory();
        let writer = IndexWriter::open(Arc::clone(&storage), true, quick_config()).unwrap();
        for n in 0..9 {
            writer.add_document(&doc(n)).unwrap();
        }
        assert_eq!(writer.segment_doc_counts(), vec![1; 9]);

        writer.add_document(&doc(9)).unwrap();
        assert_eq!(writer.segment_doc_counts(), vec![10]);

        for n in 10..130 {
            writer.add_document(&doc(n)).unwrap();
        }
        assert_eq!(writer.segment_doc_counts(), vec![100, 10, 10, 10]);
        assert_eq!(writer.doc_count(), 130);

        writer.optimize().unwrap();
        assert_eq!(writer.segment_doc_counts(), vec![130]);
        writer.close().unwrap();

        let reader = reader::open(storage).unwrap();
        assert_eq!(reader.num_docs(), 130);
        assert_eq!(reader.document(42).unwrap().get("id"), Some("42"));
        assert_eq!(reader.doc_freq(&Term::new("body", "common")).unwrap(), 130);
    }

    #[test]
    fn test_max_merge_docs_caps_tiers() {
        let config = IndexWriterConfig {
            merge_factor: 3,
            max_merge_docs: 8,
            ..quick_config()
        };
        let writer = IndexWriter::open(memory(), true, config).unwrap();
        for n in 0..20 {
            writer.add_document(&doc(n)).unwrap();
        }
        // Tier 3 merges happen, tier 9 exceeds the cap.
        assert_eq!(writer.segment_doc_counts(), vec![3, 3, 3, 3, 3, 3, 1, 1]);
    }

    #[test]
    fn test_close_flushes_buffered_documents() {
        let storage = memory();
        let writer = IndexWriter::open(Arc::clone(&storage), true, quick_config()).unwrap();
        for n in 0..3 {
            writer.add_document(&doc(n)).unwrap();
        }
        writer.close().unwrap();
        assert_eq!(writer.segment_doc_counts(), vec![3]);
        assert!(!storage.lock_manager().lock_exists(WRITE_LOCK_NAME));

        let infos = SegmentInfos::read(&storage).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(reader::open(storage).unwrap().num_docs(), 3);
    }

    #[test]
    fn test_flush_joins_small_disk_segment() {
        let storage = memory();
        let writer = IndexWriter::open(Arc::clone(&storage), true, quick_config()).unwrap();
        writer.add_document(&doc(0)).unwrap();
        writer.close().unwrap();

        let writer = IndexWriter::open(Arc::clone(&storage), false, quick_config()).unwrap();
        writer.add_document(&doc(1)).unwrap();
        writer.add_document(&doc(2)).unwrap();
        writer.close().unwrap();
        assert_eq!(writer.segment_doc_counts(), vec![3]);
    }

    #[test]
    fn test_optimize_compound_and_deletions() {
        let storage = memory();
        let writer = IndexWriter::open(Arc::clone(&storage), true, quick_config()).unwrap();
        for n in 0..25 {
            writer.add_document(&doc(n)).unwrap();
        }
        writer.close().unwrap();

        let reader = reader::open(Arc::clone(&storage)).unwrap();
        assert_eq!(reader.delete_term(&Term::new("id", "3")).unwrap(), 1);
        reader.close().unwrap();

        let config = IndexWriterConfig {
            use_compound_file: true,
            ..quick_config()
        };
        let writer = IndexWriter::open(Arc::clone(&storage), false, config).unwrap();
        writer.optimize().unwrap();
        assert_eq!(writer.segment_doc_counts(), vec![24]);
        writer.close().unwrap();

        let infos = SegmentInfos::read(&storage).unwrap();
        let info = infos.get(0).unwrap();
        assert!(info.uses_compound_file());
        assert!(!info.has_deletions());

        let files = storage.list_files().unwrap();
        assert!(files.iter().all(|f| !f.ends_with(".tis")), "{files:?}");
        assert!(!files.iter().any(|f| f.ends_with(".del")));

        let reader = reader::open(storage).unwrap();
        assert_eq!(reader.num_docs(), 24);
        assert_eq!(reader.doc_freq(&Term::new("id", "3")).unwrap(), 0);
        assert_eq!(reader.document(3).unwrap().get("id"), Some("4"));
    }

    #[test]
    fn test_add_indexes() {
        let sources: Vec<Arc<dyn Storage>> = (0..2).map(|_| memory()).collect();
        for (i, source) in sources.iter().enumerate() {
            let writer = IndexWriter::open(Arc::clone(source), true, quick_config()).unwrap();
            for n in 0..5 {
                writer.add_document(&doc(i * 100 + n)).unwrap();
            }
            writer.close().unwrap();
        }

        let target = memory();
        let writer = IndexWriter::open(Arc::clone(&target), true, quick_config()).unwrap();
        writer.add_document(&doc(999)).unwrap();
        writer.add_indexes(&sources).unwrap();
        assert_eq!(writer.segment_doc_counts(), vec![11]);
        writer.close().unwrap();

        let reader = reader::open(target).unwrap();
        let ids: Vec<String> = (0..reader.max_doc())
            .map(|n| reader.document(n).unwrap().get("id").unwrap().to_string())
            .collect();
        assert_eq!(ids[0], "999");
        assert_eq!(ids[1], "0");
        assert_eq!(ids[10], "104");

        // Sources are left untouched.
        assert_eq!(reader::open(Arc::clone(&sources[1])).unwrap().num_docs(), 5);
    }

    #[test]
    fn test_deferred_deletion() {
        let flaky = Arc::new(FlakyStorage::new());
        let storage: Arc<dyn Storage> = flaky.clone();
        let config = IndexWriterConfig {
            merge_factor: 2,
            ..quick_config()
        };

        let writer = IndexWriter::open(Arc::clone(&storage), true, config.clone()).unwrap();
        writer.add_document(&doc(0)).unwrap();
        writer.add_document(&doc(1)).unwrap();
        writer.close().unwrap();
        let first = SegmentInfos::read(&storage).unwrap().get(0).unwrap().name.clone();
        let tis = format!("{first}.tis");
        flaky.undeletable.lock().insert(tis.clone());

        let writer = IndexWriter::open(Arc::clone(&storage), false, config.clone()).unwrap();
        writer.add_document(&doc(2)).unwrap();
        writer.add_document(&doc(3)).unwrap();
        assert_eq!(writer.segment_doc_counts(), vec![4]);
        assert_eq!(read_deletable(storage.as_ref()).unwrap(), vec![tis.clone()]);
        assert!(storage.file_exists(&tis));
        assert!(!storage.file_exists(&format!("{first}.fnm")));

        flaky.undeletable.lock().clear();
        writer.add_document(&doc(4)).unwrap();
        writer.close().unwrap();
        assert!(!storage.file_exists(&tis));
        assert!(!storage.file_exists(DELETABLE_FILE));
        assert!(read_deletable(storage.as_ref()).unwrap().is_empty());
    }

    #[test]
    fn test_failed_merge_keeps_segment_list() {
        let flaky = Arc::new(FlakyStorage::new());
        let storage: Arc<dyn Storage> = flaky.clone();
        let config = IndexWriterConfig {
            merge_factor: 2,
            ..quick_config()
        };
        let writer = IndexWriter::open(Arc::clone(&storage), true, config).unwrap();
        let version = SegmentInfos::read_current_version(storage.as_ref()).unwrap();

        // Documents take names _0 and _1; the merge writes _2.
        *flaky.fail_create.lock() = Some("_2.tis".to_string());
        writer.add_document(&doc(0)).unwrap();
        assert!(writer.add_document(&doc(1)).is_err());
        assert_eq!(writer.segment_doc_counts(), vec![1, 1]);
        assert_eq!(SegmentInfos::read_current_version(storage.as_ref()).unwrap(), version);
        assert!(storage.list_files().unwrap().iter().all(|f| !f.starts_with("_2.")));

        *flaky.fail_create.lock() = None;
        writer.close().unwrap();
        assert_eq!(reader::open(storage).unwrap().num_docs(), 2);
    }

    #[test]
    fn test_create_replaces_existing_index() {
        let storage = memory();
        let writer = IndexWriter::open(Arc::clone(&storage), true, quick_config()).unwrap();
        for n in 0..3 {
            writer.add_document(&doc(n)).unwrap();
        }
        writer.close().unwrap();
        let old = SegmentInfos::read(&storage).unwrap();

        let writer = IndexWriter::open(Arc::clone(&storage), true, quick_config()).unwrap();
        assert_eq!(writer.doc_count(), 0);
        writer.add_document(&doc(7)).unwrap();
        writer.close().unwrap();

        let new = SegmentInfos::read(&storage).unwrap();
        assert!(new.version > old.version);
        assert!(new.counter > old.counter);
        let old_name = &old.get(0).unwrap().name;
        assert!(!storage.file_exists(&format!("{old_name}.fnm")));
        assert_eq!(reader::open(storage).unwrap().num_docs(), 1);
    }

    #[test]
    fn test_concurrent_adds() {
        let storage = memory();
        let writer = IndexWriter::open(Arc::clone(&storage), true, quick_config()).unwrap();
        std::thread::scope(|scope| {
            for t in 0..4 {
                let writer = &writer;
                scope.spawn(move || {
                    for n in 0..25 {
                        writer.add_document(&doc(t * 25 + n)).unwrap();
                    }
                });
            }
        });
        assert_eq!(writer.doc_count(), 100);
        writer.close().unwrap();

        let reader = reader::open(storage).unwrap();
        assert_eq!(reader.num_docs(), 100);
        let mut ids: Vec<u32> = (0..100)
            .map(|n| reader.document(n).unwrap().get("id").unwrap().parse().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..100).collect::<Vec<u32>>());
    }

    #[test]
    fn test_close_racing_adds_loses_nothing() {
        let storage = memory();
        let writer = IndexWriter::open(Arc::clone(&storage), true, quick_config()).unwrap();
        let accepted = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for t in 0..4 {
                let writer = &writer;
                let accepted = &accepted;
                scope.spawn(move || {
                    for n in 0..50 {
                        match writer.add_document(&doc(t * 50 + n)) {
                            Ok(()) => {
                                accepted.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(FolioError::InvalidOperation(_)) => break,
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                });
            }
            scope.spawn(|| {
                std::thread::sleep(std::time::Duration::from_millis(2));
                writer.close().unwrap();
            });
        });

        let accepted = accepted.load(Ordering::SeqCst);
        assert!(writer.add_document(&doc(0)).is_err());
        assert!(writer.ram_storage.list_files().unwrap().is_empty());
        let reader = reader::open(storage).unwrap();
        assert_eq!(reader.num_docs() as usize, accepted);
    }

    #[test]
    fn test_rejected_add_leaves_no_buffered_files() {
        let writer = IndexWriter::open(memory(), true, quick_config()).unwrap();
        writer.add_document(&doc(1)).unwrap();
        writer.close().unwrap();
        let err = writer.add_document(&doc(2)).unwrap_err();
        assert!(matches!(err, FolioError::InvalidOperation(_)));
        assert!(writer.optimize().is_err());
        assert!(writer.ram_storage.list_files().unwrap().is_empty());
    }
}
