//! Read access to an index.
//!
//! [`open`] loads the current segment list under the commit lock and returns
//! a point-in-time reader: a [`SegmentReader`] for a single-segment index, a
//! [`MultiSegmentReader`] otherwise. Files of segments merged away after the
//! reader was opened stay readable until the reader is dropped.
//!
//! A reader may also delete documents. The first deletion obtains the
//! index's write lock and verifies that the index has not been committed to
//! since the reader was opened; if it has, the reader is stale and the
//! deletion fails with [`FolioError::StaleReader`]. Deletions are written
//! when the reader is closed.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::Document;
use crate::error::{FolioError, Result};
use crate::index::SEGMENTS_FILE;
use crate::index::multi_reader::MultiSegmentReader;
use crate::index::postings::{TermDocs, TermEnum, TermPositions};
use crate::index::segment_info::SegmentInfos;
use crate::index::segment_reader::SegmentReader;
use crate::index::term::Term;
use crate::storage::Storage;
use crate::storage::lock::{COMMIT_LOCK_NAME, LockGuard, LockTimeouts, WRITE_LOCK_NAME, with_lock};

/// Which field names [`IndexReader::field_names`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldSelection {
    All,
    Indexed,
    Unindexed,
}

/// Reader configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Timeouts for the write lock taken by deletions and the commit lock
    /// taken on open and close.
    pub lock_timeouts: LockTimeouts,
}

/// A point-in-time view of an index, or of part of one.
///
/// Document numbers run from 0 to `max_doc() - 1` and include deleted
/// documents.
pub trait IndexReader: Send + Sync + Debug {
    /// Number of live documents.
    fn num_docs(&self) -> u32;

    /// One greater than the largest document number.
    fn max_doc(&self) -> u32;

    /// The stored fields of document `n`.
    fn document(&self, n: u32) -> Result<Document>;

    /// Only the named stored fields of document `n`.
    fn document_fields(&self, n: u32, fields: &[&str]) -> Result<Document>;

    fn is_deleted(&self, n: u32) -> bool;

    fn has_deletions(&self) -> bool;

    /// One norm byte per document for `field`, or `None` when no segment
    /// indexes the field.
    fn norms(&self, field: &str) -> Result<Option<Arc<[u8]>>>;

    /// All terms, in term order. Call `next` before reading the first term.
    fn terms(&self) -> Result<Box<dyn TermEnum>>;

    /// Terms starting at the first term not before `term`. The cursor is
    /// already positioned: `term()` is valid before any call to `next`.
    fn terms_from(&self, term: &Term) -> Result<Box<dyn TermEnum>>;

    /// Number of documents containing `term`, deleted ones included.
    fn doc_freq(&self, term: &Term) -> Result<u32>;

    /// An unpositioned document cursor.
    fn term_docs(&self) -> Result<Box<dyn TermDocs>>;

    /// A document cursor over `term`.
    fn term_docs_for(&self, term: &Term) -> Result<Box<dyn TermDocs>> {
        let mut docs = self.term_docs()?;
        docs.seek(term)?;
        Ok(docs)
    }

    /// An unpositioned document and position cursor.
    fn term_positions(&self) -> Result<Box<dyn TermPositions>>;

    /// Sorted field names.
    fn field_names(&self, selection: FieldSelection) -> Vec<String>;

    /// Mark document `n` deleted.
    fn delete(&self, n: u32) -> Result<()>;

    /// Delete every document containing `term`, returning how many were
    /// deleted.
    fn delete_term(&self, term: &Term) -> Result<u32> {
        let mut docs = self.term_docs_for(term)?;
        let mut count = 0;
        while docs.next()? {
            self.delete(docs.doc())?;
            count += 1;
        }
        Ok(count)
    }

    /// Undo every deletion not yet merged away.
    fn undelete_all(&self) -> Result<()>;

    /// Commit pending deletions and release the write lock. Idempotent.
    fn close(&self) -> Result<()>;
}

/// Open the index in `storage` with default settings.
pub fn open(storage: Arc<dyn Storage>) -> Result<Box<dyn IndexReader>> {
    open_with_config(storage, ReaderConfig::default())
}

/// Open the index in `storage`.
pub fn open_with_config(storage: Arc<dyn Storage>, config: ReaderConfig) -> Result<Box<dyn IndexReader>> {
    let timeouts = config.lock_timeouts;
    with_lock(
        storage.as_ref(),
        COMMIT_LOCK_NAME,
        timeouts.commit_timeout(),
        timeouts.poll_interval(),
        || {
            let infos = SegmentInfos::read(&storage)?;
            debug!(segments = infos.len(), version = infos.version, "opening index reader");

            let readers = infos
                .iter()
                .map(SegmentReader::open)
                .collect::<Result<Vec<_>>>()?;
            let owner = IndexOwner::new(Arc::clone(&storage), infos, config);

            let reader: Box<dyn IndexReader> = if readers.len() == 1 {
                let mut readers = readers;
                match readers.pop() {
                    Some(reader) => Box::new(reader.with_owner(owner)),
                    None => return Err(FolioError::index("segment reader vanished")),
                }
            } else {
                Box::new(MultiSegmentReader::with_owner(readers, owner))
            };
            Ok(reader)
        },
    )
}

/// Whether `storage` holds an index.
pub fn index_exists(storage: &dyn Storage) -> bool {
    storage.file_exists(SEGMENTS_FILE)
}

/// Whether the write lock or the commit lock is currently held.
pub fn is_locked(storage: &dyn Storage) -> bool {
    let locks = storage.lock_manager();
    locks.lock_exists(WRITE_LOCK_NAME) || locks.lock_exists(COMMIT_LOCK_NAME)
}

/// Forcibly release both index locks, for recovery after a crashed process.
pub fn unlock(storage: &dyn Storage) -> Result<()> {
    let locks = storage.lock_manager();
    locks.force_release(WRITE_LOCK_NAME)?;
    locks.force_release(COMMIT_LOCK_NAME)?;
    warn!("forcibly released index locks");
    Ok(())
}

/// Modification time of the segment list, in milliseconds since the epoch.
pub fn last_modified(storage: &dyn Storage) -> Result<u64> {
    if !index_exists(storage) {
        return Err(FolioError::index_not_found(format!("no {SEGMENTS_FILE} file")));
    }
    storage.file_modified(SEGMENTS_FILE)
}

/// Version of the segment list, bumped by every commit.
pub fn current_version(storage: &dyn Storage) -> Result<u64> {
    SegmentInfos::read_current_version(storage)
}

#[derive(Debug)]
struct OwnerState {
    segment_infos: SegmentInfos,
    write_lock: Option<LockGuard>,
    stale: bool,
}

/// The top-level reader's claim on the index directory: the segment list it
/// was opened on, and the write lock once it starts deleting.
#[derive(Debug)]
pub(crate) struct IndexOwner {
    storage: Arc<dyn Storage>,
    timeouts: LockTimeouts,
    state: Mutex<OwnerState>,
}

impl IndexOwner {
    pub(crate) fn new(storage: Arc<dyn Storage>, segment_infos: SegmentInfos, config: ReaderConfig) -> Self {
        IndexOwner {
            storage,
            timeouts: config.lock_timeouts,
            state: Mutex::new(OwnerState {
                segment_infos,
                write_lock: None,
                stale: false,
            }),
        }
    }

    /// Make sure this reader may modify the index: hold the write lock and
    /// be current.
    pub(crate) fn acquire_write_access(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.stale {
            return Err(FolioError::StaleReader);
        }
        if state.write_lock.is_some() {
            return Ok(());
        }

        let guard = LockGuard::obtain(
            self.storage.as_ref(),
            WRITE_LOCK_NAME,
            self.timeouts.write_timeout(),
            self.timeouts.poll_interval(),
        )?;
        let current = SegmentInfos::read_current_version(self.storage.as_ref())?;
        if current > state.segment_infos.version {
            state.stale = true;
            guard.release()?;
            return Err(FolioError::StaleReader);
        }
        state.write_lock = Some(guard);
        Ok(())
    }

    /// Run `apply` and rewrite the segment list, both under the commit lock.
    pub(crate) fn commit(&self, apply: impl FnOnce() -> Result<()>) -> Result<()> {
        let mut state = self.state.lock();
        with_lock(
            self.storage.as_ref(),
            COMMIT_LOCK_NAME,
            self.timeouts.commit_timeout(),
            self.timeouts.poll_interval(),
            || {
                apply()?;
                state.segment_infos.write(self.storage.as_ref())
            },
        )
    }

    /// Release the write lock, if held.
    pub(crate) fn release(&self) -> Result<()> {
        match self.state.lock().write_lock.take() {
            Some(guard) => guard.release(),
            None => Ok(()),
        }
    }
}
