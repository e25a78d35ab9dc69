//! One segment as an [`IndexReader`].

use std::collections::BTreeSet;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::document::Document;
use crate::error::{FolioError, Result};
use crate::index::deletion::DeletionBitmap;
use crate::index::field_infos::FieldInfos;
use crate::index::postings::{SegmentTermDocs, SegmentTermPositions, TermDocs, TermEnum, TermPositions};
use crate::index::reader::{FieldSelection, IndexOwner, IndexReader};
use crate::index::segment_info::SegmentInfo;
use crate::index::stored_fields::StoredFieldsReader;
use crate::index::term::Term;
use crate::index::term_dictionary::TermInfosReader;
use crate::index::{norms_file_name, segment_file_name};
use crate::storage::compound::CompoundStorage;
use crate::storage::{Storage, StorageInput};

#[derive(Debug, Default)]
struct Deletions {
    bitmap: Option<Arc<DeletionBitmap>>,
    /// The bitmap changed since it was loaded.
    dirty: bool,
    /// Every deletion was undone; the `.del` file must go.
    undelete_all: bool,
}

/// Reader over a single segment.
#[derive(Debug)]
pub struct SegmentReader {
    segment: String,
    /// The index directory, home of `.del`.
    storage: Arc<dyn Storage>,
    field_infos: Arc<FieldInfos>,
    stored_fields: StoredFieldsReader,
    term_infos: Arc<TermInfosReader>,
    freq_stream: Box<dyn StorageInput>,
    prox_stream: Box<dyn StorageInput>,
    /// Norms inputs by field number, held open so that the segment stays
    /// readable after a merge deletes its files.
    norm_streams: AHashMap<u32, Box<dyn StorageInput>>,
    max_doc: u32,
    deletions: RwLock<Deletions>,
    norms: Mutex<AHashMap<String, Arc<[u8]>>>,
    owner: Option<IndexOwner>,
    closed: AtomicBool,
}

impl SegmentReader {
    /// Open the segment described by `info`.
    pub fn open(info: &SegmentInfo) -> Result<Self> {
        let storage = Arc::clone(&info.storage);
        let segment = info.name.as_str();

        let segment_storage: Arc<dyn Storage> = if info.uses_compound_file() {
            Arc::new(CompoundStorage::open(
                Arc::clone(&storage),
                &segment_file_name(segment, "cfs"),
            )?)
        } else {
            Arc::clone(&storage)
        };

        let field_infos = Arc::new(FieldInfos::read(
            segment_storage.as_ref(),
            &segment_file_name(segment, "fnm"),
        )?);
        let stored_fields = StoredFieldsReader::open(segment_storage.as_ref(), segment, Arc::clone(&field_infos))?;
        let term_infos = Arc::new(TermInfosReader::open(
            segment_storage.as_ref(),
            segment,
            Arc::clone(&field_infos),
        )?);

        let del_file = segment_file_name(segment, "del");
        let bitmap = if storage.file_exists(&del_file) {
            Some(Arc::new(DeletionBitmap::read(storage.as_ref(), &del_file)?))
        } else {
            None
        };

        let max_doc = stored_fields.size();
        if let Some(bitmap) = &bitmap {
            if bitmap.len() != max_doc {
                return Err(FolioError::corrupt(format!(
                    "{del_file} covers {} documents, segment has {max_doc}",
                    bitmap.len()
                )));
            }
        }

        let mut norm_streams = AHashMap::new();
        for info in field_infos.indexed() {
            let name = norms_file_name(segment, info.number);
            if segment_storage.file_exists(&name) {
                norm_streams.insert(info.number, segment_storage.open_input(&name)?);
            }
        }

        debug!(segment, max_doc, compound = info.uses_compound_file(), "opened segment");

        Ok(SegmentReader {
            segment: segment.to_string(),
            freq_stream: segment_storage.open_input(&segment_file_name(segment, "frq"))?,
            prox_stream: segment_storage.open_input(&segment_file_name(segment, "prx"))?,
            norm_streams,
            storage,
            field_infos,
            stored_fields,
            term_infos,
            max_doc,
            deletions: RwLock::new(Deletions {
                bitmap,
                ..Deletions::default()
            }),
            norms: Mutex::new(AHashMap::new()),
            owner: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Make this reader the owner of its index directory.
    pub(crate) fn with_owner(mut self, owner: IndexOwner) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn field_infos(&self) -> &Arc<FieldInfos> {
        &self.field_infos
    }

    fn check_doc(&self, n: u32) -> Result<()> {
        if n >= self.max_doc {
            return Err(FolioError::index(format!(
                "document {n} out of range (segment {} holds {})",
                self.segment, self.max_doc
            )));
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FolioError::invalid_operation(format!(
                "reader for segment {} is closed",
                self.segment
            )));
        }
        Ok(())
    }

    fn deleted_snapshot(&self) -> Option<Arc<DeletionBitmap>> {
        self.deletions.read().bitmap.clone()
    }

    fn new_term_docs(&self) -> SegmentTermDocs {
        SegmentTermDocs::new(
            Arc::clone(&self.term_infos),
            Arc::clone(&self.field_infos),
            self.freq_stream.clone_input(),
            self.deleted_snapshot(),
        )
    }

    /// Record a deletion without any locking. The owner, if any, has
    /// already been consulted.
    pub(crate) fn delete_local(&self, n: u32) -> Result<()> {
        self.check_doc(n)?;
        let mut deletions = self.deletions.write();
        let max_doc = self.max_doc;
        let bitmap = deletions
            .bitmap
            .get_or_insert_with(|| Arc::new(DeletionBitmap::new(max_doc)));
        if Arc::make_mut(bitmap).delete(n)? {
            deletions.dirty = true;
            deletions.undelete_all = false;
        }
        Ok(())
    }

    pub(crate) fn undelete_all_local(&self) {
        let mut deletions = self.deletions.write();
        deletions.bitmap = None;
        deletions.dirty = false;
        deletions.undelete_all = true;
    }

    pub(crate) fn has_changes(&self) -> bool {
        let deletions = self.deletions.read();
        deletions.dirty || deletions.undelete_all
    }

    /// Write pending deletion changes: a new `.del` via a temporary file,
    /// or removal of `.del` after `undelete_all`.
    pub(crate) fn commit_changes(&self) -> Result<()> {
        let mut deletions = self.deletions.write();
        let del_file = segment_file_name(&self.segment, "del");

        if deletions.dirty {
            if let Some(bitmap) = &deletions.bitmap {
                let temp = segment_file_name(&self.segment, "tmp");
                bitmap.write(self.storage.as_ref(), &temp)?;
                self.storage.rename_file(&temp, &del_file)?;
                debug!(segment = %self.segment, deleted = bitmap.count(), "wrote deletions");
            }
        } else if deletions.undelete_all && self.storage.file_exists(&del_file) {
            self.storage.delete_file(&del_file)?;
            debug!(segment = %self.segment, "removed deletions");
        }

        deletions.dirty = false;
        deletions.undelete_all = false;
        Ok(())
    }

    fn load_norms(&self, field: &str) -> Result<Option<Arc<[u8]>>> {
        let Some(info) = self.field_infos.by_name(field) else {
            return Ok(None);
        };
        if !info.is_indexed {
            return Ok(None);
        }

        let Some(stream) = self.norm_streams.get(&info.number) else {
            return Ok(None);
        };
        let mut input = stream.clone_input();
        input.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::with_capacity(self.max_doc as usize);
        input.read_to_end(&mut bytes)?;
        if bytes.len() != self.max_doc as usize {
            return Err(FolioError::corrupt(format!(
                "{} holds {} norms for {} documents",
                norms_file_name(&self.segment, info.number),
                bytes.len(),
                self.max_doc
            )));
        }
        Ok(Some(Arc::from(bytes)))
    }
}

impl IndexReader for SegmentReader {
    fn num_docs(&self) -> u32 {
        let deleted = self.deletions.read().bitmap.as_ref().map_or(0, |b| b.count());
        self.max_doc - deleted
    }

    fn max_doc(&self) -> u32 {
        self.max_doc
    }

    fn document(&self, n: u32) -> Result<Document> {
        self.check_doc(n)?;
        self.stored_fields.clone().doc(n)
    }

    fn document_fields(&self, n: u32, fields: &[&str]) -> Result<Document> {
        self.check_doc(n)?;
        self.stored_fields.clone().doc_fields(n, fields)
    }

    fn is_deleted(&self, n: u32) -> bool {
        self.deletions
            .read()
            .bitmap
            .as_ref()
            .is_some_and(|bitmap| bitmap.is_deleted(n))
    }

    fn has_deletions(&self) -> bool {
        self.deletions.read().bitmap.is_some()
    }

    fn norms(&self, field: &str) -> Result<Option<Arc<[u8]>>> {
        if let Some(norms) = self.norms.lock().get(field) {
            return Ok(Some(Arc::clone(norms)));
        }
        let loaded = self.load_norms(field)?;
        if let Some(norms) = &loaded {
            self.norms.lock().insert(field.to_string(), Arc::clone(norms));
        }
        Ok(loaded)
    }

    fn terms(&self) -> Result<Box<dyn TermEnum>> {
        Ok(Box::new(self.term_infos.terms()))
    }

    fn terms_from(&self, term: &Term) -> Result<Box<dyn TermEnum>> {
        Ok(Box::new(self.term_infos.terms_from(term)?))
    }

    fn doc_freq(&self, term: &Term) -> Result<u32> {
        Ok(self.term_infos.get(term)?.map_or(0, |info| info.doc_freq))
    }

    fn term_docs(&self) -> Result<Box<dyn TermDocs>> {
        Ok(Box::new(self.new_term_docs()))
    }

    fn term_positions(&self) -> Result<Box<dyn TermPositions>> {
        Ok(Box::new(SegmentTermPositions::new(
            self.new_term_docs(),
            self.prox_stream.clone_input(),
        )))
    }

    fn field_names(&self, selection: FieldSelection) -> Vec<String> {
        self.field_infos
            .iter()
            .filter(|info| !info.name.is_empty())
            .filter(|info| match selection {
                FieldSelection::All => true,
                FieldSelection::Indexed => info.is_indexed,
                FieldSelection::Unindexed => !info.is_indexed,
            })
            .map(|info| info.name.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn delete(&self, n: u32) -> Result<()> {
        self.check_open()?;
        if let Some(owner) = &self.owner {
            owner.acquire_write_access()?;
        }
        self.delete_local(n)
    }

    fn undelete_all(&self) -> Result<()> {
        self.check_open()?;
        if let Some(owner) = &self.owner {
            owner.acquire_write_access()?;
        }
        self.undelete_all_local();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let committed = if self.has_changes() {
            match &self.owner {
                Some(owner) => owner.commit(|| self.commit_changes()),
                None => self.commit_changes(),
            }
        } else {
            Ok(())
        };

        let released = match &self.owner {
            Some(owner) => owner.release(),
            None => Ok(()),
        };
        committed?;
        released
    }
}

impl Drop for SegmentReader {
    fn drop(&mut self) {
        if let Err(e) = IndexReader::close(self) {
            warn!(segment = %self.segment, error = %e, "failed to close segment reader");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Field;
    use crate::index::document_writer::DocumentWriter;
    use crate::analysis::analyzer::whitespace::WhitespaceAnalyzer;
    use crate::index::norms::{DefaultSimilarity, decode_norm};
    use crate::storage::memory::MemoryStorage;

    fn one_doc_segment(storage: &Arc<dyn Storage>, name: &str, text: &str) -> SegmentInfo {
        let writer = DocumentWriter::new(Arc::new(WhitespaceAnalyzer::new()), Arc::new(DefaultSimilarity), 10_000);
        let doc = Document::new()
            .with_field(Field::keyword("id", name))
            .with_field(Field::text("body", text));
        writer.add_document(storage.as_ref(), name, &doc).unwrap();
        SegmentInfo::new(name, 1, Arc::clone(storage))
    }

    #[test]
    fn test_read_single_document_segment() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let info = one_doc_segment(&storage, "_0", "red green red");
        let reader = SegmentReader::open(&info).unwrap();

        assert_eq!(reader.max_doc(), 1);
        assert_eq!(reader.num_docs(), 1);
        assert_eq!(reader.document(0).unwrap().get("body"), Some("red green red"));
        assert!(reader.document(1).is_err());
        assert_eq!(reader.doc_freq(&Term::new("body", "red")).unwrap(), 1);
        assert_eq!(reader.doc_freq(&Term::new("body", "blue")).unwrap(), 0);

        let mut docs = reader.term_docs_for(&Term::new("body", "red")).unwrap();
        assert!(docs.next().unwrap());
        assert_eq!((docs.doc(), docs.freq()), (0, 2));

        let norms = reader.norms("body").unwrap().unwrap();
        assert_eq!(norms.len(), 1);
        assert!((decode_norm(norms[0]) - 0.5).abs() < 0.1);
        assert!(reader.norms("missing").unwrap().is_none());

        assert_eq!(reader.field_names(FieldSelection::All), vec!["body", "id"]);
    }

    #[test]
    fn test_norms_survive_file_deletion() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let info = one_doc_segment(&storage, "_0", "one two three");
        let expected = SegmentReader::open(&info).unwrap().norms("body").unwrap().unwrap();

        let reader = SegmentReader::open(&info).unwrap();
        for file in storage.list_files().unwrap() {
            storage.delete_file(&file).unwrap();
        }
        assert!(storage.list_files().unwrap().is_empty());

        assert_eq!(reader.norms("body").unwrap().unwrap(), expected);
        assert!(reader.norms("id").unwrap().is_some());
        assert_eq!(reader.document(0).unwrap().get("body"), Some("one two three"));
    }

    #[test]
    fn test_deletions_commit_on_close() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let info = one_doc_segment(&storage, "_0", "alpha");

        let reader = SegmentReader::open(&info).unwrap();
        let mut cursor = reader.term_docs_for(&Term::new("body", "alpha")).unwrap();
        reader.delete(0).unwrap();
        assert!(reader.is_deleted(0));
        assert_eq!(reader.num_docs(), 0);
        assert!(reader.has_deletions());
        // Existing cursors keep their snapshot.
        assert!(cursor.next().unwrap());
        assert!(!reader.term_docs_for(&Term::new("body", "alpha")).unwrap().next().unwrap());
        reader.close().unwrap();
        assert!(info.has_deletions());
        assert!(reader.delete(0).is_err());

        let reopened = SegmentReader::open(&info).unwrap();
        assert!(reopened.is_deleted(0));
        reopened.undelete_all().unwrap();
        assert!(!reopened.is_deleted(0));
        drop(reopened);
        assert!(!info.has_deletions());

        let reopened = SegmentReader::open(&info).unwrap();
        assert_eq!(reopened.num_docs(), 1);
    }

    #[test]
    fn test_delete_term_counts() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let info = one_doc_segment(&storage, "_0", "alpha");
        let reader = SegmentReader::open(&info).unwrap();
        assert_eq!(reader.delete_term(&Term::new("body", "beta")).unwrap(), 0);
        assert_eq!(reader.delete_term(&Term::new("body", "alpha")).unwrap(), 1);
        assert_eq!(reader.delete_term(&Term::new("body", "alpha")).unwrap(), 0);
    }
}
