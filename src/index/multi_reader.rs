//! Several segments presented as one index.
//!
//! Documents are numbered by concatenating the segments in order: segment
//! `i` covers `starts[i]..starts[i + 1]`. Term enumeration merges the
//! segments' dictionaries; postings cursors walk the segments one after the
//! other, adding each segment's start to its document numbers.

use std::cmp;
use std::collections::binary_heap::PeekMut;
use std::collections::{BTreeSet, BinaryHeap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::document::Document;
use crate::error::{FolioError, Result};
use crate::index::merger::{MergeQueue, SegmentMergeInfo};
use crate::index::postings::{TermDocs, TermEnum, TermPositions};
use crate::index::reader::{FieldSelection, IndexOwner, IndexReader};
use crate::index::segment_reader::SegmentReader;
use crate::index::term::Term;

/// Reader over an ordered list of segments.
#[derive(Debug)]
pub struct MultiSegmentReader {
    readers: Vec<SegmentReader>,
    /// First document number of each segment, plus `max_doc` at the end.
    starts: Vec<u32>,
    max_doc: u32,
    num_docs: Mutex<Option<u32>>,
    norms: Mutex<AHashMap<String, Arc<[u8]>>>,
    owner: Option<IndexOwner>,
    closed: AtomicBool,
}

impl MultiSegmentReader {
    pub fn new(readers: Vec<SegmentReader>) -> Self {
        let mut starts = Vec::with_capacity(readers.len() + 1);
        let mut max_doc = 0;
        for reader in &readers {
            starts.push(max_doc);
            max_doc += reader.max_doc();
        }
        starts.push(max_doc);

        MultiSegmentReader {
            readers,
            starts,
            max_doc,
            num_docs: Mutex::new(None),
            norms: Mutex::new(AHashMap::new()),
            owner: None,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_owner(readers: Vec<SegmentReader>, owner: IndexOwner) -> Self {
        let mut reader = MultiSegmentReader::new(readers);
        reader.owner = Some(owner);
        reader
    }

    pub fn segments(&self) -> &[SegmentReader] {
        &self.readers
    }

    /// The segment holding document `n`. Empty segments share their start
    /// with the following segment, so the last match wins.
    fn reader_index(&self, n: u32) -> Result<usize> {
        if n >= self.max_doc {
            return Err(FolioError::index(format!(
                "document {n} out of range (index holds {})",
                self.max_doc
            )));
        }
        let segments = &self.starts[..self.readers.len()];
        Ok(segments.partition_point(|&start| start <= n) - 1)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FolioError::invalid_operation("reader is closed"));
        }
        Ok(())
    }

    fn commit_changes(&self) -> Result<()> {
        for reader in &self.readers {
            if reader.has_changes() {
                reader.commit_changes()?;
            }
        }
        Ok(())
    }

    fn load_norms(&self, field: &str) -> Result<Option<Arc<[u8]>>> {
        let mut found = false;
        let mut bytes = Vec::with_capacity(self.max_doc as usize);
        for reader in &self.readers {
            match reader.norms(field)? {
                Some(norms) => {
                    found = true;
                    bytes.extend_from_slice(&norms);
                }
                None => bytes.resize(bytes.len() + reader.max_doc() as usize, 0),
            }
        }
        Ok(found.then(|| Arc::from(bytes)))
    }
}

impl IndexReader for MultiSegmentReader {
    fn num_docs(&self) -> u32 {
        let mut cached = self.num_docs.lock();
        *cached.get_or_insert_with(|| self.readers.iter().map(|r| r.num_docs()).sum())
    }

    fn max_doc(&self) -> u32 {
        self.max_doc
    }

    fn document(&self, n: u32) -> Result<Document> {
        let i = self.reader_index(n)?;
        self.readers[i].document(n - self.starts[i])
    }

    fn document_fields(&self, n: u32, fields: &[&str]) -> Result<Document> {
        let i = self.reader_index(n)?;
        self.readers[i].document_fields(n - self.starts[i], fields)
    }

    fn is_deleted(&self, n: u32) -> bool {
        match self.reader_index(n) {
            Ok(i) => self.readers[i].is_deleted(n - self.starts[i]),
            Err(_) => false,
        }
    }

    fn has_deletions(&self) -> bool {
        self.readers.iter().any(|r| r.has_deletions())
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
        Ok(Box::new(MultiTermEnum::new(&self.readers, &self.starts, None)?))
    }

    fn terms_from(&self, term: &Term) -> Result<Box<dyn TermEnum>> {
        Ok(Box::new(MultiTermEnum::new(&self.readers, &self.starts, Some(term))?))
    }

    fn doc_freq(&self, term: &Term) -> Result<u32> {
        let mut total = 0;
        for reader in &self.readers {
            total += reader.doc_freq(term)?;
        }
        Ok(total)
    }

    fn term_docs(&self) -> Result<Box<dyn TermDocs>> {
        let cursors = self
            .readers
            .iter()
            .map(|r| r.term_docs())
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(MultiTermDocs::new(cursors, self.starts.clone())))
    }

    fn term_positions(&self) -> Result<Box<dyn TermPositions>> {
        let cursors = self
            .readers
            .iter()
            .map(|r| r.term_positions())
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(MultiTermDocs::new(cursors, self.starts.clone())))
    }

    fn field_names(&self, selection: FieldSelection) -> Vec<String> {
        self.readers
            .iter()
            .flat_map(|r| r.field_names(selection))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn delete(&self, n: u32) -> Result<()> {
        self.check_open()?;
        let i = self.reader_index(n)?;
        if let Some(owner) = &self.owner {
            owner.acquire_write_access()?;
        }
        self.readers[i].delete_local(n - self.starts[i])?;
        *self.num_docs.lock() = None;
        Ok(())
    }

    fn undelete_all(&self) -> Result<()> {
        self.check_open()?;
        if let Some(owner) = &self.owner {
            owner.acquire_write_access()?;
        }
        for reader in &self.readers {
            reader.undelete_all_local();
        }
        *self.num_docs.lock() = None;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let committed = if self.readers.iter().any(|r| r.has_changes()) {
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

        let mut closed = Ok(());
        for reader in &self.readers {
            if let Err(e) = reader.close() {
                closed = Err(e);
            }
        }
        committed?;
        released?;
        closed
    }
}

impl Drop for MultiSegmentReader {
    fn drop(&mut self) {
        if let Err(e) = IndexReader::close(self) {
            warn!(error = %e, "failed to close index reader");
        }
    }
}

/// Merged term enumeration over several segments. The document frequency
/// of a term is the sum over the segments containing it.
#[derive(Debug)]
pub struct MultiTermEnum {
    queue: MergeQueue,
    term: Option<Term>,
    doc_freq: u32,
}

impl MultiTermEnum {
    /// With `from`, every segment's enumeration starts at the first term not
    /// before it and the merged enumeration is positioned on the smallest.
    fn new(readers: &[SegmentReader], starts: &[u32], from: Option<&Term>) -> Result<Self> {
        let mut queue = MergeQueue::new();
        for (index, reader) in readers.iter().enumerate() {
            let term_enum = match from {
                Some(term) => reader.terms_from(term)?,
                None => {
                    let mut term_enum = reader.terms()?;
                    term_enum.next()?;
                    term_enum
                }
            };
            if let Some(info) = SegmentMergeInfo::new(starts[index], index, term_enum) {
                queue.push(info);
            }
        }

        let mut term_enum = MultiTermEnum {
            queue,
            term: None,
            doc_freq: 0,
        };
        if from.is_some() {
            term_enum.next()?;
        }
        Ok(term_enum)
    }
}

impl TermEnum for MultiTermEnum {
    fn next(&mut self) -> Result<bool> {
        let matching = self.queue.pop_matching();
        let Some(first) = matching.first() else {
            self.term = None;
            self.doc_freq = 0;
            return Ok(false);
        };
        self.term = Some(first.term.clone());
        self.doc_freq = matching.iter().map(|info| info.term_enum.doc_freq()).sum();
        self.queue.advance_all(matching)?;
        Ok(true)
    }

    fn term(&self) -> Option<Term> {
        self.term.clone()
    }

    fn doc_freq(&self) -> u32 {
        self.doc_freq
    }
}

/// Postings cursor that visits each segment in turn. Segments are only
/// sought once the previous ones are exhausted.
#[derive(Debug)]
pub struct MultiTermDocs<C: ?Sized + TermDocs> {
    cursors: Vec<Box<C>>,
    starts: Vec<u32>,
    term: Option<Term>,
    /// Next segment to seek.
    pointer: usize,
    current: Option<usize>,
    base: u32,
}

impl<C: ?Sized + TermDocs> MultiTermDocs<C> {
    pub fn new(cursors: Vec<Box<C>>, starts: Vec<u32>) -> Self {
        MultiTermDocs {
            cursors,
            starts,
            term: None,
            pointer: 0,
            current: None,
            base: 0,
        }
    }

    /// Move on to the next segment. Returns false after the last one.
    fn next_segment(&mut self) -> Result<bool> {
        let Some(term) = &self.term else {
            return Ok(false);
        };
        if self.pointer >= self.cursors.len() {
            self.current = None;
            return Ok(false);
        }
        let i = self.pointer;
        self.cursors[i].seek(term)?;
        self.base = self.starts[i];
        self.current = Some(i);
        self.pointer += 1;
        Ok(true)
    }

    fn current(&self) -> Option<&C> {
        self.current.map(|i| self.cursors[i].as_ref())
    }
}

impl<C: ?Sized + TermDocs> TermDocs for MultiTermDocs<C> {
    fn seek(&mut self, term: &Term) -> Result<()> {
        self.term = Some(term.clone());
        self.pointer = 0;
        self.current = None;
        self.base = 0;
        Ok(())
    }

    fn doc(&self) -> u32 {
        self.base + self.current().map_or(0, |c| c.doc())
    }

    fn freq(&self) -> u32 {
        self.current().map_or(0, |c| c.freq())
    }

    fn next(&mut self) -> Result<bool> {
        loop {
            if let Some(i) = self.current {
                if self.cursors[i].next()? {
                    return Ok(true);
                }
            }
            if !self.next_segment()? {
                return Ok(false);
            }
        }
    }

    fn read(&mut self, docs: &mut [u32], freqs: &mut [u32]) -> Result<usize> {
        loop {
            let Some(i) = self.current else {
                if !self.next_segment()? {
                    return Ok(0);
                }
                continue;
            };
            let count = self.cursors[i].read(docs, freqs)?;
            if count == 0 {
                self.current = None;
                continue;
            }
            for doc in &mut docs[..count] {
                *doc += self.base;
            }
            return Ok(count);
        }
    }

    fn skip_to(&mut self, target: u32) -> Result<bool> {
        loop {
            if let Some(i) = self.current {
                if self.cursors[i].skip_to(target.saturating_sub(self.base))? {
                    return Ok(true);
                }
            }
            if !self.next_segment()? {
                return Ok(false);
            }
        }
    }
}

impl TermPositions for MultiTermDocs<dyn TermPositions> {
    fn next_position(&mut self) -> Result<u32> {
        match self.current {
            Some(i) => self.cursors[i].next_position(),
            None => Err(FolioError::invalid_operation("cursor is not on a document")),
        }
    }
}

/// Positions of several terms read as if they were one term. A document
/// holding more than one of the terms reports all their positions in
/// increasing order.
#[derive(Debug)]
pub struct MultipleTermPositions {
    queue: BinaryHeap<PositionsCursor>,
    doc: u32,
    positions: Vec<u32>,
    /// Next entry of `positions` to hand out.
    pointer: usize,
}

/// One term's cursor, keyed by its current document.
#[derive(Debug)]
struct PositionsCursor {
    doc: u32,
    positions: Box<dyn TermPositions>,
}

impl PartialEq for PositionsCursor {
    fn eq(&self, other: &Self) -> bool {
        self.doc == other.doc
    }
}

impl Eq for PositionsCursor {}

impl PartialOrd for PositionsCursor {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PositionsCursor {
    // Reversed so the max-heap pops the smallest document.
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        other.doc.cmp(&self.doc)
    }
}

impl MultipleTermPositions {
    /// Union the postings of `terms` in `reader`. Terms missing from the
    /// index contribute nothing.
    pub fn new(reader: &dyn IndexReader, terms: &[Term]) -> Result<Self> {
        let mut queue = BinaryHeap::with_capacity(terms.len());
        for term in terms {
            let mut positions = reader.term_positions()?;
            positions.seek(term)?;
            if positions.next()? {
                queue.push(PositionsCursor {
                    doc: positions.doc(),
                    positions,
                });
            }
        }
        Ok(MultipleTermPositions {
            queue,
            doc: 0,
            positions: Vec::new(),
            pointer: 0,
        })
    }
}

impl TermDocs for MultipleTermPositions {
    fn seek(&mut self, _term: &Term) -> Result<()> {
        Err(FolioError::invalid_operation(
            "a union of term positions cannot be sought",
        ))
    }

    fn doc(&self) -> u32 {
        self.doc
    }

    fn freq(&self) -> u32 {
        self.positions.len() as u32
    }

    fn next(&mut self) -> Result<bool> {
        self.positions.clear();
        self.pointer = 0;
        let Some(top) = self.queue.peek() else {
            return Ok(false);
        };
        self.doc = top.doc;

        while let Some(mut top) = self.queue.peek_mut() {
            if top.doc != self.doc {
                break;
            }
            for _ in 0..top.positions.freq() {
                self.positions.push(top.positions.next_position()?);
            }
            if top.positions.next()? {
                top.doc = top.positions.doc();
            } else {
                PeekMut::pop(top);
            }
        }
        self.positions.sort_unstable();
        Ok(true)
    }

    fn skip_to(&mut self, target: u32) -> Result<bool> {
        while let Some(mut top) = self.queue.peek_mut() {
            if top.doc >= target {
                break;
            }
            if top.positions.skip_to(target)? {
                top.doc = top.positions.doc();
            } else {
                PeekMut::pop(top);
            }
        }
        self.next()
    }
}

impl TermPositions for MultipleTermPositions {
    fn next_position(&mut self) -> Result<u32> {
        let position = self.positions.get(self.pointer).copied().ok_or_else(|| {
            FolioError::invalid_operation(format!("no more positions in document {}", self.doc))
        })?;
        self.pointer += 1;
        Ok(position)
    }
}
