//! Cursors over terms, documents and positions.
//!
//! `.frq` holds, per term, one entry per document in increasing document
//! order:
//!
//! ```text
//! vint doc code     (doc delta << 1) | (freq == 1)
//! [vint freq]       only when freq != 1
//! ```
//!
//! `.prx` holds, per term and document, `freq` position deltas. The first
//! delta of each document is the absolute position.
//!
//! The traits here are implemented both by the single-segment cursors in
//! this module and by the multi-segment cursors in
//! [`multi_reader`](crate::index::multi_reader).

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{FolioError, Result};
use crate::index::deletion::DeletionBitmap;
use crate::index::field_infos::FieldInfos;
use crate::index::term::{Term, TermInfo};
use crate::index::term_dictionary::TermInfosReader;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{StorageInput, StorageOutput};

/// Enumerates terms in term order.
pub trait TermEnum: Send + Debug {
    /// Advance to the next term. Returns `false` when exhausted.
    fn next(&mut self) -> Result<bool>;

    /// The current term, or `None` before the first call to `next` on a
    /// fresh cursor and after exhaustion.
    fn term(&self) -> Option<Term>;

    /// Number of documents containing the current term.
    fn doc_freq(&self) -> u32;

    /// The raw dictionary entry of the current term, when this cursor reads
    /// the dictionary of the segment described by `field_infos`.
    fn local_term_info(&self, _field_infos: &Arc<FieldInfos>) -> Option<TermInfo> {
        None
    }
}

/// Enumerates the documents containing a term, with their frequencies.
pub trait TermDocs: Send + Debug {
    /// Position at the first document of `term`. A missing term yields an
    /// empty enumeration.
    fn seek(&mut self, term: &Term) -> Result<()>;

    /// Position at the term a [`TermEnum`] currently points to.
    fn seek_enum(&mut self, term_enum: &dyn TermEnum) -> Result<()> {
        match term_enum.term() {
            Some(term) => self.seek(&term),
            None => Err(FolioError::invalid_operation(
                "term enumeration has no current term",
            )),
        }
    }

    /// Current document number.
    fn doc(&self) -> u32;

    /// Occurrences of the term in the current document.
    fn freq(&self) -> u32;

    /// Advance to the next live document. Returns `false` when exhausted.
    fn next(&mut self) -> Result<bool>;

    /// Fill `docs` and `freqs` with the next documents, returning how many
    /// were read. Zero means exhausted.
    fn read(&mut self, docs: &mut [u32], freqs: &mut [u32]) -> Result<usize> {
        let limit = docs.len().min(freqs.len());
        let mut count = 0;
        while count < limit && self.next()? {
            docs[count] = self.doc();
            freqs[count] = self.freq();
            count += 1;
        }
        Ok(count)
    }

    /// Advance to the first document not before `target`.
    fn skip_to(&mut self, target: u32) -> Result<bool> {
        loop {
            if !self.next()? {
                return Ok(false);
            }
            if self.doc() >= target {
                return Ok(true);
            }
        }
    }
}

/// A [`TermDocs`] that also yields each occurrence's position.
pub trait TermPositions: TermDocs {
    /// The next position of the term in the current document. May be called
    /// at most [`freq`](TermDocs::freq) times per document.
    fn next_position(&mut self) -> Result<u32>;
}

/// Document cursor over one segment's `.frq` stream.
#[derive(Debug, Clone)]
pub struct SegmentTermDocs {
    term_infos: Arc<TermInfosReader>,
    field_infos: Arc<FieldInfos>,
    freq_stream: StructReader<Box<dyn StorageInput>>,
    deleted_docs: Option<Arc<DeletionBitmap>>,
    count: u32,
    doc_freq: u32,
    doc: u32,
    freq: u32,
}

impl SegmentTermDocs {
    pub fn new(
        term_infos: Arc<TermInfosReader>,
        field_infos: Arc<FieldInfos>,
        freq_stream: Box<dyn StorageInput>,
        deleted_docs: Option<Arc<DeletionBitmap>>,
    ) -> Self {
        SegmentTermDocs {
            term_infos,
            field_infos,
            freq_stream: StructReader::new(freq_stream),
            deleted_docs,
            count: 0,
            doc_freq: 0,
            doc: 0,
            freq: 0,
        }
    }

    /// Position at a dictionary entry, or at nothing.
    pub fn seek_info(&mut self, info: Option<TermInfo>) -> Result<()> {
        self.count = 0;
        self.doc = 0;
        self.freq = 0;
        match info {
            Some(info) => {
                self.doc_freq = info.doc_freq;
                self.freq_stream.seek(info.freq_pointer)?;
            }
            None => self.doc_freq = 0,
        }
        Ok(())
    }

    fn lookup(&self, term_enum: &dyn TermEnum) -> Result<Option<TermInfo>> {
        if let Some(info) = term_enum.local_term_info(&self.field_infos) {
            return Ok(Some(info));
        }
        match term_enum.term() {
            Some(term) => self.term_infos.get(&term),
            None => Ok(None),
        }
    }

    fn is_deleted(&self, doc: u32) -> bool {
        self.deleted_docs
            .as_ref()
            .is_some_and(|deleted| deleted.is_deleted(doc))
    }

    /// Decode postings until a live document is found. `on_skip` receives
    /// the frequency of every deleted document passed over.
    fn advance(&mut self, mut on_skip: impl FnMut(u32) -> Result<()>) -> Result<bool> {
        loop {
            if self.count == self.doc_freq {
                return Ok(false);
            }

            let code = self.freq_stream.read_vint()?;
            self.doc = self.doc.checked_add(code >> 1).ok_or_else(|| {
                FolioError::corrupt(format!(
                    "document number overflows after document {}",
                    self.doc
                ))
            })?;
            self.freq = if code & 1 != 0 {
                1
            } else {
                self.freq_stream.read_vint()?
            };
            self.count += 1;

            if !self.is_deleted(self.doc) {
                return Ok(true);
            }
            on_skip(self.freq)?;
        }
    }
}

impl TermDocs for SegmentTermDocs {
    fn seek(&mut self, term: &Term) -> Result<()> {
        let info = self.term_infos.get(term)?;
        self.seek_info(info)
    }

    fn seek_enum(&mut self, term_enum: &dyn TermEnum) -> Result<()> {
        let info = self.lookup(term_enum)?;
        self.seek_info(info)
    }

    fn doc(&self) -> u32 {
        self.doc
    }

    fn freq(&self) -> u32 {
        self.freq
    }

    fn next(&mut self) -> Result<bool> {
        self.advance(|_| Ok(()))
    }
}

/// Document and position cursor over one segment's `.frq` and `.prx`.
#[derive(Debug, Clone)]
pub struct SegmentTermPositions {
    docs: SegmentTermDocs,
    prox_stream: StructReader<Box<dyn StorageInput>>,
    /// Positions of the current document not yet consumed.
    prox_count: u32,
    position: u32,
}

impl SegmentTermPositions {
    pub fn new(docs: SegmentTermDocs, prox_stream: Box<dyn StorageInput>) -> Self {
        SegmentTermPositions {
            docs,
            prox_stream: StructReader::new(prox_stream),
            prox_count: 0,
            position: 0,
        }
    }

    pub fn seek_info(&mut self, info: Option<TermInfo>) -> Result<()> {
        self.docs.seek_info(info)?;
        if let Some(info) = info {
            self.prox_stream.seek(info.prox_pointer)?;
        }
        self.prox_count = 0;
        self.position = 0;
        Ok(())
    }
}

fn skip_positions(prox: &mut StructReader<Box<dyn StorageInput>>, count: u32) -> Result<()> {
    for _ in 0..count {
        prox.read_vint()?;
    }
    Ok(())
}

impl TermDocs for SegmentTermPositions {
    fn seek(&mut self, term: &Term) -> Result<()> {
        let info = self.docs.term_infos.get(term)?;
        self.seek_info(info)
    }

    fn seek_enum(&mut self, term_enum: &dyn TermEnum) -> Result<()> {
        let info = self.docs.lookup(term_enum)?;
        self.seek_info(info)
    }

    fn doc(&self) -> u32 {
        self.docs.doc
    }

    fn freq(&self) -> u32 {
        self.docs.freq
    }

    fn next(&mut self) -> Result<bool> {
        skip_positions(&mut self.prox_stream, self.prox_count)?;
        self.prox_count = 0;

        let prox = &mut self.prox_stream;
        if self.docs.advance(|freq| skip_positions(prox, freq))? {
            self.prox_count = self.docs.freq;
            self.position = 0;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

impl TermPositions for SegmentTermPositions {
    fn next_position(&mut self) -> Result<u32> {
        if self.prox_count == 0 {
            return Err(FolioError::invalid_operation(format!(
                "no more positions in document {}",
                self.docs.doc
            )));
        }
        self.prox_count -= 1;
        let delta = self.prox_stream.read_vint()?;
        self.position = self.position.checked_add(delta).ok_or_else(|| {
            FolioError::corrupt(format!(
                "position overflows in document {}",
                self.docs.doc
            ))
        })?;
        Ok(self.position)
    }
}

/// Write one document's postings for a term.
pub(crate) fn write_posting<W: StorageOutput>(
    freq_out: &mut StructWriter<W>,
    prox_out: &mut StructWriter<W>,
    doc_delta: u32,
    positions: &[u32],
) -> Result<()> {
    let freq = positions.len() as u32;
    if freq == 1 {
        freq_out.write_vint((doc_delta << 1) | 1)?;
    } else {
        freq_out.write_vint(doc_delta << 1)?;
        freq_out.write_vint(freq)?;
    }

    let mut last = 0;
    for &position in positions {
        let delta = position.checked_sub(last).ok_or_else(|| {
            FolioError::corrupt(format!("positions out of order ({position} after {last})"))
        })?;
        prox_out.write_vint(delta)?;
        last = position;
    }
    Ok(())
}
