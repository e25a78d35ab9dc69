//! Merging segments into one.
//!
//! [`SegmentMerger`] reads any number of [`IndexReader`]s and writes a single
//! new segment holding their live documents, renumbered densely in reader
//! order. Terms are combined with a k-way merge over the readers' term
//! enumerations; documents deleted in a source reader are dropped along with
//! their postings, stored fields and norms.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{FolioError, Result};
use crate::index::field_infos::FieldInfos;
use crate::index::postings::{TermEnum, TermPositions, write_posting};
use crate::index::reader::{FieldSelection, IndexReader};
use crate::index::stored_fields::StoredFieldsWriter;
use crate::index::term::{Term, TermInfo};
use crate::index::term_dictionary::TermInfosWriter;
use crate::index::{SEGMENT_EXTENSIONS, norms_file_name, segment_file_name};
use crate::storage::Storage;
use crate::storage::compound::CompoundFileWriter;
use crate::storage::structured::StructWriter;

/// Statistics about a merge operation.
#[derive(Debug, Clone, Default)]
pub struct MergeStats {
    /// Number of readers merged.
    pub segments_merged: usize,

    /// Live documents written to the new segment.
    pub docs_merged: u32,

    /// Deleted documents dropped by the merge.
    pub deleted_docs_removed: u32,

    /// Distinct terms written to the new dictionary.
    pub terms_merged: u64,

    /// (term, document) pairs written to the postings.
    pub postings_merged: u64,

    /// Whether the output was packed into a compound file.
    pub compound: bool,

    /// Time taken for the merge (milliseconds).
    pub merge_time_ms: u64,
}

/// One source's term enumeration inside a merge.
pub(crate) struct SegmentMergeInfo {
    /// Document number offset of the source.
    pub base: u32,
    /// Position of the source in the reader list.
    pub index: usize,
    /// Current term of `term_enum`.
    pub term: Term,
    pub term_enum: Box<dyn TermEnum>,
}

impl SegmentMergeInfo {
    /// Wrap an enumeration already positioned on a term. Exhausted
    /// enumerations yield `None`.
    pub fn new(base: u32, index: usize, term_enum: Box<dyn TermEnum>) -> Option<Self> {
        let term = term_enum.term()?;
        Some(SegmentMergeInfo {
            base,
            index,
            term,
            term_enum,
        })
    }

    /// Advance to the next term. Returns false when exhausted.
    pub fn next(&mut self) -> Result<bool> {
        if !self.term_enum.next()? {
            return Ok(false);
        }
        match self.term_enum.term() {
            Some(term) => {
                self.term = term;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl fmt::Debug for SegmentMergeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentMergeInfo")
            .field("base", &self.base)
            .field("index", &self.index)
            .field("term", &self.term)
            .finish()
    }
}

impl PartialEq for SegmentMergeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SegmentMergeInfo {}

impl PartialOrd for SegmentMergeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SegmentMergeInfo {
    // Reversed so the max-heap pops the smallest (term, base).
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .term
            .cmp(&self.term)
            .then_with(|| other.base.cmp(&self.base))
    }
}

/// Priority queue of sources ordered by current term, then by base.
#[derive(Debug, Default)]
pub(crate) struct MergeQueue {
    heap: BinaryHeap<SegmentMergeInfo>,
}

impl MergeQueue {
    pub fn new() -> Self {
        MergeQueue::default()
    }

    pub fn push(&mut self, info: SegmentMergeInfo) {
        self.heap.push(info);
    }

    pub fn pop(&mut self) -> Option<SegmentMergeInfo> {
        self.heap.pop()
    }

    pub fn top_term(&self) -> Option<&Term> {
        self.heap.peek().map(|info| &info.term)
    }

    /// Pop every source positioned on the smallest term, in base order.
    pub fn pop_matching(&mut self) -> Vec<SegmentMergeInfo> {
        let mut matching = Vec::new();
        let Some(first) = self.heap.pop() else {
            return matching;
        };
        while self.top_term() == Some(&first.term) {
            if let Some(info) = self.heap.pop() {
                matching.push(info);
            }
        }
        matching.insert(0, first);
        matching
    }

    /// Advance every source in `infos` and requeue those not exhausted.
    pub fn advance_all(&mut self, infos: Vec<SegmentMergeInfo>) -> Result<()> {
        for mut info in infos {
            if info.next()? {
                self.heap.push(info);
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Merges readers into a new segment named `segment` in `storage`.
#[derive(Debug)]
pub struct SegmentMerger<'a> {
    storage: Arc<dyn Storage>,
    segment: String,
    use_compound_file: bool,
    readers: Vec<&'a dyn IndexReader>,
    field_infos: Arc<FieldInfos>,
}

impl<'a> SegmentMerger<'a> {
    pub fn new(storage: Arc<dyn Storage>, segment: impl Into<String>, use_compound_file: bool) -> Self {
        SegmentMerger {
            storage,
            segment: segment.into(),
            use_compound_file,
            readers: Vec::new(),
            field_infos: Arc::new(FieldInfos::new()),
        }
    }

    /// Append a source. Documents keep the order of their readers.
    pub fn add(&mut self, reader: &'a dyn IndexReader) {
        self.readers.push(reader);
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// Write the merged segment and return what was merged.
    /// `stats.docs_merged` is the new segment's document count.
    pub fn merge(&mut self) -> Result<MergeStats> {
        let start = Instant::now();
        let mut stats = MergeStats {
            segments_merged: self.readers.len(),
            ..MergeStats::default()
        };

        stats.docs_merged = self.merge_fields()?;
        stats.deleted_docs_removed = self
            .readers
            .iter()
            .map(|reader| reader.max_doc() - reader.num_docs())
            .sum();
        self.merge_terms(&mut stats)?;
        self.merge_norms()?;

        if self.use_compound_file {
            self.create_compound_file()?;
            stats.compound = true;
        }

        stats.merge_time_ms = start.elapsed().as_millis() as u64;
        debug!(
            segment = %self.segment,
            sources = stats.segments_merged,
            docs = stats.docs_merged,
            terms = stats.terms_merged,
            compound = stats.compound,
            "merged segments"
        );
        Ok(stats)
    }

    /// Files making up the merged segment, before compound packing.
    pub fn segment_files(&self) -> Vec<String> {
        let mut files: Vec<String> = SEGMENT_EXTENSIONS
            .iter()
            .map(|extension| segment_file_name(&self.segment, extension))
            .collect();
        files.extend(
            self.field_infos
                .indexed()
                .map(|info| norms_file_name(&self.segment, info.number)),
        );
        files
    }

    /// Files the merge leaves in the storage.
    pub fn output_files(&self) -> Vec<String> {
        if self.use_compound_file {
            vec![segment_file_name(&self.segment, "cfs")]
        } else {
            self.segment_files()
        }
    }

    /// Remove whatever a failed merge left behind.
    pub fn abort(&self) {
        let mut files = self.segment_files();
        files.push(segment_file_name(&self.segment, "cfs"));
        for file in files {
            if self.storage.file_exists(&file) {
                if let Err(e) = self.storage.delete_file(&file) {
                    warn!(file, error = %e, "failed to remove partial merge output");
                }
            }
        }
    }

    fn merge_fields(&mut self) -> Result<u32> {
        let mut field_infos = FieldInfos::new();
        for reader in &self.readers {
            field_infos.add_names(reader.field_names(FieldSelection::Indexed), true);
            field_infos.add_names(reader.field_names(FieldSelection::Unindexed), false);
        }
        field_infos.write(self.storage.as_ref(), &segment_file_name(&self.segment, "fnm"))?;
        self.field_infos = Arc::new(field_infos);

        let mut fields_writer = StoredFieldsWriter::new(self.storage.as_ref(), &self.segment)?;
        for reader in &self.readers {
            for n in 0..reader.max_doc() {
                if !reader.is_deleted(n) {
                    fields_writer.add_document(&reader.document(n)?, &self.field_infos)?;
                }
            }
        }
        let doc_count = fields_writer.doc_count();
        fields_writer.close()?;
        Ok(doc_count)
    }

    fn merge_terms(&self, stats: &mut MergeStats) -> Result<()> {
        let mut freq_out = StructWriter::new(
            self.storage
                .create_output(&segment_file_name(&self.segment, "frq"))?,
        );
        let mut prox_out = StructWriter::new(
            self.storage
                .create_output(&segment_file_name(&self.segment, "prx"))?,
        );
        let mut term_infos = TermInfosWriter::new(
            self.storage.as_ref(),
            &self.segment,
            Arc::clone(&self.field_infos),
        )?;

        let mut queue = MergeQueue::new();
        let mut sources = Vec::with_capacity(self.readers.len());
        let mut base = 0;
        for (index, reader) in self.readers.iter().enumerate() {
            let mut term_enum = reader.terms()?;
            let positioned = term_enum.next()?;
            if positioned {
                if let Some(info) = SegmentMergeInfo::new(base, index, term_enum) {
                    queue.push(info);
                }
            }
            sources.push(MergeSource {
                base,
                doc_map: doc_map(*reader),
                postings: reader.term_positions()?,
            });
            base += reader.num_docs();
        }

        let mut positions = Vec::new();
        while !queue.is_empty() {
            let matching = queue.pop_matching();
            let term = matching[0].term.clone();

            let freq_pointer = freq_out.position();
            let prox_pointer = prox_out.position();
            let mut doc_freq = 0;
            let mut last_doc = 0;

            for info in &matching {
                let source = &mut sources[info.index];
                source.postings.seek_enum(info.term_enum.as_ref())?;
                while source.postings.next()? {
                    let local = source.postings.doc();
                    let mapped = match &source.doc_map {
                        Some(map) => map.get(local as usize).copied().flatten().ok_or_else(|| {
                            FolioError::corrupt(format!("postings reference deleted document {local}"))
                        })?,
                        None => local,
                    };
                    let doc = source.base + mapped;
                    if doc_freq > 0 && doc <= last_doc {
                        return Err(FolioError::corrupt(format!(
                            "docs out of order ({doc} <= {last_doc}) for term {term}"
                        )));
                    }

                    positions.clear();
                    for _ in 0..source.postings.freq() {
                        positions.push(source.postings.next_position()?);
                    }
                    write_posting(&mut freq_out, &mut prox_out, doc - last_doc, &positions)?;
                    last_doc = doc;
                    doc_freq += 1;
                }
            }

            if doc_freq > 0 {
                term_infos.add(&term, &TermInfo::new(doc_freq, freq_pointer, prox_pointer))?;
                stats.terms_merged += 1;
                stats.postings_merged += doc_freq as u64;
            }
            queue.advance_all(matching)?;
        }

        freq_out.close()?;
        prox_out.close()?;
        term_infos.close()
    }

    fn merge_norms(&self) -> Result<()> {
        for info in self.field_infos.indexed() {
            let mut out = StructWriter::new(
                self.storage
                    .create_output(&norms_file_name(&self.segment, info.number))?,
            );
            for reader in &self.readers {
                let norms = reader.norms(&info.name)?;
                let mut bytes = Vec::with_capacity(reader.num_docs() as usize);
                for n in 0..reader.max_doc() {
                    if !reader.is_deleted(n) {
                        bytes.push(norms.as_ref().map_or(0, |norms| norms[n as usize]));
                    }
                }
                out.write_raw(&bytes)?;
            }
            out.close()?;
        }
        Ok(())
    }

    fn create_compound_file(&self) -> Result<()> {
        let files = self.segment_files();
        let mut writer = CompoundFileWriter::new(
            Arc::clone(&self.storage),
            segment_file_name(&self.segment, "cfs"),
        );
        for file in &files {
            writer.add_file(file.as_str())?;
        }
        writer.close()?;

        for file in &files {
            self.storage.delete_file(file)?;
        }
        Ok(())
    }
}

struct MergeSource {
    base: u32,
    /// Old document number to new, when the source has deletions.
    doc_map: Option<Vec<Option<u32>>>,
    postings: Box<dyn TermPositions>,
}

fn doc_map(reader: &dyn IndexReader) -> Option<Vec<Option<u32>>> {
    if !reader.has_deletions() {
        return None;
    }
    let mut next = 0;
    let map = (0..reader.max_doc())
        .map(|n| {
            if reader.is_deleted(n) {
                None
            } else {
                next += 1;
                Some(next - 1)
            }
        })
        .collect();
    Some(map)
}
