//! The two-level term dictionary.
//!
//! `.tis` holds every term of a segment in term order together with its
//! [`TermInfo`]. `.tii` holds every [`INDEX_INTERVAL`]-th entry of `.tis`
//! plus the `.tis` offset just past that entry, and is small enough to be
//! loaded into memory whole. A lookup binary-searches `.tii` for the
//! greatest indexed term not after the target, seeks `.tis` there and scans
//! at most one block.
//!
//! Both files share a layout:
//!
//! ```text
//! u64    entry count (patched on close)
//! u32    index interval
//! entry* (vint shared prefix bytes, bytes suffix, vint field number,
//!         vint doc freq, vlong freq pointer delta, vlong prox pointer delta
//!         [, vlong tis pointer delta  (.tii only)])
//! ```
//!
//! The first `.tii` entry is a sentinel: the empty term with zeroed
//! pointers, positioned before the first `.tis` entry.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{FolioError, Result};
use crate::index::field_infos::FieldInfos;
use crate::index::postings::TermEnum;
use crate::index::segment_file_name;
use crate::index::term::{Term, TermBuffer, TermInfo, shared_prefix_len};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageInput, StorageOutput};

/// Every this many `.tis` entries, one is copied into `.tii`.
pub const INDEX_INTERVAL: u64 = 128;

/// One output stream of entries, either `.tis` or `.tii`.
#[derive(Debug)]
struct EntryStream {
    output: StructWriter<Box<dyn StorageOutput>>,
    last_text: String,
    last_info: TermInfo,
    size: u64,
}

impl EntryStream {
    fn create(storage: &dyn Storage, name: &str) -> Result<Self> {
        let mut output = StructWriter::new(storage.create_output(name)?);
        output.write_u64(0)?;
        output.write_u32(INDEX_INTERVAL as u32)?;
        Ok(EntryStream {
            output,
            last_text: String::new(),
            last_info: TermInfo::default(),
            size: 0,
        })
    }

    fn write_entry(&mut self, field_number: u32, term: &Term, info: &TermInfo) -> Result<()> {
        let prefix = shared_prefix_len(&self.last_text, term.text());
        self.output.write_vint(prefix as u32)?;
        self.output.write_bytes(&term.text().as_bytes()[prefix..])?;
        self.output.write_vint(field_number)?;
        self.output.write_vint(info.doc_freq)?;
        self.output
            .write_vlong(info.freq_pointer - self.last_info.freq_pointer)?;
        self.output
            .write_vlong(info.prox_pointer - self.last_info.prox_pointer)?;

        self.last_text.clear();
        self.last_text.push_str(term.text());
        self.last_info = *info;
        self.size += 1;
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        let end = self.output.position();
        self.output.seek(0)?;
        self.output.write_u64(self.size)?;
        self.output.seek(end)?;
        self.output.close()
    }
}

/// Writes a segment's `.tis` and `.tii` files.
///
/// Terms must be added in strictly increasing order and their pointers
/// must never decrease. Either violation is reported as
/// [`FolioError::CorruptIndex`] and leaves the writer unusable.
#[derive(Debug)]
pub struct TermInfosWriter {
    field_infos: Arc<FieldInfos>,
    tis: EntryStream,
    tii: EntryStream,
    last_term: Term,
    last_field_number: u32,
    last_info: TermInfo,
    last_index_pointer: u64,
}

impl TermInfosWriter {
    pub fn new(storage: &dyn Storage, segment: &str, field_infos: Arc<FieldInfos>) -> Result<Self> {
        Ok(TermInfosWriter {
            field_infos,
            tis: EntryStream::create(storage, &segment_file_name(segment, "tis"))?,
            tii: EntryStream::create(storage, &segment_file_name(segment, "tii"))?,
            last_term: Term::new("", ""),
            last_field_number: 0,
            last_info: TermInfo::default(),
            last_index_pointer: 0,
        })
    }

    /// Append `term` with its postings location.
    pub fn add(&mut self, term: &Term, info: &TermInfo) -> Result<()> {
        if self.tis.size > 0 && term <= &self.last_term {
            return Err(FolioError::corrupt(format!(
                "term out of order: {term} after {}",
                self.last_term
            )));
        }
        if info.freq_pointer < self.last_info.freq_pointer {
            return Err(FolioError::corrupt(format!(
                "freq pointer out of order for {term}: {} < {}",
                info.freq_pointer, self.last_info.freq_pointer
            )));
        }
        if info.prox_pointer < self.last_info.prox_pointer {
            return Err(FolioError::corrupt(format!(
                "prox pointer out of order for {term}: {} < {}",
                info.prox_pointer, self.last_info.prox_pointer
            )));
        }
        let field_number = self.field_infos.field_number(term.field()).ok_or_else(|| {
            FolioError::field(format!("field {} is not registered", term.field()))
        })?;

        if self.tis.size % INDEX_INTERVAL == 0 {
            let pointer = self.tis.output.position();
            self.tii
                .write_entry(self.last_field_number, &self.last_term, &self.last_info)?;
            self.tii
                .output
                .write_vlong(pointer - self.last_index_pointer)?;
            self.last_index_pointer = pointer;
        }

        self.tis.write_entry(field_number, term, info)?;
        self.last_term = term.clone();
        self.last_field_number = field_number;
        self.last_info = *info;
        Ok(())
    }

    /// Number of terms added so far.
    pub fn size(&self) -> u64 {
        self.tis.size
    }

    pub fn close(self) -> Result<()> {
        self.tis.close()?;
        self.tii.close()
    }
}

/// A cursor over the entries of `.tis` or `.tii`.
///
/// Cloning yields an independent cursor at the same entry.
#[derive(Debug, Clone)]
pub struct SegmentTermEnum {
    input: StructReader<Box<dyn StorageInput>>,
    field_infos: Arc<FieldInfos>,
    size: u64,
    index_interval: u64,
    /// Ordinal of the current entry; -1 before the first.
    position: i64,
    term: TermBuffer,
    prev: TermBuffer,
    term_info: TermInfo,
    is_index: bool,
    index_pointer: u64,
    scratch: Vec<u8>,
}

impl SegmentTermEnum {
    fn open(input: Box<dyn StorageInput>, field_infos: Arc<FieldInfos>, is_index: bool) -> Result<Self> {
        let mut input = StructReader::new(input);
        let size = input.read_u64()?;
        let index_interval = input.read_u32()? as u64;
        if index_interval == 0 {
            return Err(FolioError::corrupt("term dictionary index interval is zero"));
        }
        Ok(SegmentTermEnum {
            input,
            field_infos,
            size,
            index_interval,
            position: -1,
            term: TermBuffer::new(),
            prev: TermBuffer::new(),
            term_info: TermInfo::default(),
            is_index,
            index_pointer: 0,
            scratch: Vec::new(),
        })
    }

    /// Reposition at a `.tii` entry: `term` sits at ordinal `position` and
    /// the `.tis` entry after it starts at `pointer`.
    fn seek(&mut self, pointer: u64, position: i64, term: &Term, info: TermInfo) -> Result<()> {
        self.input.seek(pointer)?;
        self.position = position;
        self.term.set_term(term);
        self.prev.reset();
        self.term_info = info;
        Ok(())
    }

    fn advance(&mut self) -> Result<bool> {
        if self.position + 1 >= self.size as i64 {
            self.position = self.size as i64;
            self.term.reset();
            return Ok(false);
        }

        self.prev.copy_from(&self.term);

        let prefix = self.input.read_vint()? as usize;
        let suffix_len = self.input.read_vint()? as usize;
        self.scratch.resize(suffix_len, 0);
        self.input.read_into(&mut self.scratch)?;
        if std::str::from_utf8(&self.scratch).is_err() {
            return Err(FolioError::corrupt(format!(
                "term suffix at entry {} is not UTF-8",
                self.position + 1
            )));
        }
        let number = self.input.read_vint()?;
        let field = self
            .field_infos
            .field_name(number)
            .cloned()
            .ok_or_else(|| FolioError::corrupt(format!("term field number {number} is not registered")))?;
        self.term.splice(field, prefix, &self.scratch)?;

        self.term_info.doc_freq = self.input.read_vint()?;
        self.term_info.freq_pointer += self.input.read_vlong()?;
        self.term_info.prox_pointer += self.input.read_vlong()?;
        if self.is_index {
            self.index_pointer += self.input.read_vlong()?;
        }

        self.position += 1;
        Ok(true)
    }

    /// Advance to the first real entry whose term is not before `target`.
    fn scan_to(&mut self, target: &Term) -> Result<()> {
        while (self.position < 0 || self.term.compare_to(target) == Ordering::Less)
            && self.advance()?
        {}
        Ok(())
    }

    /// Ordinal of the current entry, or -1 before the first.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Total number of entries.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Metadata of the current term.
    pub fn term_info(&self) -> Option<TermInfo> {
        self.term.is_set().then_some(self.term_info)
    }

    /// The term before the current one, if any was read in sequence.
    pub fn prev(&self) -> Option<Term> {
        self.prev.to_term().ok().flatten()
    }

    fn index_pointer(&self) -> u64 {
        self.index_pointer
    }
}

impl TermEnum for SegmentTermEnum {
    fn next(&mut self) -> Result<bool> {
        self.advance()
    }

    fn term(&self) -> Option<Term> {
        self.term.to_term().ok().flatten()
    }

    fn doc_freq(&self) -> u32 {
        if self.term.is_set() {
            self.term_info.doc_freq
        } else {
            0
        }
    }

    fn local_term_info(&self, field_infos: &Arc<FieldInfos>) -> Option<TermInfo> {
        if Arc::ptr_eq(&self.field_infos, field_infos) {
            self.term_info()
        } else {
            None
        }
    }
}

/// Random access into a segment's term dictionary.
///
/// The `.tii` entries are held in memory. A shared cursor over `.tis`
/// remembers where the last lookup ended so that lookups in increasing term
/// order only scan forward.
#[derive(Debug)]
pub struct TermInfosReader {
    segment: String,
    size: u64,
    origin: SegmentTermEnum,
    index_terms: Vec<Term>,
    index_infos: Vec<TermInfo>,
    index_pointers: Vec<u64>,
    cursor: Mutex<SegmentTermEnum>,
}

impl TermInfosReader {
    pub fn open(storage: &dyn Storage, segment: &str, field_infos: Arc<FieldInfos>) -> Result<Self> {
        let origin = SegmentTermEnum::open(
            storage.open_input(&segment_file_name(segment, "tis"))?,
            Arc::clone(&field_infos),
            false,
        )?;

        let mut index = SegmentTermEnum::open(
            storage.open_input(&segment_file_name(segment, "tii"))?,
            field_infos,
            true,
        )?;
        if index.index_interval != origin.index_interval {
            return Err(FolioError::corrupt(format!(
                "{segment}: index interval mismatch between .tis ({}) and .tii ({})",
                origin.index_interval, index.index_interval
            )));
        }

        let count = index.size() as usize;
        let mut index_terms = Vec::with_capacity(count);
        let mut index_infos = Vec::with_capacity(count);
        let mut index_pointers = Vec::with_capacity(count);
        while index.advance()? {
            let term = index.term().ok_or_else(|| FolioError::corrupt("unset index term"))?;
            index_terms.push(term);
            index_infos.push(index.term_info);
            index_pointers.push(index.index_pointer());
        }

        debug!(segment, terms = origin.size(), index_terms = index_terms.len(), "opened term dictionary");

        Ok(TermInfosReader {
            segment: segment.to_string(),
            size: origin.size(),
            cursor: Mutex::new(origin.clone()),
            origin,
            index_terms,
            index_infos,
            index_pointers,
        })
    }

    /// Number of terms in the segment.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Index of the greatest `.tii` term not after `term`.
    fn index_offset(&self, term: &Term) -> usize {
        self.index_terms
            .partition_point(|indexed| indexed <= term)
            .saturating_sub(1)
    }

    fn seek_index(&self, cursor: &mut SegmentTermEnum, offset: usize) -> Result<()> {
        let position = offset as i64 * cursor.index_interval as i64 - 1;
        cursor.seek(
            self.index_pointers[offset],
            position,
            &self.index_terms[offset],
            self.index_infos[offset],
        )
    }

    fn scan_for(cursor: &mut SegmentTermEnum, term: &Term) -> Result<Option<TermInfo>> {
        cursor.scan_to(term)?;
        if cursor.term.is_set() && cursor.term.compare_to(term) == Ordering::Equal {
            Ok(Some(cursor.term_info))
        } else {
            Ok(None)
        }
    }

    /// Look up the metadata of `term`.
    pub fn get(&self, term: &Term) -> Result<Option<TermInfo>> {
        if self.size == 0 {
            return Ok(None);
        }

        let mut cursor = self.cursor.lock();

        // Sequential access: the target is inside the cursor's current block
        // and not behind the cursor.
        if cursor.term.is_set() {
            let not_behind = cursor.term.compare_to(term) != Ordering::Greater
                || (cursor.prev.is_set() && cursor.prev.compare_to(term) == Ordering::Less);
            if not_behind {
                let next_block = (cursor.position.max(0) as u64 / cursor.index_interval) as usize + 1;
                if next_block >= self.index_terms.len() || term < &self.index_terms[next_block] {
                    return Self::scan_for(&mut cursor, term);
                }
            }
        }

        self.seek_index(&mut cursor, self.index_offset(term))?;
        Self::scan_for(&mut cursor, term)
    }

    /// The term at ordinal `position`.
    pub fn get_by_position(&self, position: u64) -> Result<Option<Term>> {
        if position >= self.size {
            return Ok(None);
        }

        let mut cursor = self.cursor.lock();
        let target = position as i64;
        let in_block = cursor.term.is_set()
            && target >= cursor.position
            && target < cursor.position + cursor.index_interval as i64;
        if !in_block {
            let offset = ((position + 1) / cursor.index_interval) as usize;
            self.seek_index(&mut cursor, offset.min(self.index_terms.len() - 1))?;
        }

        while cursor.position < target && cursor.advance()? {}
        Ok(cursor.term())
    }

    /// Ordinal of `term`, if present.
    pub fn position_of(&self, term: &Term) -> Result<Option<u64>> {
        if self.size == 0 {
            return Ok(None);
        }

        let mut cursor = self.cursor.lock();
        self.seek_index(&mut cursor, self.index_offset(term))?;
        match Self::scan_for(&mut cursor, term)? {
            Some(_) => Ok(Some(cursor.position as u64)),
            None => Ok(None),
        }
    }

    /// A fresh cursor before the first term.
    pub fn terms(&self) -> SegmentTermEnum {
        self.origin.clone()
    }

    /// A fresh cursor already positioned at the first term not before
    /// `term`. Its `term()` is valid without calling `next()`.
    pub fn terms_from(&self, term: &Term) -> Result<SegmentTermEnum> {
        let mut cursor = self.origin.clone();
        if self.size > 0 {
            self.seek_index(&mut cursor, self.index_offset(term))?;
            cursor.scan_to(term)?;
        }
        Ok(cursor)
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn field_infos() -> Arc<FieldInfos> {
        let mut infos = FieldInfos::new();
        infos.add("body", true);
        infos.add("title", true);
        Arc::new(infos)
    }

    fn sample_terms(count: usize) -> Vec<(Term, TermInfo)> {
        let mut terms: Vec<Term> = (0..count)
            .map(|i| {
                let field = if i % 3 == 0 { "title" } else { "body" };
                Term::new(field, format!("term{i:05}"))
            })
            .collect();
        terms.sort();
        terms
            .into_iter()
            .enumerate()
            .map(|(i, term)| {
                let info = TermInfo::new(i as u32 % 7 + 1, i as u64 * 10, i as u64 * 20);
                (term, info)
            })
            .collect()
    }

    fn write_dictionary(storage: &MemoryStorage, entries: &[(Term, TermInfo)]) -> TermInfosReader {
        let infos = field_infos();
        let mut writer = TermInfosWriter::new(storage, "_0", Arc::clone(&infos)).unwrap();
        for (term, info) in entries {
            writer.add(term, info).unwrap();
        }
        assert_eq!(writer.size(), entries.len() as u64);
        writer.close().unwrap();
        TermInfosReader::open(storage, "_0", infos).unwrap()
    }

    #[test]
    fn test_lookup_every_term() {
        let storage = MemoryStorage::new_default();
        let entries = sample_terms(1000);
        let reader = write_dictionary(&storage, &entries);
        assert_eq!(reader.size(), 1000);

        for (term, info) in &entries {
            assert_eq!(reader.get(term).unwrap(), Some(*info), "{term}");
        }
        // Backwards to defeat the sequential path.
        for (position, (term, info)) in entries.iter().enumerate().rev() {
            assert_eq!(reader.get(term).unwrap(), Some(*info), "{term}");
            assert_eq!(reader.position_of(term).unwrap(), Some(position as u64));
        }

        assert_eq!(reader.get(&Term::new("body", "missing")).unwrap(), None);
        assert_eq!(reader.get(&Term::new("zzz", "term00001")).unwrap(), None);
        assert_eq!(reader.get(&Term::new("", "")).unwrap(), None);
    }

    #[test]
    fn test_get_by_position() {
        let storage = MemoryStorage::new_default();
        let entries = sample_terms(300);
        let reader = write_dictionary(&storage, &entries);

        for position in [0u64, 1, 126, 127, 128, 129, 255, 256, 299, 5, 200] {
            let expected = &entries[position as usize].0;
            assert_eq!(reader.get_by_position(position).unwrap().as_ref(), Some(expected));
        }
        assert_eq!(reader.get_by_position(300).unwrap(), None);
    }

    #[test]
    fn test_single_term_dictionary() {
        let storage = MemoryStorage::new_default();
        let entries = vec![(Term::new("body", "only"), TermInfo::new(1, 0, 0))];
        let reader = write_dictionary(&storage, &entries);

        assert_eq!(reader.get(&entries[0].0).unwrap(), Some(entries[0].1));
        assert_eq!(reader.get_by_position(0).unwrap(), Some(entries[0].0.clone()));
        assert_eq!(reader.get(&Term::new("body", "other")).unwrap(), None);

        let mut terms = reader.terms();
        assert!(terms.next().unwrap());
        assert_eq!(terms.term(), Some(Term::new("body", "only")));
        assert!(!terms.next().unwrap());
        assert_eq!(terms.term(), None);
    }

    #[test]
    fn test_empty_dictionary() {
        let storage = MemoryStorage::new_default();
        let reader = write_dictionary(&storage, &[]);
        assert_eq!(reader.size(), 0);
        assert_eq!(reader.get(&Term::new("body", "a")).unwrap(), None);
        assert!(!reader.terms().next().unwrap());
        assert_eq!(reader.terms_from(&Term::new("body", "a")).unwrap().term(), None);
    }

    #[test]
    fn test_terms_are_strictly_increasing() {
        let storage = MemoryStorage::new_default();
        let entries = sample_terms(400);
        let reader = write_dictionary(&storage, &entries);

        let mut terms = reader.terms();
        let mut previous: Option<Term> = None;
        let mut count = 0;
        while terms.next().unwrap() {
            let term = terms.term().unwrap();
            if let Some(previous) = &previous {
                assert!(previous < &term);
            }
            assert_eq!(terms.doc_freq(), entries[count].1.doc_freq);
            previous = Some(term);
            count += 1;
        }
        assert_eq!(count, 400);
    }

    #[test]
    fn test_terms_from() {
        let storage = MemoryStorage::new_default();
        let entries = sample_terms(300);
        let reader = write_dictionary(&storage, &entries);

        let exact = reader.terms_from(&entries[150].0).unwrap();
        assert_eq!(exact.term().as_ref(), Some(&entries[150].0));
        assert_eq!(exact.position(), 150);

        let between = reader
            .terms_from(&Term::new(entries[10].0.field(), format!("{}a", entries[10].0.text())))
            .unwrap();
        assert_eq!(between.term().as_ref(), Some(&entries[11].0));

        let past = reader.terms_from(&Term::new("zzz", "")).unwrap();
        assert_eq!(past.term(), None);
    }

    #[test]
    fn test_cloned_cursor_is_independent() {
        let storage = MemoryStorage::new_default();
        let entries = sample_terms(10);
        let reader = write_dictionary(&storage, &entries);

        let mut first = reader.terms();
        first.next().unwrap();
        let mut second = first.clone();
        second.next().unwrap();
        second.next().unwrap();

        assert_eq!(first.term().as_ref(), Some(&entries[0].0));
        assert_eq!(second.term().as_ref(), Some(&entries[2].0));
        assert_eq!(second.prev().as_ref(), Some(&entries[1].0));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let storage = MemoryStorage::new_default();
        let mut writer = TermInfosWriter::new(&storage, "_1", field_infos()).unwrap();
        writer.add(&Term::new("body", "b"), &TermInfo::new(1, 10, 10)).unwrap();

        let err = writer.add(&Term::new("body", "a"), &TermInfo::new(1, 20, 20)).unwrap_err();
        assert!(matches!(err, FolioError::CorruptIndex(_)));
        let err = writer.add(&Term::new("body", "b"), &TermInfo::new(1, 20, 20)).unwrap_err();
        assert!(matches!(err, FolioError::CorruptIndex(_)));
        let err = writer.add(&Term::new("body", "c"), &TermInfo::new(1, 5, 20)).unwrap_err();
        assert!(matches!(err, FolioError::CorruptIndex(_)));
        let err = writer.add(&Term::new("nope", "c"), &TermInfo::new(1, 20, 20)).unwrap_err();
        assert!(matches!(err, FolioError::Field(_)));
    }

    #[test]
    fn test_prefix_compression_with_multibyte_text() {
        let storage = MemoryStorage::new_default();
        let entries = vec![
            (Term::new("body", "héllo"), TermInfo::new(1, 0, 0)),
            (Term::new("body", "hélp"), TermInfo::new(2, 3, 4)),
            (Term::new("title", "hélp"), TermInfo::new(1, 9, 9)),
        ];
        let reader = write_dictionary(&storage, &entries);
        for (term, info) in &entries {
            assert_eq!(reader.get(term).unwrap(), Some(*info));
        }
    }
}
