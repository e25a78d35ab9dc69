//! Inverts a single document into a brand-new one-document segment.
//!
//! The segment holds the field registry, the stored fields, a term
//! dictionary, postings for document 0 and one norm byte per indexed field.

use std::sync::Arc;

use ahash::AHashMap;
use tracing::debug;

use crate::analysis::analyzer::Analyzer;
use crate::document::{Document, FieldValue};
use crate::error::{FolioError, Result};
use crate::index::field_infos::FieldInfos;
use crate::index::norms::{Similarity, encode_norm};
use crate::index::postings::write_posting;
use crate::index::stored_fields::StoredFieldsWriter;
use crate::index::term::{Term, TermInfo};
use crate::index::term_dictionary::TermInfosWriter;
use crate::index::{norms_file_name, segment_file_name};
use crate::storage::Storage;
use crate::storage::structured::StructWriter;

/// A term of the document with every position it occurs at.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Posting {
    pub term: Term,
    pub positions: Vec<u32>,
}

/// Per-field accumulation state while inverting.
#[derive(Debug, Clone, Copy)]
struct FieldState {
    length: u32,
    position: u32,
    boost: f32,
}

/// Turns one document into one segment.
#[derive(Clone)]
pub struct DocumentWriter {
    analyzer: Arc<dyn Analyzer>,
    similarity: Arc<dyn Similarity>,
    max_field_length: u32,
}

impl std::fmt::Debug for DocumentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentWriter")
            .field("analyzer", &self.analyzer.name())
            .field("similarity", &self.similarity)
            .field("max_field_length", &self.max_field_length)
            .finish()
    }
}

impl DocumentWriter {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        similarity: Arc<dyn Similarity>,
        max_field_length: u32,
    ) -> Self {
        DocumentWriter {
            analyzer,
            similarity,
            max_field_length,
        }
    }

    /// Write `doc` as segment `segment` in `storage`.
    pub fn add_document(&self, storage: &dyn Storage, segment: &str, doc: &Document) -> Result<()> {
        for field in doc.fields() {
            if field.is_indexed() && field.name().is_empty() {
                return Err(FolioError::field("indexed fields must have a name"));
            }
            if field.is_indexed() && field.value().is_binary() {
                return Err(FolioError::field(format!(
                    "binary field {} cannot be indexed",
                    field.name()
                )));
            }
        }

        let mut field_infos = FieldInfos::new();
        field_infos.add_document(doc);
        let field_infos = Arc::new(field_infos);
        field_infos.write(storage, &segment_file_name(segment, "fnm"))?;

        let mut stored = StoredFieldsWriter::new(storage, segment)?;
        stored.add_document(doc, &field_infos)?;
        stored.close()?;

        let (postings, states) = self.invert(doc, &field_infos)?;
        let postings = sort_postings(postings);
        self.write_postings(storage, segment, &postings, &field_infos)?;
        self.write_norms(storage, segment, &states, &field_infos)?;

        debug!(segment, terms = postings.len(), fields = field_infos.len(), "inverted document");
        Ok(())
    }

    /// Build the posting table and the per-field lengths.
    fn invert(
        &self,
        doc: &Document,
        field_infos: &FieldInfos,
    ) -> Result<(Vec<Posting>, Vec<Option<FieldState>>)> {
        let mut table: AHashMap<Term, Vec<u32>> = AHashMap::new();
        let mut states: Vec<Option<FieldState>> = vec![None; field_infos.len()];

        for field in doc.fields().iter().filter(|f| f.is_indexed()) {
            let number = field_infos.field_number(field.name()).ok_or_else(|| {
                FolioError::field(format!("field {} is not registered", field.name()))
            })? as usize;
            let FieldValue::Text(text) = field.value() else {
                return Err(FolioError::field(format!(
                    "binary field {} cannot be indexed",
                    field.name()
                )));
            };

            let state = states[number].get_or_insert(FieldState {
                length: 0,
                position: 0,
                boost: doc.boost(),
            });

            if field.is_tokenized() {
                let tokens = self.analyzer.analyze_field(field.name(), text)?;
                for token in tokens {
                    state.position = (state.position + token.position_increment).saturating_sub(1);
                    table
                        .entry(Term::new(field.name(), token.text))
                        .or_default()
                        .push(state.position);
                    state.position += 1;
                    state.length += 1;
                    if state.position > self.max_field_length {
                        break;
                    }
                }
            } else {
                table
                    .entry(Term::new(field.name(), text.as_str()))
                    .or_default()
                    .push(state.position);
                state.position += 1;
                state.length += 1;
            }
            state.boost *= field.boost();
        }

        let postings = table
            .into_iter()
            .map(|(term, positions)| Posting { term, positions })
            .collect();
        Ok((postings, states))
    }

    fn write_postings(
        &self,
        storage: &dyn Storage,
        segment: &str,
        postings: &[Posting],
        field_infos: &Arc<FieldInfos>,
    ) -> Result<()> {
        let mut freq = StructWriter::new(storage.create_output(&segment_file_name(segment, "frq"))?);
        let mut prox = StructWriter::new(storage.create_output(&segment_file_name(segment, "prx"))?);
        let mut dictionary = TermInfosWriter::new(storage, segment, Arc::clone(field_infos))?;

        for posting in postings {
            let info = TermInfo::new(1, freq.position(), prox.position());
            dictionary.add(&posting.term, &info)?;
            write_posting(&mut freq, &mut prox, 0, &posting.positions)?;
        }

        dictionary.close()?;
        freq.close()?;
        prox.close()
    }

    fn write_norms(
        &self,
        storage: &dyn Storage,
        segment: &str,
        states: &[Option<FieldState>],
        field_infos: &FieldInfos,
    ) -> Result<()> {
        for info in field_infos.indexed() {
            let (length, boost) = match states[info.number as usize] {
                Some(state) => (state.length, state.boost),
                None => (0, 1.0),
            };
            let norm = boost * self.similarity.length_norm(&info.name, length);

            let mut output = StructWriter::new(storage.create_output(&norms_file_name(segment, info.number))?);
            output.write_u8(encode_norm(norm))?;
            output.close()?;
        }
        Ok(())
    }
}

/// Sort postings by term with a median-of-three quicksort.
pub(crate) fn sort_postings(mut postings: Vec<Posting>) -> Vec<Posting> {
    if postings.len() > 1 {
        let hi = postings.len() - 1;
        quick_sort(&mut postings, 0, hi);
    }
    postings
}

fn quick_sort(postings: &mut [Posting], lo: usize, hi: usize) {
    if lo >= hi {
        return;
    }

    let mid = lo + (hi - lo) / 2;
    if postings[lo].term > postings[mid].term {
        postings.swap(lo, mid);
    }
    if postings[mid].term > postings[hi].term {
        postings.swap(mid, hi);
        if postings[lo].term > postings[mid].term {
            postings.swap(lo, mid);
        }
    }

    let span = hi - lo + 1;
    if span <= 3 {
        return;
    }

    // Partition around the median, parked at hi - 1.
    postings.swap(mid, hi - 1);
    let pivot = hi - 1;
    let mut left = lo;
    let mut right = hi - 1;
    loop {
        left += 1;
        while postings[left].term < postings[pivot].term {
            left += 1;
        }
        right -= 1;
        while postings[right].term > postings[pivot].term {
            right -= 1;
        }
        if left >= right {
            break;
        }
        postings.swap(left, right);
    }
    postings.swap(left, pivot);

    if left > lo {
        quick_sort(postings, lo, left - 1);
    }
    quick_sort(postings, left + 1, hi);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyzer::standard::StandardAnalyzer;
    use crate::analysis::analyzer::whitespace::WhitespaceAnalyzer;
    use crate::document::Field;
    use crate::index::norms::{DefaultSimilarity, decode_norm};
    use crate::index::postings::{SegmentTermDocs, SegmentTermPositions, TermDocs, TermEnum, TermPositions};
    use crate::index::stored_fields::StoredFieldsReader;
    use crate::index::term_dictionary::TermInfosReader;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::read_file;
    use rand::seq::SliceRandom;

    fn writer(max_field_length: u32) -> DocumentWriter {
        DocumentWriter::new(
            Arc::new(WhitespaceAnalyzer::new()),
            Arc::new(DefaultSimilarity),
            max_field_length,
        )
    }

    fn positions_of(storage: &MemoryStorage, segment: &str, term: &Term) -> Vec<u32> {
        let infos = Arc::new(FieldInfos::read(storage, &segment_file_name(segment, "fnm")).unwrap());
        let dictionary = Arc::new(TermInfosReader::open(storage, segment, Arc::clone(&infos)).unwrap());
        let docs = SegmentTermDocs::new(
            dictionary,
            infos,
            storage.open_input(&segment_file_name(segment, "frq")).unwrap(),
            None,
        );
        let mut cursor =
            SegmentTermPositions::new(docs, storage.open_input(&segment_file_name(segment, "prx")).unwrap());
        cursor.seek(term).unwrap();
        if !cursor.next().unwrap() {
            return Vec::new();
        }
        assert_eq!(cursor.doc(), 0);
        (0..cursor.freq()).map(|_| cursor.next_position().unwrap()).collect()
    }

    #[test]
    fn test_invert_single_document() {
        let storage = MemoryStorage::new_default();
        let doc = Document::new()
            .with_field(Field::keyword("id", "doc-1"))
            .with_field(Field::text("body", "b a b c b"))
            .with_field(Field::unindexed("note", "kept but not searchable"));
        writer(10_000).add_document(&storage, "_0", &doc).unwrap();

        let infos = Arc::new(FieldInfos::read(&storage, "_0.fnm").unwrap());
        assert!(infos.by_name("id").unwrap().is_indexed);
        assert!(!infos.by_name("note").unwrap().is_indexed);

        let dictionary = TermInfosReader::open(&storage, "_0", Arc::clone(&infos)).unwrap();
        let mut terms = dictionary.terms();
        let mut seen = Vec::new();
        while terms.next().unwrap() {
            seen.push(terms.term().unwrap().to_string());
        }
        assert_eq!(seen, vec!["body:a", "body:b", "body:c", "id:doc-1"]);

        assert_eq!(positions_of(&storage, "_0", &Term::new("body", "b")), vec![0, 2, 4]);
        assert_eq!(positions_of(&storage, "_0", &Term::new("id", "doc-1")), vec![0]);

        let mut stored = StoredFieldsReader::open(&storage, "_0", infos).unwrap();
        let loaded = stored.doc(0).unwrap();
        assert_eq!(loaded.get("note"), Some("kept but not searchable"));
        assert_eq!(loaded.get("body"), Some("b a b c b"));
    }

    #[test]
    fn test_norms_reflect_length_and_boost() {
        let storage = MemoryStorage::new_default();
        let mut doc = Document::new()
            .with_field(Field::text("short", "one"))
            .with_field(Field::text("long", "one two three four"))
            .with_field(Field::text("boosted", "one").with_boost(2.0));
        doc.set_boost(0.5);
        writer(10_000).add_document(&storage, "_0", &doc).unwrap();

        let infos = FieldInfos::read(&storage, "_0.fnm").unwrap();
        let norm = |name: &str| {
            let number = infos.field_number(name).unwrap();
            let bytes = read_file(&storage, &norms_file_name("_0", number)).unwrap();
            assert_eq!(bytes.len(), 1);
            decode_norm(bytes[0])
        };
        assert_eq!(norm("short"), decode_norm(encode_norm(0.5)));
        assert_eq!(norm("long"), decode_norm(encode_norm(0.25)));
        assert_eq!(norm("boosted"), decode_norm(encode_norm(1.0)));
        assert!(!storage.file_exists(&norms_file_name("_0", 0)));
    }

    #[test]
    fn test_position_increments_and_truncation() {
        let storage = MemoryStorage::new_default();
        let analyzer = StandardAnalyzer::with_stop_words(["the"]);
        let writer = DocumentWriter::new(Arc::new(analyzer), Arc::new(DefaultSimilarity), 10_000);
        let doc = Document::new().with_field(Field::text("body", "the cat and the hat"));
        writer.add_document(&storage, "_0", &doc).unwrap();
        assert_eq!(positions_of(&storage, "_0", &Term::new("body", "cat")), vec![1]);
        assert_eq!(positions_of(&storage, "_0", &Term::new("body", "hat")), vec![4]);
        assert!(positions_of(&storage, "_0", &Term::new("body", "the")).is_empty());

        let doc = Document::new().with_field(Field::text("body", "a b c d e f g"));
        self::writer(3).add_document(&storage, "_1", &doc).unwrap();
        assert_eq!(positions_of(&storage, "_1", &Term::new("body", "c")), vec![2]);
        assert_eq!(positions_of(&storage, "_1", &Term::new("body", "d")), vec![3]);
        assert!(positions_of(&storage, "_1", &Term::new("body", "e")).is_empty());
    }

    #[test]
    fn test_repeated_field_continues_positions() {
        let storage = MemoryStorage::new_default();
        let doc = Document::new()
            .with_field(Field::text("body", "x y"))
            .with_field(Field::text("body", "x"));
        writer(10_000).add_document(&storage, "_0", &doc).unwrap();
        assert_eq!(positions_of(&storage, "_0", &Term::new("body", "x")), vec![0, 2]);
    }

    #[test]
    fn test_indexed_binary_rejected() {
        let storage = MemoryStorage::new_default();
        let field = Field::from_stored(
            "blob".to_string(),
            FieldValue::Binary(vec![1, 2]),
            crate::document::FieldKind::StoredIndexed { tokenized: false },
            false,
        );
        let doc = Document::new().with_field(field);
        let err = writer(10_000).add_document(&storage, "_0", &doc).unwrap_err();
        assert!(matches!(err, FolioError::Field(_)));
    }

    #[test]
    fn test_sort_postings_orders_terms() {
        let mut rng = rand::rng();
        let mut terms: Vec<Term> = (0..500)
            .map(|i| Term::new(if i % 2 == 0 { "a" } else { "b" }, format!("{}", i % 97)))
            .collect();
        terms.shuffle(&mut rng);

        let postings = terms
            .iter()
            .map(|term| Posting { term: term.clone(), positions: vec![0] })
            .collect();
        let sorted: Vec<Term> = sort_postings(postings).into_iter().map(|p| p.term).collect();

        let mut expected = terms;
        expected.sort();
        assert_eq!(sorted, expected);
    }
}
