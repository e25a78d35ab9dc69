//! Terms and term metadata.
//!
//! A [`Term`] is the unit of indexing: a field name plus the text of one
//! token. Terms order by field first, then by text, both compared as UTF-8
//! bytes (which matches code point order). [`TermBuffer`] is a reusable
//! scratch buffer for decoding prefix-compressed terms in hot loops; it is
//! never used as a key.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FolioError, Result};

/// An immutable (field, text) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Term {
    field: String,
    text: String,
}

impl Term {
    pub fn new(field: impl Into<String>, text: impl Into<String>) -> Self {
        Term {
            field: field.into(),
            text: text.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// A term in the same field with different text.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Term {
            field: self.field.clone(),
            text: text.into(),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.text)
    }
}

/// Where a term's postings live and how many documents it occurs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermInfo {
    /// Number of documents containing the term.
    pub doc_freq: u32,
    /// Offset of the term's postings in the `.frq` stream.
    pub freq_pointer: u64,
    /// Offset of the term's positions in the `.prx` stream.
    pub prox_pointer: u64,
}

impl TermInfo {
    pub fn new(doc_freq: u32, freq_pointer: u64, prox_pointer: u64) -> Self {
        TermInfo {
            doc_freq,
            freq_pointer,
            prox_pointer,
        }
    }
}

/// Mutable scratch term for decoding without allocating.
///
/// The field is shared with the segment's field registry; the text is kept
/// as raw UTF-8 so prefix-sharing can splice bytes in place.
#[derive(Debug, Clone, Default)]
pub struct TermBuffer {
    field: Option<Arc<str>>,
    text: Vec<u8>,
}

impl TermBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to "no term".
    pub fn reset(&mut self) {
        self.field = None;
        self.text.clear();
    }

    pub fn is_set(&self) -> bool {
        self.field.is_some()
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn text_bytes(&self) -> &[u8] {
        &self.text
    }

    /// Load from an existing term.
    pub fn set_term(&mut self, term: &Term) {
        self.field = Some(Arc::from(term.field()));
        self.text.clear();
        self.text.extend_from_slice(term.text().as_bytes());
    }

    /// Copy another buffer's state.
    pub fn copy_from(&mut self, other: &TermBuffer) {
        self.field = other.field.clone();
        self.text.clear();
        self.text.extend_from_slice(&other.text);
    }

    /// Keep the first `prefix` bytes of text and append `suffix`.
    pub fn splice(&mut self, field: Arc<str>, prefix: usize, suffix: &[u8]) -> Result<()> {
        if prefix > self.text.len() {
            return Err(FolioError::corrupt(format!(
                "shared prefix {prefix} longer than previous term ({} bytes)",
                self.text.len()
            )));
        }
        self.field = Some(field);
        self.text.truncate(prefix);
        self.text.extend_from_slice(suffix);
        Ok(())
    }

    /// Materialize as an immutable term.
    pub fn to_term(&self) -> Result<Option<Term>> {
        let Some(field) = &self.field else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&self.text)
            .map_err(|e| FolioError::corrupt(format!("term text is not UTF-8: {e}")))?;
        Ok(Some(Term::new(field.as_ref(), text)))
    }

    /// Compare with a term using term order. An unset buffer sorts first.
    pub fn compare_to(&self, term: &Term) -> Ordering {
        match &self.field {
            None => Ordering::Less,
            Some(field) => field
                .as_bytes()
                .cmp(term.field().as_bytes())
                .then_with(|| self.text.as_slice().cmp(term.text().as_bytes())),
        }
    }
}

/// Length of the common byte prefix of two strings, on a char boundary.
pub fn shared_prefix_len(a: &str, b: &str) -> usize {
    let mut len = 0;
    for (ca, cb) in a.chars().zip(b.chars()) {
        if ca != cb {
            break;
        }
        len += ca.len_utf8();
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_order_is_field_then_text() {
        let mut terms = vec![
            Term::new("title", "apple"),
            Term::new("body", "zebra"),
            Term::new("body", "apple"),
            Term::new("body", "Apple"),
        ];
        terms.sort();
        assert_eq!(
            terms,
            vec![
                Term::new("body", "Apple"),
                Term::new("body", "apple"),
                Term::new("body", "zebra"),
                Term::new("title", "apple"),
            ]
        );
    }

    #[test]
    fn test_term_order_matches_code_points() {
        let a = Term::new("f", "z");
        let b = Term::new("f", "é");
        assert!(a < b);
    }

    #[test]
    fn test_term_buffer_splice_and_compare() {
        let field: Arc<str> = Arc::from("body");
        let mut buffer = TermBuffer::new();
        assert_eq!(buffer.compare_to(&Term::new("", "")), Ordering::Less);

        buffer.splice(Arc::clone(&field), 0, b"segment").unwrap();
        buffer.splice(Arc::clone(&field), 3, b"ment").unwrap();
        assert_eq!(buffer.to_term().unwrap(), Some(Term::new("body", "segment")));

        buffer.splice(Arc::clone(&field), 3, b"uence").unwrap();
        assert_eq!(buffer.to_term().unwrap(), Some(Term::new("body", "sequence")));
        assert_eq!(buffer.compare_to(&Term::new("body", "sequence")), Ordering::Equal);
        assert_eq!(buffer.compare_to(&Term::new("body", "t")), Ordering::Less);
        assert_eq!(buffer.compare_to(&Term::new("a", "z")), Ordering::Greater);

        assert!(buffer.splice(field, 100, b"").is_err());
    }

    #[test]
    fn test_shared_prefix_len() {
        assert_eq!(shared_prefix_len("segment", "sequence"), 3);
        assert_eq!(shared_prefix_len("", "abc"), 0);
        assert_eq!(shared_prefix_len("héllo", "hélp"), 4);
        assert_eq!(shared_prefix_len("same", "same"), 4);
    }
}
