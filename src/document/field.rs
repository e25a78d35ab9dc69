//! Fields: a name, a value, how the value is indexed, and a boost.
//!
//! [`FieldKind`] is a closed set: a field is stored only, indexed only, or
//! both, and indexed fields are tokenized or not. Constructors cover the
//! common combinations:
//!
//! | constructor | stored | indexed | tokenized |
//! |-------------|--------|---------|-----------|
//! | `keyword`   | yes    | yes     | no        |
//! | `text`      | yes    | yes     | yes       |
//! | `unstored`  | no     | yes     | yes       |
//! | `unindexed` | yes    | no      | -         |
//! | `binary`    | yes    | no      | -         |

use serde::{Deserialize, Serialize};

use crate::error::{FolioError, Result};

/// How a field participates in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Stored verbatim, not searchable.
    Stored,
    /// Searchable, not stored.
    Indexed { tokenized: bool },
    /// Searchable and stored.
    StoredIndexed { tokenized: bool },
}

impl FieldKind {
    pub fn is_stored(&self) -> bool {
        matches!(self, FieldKind::Stored | FieldKind::StoredIndexed { .. })
    }

    pub fn is_indexed(&self) -> bool {
        !matches!(self, FieldKind::Stored)
    }

    pub fn is_tokenized(&self) -> bool {
        matches!(
            self,
            FieldKind::Indexed { tokenized: true } | FieldKind::StoredIndexed { tokenized: true }
        )
    }

    /// Rebuild a kind from its flags.
    pub fn from_flags(stored: bool, indexed: bool, tokenized: bool) -> Option<Self> {
        match (stored, indexed) {
            (true, false) => Some(FieldKind::Stored),
            (false, true) => Some(FieldKind::Indexed { tokenized }),
            (true, true) => Some(FieldKind::StoredIndexed { tokenized }),
            (false, false) => None,
        }
    }
}

/// The content of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Binary(Vec<u8>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::Binary(_) => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, FieldValue::Binary(_))
    }
}

/// A named field of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    name: String,
    value: FieldValue,
    kind: FieldKind,
    compressed: bool,
    boost: f32,
}

impl Field {
    /// Create a field, rejecting combinations the index cannot represent.
    ///
    /// Binary values can only be stored; indexing them is a caller error.
    pub fn new<S: Into<String>>(name: S, value: FieldValue, kind: FieldKind) -> Result<Self> {
        let name = name.into();
        if value.is_binary() && kind.is_indexed() {
            return Err(FolioError::field(format!(
                "binary field {name} cannot be indexed"
            )));
        }
        Ok(Field {
            name,
            value,
            kind,
            compressed: false,
            boost: 1.0,
        })
    }

    fn with_kind(name: impl Into<String>, value: FieldValue, kind: FieldKind) -> Self {
        Field {
            name: name.into(),
            value,
            kind,
            compressed: false,
            boost: 1.0,
        }
    }

    /// Stored and indexed as a single untokenized term.
    pub fn keyword(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            FieldValue::Text(value.into()),
            FieldKind::StoredIndexed { tokenized: false },
        )
    }

    /// Stored, indexed and tokenized.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            FieldValue::Text(value.into()),
            FieldKind::StoredIndexed { tokenized: true },
        )
    }

    /// Indexed and tokenized, not stored.
    pub fn unstored(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            FieldValue::Text(value.into()),
            FieldKind::Indexed { tokenized: true },
        )
    }

    /// Stored only.
    pub fn unindexed(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_kind(name, FieldValue::Text(value.into()), FieldKind::Stored)
    }

    /// Stored-only binary value.
    pub fn binary(name: impl Into<String>, value: Vec<u8>) -> Self {
        Self::with_kind(name, FieldValue::Binary(value), FieldKind::Stored)
    }

    /// Store the value compressed.
    pub fn compressed(mut self) -> Self {
        self.compressed = true;
        self
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_stored(&self) -> bool {
        self.kind.is_stored()
    }

    pub fn is_indexed(&self) -> bool {
        self.kind.is_indexed()
    }

    pub fn is_tokenized(&self) -> bool {
        self.kind.is_tokenized()
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    /// Rebuild a field as read back from stored fields.
    pub(crate) fn from_stored(
        name: String,
        value: FieldValue,
        kind: FieldKind,
        compressed: bool,
    ) -> Self {
        Field {
            name,
            value,
            kind,
            compressed,
            boost: 1.0,
        }
    }
}
