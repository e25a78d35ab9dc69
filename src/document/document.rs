//! The document container.

use serde::{Deserialize, Serialize};

use crate::document::field::{Field, FieldValue};

/// An ordered collection of fields with a document-level boost.
///
/// The boost multiplies into every indexed field's norm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    fields: Vec<Field>,
    boost: f32,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document with boost 1.0.
    pub fn new() -> Self {
        Document {
            fields: Vec::new(),
            boost: 1.0,
        }
    }

    /// Append a field. Several fields may share a name.
    pub fn add(&mut self, field: Field) -> &mut Self {
        self.fields.push(field);
        self
    }

    /// Builder-style variant of [`add`](Self::add).
    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Remove every field with the given name, returning how many were removed.
    pub fn remove_fields(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|f| f.name() != name);
        before - self.fields.len()
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    pub fn set_boost(&mut self, boost: f32) {
        self.boost = boost;
    }

    /// All fields in insertion order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// First field with the given name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Text of the first text field with the given name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .filter(|f| f.name() == name)
            .find_map(|f| f.value().as_text())
    }

    /// Texts of every text field with the given name.
    pub fn get_values(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.name() == name)
            .filter_map(|f| f.value().as_text())
            .collect()
    }

    /// Bytes of the first binary field with the given name.
    pub fn get_binary(&self, name: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .filter(|f| f.name() == name)
            .find_map(|f| match f.value() {
                FieldValue::Binary(bytes) => Some(bytes.as_slice()),
                FieldValue::Text(_) => None,
            })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
