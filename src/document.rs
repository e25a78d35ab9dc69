//! Document model.
//!
//! A [`Document`] is an ordered list of named [`Field`]s. Each field is
//! stored, indexed, or both, as described by its [`FieldKind`]; indexed
//! fields are either tokenized by the writer's analyzer or indexed verbatim
//! as a single term. Field order is preserved in stored documents.
//!
//! # Examples
//!
//! ```
//! use folio::document::{Document, Field};
//!
//! let mut doc = Document::new();
//! doc.add(Field::keyword("id", "doc-1"));
//! doc.add(Field::text("title", "Segment merging explained"));
//! doc.add(Field::unstored("body", "Never stored, only searchable"));
//!
//! assert_eq!(doc.get("id"), Some("doc-1"));
//! assert_eq!(doc.len(), 3);
//! ```

#[allow(clippy::module_inception)]
pub mod document;
pub mod field;

pub use document::Document;
pub use field::{Field, FieldKind, FieldValue};
