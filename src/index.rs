//! The segment-based inverted index.
//!
//! An index is an ordered list of immutable segments described by the
//! `segments` file. Documents are inverted one at a time into tiny in-memory
//! segments which the writer merges, tier by tier, into larger on-disk ones.
//! Readers open a point-in-time snapshot of the segment list and present it
//! as one logical index.
//!
//! # Module map
//!
//! - [`term`], [`field_infos`] - keys and the per-segment field registry
//! - [`stored_fields`] - per-document stored values (`.fdt` / `.fdx`)
//! - [`term_dictionary`] - the two-level term dictionary (`.tis` / `.tii`)
//! - [`postings`] - doc and position cursors over `.frq` / `.prx`
//! - [`norms`] - one-byte length normalization factors (`.fN`)
//! - [`deletion`] - per-segment tombstones (`.del`)
//! - [`document_writer`] - inverts one document into a new segment
//! - [`merger`] - k-way merge of segments
//! - [`segment_info`], [`segment_reader`], [`multi_reader`], [`reader`] - reading
//! - [`writer`] - the orchestration layer that owns the segment list
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use folio::document::{Document, Field};
//! use folio::index::reader::IndexReader;
//! use folio::index::term::Term;
//! use folio::index::writer::{IndexWriter, IndexWriterConfig};
//! use folio::storage::Storage;
//! use folio::storage::memory::MemoryStorage;
//!
//! # fn main() -> folio::error::Result<()> {
//! let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
//!
//! let writer = IndexWriter::open(Arc::clone(&storage), true, IndexWriterConfig::default())?;
//! writer.add_document(&Document::new().with_field(Field::text("body", "hello segment world")))?;
//! writer.add_document(&Document::new().with_field(Field::text("body", "hello again")))?;
//! writer.close()?;
//!
//! let reader = folio::index::reader::open(Arc::clone(&storage))?;
//! assert_eq!(reader.num_docs(), 2);
//! assert_eq!(reader.doc_freq(&Term::new("body", "hello"))?, 2);
//! # Ok(())
//! # }
//! ```

pub mod deletion;
pub mod document_writer;
pub mod field_infos;
pub mod merger;
pub mod multi_reader;
pub mod norms;
pub mod postings;
pub mod reader;
pub mod segment_info;
pub mod segment_reader;
pub mod stored_fields;
pub mod term;
pub mod term_dictionary;
pub mod writer;

/// Name of the file holding the segment list.
pub const SEGMENTS_FILE: &str = "segments";

/// Name of the file listing files whose deletion failed.
pub const DELETABLE_FILE: &str = "deletable";

/// File extensions that make up a segment, excluding norms and deletions.
pub const SEGMENT_EXTENSIONS: [&str; 7] = ["fnm", "frq", "prx", "fdx", "fdt", "tii", "tis"];

/// Name of a per-segment file.
pub fn segment_file_name(segment: &str, extension: &str) -> String {
    format!("{segment}.{extension}")
}

/// Name of the norms file for a field ordinal.
pub fn norms_file_name(segment: &str, field_number: u32) -> String {
    format!("{segment}.f{field_number}")
}
