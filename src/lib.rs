//! # Folio
//!
//! A segment-based inverted index engine.
//!
//! Documents are inverted one at a time into tiny in-memory segments, which
//! are merged logarithmically into larger on-disk segments. Every change to
//! the segment list is committed atomically under a lock, and files that
//! cannot be removed yet (open on some platforms) are recorded for deferred
//! deletion.
//!
//! ## Layout
//!
//! - [`storage`] - flat file namespaces (filesystem or memory), locks and compound files
//! - [`analysis`] - analyzers that split field text into tokens
//! - [`document`] - documents and their fields
//! - [`index`] - term dictionaries, postings, segment readers, merging and the writer
//! - [`cli`] - the `folio` maintenance tool

pub mod analysis;
pub mod cli;
pub mod document;
pub mod error;
pub mod index;
pub mod storage;
pub mod util;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
