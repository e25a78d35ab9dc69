//! Text analysis for Folio.
//!
//! The index consumes analysis through one seam: an [`Analyzer`] turns a
//! field's text into a stream of [`Token`]s, each carrying its text and the
//! position increment relative to the previous token. The analyzers here are
//! deliberately small; anything implementing the trait can be plugged into
//! the writer.
//!
//! [`Analyzer`]: analyzer::Analyzer
//! [`Token`]: token::Token

pub mod analyzer;
pub mod token;
