//! Analyzers convert field text into token streams.
//!
//! # Available Implementations
//!
//! - [`StandardAnalyzer`](standard::StandardAnalyzer) - Unicode words, lowercased
//! - [`WhitespaceAnalyzer`](whitespace::WhitespaceAnalyzer) - Splits on whitespace only
//! - [`KeywordAnalyzer`](keyword::KeywordAnalyzer) - Treats entire input as one token
//!
//! # Examples
//!
//! ```
//! use folio::analysis::analyzer::Analyzer;
//! use folio::analysis::analyzer::standard::StandardAnalyzer;
//!
//! let analyzer = StandardAnalyzer::new();
//! let tokens: Vec<_> = analyzer.analyze("Hello World").unwrap().collect();
//!
//! assert_eq!(tokens[0].text, "hello");
//! assert_eq!(tokens[1].text, "world");
//! ```

pub mod keyword;
pub mod standard;
pub mod whitespace;

use crate::analysis::token::TokenStream;
use crate::error::Result;

/// Trait for analyzers that convert text into processed tokens.
///
/// Analyzers are shared between indexing threads, hence `Send + Sync`.
pub trait Analyzer: Send + Sync {
    /// Analyze the given text and return a stream of tokens.
    fn analyze(&self, text: &str) -> Result<TokenStream>;

    /// Analyze the text of a named field.
    ///
    /// The default ignores the field name. Override to vary analysis per field.
    fn analyze_field(&self, _field: &str, text: &str) -> Result<TokenStream> {
        self.analyze(text)
    }

    /// Get the name of this analyzer (for debugging and configuration).
    fn name(&self) -> &'static str;
}
