//! Keyword analyzer that treats the entire input as a single token.
//!
//! Useful for identifiers, tags and other values that must match exactly.
//!
//! ```
//! use folio::analysis::analyzer::Analyzer;
//! use folio::analysis::analyzer::keyword::KeywordAnalyzer;
//!
//! let tokens: Vec<_> = KeywordAnalyzer::new().analyze("user-123-abc").unwrap().collect();
//! assert_eq!(tokens.len(), 1);
//! assert_eq!(tokens[0].text, "user-123-abc");
//! ```

use crate::analysis::analyzer::Analyzer;
use crate::analysis::token::{Token, TokenStream};
use crate::error::Result;

/// A keyword analyzer that treats the entire input as a single token.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    pub fn new() -> Self {
        KeywordAnalyzer
    }
}

impl Analyzer for KeywordAnalyzer {
    fn analyze(&self, text: &str) -> Result<TokenStream> {
        if text.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        Ok(Box::new(std::iter::once(Token::with_offsets(
            text,
            0,
            text.len(),
        ))))
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}
