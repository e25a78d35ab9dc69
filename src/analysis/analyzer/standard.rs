//! Standard analyzer: Unicode word segmentation plus lowercasing.
//!
//! Words follow the Unicode word-boundary rules (UAX #29) as implemented by
//! `unicode-segmentation`. An optional stop-word set removes tokens while
//! preserving the position gap they leave behind.
//!
//! ```
//! use folio::analysis::analyzer::Analyzer;
//! use folio::analysis::analyzer::standard::StandardAnalyzer;
//!
//! let analyzer = StandardAnalyzer::with_stop_words(["the", "and"]);
//! let tokens: Vec<_> = analyzer.analyze("The cat and the hat").unwrap().collect();
//!
//! assert_eq!(tokens.len(), 2);
//! assert_eq!(tokens[0].text, "cat");
//! assert_eq!(tokens[1].text, "hat");
//! assert_eq!(tokens[1].position_increment, 3);
//! ```

use std::collections::HashSet;

use unicode_segmentation::UnicodeSegmentation;

use crate::analysis::analyzer::Analyzer;
use crate::analysis::token::{Token, TokenStream};
use crate::error::Result;

/// A standard analyzer that provides good defaults for most use cases.
#[derive(Debug, Clone, Default)]
pub struct StandardAnalyzer {
    stop_words: HashSet<String>,
}

impl StandardAnalyzer {
    /// Create a new standard analyzer without stop words.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a standard analyzer that drops the given (lowercase) words.
    pub fn with_stop_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StandardAnalyzer {
            stop_words: words.into_iter().map(Into::into).collect(),
        }
    }
}

impl Analyzer for StandardAnalyzer {
    fn analyze(&self, text: &str) -> Result<TokenStream> {
        let mut tokens = Vec::new();
        let mut skipped = 0;

        for (offset, word) in text.unicode_word_indices() {
            let lowered = word.to_lowercase();
            if self.stop_words.contains(&lowered) {
                skipped += 1;
                continue;
            }
            tokens.push(
                Token::with_offsets(lowered, offset, offset + word.len())
                    .with_position_increment(1 + skipped),
            );
            skipped = 0;
        }

        Ok(Box::new(tokens.into_iter()))
    }

    fn name(&self) -> &'static str {
        "standard"
    }
}
