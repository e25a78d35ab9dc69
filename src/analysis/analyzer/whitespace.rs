//! Analyzer that splits on Unicode whitespace and keeps text as-is.

use crate::analysis::analyzer::Analyzer;
use crate::analysis::token::{Token, TokenStream};
use crate::error::Result;

/// Splits on whitespace. No case folding, no filtering.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceAnalyzer;

impl WhitespaceAnalyzer {
    pub fn new() -> Self {
        WhitespaceAnalyzer
    }
}

impl Analyzer for WhitespaceAnalyzer {
    fn analyze(&self, text: &str) -> Result<TokenStream> {
        let mut tokens = Vec::new();
        let mut start = None;

        for (i, c) in text.char_indices() {
            match (c.is_whitespace(), start) {
                (true, Some(s)) => {
                    tokens.push(Token::with_offsets(&text[s..i], s, i));
                    start = None;
                }
                (false, None) => start = Some(i),
                _ => {}
            }
        }
        if let Some(s) = start {
            tokens.push(Token::with_offsets(&text[s..], s, text.len()));
        }

        Ok(Box::new(tokens.into_iter()))
    }

    fn name(&self) -> &'static str {
        "whitespace"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_split() {
        let tokens: Vec<Token> = WhitespaceAnalyzer::new()
            .analyze("  Quick\tbrown  FOX ")
            .unwrap()
            .collect();

        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["Quick", "brown", "FOX"]);
        assert_eq!(tokens[0].start_offset, 2);
        assert_eq!(tokens[2].end_offset, 19);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(WhitespaceAnalyzer::new().analyze("   ").unwrap().count(), 0);
    }
}
