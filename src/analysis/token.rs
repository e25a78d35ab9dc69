//! Token types produced by analyzers.
//!
//! ```
//! use folio::analysis::token::Token;
//!
//! let token = Token::with_offsets("world", 6, 11);
//! assert_eq!(token.text, "world");
//! assert_eq!(token.position_increment, 1);
//! ```

use serde::{Deserialize, Serialize};

/// A single unit of text after tokenization.
///
/// `position_increment` is the distance from the previous token's position.
/// The default of 1 places tokens at consecutive positions; larger values
/// leave gaps (for example where stop words were removed) and 0 stacks a
/// token on the previous position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The token's text content.
    pub text: String,

    /// Distance from the previous token's position.
    pub position_increment: u32,

    /// Byte offset of the token start in the original text.
    pub start_offset: usize,

    /// Byte offset one past the token end in the original text.
    pub end_offset: usize,
}

impl Token {
    /// Create a token with no offset information.
    pub fn new<S: Into<String>>(text: S) -> Self {
        let text = text.into();
        let end_offset = text.len();
        Token {
            text,
            position_increment: 1,
            start_offset: 0,
            end_offset,
        }
    }

    /// Create a token spanning `start..end` of the source text.
    pub fn with_offsets<S: Into<String>>(text: S, start: usize, end: usize) -> Self {
        Token {
            text: text.into(),
            position_increment: 1,
            start_offset: start,
            end_offset: end,
        }
    }

    /// Set the position increment.
    pub fn with_position_increment(mut self, increment: u32) -> Self {
        self.position_increment = increment;
        self
    }
}

/// Type alias for a boxed iterator of tokens.
pub type TokenStream = Box<dyn Iterator<Item = Token> + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_builders() {
        let token = Token::new("hello");
        assert_eq!(token.end_offset, 5);
        assert_eq!(token.position_increment, 1);

        let gap = Token::with_offsets("fox", 10, 13).with_position_increment(3);
        assert_eq!(gap.position_increment, 3);
        assert_eq!(gap.start_offset, 10);
    }
}
