//! Expression lexer

mod scanner;
mod token;

pub use scanner::Lexer;
pub use token::{Token, TokenKind};

/// Tokenize an expression string.
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).tokenize()
}
