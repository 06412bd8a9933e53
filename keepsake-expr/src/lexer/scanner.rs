//! Lexer implementation

use super::token::*;
use std::iter::Peekable;
use std::str::CharIndices;

/// State-machine lexer for the search expression language.
///
/// Driven by the current rune: whitespace separates tokens, parens group,
/// `-` negates, `"` opens a quoted literal or argument, and a run of
/// letters followed by `:` opens a predicate with colon-separated
/// arguments. `and`/`or` are operator keywords only at a word boundary, so
/// `andouille` and `orange` stay literals.
pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            pos: 0,
        }
    }

    /// Tokenize the entire source. The stream always ends with `Eof`, or
    /// with an `Error` token (carrying the failure's start column)
    /// followed by `Eof`.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let start = self.pos;
            match self.peek_char() {
                None => {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        column: start,
                    });
                    break;
                }
                Some('(') => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenKind::Open,
                        column: start,
                    });
                }
                Some(')') => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenKind::Close,
                        column: start,
                    });
                }
                Some('-') => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenKind::Not,
                        column: start,
                    });
                }
                Some('"') => {
                    match self.scan_quoted() {
                        Some(value) => tokens.push(Token {
                            kind: TokenKind::QuotedLiteral(value),
                            column: start,
                        }),
                        None => {
                            tokens.push(Token {
                                kind: TokenKind::Error("Unclosed quote".to_string()),
                                column: start,
                            });
                            tokens.push(Token {
                                kind: TokenKind::Eof,
                                column: self.pos,
                            });
                            break;
                        }
                    };
                }
                Some(_) => {
                    if !self.scan_word(&mut tokens) {
                        tokens.push(Token {
                            kind: TokenKind::Eof,
                            column: self.pos,
                        });
                        break;
                    }
                }
            }
        }
        tokens
    }

    /// Scan a bare word: either a predicate (letters then `:`) with its
    /// arguments, an operator keyword, or a literal. Returns false when a
    /// lex error was pushed and the stream should end.
    fn scan_word(&mut self, tokens: &mut Vec<Token>) -> bool {
        let start = self.pos;

        while let Some(c) = self.peek_char() {
            if c.is_alphabetic() {
                self.advance();
            } else {
                break;
            }
        }

        if self.pos > start && self.peek_char() == Some(':') {
            tokens.push(Token {
                kind: TokenKind::Predicate(self.source[start..self.pos].to_string()),
                column: start,
            });
            let colon = self.pos;
            self.advance();
            tokens.push(Token {
                kind: TokenKind::Colon,
                column: colon,
            });
            return self.scan_args(tokens);
        }

        // Not a predicate: keep consuming to the word boundary.
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() || c == '(' || c == ')' {
                break;
            }
            self.advance();
        }

        let word = &self.source[start..self.pos];
        let kind = match word {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            _ => TokenKind::Literal(word.to_string()),
        };
        tokens.push(Token {
            kind,
            column: start,
        });
        true
    }

    /// Scan one or more colon-separated predicate arguments. Returns
    /// false when a lex error was pushed.
    fn scan_args(&mut self, tokens: &mut Vec<Token>) -> bool {
        loop {
            let start = self.pos;
            if self.peek_char() == Some('"') {
                match self.scan_quoted() {
                    Some(value) => tokens.push(Token {
                        kind: TokenKind::QuotedArg(value),
                        column: start,
                    }),
                    None => {
                        tokens.push(Token {
                            kind: TokenKind::Error("Unclosed quote".to_string()),
                            column: start,
                        });
                        return false;
                    }
                }
            } else {
                while let Some(c) = self.peek_char() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == ':' {
                        break;
                    }
                    self.advance();
                }
                // May be empty, as in `attr:tag:` matching the empty value.
                tokens.push(Token {
                    kind: TokenKind::Arg(self.source[start..self.pos].to_string()),
                    column: start,
                });
            }

            if self.peek_char() == Some(':') {
                let colon = self.pos;
                self.advance();
                tokens.push(Token {
                    kind: TokenKind::Colon,
                    column: colon,
                });
            } else {
                return true;
            }
        }
    }

    /// Scan a quoted string with `\"` and `\\` escapes. The opening quote
    /// is the current rune. `None` means the quote never closed.
    fn scan_quoted(&mut self) -> Option<String> {
        self.advance(); // consume opening quote
        let mut value = String::new();
        loop {
            match self.peek_char() {
                None => return None,
                Some('"') => {
                    self.advance();
                    return Some(value);
                }
                Some('\\') => {
                    self.advance();
                    match self.peek_char() {
                        Some('"') => {
                            self.advance();
                            value.push('"');
                        }
                        Some('\\') => {
                            self.advance();
                            value.push('\\');
                        }
                        _ => value.push('\\'),
                    }
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn advance(&mut self) -> Option<char> {
        if let Some((i, c)) = self.chars.next() {
            self.pos = i + c.len_utf8();
            Some(c)
        } else {
            None
        }
    }
}
