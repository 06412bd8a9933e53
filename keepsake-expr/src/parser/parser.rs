//! Parser implementation

use super::ast::*;
use crate::lexer::{tokenize, Token, TokenKind};
use crate::predicates::lookup_predicate;
use thiserror::Error;

/// A parse failure, carrying the byte offset of the offending token.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{msg} at position {column}")]
pub struct ParseError {
    pub msg: String,
    pub column: usize,
}

impl ParseError {
    fn new(msg: impl Into<String>, column: usize) -> Self {
        ParseError {
            msg: msg.into(),
            column,
        }
    }
}

impl From<ParseError> for keepsake_core::KeepsakeError {
    fn from(e: ParseError) -> Self {
        keepsake_core::KeepsakeError::invalid_input(e.to_string())
    }
}

/// Parse an expression string. `Ok(None)` is the valid empty expression.
pub fn parse(source: &str) -> Result<Option<Expr>, ParseError> {
    let mut parser = Parser {
        tokens: tokenize(source),
        pos: 0,
    };
    if parser.current().kind == TokenKind::Eof {
        return Ok(None);
    }
    let expr = parser.parse_or()?;
    let trailing = parser.current();
    match &trailing.kind {
        TokenKind::Eof => Ok(Some(expr)),
        TokenKind::Close => Err(ParseError::new(
            "No matching opening parenthesis",
            trailing.column,
        )),
        TokenKind::Error(msg) => Err(ParseError::new(msg.clone(), trailing.column)),
        _ => Err(ParseError::new("unknown expression", trailing.column)),
    }
}

/// Recursive-descent parser over the token stream.
///
/// Grammar:
/// ```text
/// exp        := orRHS
/// orRHS      := andRHS ( 'or' andRHS )*
/// andRHS     := negOperand ( ('and' | implicit) negOperand )*
/// negOperand := '-'* operand
/// operand    := '(' exp ')' | atom
/// atom       := PREDICATE COLON ARG (COLON ARG)* | LITERAL | QUOTED_LITERAL
/// ```
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.current().kind == TokenKind::Or {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::or(left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_neg()?;
        loop {
            if self.current().kind == TokenKind::And {
                self.advance();
                let right = self.parse_neg()?;
                left = Expr::and(left, right);
            } else if self.current().kind.starts_operand() {
                // Juxtaposition is an implicit 'and'.
                let right = self.parse_neg()?;
                left = Expr::and(left, right);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_neg(&mut self) -> Result<Expr, ParseError> {
        if self.current().kind == TokenKind::Not {
            self.advance();
            return Ok(Expr::not(self.parse_neg()?));
        }
        self.parse_operand()
    }

    fn parse_operand(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Open => {
                self.advance();
                let inner = self.parse_or()?;
                if self.current().kind == TokenKind::Close {
                    self.advance();
                    Ok(inner)
                } else {
                    Err(ParseError::new(
                        "No matching closing parenthesis",
                        token.column,
                    ))
                }
            }
            TokenKind::Predicate(name) => self.parse_atom(name, token.column),
            TokenKind::Literal(value) | TokenKind::QuotedLiteral(value) => {
                self.advance();
                Ok(Expr::Literal(value))
            }
            TokenKind::And | TokenKind::Or => Err(ParseError::new(
                "Expression cannot start with a binary operator",
                token.column,
            )),
            TokenKind::Close => Err(ParseError::new(
                "No matching opening parenthesis",
                token.column,
            )),
            TokenKind::Error(msg) => Err(ParseError::new(msg, token.column)),
            _ => Err(ParseError::new("unknown expression", token.column)),
        }
    }

    fn parse_atom(&mut self, name: String, column: usize) -> Result<Expr, ParseError> {
        self.advance(); // past the predicate name
        let mut args = Vec::new();
        loop {
            if self.current().kind != TokenKind::Colon {
                break;
            }
            self.advance();
            match self.current().kind.clone() {
                TokenKind::Arg(value) | TokenKind::QuotedArg(value) => {
                    args.push(value);
                    self.advance();
                }
                TokenKind::Error(msg) => {
                    let col = self.current().column;
                    return Err(ParseError::new(msg, col));
                }
                _ => {
                    let col = self.current().column;
                    return Err(ParseError::new("expected predicate argument", col));
                }
            }
        }

        let Some(def) = lookup_predicate(&name) else {
            return Err(ParseError::new(format!("unknown predicate {name:?}"), column));
        };
        if args.len() < def.min_args || args.len() > def.max_args {
            return Err(ParseError::new(
                format!(
                    "Wrong number of arguments for {:?}, given {}, expected {}",
                    name,
                    args.len(),
                    def.expected_args()
                ),
                column,
            ));
        }
        Ok(Expr::Atom(Atom { name, args, column }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(name: &str, args: &[&str]) -> Expr {
        Expr::Atom(Atom::new(name, args.iter().map(|s| s.to_string()).collect()))
    }

    fn lit(s: &str) -> Expr {
        Expr::Literal(s.to_string())
    }

    #[test]
    fn empty_expression_is_valid() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   \t ").unwrap(), None);
    }

    #[test]
    fn or_and_and_are_left_associative() {
        assert_eq!(
            parse("a or b or c").unwrap().unwrap(),
            Expr::or(Expr::or(lit("a"), lit("b")), lit("c"))
        );
        assert_eq!(
            parse("a and b and c").unwrap().unwrap(),
            Expr::and(Expr::and(lit("a"), lit("b")), lit("c"))
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(
            parse("a and b or c and d").unwrap().unwrap(),
            Expr::or(Expr::and(lit("a"), lit("b")), Expr::and(lit("c"), lit("d")))
        );
    }

    #[test]
    fn juxtaposition_is_implicit_and() {
        assert_eq!(
            parse("a b c").unwrap().unwrap(),
            Expr::and(Expr::and(lit("a"), lit("b")), lit("c"))
        );
    }

    #[test]
    fn negation_stacks() {
        assert_eq!(
            parse("--tag:a").unwrap().unwrap(),
            Expr::not(Expr::not(atom("tag", &["a"])))
        );
    }

    #[test]
    fn parens_group() {
        assert_eq!(
            parse("a and (b or c)").unwrap().unwrap(),
            Expr::and(lit("a"), Expr::or(lit("b"), lit("c")))
        );
    }

    #[test]
    fn pano_or_attr_scenario() {
        assert_eq!(
            parse("is:pano or attr:foo:bar").unwrap().unwrap(),
            Expr::or(atom("is", &["pano"]), atom("attr", &["foo", "bar"]))
        );
    }

    #[test]
    fn unbalanced_parens_report_columns() {
        let err = parse("(tag:a").unwrap_err();
        assert_eq!(err.msg, "No matching closing parenthesis");
        assert_eq!(err.column, 0);

        let err = parse("tag:a)").unwrap_err();
        assert_eq!(err.msg, "No matching opening parenthesis");
        assert_eq!(err.column, 5);
    }

    #[test]
    fn leading_binary_operator_is_rejected() {
        let err = parse("and tag:a").unwrap_err();
        assert_eq!(err.msg, "Expression cannot start with a binary operator");
        let err = parse("tag:a or or tag:b").unwrap_err();
        assert_eq!(err.msg, "Expression cannot start with a binary operator");
    }

    #[test]
    fn unclosed_quote_is_reported_with_column() {
        let err = parse(r#"tag:a "unfinished"#).unwrap_err();
        assert_eq!(err.msg, "Unclosed quote");
        assert_eq!(err.column, 6);
        assert_eq!(err.to_string(), "Unclosed quote at position 6");
    }

    #[test]
    fn arity_is_checked_at_parse_time() {
        let err = parse("attr:onlykey").unwrap_err();
        assert_eq!(
            err.msg,
            "Wrong number of arguments for \"attr\", given 1, expected 2"
        );

        let err = parse("tag:a:b:c").unwrap_err();
        assert!(err.msg.starts_with("Wrong number of arguments for \"tag\""));
    }

    #[test]
    fn unknown_predicate_is_rejected() {
        let err = parse("frobnicate:yes").unwrap_err();
        assert_eq!(err.msg, "unknown predicate \"frobnicate\"");
    }
}
