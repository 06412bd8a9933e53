//! Fuzz test for the expression lexer
//!
//! Run with: cargo +nightly fuzz run lexer_fuzz -- -max_total_time=60

#![no_main]

use keepsake_expr::{tokenize, TokenKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The lexer should handle any valid UTF-8 string without panicking.
    if let Ok(input) = std::str::from_utf8(data) {
        let tokens = tokenize(input);

        // The stream always ends with Eof.
        assert!(!tokens.is_empty());
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);

        // Token columns are valid byte offsets into the source.
        for token in &tokens {
            assert!(token.column <= input.len());
        }
    }
});
