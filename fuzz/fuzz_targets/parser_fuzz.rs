//! Fuzz test for the expression parser
//!
//! Run with: cargo +nightly fuzz run parser_fuzz -- -max_total_time=60

#![no_main]

use keepsake_expr::{parse, print_expr};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The parser should handle any valid UTF-8 string without panicking,
    // returning either an AST or an error with a valid position.
    if let Ok(input) = std::str::from_utf8(data) {
        match parse(input) {
            Ok(None) => {}
            Ok(Some(expr)) => {
                // Anything that parses must survive a canonical round trip.
                let printed = print_expr(&expr);
                let reparsed = parse(&printed)
                    .expect("canonical form must parse")
                    .expect("canonical form is never empty");
                assert_eq!(reparsed, expr);
            }
            Err(err) => {
                assert!(err.column <= input.len());
                assert!(!err.msg.is_empty());
            }
        }
    }
});
