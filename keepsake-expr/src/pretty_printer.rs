//! Pretty printer for search expressions
//!
//! Prints an AST back to a canonical expression string. The canonical form
//! re-parses to the same AST, which is what the round-trip property suite
//! exercises: parse → print → parse is identity.

use crate::parser::{Atom, Expr};

/// Print an expression in canonical form.
pub fn print_expr(expr: &Expr) -> String {
    let mut out = String::new();
    print_into(expr, &mut out);
    out
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Or(_, _) => 1,
        Expr::And(_, _) => 2,
        Expr::Not(_) => 3,
        Expr::Atom(_) | Expr::Literal(_) => 4,
    }
}

fn print_into(expr: &Expr, out: &mut String) {
    match expr {
        Expr::Or(a, b) => print_binary(a, "or", b, 1, out),
        Expr::And(a, b) => print_binary(a, "and", b, 2, out),
        Expr::Not(inner) => {
            out.push('-');
            print_child(inner, precedence(inner) < 3, out);
        }
        Expr::Atom(atom) => print_atom(atom, out),
        Expr::Literal(word) => out.push_str(&quote_literal(word)),
    }
}

// Binary operators are left-associative, so the right child needs parens
// already at equal precedence, the left child only below it.
fn print_binary(a: &Expr, op: &str, b: &Expr, prec: u8, out: &mut String) {
    print_child(a, precedence(a) < prec, out);
    out.push(' ');
    out.push_str(op);
    out.push(' ');
    print_child(b, precedence(b) <= prec, out);
}

fn print_child(expr: &Expr, parens: bool, out: &mut String) {
    if parens {
        out.push('(');
        print_into(expr, out);
        out.push(')');
    } else {
        print_into(expr, out);
    }
}

fn print_atom(atom: &Atom, out: &mut String) {
    out.push_str(&atom.name);
    for arg in &atom.args {
        out.push(':');
        out.push_str(&quote_arg(arg));
    }
}

fn quote_arg(s: &str) -> String {
    if needs_quoting(s) {
        quoted(s)
    } else {
        s.to_string()
    }
}

fn quote_literal(s: &str) -> String {
    if needs_quoting(s) || s == "and" || s == "or" || s.starts_with('-') {
        quoted(s)
    } else {
        s.to_string()
    }
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || s.chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"' | '\\' | ':'))
}

fn quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn atom(name: &str, args: &[&str]) -> Expr {
        Expr::Atom(Atom::new(name, args.iter().map(|s| s.to_string()).collect()))
    }

    #[test]
    fn binary_printing_respects_associativity() {
        let left = Expr::or(Expr::or(Expr::Literal("a".into()), Expr::Literal("b".into())),
            Expr::Literal("c".into()));
        assert_eq!(print_expr(&left), "a or b or c");

        let right = Expr::or(Expr::Literal("a".into()),
            Expr::or(Expr::Literal("b".into()), Expr::Literal("c".into())));
        assert_eq!(print_expr(&right), "a or (b or c)");
    }

    #[test]
    fn mixed_precedence() {
        let e = Expr::and(Expr::Literal("a".into()),
            Expr::or(Expr::Literal("b".into()), Expr::Literal("c".into())));
        assert_eq!(print_expr(&e), "a and (b or c)");

        let e = Expr::or(atom("is", &["pano"]), atom("attr", &["foo", "bar"]));
        assert_eq!(print_expr(&e), "is:pano or attr:foo:bar");
    }

    #[test]
    fn operator_lookalike_literals_get_quoted() {
        let e = Expr::and(Expr::Literal("and".into()), Expr::Literal("andouille".into()));
        let printed = print_expr(&e);
        assert_eq!(printed, "\"and\" and andouille");
        assert_eq!(parse(&printed).unwrap().unwrap(), e);
    }

    #[test]
    fn args_with_spaces_and_quotes_round_trip() {
        let e = atom("title", &[r#"space "race""#]);
        let printed = print_expr(&e);
        assert_eq!(printed, r#"title:"space \"race\"""#);
        assert_eq!(parse(&printed).unwrap().unwrap(), e);
    }

    #[test]
    fn stacked_negation_round_trips() {
        let e = Expr::not(Expr::not(atom("tag", &["a"])));
        let printed = print_expr(&e);
        assert_eq!(printed, "--tag:a");
        assert_eq!(parse(&printed).unwrap().unwrap(), e);
    }

    #[test]
    fn negated_disjunction_gets_parens() {
        let e = Expr::not(Expr::or(Expr::Literal("a".into()), Expr::Literal("b".into())));
        let printed = print_expr(&e);
        assert_eq!(printed, "-(a or b)");
        assert_eq!(parse(&printed).unwrap().unwrap(), e);
    }
}
