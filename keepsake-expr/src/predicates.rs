//! Predicate registry
//!
//! Table-driven registry of expression predicates. Each row carries the
//! predicate name, its argument arity, and a function lowering the parsed
//! atom into a constraint tree. The parser consults the table for arity
//! checking; the compiler dispatches through it.

use crate::parser::{parse, Atom, Expr};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use keepsake_core::{
    Cancel, Constraint, FileConstraint, IntConstraint, KeepsakeError, KeepsakeResult,
    LocationConstraint, PermanodeConstraint, RelationConstraint, StringConstraint, Timestamp,
    ATTR_CONTENT, ATTR_TAG, ATTR_TITLE,
};
use keepsake_index::Geocoder;

/// Compilation context handed to predicate functions.
///
/// Configured per call, never process-wide; the geocoder is optional and
/// only `loc:` requires it.
pub struct PredicateCtx<'a> {
    pub cancel: &'a Cancel,
    pub geocoder: Option<&'a dyn Geocoder>,
    /// Evaluate attribute views at this time instead of now.
    pub at: Option<Timestamp>,
}

/// One registry row.
pub struct PredicateDef {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    fun: fn(&PredicateCtx, &Atom) -> KeepsakeResult<Constraint>,
}

impl PredicateDef {
    /// Human form of the expected arity, for arity error messages.
    pub fn expected_args(&self) -> String {
        if self.min_args == self.max_args {
            self.min_args.to_string()
        } else {
            format!("{} to {}", self.min_args, self.max_args)
        }
    }
}

const PREDICATES: &[PredicateDef] = &[
    PredicateDef { name: "tag", min_args: 1, max_args: 1, fun: pred_tag },
    PredicateDef { name: "title", min_args: 1, max_args: 1, fun: pred_title },
    PredicateDef { name: "attr", min_args: 2, max_args: 2, fun: pred_attr },
    PredicateDef { name: "ref", min_args: 1, max_args: 1, fun: pred_ref },
    PredicateDef { name: "childrenof", min_args: 1, max_args: 1, fun: pred_childrenof },
    PredicateDef { name: "parentof", min_args: 1, max_args: 1, fun: pred_parentof },
    PredicateDef { name: "after", min_args: 1, max_args: 1, fun: pred_after },
    PredicateDef { name: "before", min_args: 1, max_args: 1, fun: pred_before },
    PredicateDef { name: "format", min_args: 1, max_args: 1, fun: pred_format },
    PredicateDef { name: "is", min_args: 1, max_args: 1, fun: pred_is },
    PredicateDef { name: "has", min_args: 1, max_args: 1, fun: pred_has },
    PredicateDef { name: "width", min_args: 1, max_args: 1, fun: pred_width },
    PredicateDef { name: "height", min_args: 1, max_args: 1, fun: pred_height },
    PredicateDef { name: "loc", min_args: 1, max_args: 1, fun: pred_loc },
];

/// Look up a predicate by name.
pub fn lookup_predicate(name: &str) -> Option<&'static PredicateDef> {
    PREDICATES.iter().find(|def| def.name == name)
}

/// Parse an expression string and lower it to a constraint tree.
///
/// The result is always anchored on the implicit skip-hidden base: an
/// empty expression yields the base alone, anything else is
/// `and(base, tree)`.
pub fn parse_expression(ctx: &PredicateCtx<'_>, source: &str) -> KeepsakeResult<Constraint> {
    match parse(source)? {
        None => Ok(Constraint::skip_hidden_base()),
        Some(expr) => Ok(Constraint::and(
            Constraint::skip_hidden_base(),
            compile_expr(ctx, &expr)?,
        )),
    }
}

/// Lower a parsed expression to a constraint tree.
pub fn compile_expr(ctx: &PredicateCtx<'_>, expr: &Expr) -> KeepsakeResult<Constraint> {
    match expr {
        Expr::And(a, b) => Ok(Constraint::and(compile_expr(ctx, a)?, compile_expr(ctx, b)?)),
        Expr::Or(a, b) => Ok(Constraint::or(compile_expr(ctx, a)?, compile_expr(ctx, b)?)),
        Expr::Not(e) => Ok(Constraint::not(compile_expr(ctx, e)?)),
        Expr::Literal(word) => Ok(fulltext(ctx, word)),
        Expr::Atom(atom) => compile_atom(ctx, atom),
    }
}

fn compile_atom(ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    let Some(def) = lookup_predicate(&atom.name) else {
        return Err(KeepsakeError::invalid_input(format!(
            "unknown predicate {:?}",
            atom.name
        )));
    };
    if atom.args.len() < def.min_args || atom.args.len() > def.max_args {
        return Err(KeepsakeError::invalid_input(format!(
            "Wrong number of arguments for {:?}, given {}, expected {}",
            atom.name,
            atom.args.len(),
            def.expected_args()
        )));
    }
    (def.fun)(ctx, atom)
}

// ============================================================================
// PREDICATE FUNCTIONS
// ============================================================================

/// A bare word: case-insensitive substring search across all attributes.
fn fulltext(ctx: &PredicateCtx<'_>, word: &str) -> Constraint {
    Constraint::Permanode(Box::new(PermanodeConstraint {
        value_matches: Some(StringConstraint::contains_fold(word)),
        skip_hidden: true,
        at: ctx.at,
        ..Default::default()
    }))
}

/// A permanode whose `camliContent` points at a file matching `fc`.
fn perm_of_file(fc: FileConstraint) -> Constraint {
    Constraint::Permanode(Box::new(PermanodeConstraint {
        attr: ATTR_CONTENT.to_string(),
        value_in_set: Some(Box::new(Constraint::File(Box::new(fc)))),
        skip_hidden: true,
        ..Default::default()
    }))
}

fn pred_tag(ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    let mut pc = PermanodeConstraint::attr_value(ATTR_TAG, atom.args[0].clone());
    pc.at = ctx.at;
    Ok(Constraint::Permanode(Box::new(pc)))
}

fn pred_title(ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    Ok(Constraint::Permanode(Box::new(PermanodeConstraint {
        attr: ATTR_TITLE.to_string(),
        value_matches: Some(StringConstraint::contains_fold(atom.args[0].clone())),
        skip_hidden: true,
        at: ctx.at,
        ..Default::default()
    })))
}

fn pred_attr(ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    let (name, value) = (&atom.args[0], &atom.args[1]);
    let mut pc = PermanodeConstraint {
        attr: name.clone(),
        skip_hidden: true,
        at: ctx.at,
        ..Default::default()
    };
    if let Some(needle) = value.strip_prefix('~') {
        pc.value_matches = Some(StringConstraint::contains_fold(needle));
    } else {
        pc.value = Some(value.clone());
    }
    Ok(Constraint::Permanode(Box::new(pc)))
}

fn pred_ref(_ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    let prefix = &atom.args[0];
    if prefix.is_empty() {
        return Err(KeepsakeError::invalid_input("empty blobref prefix"));
    }
    Ok(Constraint::BlobRefPrefix(prefix.clone()))
}

fn pred_childrenof(_ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    Ok(relation_to_prefix("parent", &atom.args[0]))
}

fn pred_parentof(_ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    Ok(relation_to_prefix("child", &atom.args[0]))
}

fn relation_to_prefix(relation: &str, prefix: &str) -> Constraint {
    Constraint::Permanode(Box::new(PermanodeConstraint {
        relation: Some(Box::new(RelationConstraint {
            relation: relation.to_string(),
            any: Some(Box::new(Constraint::BlobRefPrefix(prefix.to_string()))),
            all: None,
        })),
        ..Default::default()
    }))
}

fn pred_after(_ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    let t = parse_time(&atom.args[0])?;
    Ok(Constraint::Permanode(Box::new(PermanodeConstraint {
        mod_time: Some(keepsake_core::TimeConstraint {
            after: Some(t),
            before: None,
        }),
        ..Default::default()
    })))
}

fn pred_before(_ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    let t = parse_time(&atom.args[0])?;
    Ok(Constraint::Permanode(Box::new(PermanodeConstraint {
        mod_time: Some(keepsake_core::TimeConstraint {
            before: Some(t),
            after: None,
        }),
        ..Default::default()
    })))
}

fn pred_format(_ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    Ok(perm_of_file(FileConstraint {
        mime_type: Some(StringConstraint {
            equals: Some(atom.args[0].clone()),
            ..Default::default()
        }),
        ..Default::default()
    }))
}

fn pred_is(_ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    let fc = match atom.args[0].as_str() {
        "image" => FileConstraint {
            is_image: true,
            ..Default::default()
        },
        "landscape" => ratio_at_least(1.0),
        "portrait" => FileConstraint {
            is_image: true,
            wh_ratio: Some(keepsake_core::FloatConstraint {
                max: Some(1.0),
                min: None,
            }),
            ..Default::default()
        },
        "pano" => ratio_at_least(1.5),
        other => {
            return Err(KeepsakeError::invalid_input(format!(
                "unknown 'is' value {other:?}; expected image, landscape, portrait or pano"
            )))
        }
    };
    Ok(perm_of_file(fc))
}

fn ratio_at_least(min: f64) -> FileConstraint {
    FileConstraint {
        is_image: true,
        wh_ratio: Some(keepsake_core::FloatConstraint {
            min: Some(min),
            max: None,
        }),
        ..Default::default()
    }
}

fn pred_has(_ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    match atom.args[0].as_str() {
        "location" => Ok(any_location_constraint(LocationConstraint {
            any: true,
            ..Default::default()
        })),
        other => Err(KeepsakeError::invalid_input(format!(
            "unknown 'has' value {other:?}; expected location"
        ))),
    }
}

fn pred_width(_ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    Ok(perm_of_file(FileConstraint {
        is_image: true,
        width: Some(parse_range(&atom.args[0])?),
        ..Default::default()
    }))
}

fn pred_height(_ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    Ok(perm_of_file(FileConstraint {
        is_image: true,
        height: Some(parse_range(&atom.args[0])?),
        ..Default::default()
    }))
}

fn pred_loc(ctx: &PredicateCtx<'_>, atom: &Atom) -> KeepsakeResult<Constraint> {
    let place = &atom.args[0];
    let Some(geocoder) = ctx.geocoder else {
        return Err(KeepsakeError::invalid_input(
            "no geocoder configured; \"loc\" predicates are unavailable",
        ));
    };
    let Some(bbox) = geocoder.lookup(ctx.cancel, place)? else {
        return Err(KeepsakeError::invalid_input(format!(
            "unknown location {place:?}"
        )));
    };
    Ok(any_location_constraint(bbox.to_constraint()))
}

/// OR of (image content located in `lc`) and (permanode itself located in
/// `lc`).
fn any_location_constraint(lc: LocationConstraint) -> Constraint {
    Constraint::or(
        perm_of_file(FileConstraint {
            is_image: true,
            location: Some(lc),
            ..Default::default()
        }),
        Constraint::Permanode(Box::new(PermanodeConstraint {
            location: Some(lc),
            skip_hidden: true,
            ..Default::default()
        })),
    )
}

// ============================================================================
// ARGUMENT PARSERS
// ============================================================================

/// Parse a dimension range: `N`, `N-`, `-M`, or `N-M`. A zero bound is an
/// intentional zero-min / zero-max.
fn parse_range(s: &str) -> KeepsakeResult<IntConstraint> {
    let bad = || {
        KeepsakeError::invalid_input(format!(
            "Wrong format of range {s:?}; expected one of 480-1024, 480-, -1024 or 1024"
        ))
    };
    let bound = |p: &str| p.parse::<i64>().map_err(|_| bad());

    match s.split_once('-') {
        None => {
            let n = bound(s)?;
            let mut c = IntConstraint::at_least(n);
            let hi = IntConstraint::at_most(n);
            c.max = hi.max;
            c.zero_max = hi.zero_max;
            Ok(c)
        }
        Some(("", "")) => Err(bad()),
        Some((lo, "")) => Ok(IntConstraint::at_least(bound(lo)?)),
        Some(("", hi)) => Ok(IntConstraint::at_most(bound(hi)?)),
        Some((lo, hi)) => {
            let mut c = IntConstraint::at_least(bound(lo)?);
            let upper = IntConstraint::at_most(bound(hi)?);
            c.max = upper.max;
            c.zero_max = upper.zero_max;
            Ok(c)
        }
    }
}

/// Parse an RFC-3339 timestamp or bare date (midnight UTC).
fn parse_time(s: &str) -> KeepsakeResult<Timestamp> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)));
    }
    Err(KeepsakeError::invalid_input(format!(
        "cannot parse {s:?} as RFC 3339 date: parse error at position 0"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::LogicalOp;

    fn ctx(cancel: &Cancel) -> PredicateCtx<'_> {
        PredicateCtx {
            cancel,
            geocoder: None,
            at: None,
        }
    }

    fn compile(source: &str) -> KeepsakeResult<Constraint> {
        let cancel = Cancel::new();
        parse_expression(&ctx(&cancel), source)
    }

    fn unwrap_and(c: &Constraint) -> (&Constraint, &Constraint) {
        match c {
            Constraint::Logical(l) if l.op == LogicalOp::And => {
                (l.a.as_ref(), l.b.as_deref().expect("binary and"))
            }
            other => panic!("expected and(), got {other:?}"),
        }
    }

    #[test]
    fn empty_expression_is_base_alone() {
        let c = compile("").unwrap();
        assert_eq!(c, Constraint::skip_hidden_base());
    }

    #[test]
    fn pano_or_attr_shape() {
        let c = compile("is:pano or attr:foo:bar").unwrap();
        let (base, tree) = unwrap_and(&c);
        assert_eq!(base, &Constraint::skip_hidden_base());
        let Constraint::Logical(l) = tree else {
            panic!("expected or()");
        };
        assert_eq!(l.op, LogicalOp::Or);
        // Left branch: permanode whose camliContent is a pano image.
        let Constraint::Permanode(pn) = l.a.as_ref() else {
            panic!("expected permanode");
        };
        assert_eq!(pn.attr, ATTR_CONTENT);
        let Some(inner) = &pn.value_in_set else {
            panic!("expected valueInSet");
        };
        let Constraint::File(fc) = inner.as_ref() else {
            panic!("expected file constraint");
        };
        assert!(fc.is_image);
        assert_eq!(fc.wh_ratio.unwrap().min, Some(1.5));
        // Right branch: attr foo=bar with hidden nodes skipped.
        let Constraint::Permanode(pn) = l.b.as_deref().unwrap() else {
            panic!("expected permanode");
        };
        assert_eq!(pn.attr, "foo");
        assert_eq!(pn.value.as_deref(), Some("bar"));
        assert!(pn.skip_hidden);
    }

    #[test]
    fn attr_tilde_is_case_insensitive_contains() {
        let c = compile("attr:title:~sunset").unwrap();
        let (_, tree) = unwrap_and(&c);
        let Constraint::Permanode(pn) = tree else {
            panic!("expected permanode");
        };
        let vm = pn.value_matches.as_ref().unwrap();
        assert_eq!(vm.contains.as_deref(), Some("sunset"));
        assert!(vm.case_insensitive);
    }

    #[test]
    fn width_ranges() {
        assert_eq!(
            parse_range("480-1024").unwrap(),
            IntConstraint {
                min: Some(480),
                max: Some(1024),
                ..Default::default()
            }
        );
        assert_eq!(parse_range("480-").unwrap(), IntConstraint::at_least(480));
        assert_eq!(parse_range("-1024").unwrap(), IntConstraint::at_most(1024));
        assert_eq!(
            parse_range("0-").unwrap(),
            IntConstraint {
                zero_min: true,
                ..Default::default()
            }
        );
        let err = parse_range("wide").unwrap_err();
        assert!(err
            .to_string()
            .contains("480-1024, 480-, -1024 or 1024"));
    }

    #[test]
    fn after_accepts_dates_and_rejects_junk() {
        assert!(compile("after:2020-01-01").is_ok());
        assert!(compile("after:2020-01-01T10:30:00Z").is_ok());
        let err = compile("after:notadate").unwrap_err();
        assert!(err.to_string().contains("position 0"));
    }

    #[test]
    fn loc_without_geocoder_is_input_error() {
        let err = compile("loc:paris").unwrap_err();
        assert_eq!(err.error_type(), keepsake_core::ErrorType::Input);
    }

    #[test]
    fn bare_literal_is_fulltext_fallback() {
        let c = compile("sunset").unwrap();
        let (_, tree) = unwrap_and(&c);
        let Constraint::Permanode(pn) = tree else {
            panic!("expected permanode");
        };
        assert!(pn.attr.is_empty());
        let vm = pn.value_matches.as_ref().unwrap();
        assert_eq!(vm.contains.as_deref(), Some("sunset"));
        assert!(vm.case_insensitive && pn.skip_hidden);
    }
}
