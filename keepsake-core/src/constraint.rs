//! Search constraint tree
//!
//! Constraints are immutable values. The planner and the expression
//! compiler build new trees; nothing mutates a caller's tree in place.
//! Evaluation against blobs lives in the executor, which has index access;
//! the leaf matchers that need no I/O (ints, floats, strings, times,
//! locations) are implemented here.

use crate::{Timestamp, ATTR_DEF_VIS, DEF_VIS_HIDE};
use serde::{Deserialize, Serialize};

/// A node in the constraint tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Constraint {
    /// Matches every blob.
    Anything,
    /// Matches blobs with any non-empty declared type.
    AnyCamliType,
    /// Prefix match on the canonical blobref string.
    BlobRefPrefix(String),
    /// Exact match on the declared type.
    CamliType(String),
    /// Bound on the blob's size in bytes.
    BlobSize(IntConstraint),
    Permanode(Box<PermanodeConstraint>),
    File(Box<FileConstraint>),
    Logical(Box<LogicalConstraint>),
}

impl Constraint {
    pub fn and(a: Constraint, b: Constraint) -> Constraint {
        Constraint::Logical(Box::new(LogicalConstraint {
            op: LogicalOp::And,
            a: Box::new(a),
            b: Some(Box::new(b)),
        }))
    }

    pub fn or(a: Constraint, b: Constraint) -> Constraint {
        Constraint::Logical(Box::new(LogicalConstraint {
            op: LogicalOp::Or,
            a: Box::new(a),
            b: Some(Box::new(b)),
        }))
    }

    pub fn not(a: Constraint) -> Constraint {
        Constraint::Logical(Box::new(LogicalConstraint {
            op: LogicalOp::Not,
            a: Box::new(a),
            b: None,
        }))
    }

    /// The implicit base constraint for expression-driven queries:
    /// permanodes that are not marked hidden.
    pub fn skip_hidden_base() -> Constraint {
        Constraint::Permanode(Box::new(PermanodeConstraint {
            skip_hidden: true,
            ..Default::default()
        }))
    }

    /// Whether the tree is rooted in permanode-matching work. Drives the
    /// planner's choice of candidate source and default sort.
    pub fn matches_permanodes_only(&self) -> bool {
        match self {
            Constraint::Permanode(_) => true,
            Constraint::Logical(l) => match l.op {
                LogicalOp::And => {
                    l.a.matches_permanodes_only()
                        || l.b.as_ref().is_some_and(|b| b.matches_permanodes_only())
                }
                LogicalOp::Or => {
                    l.a.matches_permanodes_only()
                        && l.b.as_ref().is_some_and(|b| b.matches_permanodes_only())
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// The blobref prefix the whole tree requires, if any.
    pub fn required_prefix(&self) -> Option<&str> {
        match self {
            Constraint::BlobRefPrefix(p) => Some(p),
            Constraint::Logical(l) if l.op == LogicalOp::And => l
                .a
                .required_prefix()
                .or_else(|| l.b.as_ref().and_then(|b| b.required_prefix())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOp {
    And,
    Or,
    Xor,
    Not,
}

/// Binary (or, for `not`, unary) combination of two subtrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalConstraint {
    pub op: LogicalOp,
    pub a: Box<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<Box<Constraint>>,
}

/// Constraint over a permanode's folded attribute view.
///
/// Every populated field must hold for the permanode to match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermanodeConstraint {
    /// Attribute to inspect. Empty means "any attribute" (fulltext
    /// fallback, only meaningful together with `value_matches`).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub attr: String,

    /// Some value of the attribute equals this exactly. An empty string
    /// requires the attribute to have no values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Some value (or every value, with `value_all`) matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_matches: Option<StringConstraint>,

    /// Some value, parsed as a blobref, satisfies the sub-constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_in_set: Option<Box<Constraint>>,

    /// Evaluate `value_matches` against all values instead of any.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub value_all: bool,

    /// Bound on the number of values the attribute holds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_value: Option<IntConstraint>,

    /// Bound on the permanode's last-modified time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<TimeConstraint>,

    /// The permanode's resolved location must satisfy this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationConstraint>,

    /// Reject permanodes whose folded attributes mark them hidden.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skip_hidden: bool,

    /// Parent/child relation through membership attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<Box<RelationConstraint>>,

    /// Evaluate the folded view at this time instead of the query time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<Timestamp>,
}

impl PermanodeConstraint {
    /// Shorthand for `attr == value`, with hidden nodes skipped, as the
    /// expression predicates build it.
    pub fn attr_value(attr: impl Into<String>, value: impl Into<String>) -> Self {
        PermanodeConstraint {
            attr: attr.into(),
            value: Some(value.into()),
            skip_hidden: true,
            ..Default::default()
        }
    }
}

/// Relation between a permanode and the nodes referencing it (or that it
/// references) via `camliMember` / `camliPath:*` attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationConstraint {
    /// `"parent"` or `"child"`.
    pub relation: String,
    /// At least one related node matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any: Option<Box<Constraint>>,
    /// Every related node matches (and there is at least one).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<Box<Constraint>>,
}

/// Constraint over a file schema blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConstraint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<StringConstraint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<StringConstraint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<IntConstraint>,
    /// Image metadata must exist for the file.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_image: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<IntConstraint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<IntConstraint>,
    /// Width divided by height.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wh_ratio: Option<FloatConstraint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationConstraint>,
}

/// Inclusive integer bound.
///
/// A plain zero minimum or maximum is indistinguishable from "unset" once
/// serialized, so an intentional zero bound is flagged explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntConstraint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub zero_min: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub zero_max: bool,
}

impl IntConstraint {
    pub fn at_least(min: i64) -> Self {
        if min == 0 {
            IntConstraint {
                zero_min: true,
                ..Default::default()
            }
        } else {
            IntConstraint {
                min: Some(min),
                ..Default::default()
            }
        }
    }

    pub fn at_most(max: i64) -> Self {
        if max == 0 {
            IntConstraint {
                zero_max: true,
                ..Default::default()
            }
        } else {
            IntConstraint {
                max: Some(max),
                ..Default::default()
            }
        }
    }

    pub fn matches(&self, n: i64) -> bool {
        let min = if self.zero_min { Some(0) } else { self.min };
        let max = if self.zero_max { Some(0) } else { self.max };
        if let Some(min) = min {
            if n < min {
                return false;
            }
        }
        if let Some(max) = max {
            if n > max {
                return false;
            }
        }
        true
    }
}

/// Inclusive float bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FloatConstraint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl FloatConstraint {
    pub fn matches(&self, f: f64) -> bool {
        if let Some(min) = self.min {
            if f < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if f > max {
                return false;
            }
        }
        true
    }
}

/// Constraint over a string value. All populated fields must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StringConstraint {
    /// The string must be empty.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub empty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_length: Option<IntConstraint>,
    /// Compare `equals` / `contains` / `has_prefix` case-insensitively.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub case_insensitive: bool,
}

impl StringConstraint {
    /// Case-insensitive substring match, as the `title:` predicate uses.
    pub fn contains_fold(needle: impl Into<String>) -> Self {
        StringConstraint {
            contains: Some(needle.into()),
            case_insensitive: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, s: &str) -> bool {
        if self.empty && !s.is_empty() {
            return false;
        }
        if let Some(bl) = &self.byte_length {
            if !bl.matches(s.len() as i64) {
                return false;
            }
        }
        let fold = |v: &str| -> String {
            if self.case_insensitive {
                v.to_lowercase()
            } else {
                v.to_string()
            }
        };
        let subject = fold(s);
        if let Some(eq) = &self.equals {
            if subject != fold(eq) {
                return false;
            }
        }
        if let Some(sub) = &self.contains {
            if !subject.contains(&fold(sub)) {
                return false;
            }
        }
        if let Some(prefix) = &self.has_prefix {
            if !subject.starts_with(&fold(prefix)) {
                return false;
            }
        }
        true
    }
}

/// Bound on a timestamp. Populated fields are conjunctive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeConstraint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Timestamp>,
}

impl TimeConstraint {
    pub fn matches(&self, t: Timestamp) -> bool {
        if let Some(before) = self.before {
            if t >= before {
                return false;
            }
        }
        if let Some(after) = self.after {
            if t < after {
                return false;
            }
        }
        true
    }
}

/// A latitude/longitude point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Geographic bound: either "has any location" or containment in a box.
///
/// The box may straddle the antimeridian, in which case `west > east` and
/// longitude containment wraps around.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationConstraint {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub any: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub north: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub south: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub east: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub west: Option<f64>,
}

impl LocationConstraint {
    pub fn in_box(north: f64, south: f64, east: f64, west: f64) -> Self {
        LocationConstraint {
            any: false,
            north: Some(north),
            south: Some(south),
            east: Some(east),
            west: Some(west),
        }
    }

    pub fn matches(&self, loc: Location) -> bool {
        if self.any {
            return true;
        }
        let (Some(north), Some(south), Some(east), Some(west)) =
            (self.north, self.south, self.east, self.west)
        else {
            return false;
        };
        if loc.latitude < south || loc.latitude > north {
            return false;
        }
        if west <= east {
            loc.longitude >= west && loc.longitude <= east
        } else {
            // Box crosses the antimeridian.
            loc.longitude >= west || loc.longitude <= east
        }
    }
}

/// Whether a folded attribute view marks the permanode hidden.
pub fn is_hidden(attrs: &crate::FoldedAttrs) -> bool {
    attrs.has_value(ATTR_DEF_VIS, DEF_VIS_HIDE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_constraint_zero_bounds_are_explicit() {
        let unset = IntConstraint::default();
        assert!(unset.matches(-5) && unset.matches(0) && unset.matches(5));

        let zero_max = IntConstraint::at_most(0);
        assert!(zero_max.matches(0));
        assert!(!zero_max.matches(1));

        let range = IntConstraint {
            min: Some(480),
            max: Some(1024),
            ..Default::default()
        };
        assert!(range.matches(480) && range.matches(1024));
        assert!(!range.matches(479) && !range.matches(1025));
    }

    #[test]
    fn string_constraint_case_folding() {
        let c = StringConstraint::contains_fold("Dude");
        assert!(c.matches("my dude photo"));
        assert!(c.matches("DUDE"));
        assert!(!c.matches("duck"));

        let exact = StringConstraint {
            equals: Some("foo".to_string()),
            ..Default::default()
        };
        assert!(exact.matches("foo"));
        assert!(!exact.matches("FOO"));
    }

    #[test]
    fn location_box_handles_antimeridian() {
        let fiji = LocationConstraint::in_box(-15.0, -20.0, -178.0, 177.0);
        assert!(fiji.matches(Location {
            latitude: -17.7,
            longitude: 178.1,
        }));
        assert!(fiji.matches(Location {
            latitude: -17.7,
            longitude: -179.5,
        }));
        assert!(!fiji.matches(Location {
            latitude: -17.7,
            longitude: 0.0,
        }));
    }

    #[test]
    fn constraint_json_shape_is_stable() {
        let c = Constraint::and(
            Constraint::Permanode(Box::new(PermanodeConstraint::attr_value("tag", "sun"))),
            Constraint::CamliType("permanode".to_string()),
        );
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["logical"]["op"], "and");
        assert_eq!(json["logical"]["a"]["permanode"]["attr"], "tag");
        assert_eq!(json["logical"]["a"]["permanode"]["skipHidden"], true);
        let back: Constraint = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn permanode_only_detection() {
        let pn = Constraint::Permanode(Box::new(PermanodeConstraint::attr_value("tag", "x")));
        assert!(pn.matches_permanodes_only());
        assert!(Constraint::and(pn.clone(), Constraint::Anything).matches_permanodes_only());
        assert!(Constraint::or(pn.clone(), pn.clone()).matches_permanodes_only());
        assert!(!Constraint::or(pn, Constraint::Anything).matches_permanodes_only());
        assert!(!Constraint::Anything.matches_permanodes_only());
    }
}
