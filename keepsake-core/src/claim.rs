//! Signed attribute claims and the claim folder
//!
//! A claim is a signed, immutable statement that adds, sets, or deletes one
//! attribute value on a permanode at a timestamp. The folder replays an
//! ordered claim sequence into the permanode's attribute multimap as of a
//! chosen point in time.

use crate::BlobRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timestamps are UTC with nanosecond precision, serialized as RFC-3339.
pub type Timestamp = DateTime<Utc>;

/// The kind of mutation a claim applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClaimKind {
    SetAttribute,
    AddAttribute,
    DelAttribute,
    /// Any kind this version does not understand. Ignored by the folder.
    Other(String),
}

impl ClaimKind {
    pub fn as_str(&self) -> &str {
        match self {
            ClaimKind::SetAttribute => "set-attribute",
            ClaimKind::AddAttribute => "add-attribute",
            ClaimKind::DelAttribute => "del-attribute",
            ClaimKind::Other(s) => s,
        }
    }
}

impl From<String> for ClaimKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "set-attribute" => ClaimKind::SetAttribute,
            "add-attribute" => ClaimKind::AddAttribute,
            "del-attribute" => ClaimKind::DelAttribute,
            _ => ClaimKind::Other(s),
        }
    }
}

impl From<ClaimKind> for String {
    fn from(k: ClaimKind) -> String {
        k.as_str().to_string()
    }
}

/// A signature-verified claim, as handed over by the index.
///
/// Wire field names follow the claims list format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// The claim blob's own reference.
    #[serde(rename = "blobref")]
    pub blob_ref: BlobRef,
    /// Key ID of the signer.
    pub signer: String,
    /// The permanode this claim targets.
    pub permanode: BlobRef,
    pub date: Timestamp,
    #[serde(rename = "type")]
    pub kind: ClaimKind,
    pub attr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
}

/// The folded attribute view of a permanode at some point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FoldedAttrs {
    /// Attribute name to ordered, duplicate-free value list.
    pub attrs: BTreeMap<String, Vec<String>>,
    /// Timestamp of the most recent applied claim.
    pub last_mod: Option<Timestamp>,
}

impl FoldedAttrs {
    /// First value of the attribute, or empty string if unset.
    pub fn first(&self, attr: &str) -> &str {
        self.attrs
            .get(attr)
            .and_then(|vs| vs.first())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// All values of the attribute.
    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs.get(attr).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the attribute currently holds the given value.
    pub fn has_value(&self, attr: &str, value: &str) -> bool {
        self.values(attr).iter().any(|v| v == value)
    }
}

/// Replay claims into the attribute multimap as of `at` (or all of them
/// when `at` is `None`).
///
/// Claims are applied in `(date, claim blobref)` ascending order; the
/// secondary key makes same-timestamp replay deterministic. The caller is
/// responsible for having selected only claims by the owner key on the
/// permanode of interest.
pub fn fold_claims(claims: &[Claim], at: Option<Timestamp>) -> FoldedAttrs {
    let mut ordered: Vec<&Claim> = claims
        .iter()
        .filter(|c| at.map_or(true, |t| c.date <= t))
        .collect();
    ordered.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.blob_ref.cmp(&b.blob_ref)));

    let mut folded = FoldedAttrs::default();
    for claim in ordered {
        match claim.kind {
            ClaimKind::SetAttribute => {
                folded.attrs.remove(&claim.attr);
                add_value(&mut folded.attrs, &claim.attr, &claim.value);
            }
            ClaimKind::AddAttribute => {
                add_value(&mut folded.attrs, &claim.attr, &claim.value);
            }
            ClaimKind::DelAttribute => {
                if claim.value.is_empty() {
                    folded.attrs.remove(&claim.attr);
                } else if let Some(values) = folded.attrs.get_mut(&claim.attr) {
                    values.retain(|v| v != &claim.value);
                    if values.is_empty() {
                        folded.attrs.remove(&claim.attr);
                    }
                }
            }
            ClaimKind::Other(_) => continue,
        }
        folded.last_mod = Some(claim.date);
    }
    folded
}

fn add_value(attrs: &mut BTreeMap<String, Vec<String>>, attr: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let values = attrs.entry(attr.to_string()).or_default();
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn claim(n: i64, kind: ClaimKind, attr: &str, value: &str) -> Claim {
        Claim {
            blob_ref: BlobRef::from_content(format!("claim-{n}-{attr}-{value}").as_bytes()),
            signer: "key123".to_string(),
            permanode: BlobRef::from_content(b"pn"),
            date: Utc.timestamp_opt(1_600_000_000 + n, 0).unwrap(),
            kind,
            attr: attr.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn set_drops_prior_values_then_adds() {
        // add(x,a), add(x,b), set(x,c), add(x,b), del(x,b) => x == ["c"]
        let claims = vec![
            claim(1, ClaimKind::AddAttribute, "x", "a"),
            claim(2, ClaimKind::AddAttribute, "x", "b"),
            claim(3, ClaimKind::SetAttribute, "x", "c"),
            claim(4, ClaimKind::AddAttribute, "x", "b"),
            claim(5, ClaimKind::DelAttribute, "x", "b"),
        ];
        let folded = fold_claims(&claims, None);
        assert_eq!(folded.values("x"), ["c"]);
        assert_eq!(folded.last_mod, Some(claims[4].date));
    }

    #[test]
    fn duplicate_and_empty_adds_are_skipped() {
        let claims = vec![
            claim(1, ClaimKind::AddAttribute, "tag", "sun"),
            claim(2, ClaimKind::AddAttribute, "tag", "sun"),
            claim(3, ClaimKind::AddAttribute, "tag", ""),
            claim(4, ClaimKind::AddAttribute, "tag", "sea"),
        ];
        let folded = fold_claims(&claims, None);
        assert_eq!(folded.values("tag"), ["sun", "sea"]);
    }

    #[test]
    fn del_with_empty_value_drops_whole_attribute() {
        let claims = vec![
            claim(1, ClaimKind::AddAttribute, "tag", "a"),
            claim(2, ClaimKind::AddAttribute, "tag", "b"),
            claim(3, ClaimKind::DelAttribute, "tag", ""),
        ];
        let folded = fold_claims(&claims, None);
        assert!(folded.values("tag").is_empty());
    }

    #[test]
    fn del_specific_value_preserves_remaining_order() {
        let claims = vec![
            claim(1, ClaimKind::AddAttribute, "tag", "a"),
            claim(2, ClaimKind::AddAttribute, "tag", "b"),
            claim(3, ClaimKind::AddAttribute, "tag", "c"),
            claim(4, ClaimKind::DelAttribute, "tag", "b"),
        ];
        let folded = fold_claims(&claims, None);
        assert_eq!(folded.values("tag"), ["a", "c"]);
    }

    #[test]
    fn claims_after_cutoff_are_ignored() {
        let claims = vec![
            claim(1, ClaimKind::AddAttribute, "title", "old"),
            claim(100, ClaimKind::SetAttribute, "title", "new"),
        ];
        let folded = fold_claims(&claims, Some(claims[0].date));
        assert_eq!(folded.values("title"), ["old"]);
        assert_eq!(folded.last_mod, Some(claims[0].date));
    }

    #[test]
    fn unknown_claim_kinds_are_ignored() {
        let claims = vec![
            claim(1, ClaimKind::AddAttribute, "x", "a"),
            claim(2, ClaimKind::Other("share".to_string()), "x", "b"),
        ];
        let folded = fold_claims(&claims, None);
        assert_eq!(folded.values("x"), ["a"]);
        // Ignored claims do not advance the modification time either.
        assert_eq!(folded.last_mod, Some(claims[0].date));
    }

    #[test]
    fn empty_claim_list_is_valid() {
        let folded = fold_claims(&[], None);
        assert!(folded.attrs.is_empty());
        assert_eq!(folded.last_mod, None);
    }

    #[test]
    fn same_timestamp_ties_break_on_claim_blobref() {
        let t = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        let mut a = claim(0, ClaimKind::SetAttribute, "x", "first");
        let mut b = claim(0, ClaimKind::SetAttribute, "x", "second");
        a.date = t;
        b.date = t;
        // Force a known blobref order.
        if a.blob_ref > b.blob_ref {
            std::mem::swap(&mut a, &mut b);
        }
        let winner = b.value.clone();
        let folded_fwd = fold_claims(&[a.clone(), b.clone()], None);
        let folded_rev = fold_claims(&[b, a], None);
        assert_eq!(folded_fwd.values("x"), [winner.as_str()]);
        assert_eq!(folded_fwd, folded_rev);
    }
}
