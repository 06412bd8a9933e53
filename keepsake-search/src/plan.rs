//! Query planner
//!
//! Inspects a constraint tree, picks the most selective legal candidate
//! source, fills default sort and limit, and decodes continuation tokens.
//! The planner builds a new plan; it never mutates the caller's tree.

use crate::query::SortType;
use chrono::TimeZone;
use keepsake_core::{
    BlobRef, Constraint, KeepsakeError, KeepsakeResult, SearchLimits, Timestamp,
};
use sha2::{Digest, Sha224};

/// An index-backed stream of candidate blobrefs feeding the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CandidateSource {
    /// Owner's permanodes, most recently modified first. Stream order
    /// matches the last-modified sort order.
    PermanodeLastMod,
    /// Owner's permanodes in blobref order.
    PermanodeAll,
    /// Every known blob.
    AllBlobs,
    /// Blobs under a canonical-form prefix.
    BlobPrefix(String),
}

impl CandidateSource {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            CandidateSource::PermanodeLastMod => "corpus_permanode_lastmod",
            CandidateSource::PermanodeAll => "corpus_permanode_desc",
            CandidateSource::AllBlobs => "scan_all_blobs",
            CandidateSource::BlobPrefix(_) => "blob_ref_prefix",
        }
    }
}

/// Where a continued query resumes: strictly after this sort position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResumePoint {
    pub last_mod: Timestamp,
    pub blob_ref: BlobRef,
}

#[derive(Debug, Clone)]
pub(crate) struct QueryPlan {
    pub constraint: Constraint,
    pub sort: SortType,
    pub limit: usize,
    pub source: CandidateSource,
    pub resume: Option<ResumePoint>,
    /// Fingerprint binding continuation tokens to this constraint+sort.
    pub fingerprint: String,
}

pub(crate) fn plan_query(
    limits: &SearchLimits,
    constraint: Constraint,
    sort: Option<SortType>,
    limit: Option<usize>,
    continue_token: Option<&str>,
) -> KeepsakeResult<QueryPlan> {
    let permanode_query = constraint.matches_permanodes_only();
    let sort = sort.unwrap_or(if permanode_query {
        SortType::LastModifiedDesc
    } else {
        SortType::Unspecified
    });
    let limit = limits.clamp_query_limit(limit, permanode_query);

    let source = if let Some(prefix) = constraint.required_prefix() {
        CandidateSource::BlobPrefix(prefix.to_string())
    } else if permanode_query && sort == SortType::LastModifiedDesc {
        CandidateSource::PermanodeLastMod
    } else if permanode_query {
        CandidateSource::PermanodeAll
    } else {
        CandidateSource::AllBlobs
    };

    let fingerprint = fingerprint(&constraint, sort);
    let resume = match continue_token {
        None => None,
        Some(token) => {
            if sort != SortType::LastModifiedDesc {
                return Err(KeepsakeError::invalid_input(
                    "continuation token is only supported for last-modified sorted queries",
                ));
            }
            Some(decode_continue_token(token, &fingerprint)?)
        }
    };

    Ok(QueryPlan {
        constraint,
        sort,
        limit,
        source,
        resume,
        fingerprint,
    })
}

/// Hash of the constraint and sort, binding a token to one query shape.
fn fingerprint(constraint: &Constraint, sort: SortType) -> String {
    let mut hasher = Sha224::new();
    // Constraint trees are plain data; serialization cannot fail.
    let encoded =
        serde_json::to_string(&(constraint, sort)).unwrap_or_else(|_| String::from("unencodable"));
    hasher.update(encoded.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

pub(crate) fn encode_continue_token(
    fingerprint: &str,
    last_mod: Timestamp,
    blob_ref: &BlobRef,
) -> String {
    format!(
        "ks:{fingerprint}:{}:{blob_ref}",
        last_mod.timestamp_nanos_opt().unwrap_or_default()
    )
}

fn decode_continue_token(token: &str, want_fingerprint: &str) -> KeepsakeResult<ResumePoint> {
    let bad = || KeepsakeError::invalid_input(format!("invalid continuation token {token:?}"));
    let mut parts = token.splitn(4, ':');
    let (tag, fp, nanos, br) = (
        parts.next().ok_or_else(bad)?,
        parts.next().ok_or_else(bad)?,
        parts.next().ok_or_else(bad)?,
        parts.next().ok_or_else(bad)?,
    );
    if tag != "ks" {
        return Err(bad());
    }
    if fp != want_fingerprint {
        return Err(KeepsakeError::invalid_input(
            "continuation token does not match this query",
        ));
    }
    let nanos: i64 = nanos.parse().map_err(|_| bad())?;
    let blob_ref = BlobRef::parse(br).ok_or_else(bad)?;
    Ok(ResumePoint {
        last_mod: chrono::Utc.timestamp_nanos(nanos),
        blob_ref,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::PermanodeConstraint;

    fn permanode_constraint() -> Constraint {
        Constraint::Permanode(Box::new(PermanodeConstraint::attr_value("tag", "x")))
    }

    #[test]
    fn permanode_queries_default_to_lastmod_sort_and_source() {
        let plan = plan_query(
            &SearchLimits::default(),
            permanode_constraint(),
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(plan.sort, SortType::LastModifiedDesc);
        assert_eq!(plan.source, CandidateSource::PermanodeLastMod);
        assert_eq!(plan.limit, 200);
    }

    #[test]
    fn blob_queries_scan_all_blobs() {
        let plan = plan_query(
            &SearchLimits::default(),
            Constraint::CamliType("file".to_string()),
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(plan.sort, SortType::Unspecified);
        assert_eq!(plan.source, CandidateSource::AllBlobs);
        assert_eq!(plan.limit, 1000);
    }

    #[test]
    fn prefix_constraint_picks_prefix_source() {
        let c = Constraint::and(
            Constraint::BlobRefPrefix("sha224-ab".to_string()),
            permanode_constraint(),
        );
        let plan = plan_query(&SearchLimits::default(), c, None, None, None).unwrap();
        assert_eq!(
            plan.source,
            CandidateSource::BlobPrefix("sha224-ab".to_string())
        );
    }

    #[test]
    fn continuation_token_round_trips_and_checks_fingerprint() {
        let plan = plan_query(
            &SearchLimits::default(),
            permanode_constraint(),
            None,
            None,
            None,
        )
        .unwrap();
        let br = BlobRef::from_content(b"x");
        let t = chrono::Utc.timestamp_opt(1_700_000_000, 42).unwrap();
        let token = encode_continue_token(&plan.fingerprint, t, &br);

        let resumed = plan_query(
            &SearchLimits::default(),
            permanode_constraint(),
            None,
            None,
            Some(&token),
        )
        .unwrap();
        let resume = resumed.resume.unwrap();
        assert_eq!(resume.blob_ref, br);
        assert_eq!(resume.last_mod, t);

        // A token minted for one query must not resume another.
        let other = plan_query(
            &SearchLimits::default(),
            Constraint::Permanode(Box::new(PermanodeConstraint::attr_value("tag", "y"))),
            None,
            None,
            Some(&token),
        );
        assert!(other.is_err());
    }
}
