//! Wire types for the client surface
//!
//! These shapes are stable when exposed over HTTP/JSON; the HTTP layer
//! itself is a thin adapter elsewhere. Timestamps serialize as RFC-3339
//! with nanosecond precision, blob references as canonical strings.

use crate::describe::{DescribeRequest, DescribeResponse, MetaMap};
use keepsake_core::{BlobRef, CamliType, Claim, Constraint, Timestamp};
use serde::{Deserialize, Serialize};

/// Sort order for query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortType {
    #[default]
    Unspecified,
    LastModifiedDesc,
}

/// A search request: either a raw constraint tree or a human-facing
/// expression (never both).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Constraint>,
    /// Zero or absent means the planner's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortType>,
    /// When present, the results are fed through the describe engine and
    /// the meta-map is attached to the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub describe: Option<DescribeRequest>,
    /// Continuation token from a previous page of this same query.
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultBlob {
    pub blob: BlobRef,
}

/// Query response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchResponse {
    pub blobs: Vec<SearchResultBlob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<DescribeResponse>,
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
    /// Set when the candidate source failed after matches were already
    /// accumulated; the listed blobs are a valid but incomplete prefix.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub incomplete: bool,
}

// ============================================================================
// WRAPPER OPERATION TYPES
// ============================================================================

/// Request for a permanode's claim history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsRequest {
    pub permanode: BlobRef,
    /// Restrict to claims on one attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr_filter: Option<String>,
}

/// Claim history, date ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimsResponse {
    pub claims: Vec<Claim>,
}

/// Request for recently modified permanodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecentRequest {
    /// Maximum items; zero or absent for the default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<usize>,
    /// Only permanodes modified strictly before this time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentItem {
    pub blobref: BlobRef,
    pub modtime: Timestamp,
    pub owner: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecentResponse {
    pub recent: Vec<RecentItem>,
    #[serde(skip_serializing_if = "MetaMap::is_empty")]
    pub meta: MetaMap,
}

/// Request for permanodes carrying an attribute value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WithAttrRequest {
    /// Defaults to the handler's owner key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
    pub value: String,
    /// Empty means "any attribute" (requires `fuzzy`).
    pub attr: String,
    /// Substring, case-insensitive matching.
    pub fuzzy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithAttrItem {
    pub permanode: BlobRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithAttrResponse {
    pub with_attr: Vec<WithAttrItem>,
    #[serde(skip_serializing_if = "MetaMap::is_empty")]
    pub meta: MetaMap,
}

/// Request for claim-established paths from a signer to a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerPathsRequest {
    /// Defaults to the handler's owner key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
    pub target: BlobRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerPathsItem {
    pub claim_ref: BlobRef,
    pub base_ref: BlobRef,
    pub suffix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignerPathsResponse {
    pub paths: Vec<SignerPathsItem>,
}

/// Request for the living edges pointing at a blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgesRequest {
    pub to_ref: BlobRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeItem {
    pub from: BlobRef,
    pub from_type: CamliType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgesResponse {
    pub to_ref: BlobRef,
    pub edges_to: Vec<EdgeItem>,
}
