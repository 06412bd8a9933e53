//! Record types returned by index lookups

use chrono::{DateTime, Utc};
use keepsake_core::{BlobRef, CamliType, Timestamp};
use serde::{Deserialize, Serialize};

/// Size and declared kind of a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobMeta {
    pub size: u64,
    /// `None` for raw blobs with no schema.
    pub camli_type: Option<CamliType>,
}

/// File schema metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub file_name: String,
    pub size: i64,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub mime_type: String,
    /// Digest over the whole file contents, independent of chunking.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub whole_ref: Option<BlobRef>,
}

impl FileInfo {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Pixel dimensions of an image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: i32,
    pub height: i32,
}

/// One graph edge pointing at a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: BlobRef,
    pub from_type: CamliType,
    /// The membership attribute that created the edge (`camliMember` or a
    /// `camliPath:*` name).
    pub attr: String,
    pub to: BlobRef,
}

/// Options for an edges-to lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgesToOpts {
    pub max: Option<usize>,
}

/// A claim-established path from a base permanode to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerPath {
    pub claim_ref: BlobRef,
    pub base_ref: BlobRef,
    pub suffix: String,
}

/// A permanode with its last-modified time, as streamed by the
/// recency-ordered enumerators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentPermanode {
    pub permanode: BlobRef,
    pub signer: String,
    pub last_modified: DateTime<Utc>,
}

/// Query for `search_permanodes_with_attr`.
#[derive(Debug, Clone, PartialEq)]
pub struct PermanodeByAttrQuery {
    /// Attribute to match. Empty plus `fuzzy` means "any attribute".
    pub attr: String,
    pub value: String,
    pub signer: String,
    /// Substring, case-insensitive matching instead of exact.
    pub fuzzy: bool,
    /// Zero means no bound.
    pub max: usize,
    /// Evaluate attribute views at this time instead of now.
    pub at: Option<Timestamp>,
}
