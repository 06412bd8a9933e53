//! Keepsake Index - Lookup Trait and In-Memory Implementation
//!
//! The index subsystem maintains secondary tables over the blob store
//! (claims by permanode, recency, file metadata, edges, paths). The search
//! core consults it exclusively through the [`Index`] trait defined here
//! and never reads the blob store directly. The production implementation
//! lives elsewhere; this crate ships the trait, its record types, and an
//! in-memory implementation for tests and development.

mod geocode;
mod lock;
mod mem;
mod types;

pub use geocode::{BoundingBox, Geocoder, StubGeocoder};
pub use lock::SharedLock;
pub use mem::InMemoryIndex;
pub use types::*;

use keepsake_core::{BlobRef, Cancel, Claim, KeepsakeResult, Location, Timestamp};
use std::collections::BTreeMap;
use std::sync::mpsc::SyncSender;

/// Typed lookups on the maintained secondary tables.
///
/// Point lookups return [`keepsake_core::IndexError::NotFound`] (wrapped in
/// the master error) when the record does not exist. Streaming operations
/// push into a bounded channel; when the receiver hangs up the
/// implementation must stop cleanly and return `Ok(())`, and every loop
/// must observe the cancellation handle.
///
/// `rlock`/`runlock` bracket a read share on the index's coarse
/// readers/writer lock. Callers hold a share for the duration of a query
/// or describe call; see `keepsake_search::read_share` for the RAII form.
pub trait Index: Send + Sync {
    fn rlock(&self);
    fn runlock(&self);

    /// Append all claims by `owner` on `permanode` to `dst`, optionally
    /// restricted to one attribute name. Order is unspecified.
    fn append_claims(
        &self,
        cancel: &Cancel,
        dst: &mut Vec<Claim>,
        permanode: &BlobRef,
        owner: &str,
        attr_filter: Option<&str>,
    ) -> KeepsakeResult<()>;

    fn get_blob_meta(&self, cancel: &Cancel, br: &BlobRef) -> KeepsakeResult<BlobMeta>;

    fn get_file_info(&self, cancel: &Cancel, br: &BlobRef) -> KeepsakeResult<FileInfo>;

    fn get_image_info(&self, cancel: &Cancel, br: &BlobRef) -> KeepsakeResult<ImageInfo>;

    fn get_media_tags(
        &self,
        cancel: &Cancel,
        br: &BlobRef,
    ) -> KeepsakeResult<BTreeMap<String, String>>;

    /// Location extracted from the file's embedded metadata (e.g. Exif).
    fn get_file_location(&self, cancel: &Cancel, br: &BlobRef) -> KeepsakeResult<Location>;

    /// Stream up to `limit` members of a directory blob.
    fn get_dir_members(
        &self,
        cancel: &Cancel,
        br: &BlobRef,
        dst: &SyncSender<BlobRef>,
        limit: usize,
    ) -> KeepsakeResult<()>;

    /// Stream up to `limit` of `owner`'s permanodes, most recently
    /// modified first, skipping any modified at or after `before`.
    fn get_recent_permanodes(
        &self,
        cancel: &Cancel,
        dst: &SyncSender<RecentPermanode>,
        owner: &str,
        limit: usize,
        before: Option<Timestamp>,
    ) -> KeepsakeResult<()>;

    /// Stream permanodes whose folded attributes match the query.
    fn search_permanodes_with_attr(
        &self,
        cancel: &Cancel,
        dst: &SyncSender<BlobRef>,
        query: &PermanodeByAttrQuery,
    ) -> KeepsakeResult<()>;

    /// The permanode on which `signer` currently claims `attr = value`.
    fn permanode_of_signer_attr_value(
        &self,
        cancel: &Cancel,
        signer: &str,
        attr: &str,
        value: &str,
    ) -> KeepsakeResult<BlobRef>;

    /// All `camliPath:*` paths by `signer` whose current value is `target`.
    fn paths_of_signer_target(
        &self,
        cancel: &Cancel,
        signer: &str,
        target: &BlobRef,
    ) -> KeepsakeResult<Vec<SignerPath>>;

    /// Raw membership edges pointing at `to`. Includes edges whose claims
    /// were later superseded; the search layer re-folds the source
    /// permanode to filter those.
    fn edges_to(
        &self,
        cancel: &Cancel,
        to: &BlobRef,
        opts: &EdgesToOpts,
    ) -> KeepsakeResult<Vec<Edge>>;

    /// File schema blobs whose whole-file digest is one of `whole_refs`.
    fn existing_file_schemas(
        &self,
        cancel: &Cancel,
        whole_refs: &[BlobRef],
    ) -> KeepsakeResult<BTreeMap<BlobRef, Vec<BlobRef>>>;

    // === Candidate-source enumerators ===

    /// Stream all of `owner`'s permanodes, most recently modified first.
    fn enumerate_permanodes_last_mod(
        &self,
        cancel: &Cancel,
        dst: &SyncSender<RecentPermanode>,
        owner: &str,
    ) -> KeepsakeResult<()>;

    /// Stream all of `owner`'s permanodes in blobref order.
    fn enumerate_permanodes(
        &self,
        cancel: &Cancel,
        dst: &SyncSender<BlobRef>,
        owner: &str,
    ) -> KeepsakeResult<()>;

    /// Stream every known blob in blobref order.
    fn enumerate_all_blobs(&self, cancel: &Cancel, dst: &SyncSender<BlobRef>)
        -> KeepsakeResult<()>;

    /// Stream every known blob whose canonical form starts with `prefix`,
    /// in blobref order.
    fn enumerate_blobs_with_prefix(
        &self,
        cancel: &Cancel,
        dst: &SyncSender<BlobRef>,
        prefix: &str,
    ) -> KeepsakeResult<()>;
}
