//! Shared fixtures for search integration tests

use chrono::{TimeZone, Utc};
use keepsake_core::{BlobRef, ClaimKind, Timestamp};
use keepsake_index::{FileInfo, InMemoryIndex};
use keepsake_search::SearchHandler;
use std::sync::Arc;

pub const OWNER: &str = "2931A67C26F5ABDA";

pub fn ts(n: i64) -> Timestamp {
    Utc.timestamp_opt(1_690_000_000 + n, 0).unwrap()
}

pub fn fixture() -> (Arc<InMemoryIndex>, SearchHandler) {
    let index = Arc::new(InMemoryIndex::new());
    let handler = SearchHandler::new(index.clone(), OWNER);
    (index, handler)
}

pub fn set_attr(index: &InMemoryIndex, pn: &BlobRef, attr: &str, value: &str, n: i64) -> BlobRef {
    index.add_claim(OWNER, pn, ClaimKind::SetAttribute, attr, value, ts(n))
}

pub fn add_attr(index: &InMemoryIndex, pn: &BlobRef, attr: &str, value: &str, n: i64) -> BlobRef {
    index.add_claim(OWNER, pn, ClaimKind::AddAttribute, attr, value, ts(n))
}

pub fn del_attr(index: &InMemoryIndex, pn: &BlobRef, attr: &str, value: &str, n: i64) -> BlobRef {
    index.add_claim(OWNER, pn, ClaimKind::DelAttribute, attr, value, ts(n))
}

/// Register an image file blob with metadata and pixel dimensions.
pub fn add_image(index: &InMemoryIndex, name: &str, width: i32, height: i32) -> BlobRef {
    let br = index.add_file(FileInfo {
        file_name: name.to_string(),
        size: 1024,
        mime_type: "image/jpeg".to_string(),
        whole_ref: Some(BlobRef::from_content(name.as_bytes())),
    });
    index.set_image_info(&br, width, height);
    br
}
