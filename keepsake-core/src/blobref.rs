//! Content-addressed blob references

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224};
use std::fmt;
use std::str::FromStr;

/// Regex matching blob references embedded in free text.
///
/// Used by the describe engine to pick candidate references out of
/// attribute keys and values. Deliberately anchored on the digest length
/// of each supported algorithm so a long hex run is not over-matched.
static BLOBREF_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(sha1-[0-9a-f]{40}|sha224-[0-9a-f]{56}|sha256-[0-9a-f]{64})\b")
        .expect("blobref pattern is valid")
});

/// A content-addressed blob reference: hash algorithm name plus hex digest.
///
/// The canonical string form is `<algorithm>-<hexdigest>`, for example
/// `sha224-d1b2...`. Equality, ordering, and hashing are all defined over
/// that canonical string. Construction does not validate; use
/// [`BlobRef::is_valid`] or [`BlobRef::parse`] when the input is untrusted.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    /// Wrap a canonical string without validating it.
    pub fn new(s: impl Into<String>) -> Self {
        BlobRef(s.into())
    }

    /// Parse a candidate string, returning `None` unless it is a
    /// well-formed reference with a supported algorithm.
    pub fn parse(s: &str) -> Option<Self> {
        let br = BlobRef(s.to_string());
        if br.is_valid() {
            Some(br)
        } else {
            None
        }
    }

    /// The blob reference of the given content, hashed with the store's
    /// current default algorithm (sha224).
    pub fn from_content(content: &[u8]) -> Self {
        let digest = Sha224::digest(content);
        BlobRef(format!("sha224-{}", hex::encode(digest)))
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The algorithm name, if the reference is well-formed.
    pub fn hash_name(&self) -> Option<&str> {
        self.0.split_once('-').map(|(alg, _)| alg)
    }

    /// Whether this is a well-formed reference with a supported algorithm
    /// and a digest of the right length.
    pub fn is_valid(&self) -> bool {
        let Some((alg, digest)) = self.0.split_once('-') else {
            return false;
        };
        let want = match alg {
            "sha1" => 40,
            "sha224" => 56,
            "sha256" => 64,
            _ => return false,
        };
        digest.len() == want && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Whether the canonical form starts with the given prefix.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

/// Scan free text for embedded blob references.
pub fn scan_refs(text: &str) -> Vec<BlobRef> {
    BLOBREF_PATTERN
        .find_iter(text)
        .map(|m| BlobRef(m.as_str().to_string()))
        .collect()
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({})", self.0)
    }
}

impl FromStr for BlobRef {
    type Err = crate::KeepsakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlobRef::parse(s)
            .ok_or_else(|| crate::KeepsakeError::invalid_input(format!("invalid blobref {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_content_is_canonical_sha224() {
        let br = BlobRef::from_content(b"foo");
        assert!(br.is_valid());
        assert_eq!(br.hash_name(), Some("sha224"));
        assert_eq!(BlobRef::from_content(b"foo"), br);
        assert_ne!(BlobRef::from_content(b"bar"), br);
    }

    #[test]
    fn validity_checks_algorithm_and_digest_length() {
        assert!(BlobRef::parse(&format!("sha224-{}", "0".repeat(56))).is_some());
        assert!(BlobRef::parse("sha224-abc").is_none());
        assert!(BlobRef::parse("md5-d41d8cd98f00b204e9800998ecf8427e").is_none());
        assert!(BlobRef::parse("notaref").is_none());
        // Uppercase hex is not canonical.
        let upper = format!("sha1-{}", "A".repeat(40));
        assert!(BlobRef::parse(&upper).is_none());
    }

    #[test]
    fn ordering_is_over_canonical_string() {
        let a = BlobRef::new(format!("sha224-{}", "a".repeat(56)));
        let b = BlobRef::new(format!("sha224-{}", "b".repeat(56)));
        assert!(a < b);
    }

    #[test]
    fn scan_refs_finds_embedded_references() {
        let target = BlobRef::from_content(b"hello");
        let text = format!("see {} and also junk sha224-zz", target);
        let found = scan_refs(&text);
        assert_eq!(found, vec![target]);
    }
}
