//! Schema constants and blob kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// The declared kind of a schema blob.
///
/// Raw blobs have no kind; wire types carry `Option<CamliType>` and omit
/// the field when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CamliType {
    Permanode,
    File,
    Directory,
    Bytes,
}

impl CamliType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CamliType::Permanode => "permanode",
            CamliType::File => "file",
            CamliType::Directory => "directory",
            CamliType::Bytes => "bytes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "permanode" => Some(CamliType::Permanode),
            "file" => Some(CamliType::File),
            "directory" => Some(CamliType::Directory),
            "bytes" => Some(CamliType::Bytes),
            _ => None,
        }
    }
}

impl fmt::Display for CamliType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// WELL-KNOWN ATTRIBUTE NAMES
// ============================================================================

/// Attribute pointing a permanode at its current content blob.
pub const ATTR_CONTENT: &str = "camliContent";

/// Attribute recording set membership on a collection permanode.
pub const ATTR_MEMBER: &str = "camliMember";

/// Prefix for named-path membership attributes (`camliPath:<suffix>`).
pub const ATTR_PATH_PREFIX: &str = "camliPath:";

/// Attribute naming the application-level node type of a permanode.
pub const ATTR_NODE_TYPE: &str = "camliNodeType";

/// Attribute controlling default visibility. A permanode whose folded
/// attributes contain `camliDefVis = "hide"` is skipped by queries that
/// request hidden-node filtering.
pub const ATTR_DEF_VIS: &str = "camliDefVis";

/// The `camliDefVis` value that marks a permanode hidden.
pub const DEF_VIS_HIDE: &str = "hide";

/// Direct latitude/longitude attributes, parsed as floats.
pub const ATTR_LATITUDE: &str = "latitude";
pub const ATTR_LONGITUDE: &str = "longitude";

/// Human-facing attributes used by expression predicates.
pub const ATTR_TAG: &str = "tag";
pub const ATTR_TITLE: &str = "title";
