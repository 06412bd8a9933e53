//! Resource limits configuration

use serde::{Deserialize, Serialize};

/// Tunable limits for the search core. One instance per handler; never
/// process-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchLimits {
    /// Default result limit for permanode-rooted queries.
    pub default_permanode_limit: usize,
    /// Default result limit for blob-scan queries.
    pub default_blob_limit: usize,
    /// Hard cap on any requested result limit.
    pub max_limit: usize,
    /// Default number of directory children a describe materializes.
    pub default_dir_children: usize,
    /// Hard cap on directory children per node.
    pub max_dir_children: usize,
    /// Worker threads in the executor pool and the describe fan-out.
    pub workers: usize,
    /// Buffer size of the producer-to-worker candidate channel.
    pub channel_buffer: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        SearchLimits {
            default_permanode_limit: 200,
            default_blob_limit: 1000,
            max_limit: 1000,
            default_dir_children: 50,
            max_dir_children: 1000,
            workers: 4,
            channel_buffer: 32,
        }
    }
}

impl SearchLimits {
    /// Resolve a requested query limit against defaults and the cap.
    /// Zero or absent means "use the default".
    pub fn clamp_query_limit(&self, requested: Option<usize>, permanode_query: bool) -> usize {
        let default = if permanode_query {
            self.default_permanode_limit
        } else {
            self.default_blob_limit
        };
        match requested {
            None | Some(0) => default.min(self.max_limit),
            Some(n) => n.min(self.max_limit),
        }
    }

    /// Resolve a requested directory-children limit.
    pub fn clamp_dir_children(&self, requested: Option<usize>) -> usize {
        match requested {
            None | Some(0) => self.default_dir_children.min(self.max_dir_children),
            Some(n) => n.min(self.max_dir_children),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_clamp() {
        let limits = SearchLimits::default();
        assert_eq!(limits.clamp_query_limit(None, true), 200);
        assert_eq!(limits.clamp_query_limit(Some(0), false), 1000);
        assert_eq!(limits.clamp_query_limit(Some(5000), true), 1000);
        assert_eq!(limits.clamp_dir_children(None), 50);
        assert_eq!(limits.clamp_dir_children(Some(9999)), 1000);
    }
}
