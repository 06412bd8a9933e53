//! Keepsake Search - Describe Engine, Planner, and Executor
//!
//! The search core turns client requests into graph walks over permanodes
//! and their referenced blobs, merging signed claims into time-resolved
//! attribute views. It consults the index through the narrow trait in
//! `keepsake-index` and never reads the blob store directly. All calls are
//! synchronous; any transport is a thin adapter on top.

mod describe;
mod exec;
mod location;
mod plan;
mod query;

pub use describe::{
    DescribeRequest, DescribeResponse, DescribeRule, DescribedBlob, DescribedPermanode, MetaMap,
};
pub use query::*;

use keepsake_core::{
    fold_claims, BlobRef, Cancel, Claim, KeepsakeError, KeepsakeResult, SearchLimits, Timestamp,
    ATTR_CONTENT,
};
use keepsake_index::{EdgesToOpts, Geocoder, Index, PermanodeByAttrQuery};
use std::collections::HashSet;
use std::sync::mpsc::SyncSender;
use std::sync::{mpsc, Arc};

/// RAII read share on the index's coarse consistency boundary. Every
/// query and describe holds one for its whole duration; dropping the
/// guard releases the share on every exit path, panics included.
pub(crate) struct ReadShare<'a> {
    index: &'a dyn Index,
}

pub(crate) fn read_share(index: &dyn Index) -> ReadShare<'_> {
    index.rlock();
    ReadShare { index }
}

impl Drop for ReadShare<'_> {
    fn drop(&mut self) {
        self.index.runlock();
    }
}

/// Drain a channel-fed index stream into a vector. The producer runs on
/// its own scoped thread so bounded sends never deadlock against the
/// collecting side.
pub(crate) fn collect_stream<T, F>(buffer: usize, producer: F) -> KeepsakeResult<Vec<T>>
where
    T: Send,
    F: FnOnce(SyncSender<T>) -> KeepsakeResult<()> + Send,
{
    let (tx, rx) = mpsc::sync_channel(buffer);
    std::thread::scope(|s| {
        let handle = s.spawn(move || producer(tx));
        let items: Vec<T> = rx.iter().collect();
        handle
            .join()
            .map_err(|_| KeepsakeError::internal("stream producer panicked"))??;
        Ok(items)
    })
}

/// The search core: a value holding the index, the owner identity, and
/// per-instance configuration. Cheap to share behind an `Arc`; holds no
/// global state.
pub struct SearchHandler {
    index: Arc<dyn Index>,
    owner: String,
    geocoder: Option<Arc<dyn Geocoder>>,
    limits: SearchLimits,
    fixed_now: Option<Timestamp>,
    source_hook: Option<Box<dyn Fn(&'static str) + Send + Sync>>,
}

impl SearchHandler {
    pub fn new(index: Arc<dyn Index>, owner: impl Into<String>) -> Self {
        SearchHandler {
            index,
            owner: owner.into(),
            geocoder: None,
            limits: SearchLimits::default(),
            fixed_now: None,
            source_hook: None,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_limits(mut self, limits: SearchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Test hook: pin "now" for deterministic time-dependent folds.
    pub fn with_fixed_time(mut self, now: Timestamp) -> Self {
        self.fixed_now = Some(now);
        self
    }

    /// Test hook: observe which candidate source the planner picked.
    pub fn with_source_hook(
        mut self,
        hook: impl Fn(&'static str) + Send + Sync + 'static,
    ) -> Self {
        self.source_hook = Some(Box::new(hook));
        self
    }

    pub(crate) fn index(&self) -> &dyn Index {
        self.index.as_ref()
    }

    pub(crate) fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn limits(&self) -> &SearchLimits {
        &self.limits
    }

    pub(crate) fn fixed_now(&self) -> Option<Timestamp> {
        self.fixed_now
    }

    pub(crate) fn geocoder_ref(&self) -> Option<&dyn Geocoder> {
        self.geocoder.as_deref()
    }

    pub(crate) fn observe_source(&self, name: &'static str) {
        if let Some(hook) = &self.source_hook {
            hook(name);
        }
    }

    /// The describe rule attached to list-style wrapper responses:
    /// results expand through their content attributes.
    fn result_describe_rules() -> Vec<DescribeRule> {
        vec![DescribeRule {
            attrs: vec![ATTR_CONTENT.to_string(), "camliContentImage".to_string()],
            ..Default::default()
        }]
    }

    fn describe_all(
        &self,
        cancel: &Cancel,
        seeds: Vec<BlobRef>,
        at: Option<Timestamp>,
    ) -> KeepsakeResult<MetaMap> {
        if seeds.is_empty() {
            return Ok(MetaMap::new());
        }
        let req = DescribeRequest {
            blob_refs: seeds,
            at,
            rules: Self::result_describe_rules(),
            ..Default::default()
        };
        Ok(self.describe(cancel, &req)?.meta)
    }

    // ========================================================================
    // THIN WRAPPER OPERATIONS
    // ========================================================================

    /// The owner's claim history on a permanode, date ascending.
    pub fn get_claims(
        &self,
        cancel: &Cancel,
        req: &ClaimsRequest,
    ) -> KeepsakeResult<ClaimsResponse> {
        let _share = read_share(self.index());
        if !req.permanode.is_valid() {
            return Err(KeepsakeError::invalid_input(format!(
                "invalid permanode blobref {:?}",
                req.permanode.as_str()
            )));
        }
        let mut claims: Vec<Claim> = Vec::new();
        self.index().append_claims(
            cancel,
            &mut claims,
            &req.permanode,
            self.owner(),
            req.attr_filter.as_deref(),
        )?;
        claims.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.blob_ref.cmp(&b.blob_ref)));
        Ok(ClaimsResponse { claims })
    }

    /// The owner's most recently modified permanodes, described.
    pub fn get_recent_permanodes(
        &self,
        cancel: &Cancel,
        req: &RecentRequest,
    ) -> KeepsakeResult<RecentResponse> {
        let _share = read_share(self.index());
        let n = self.limits().clamp_query_limit(req.n, true);
        let index = self.index();
        let owner = self.owner();
        let before = req.before;
        let rows = collect_stream(self.limits().channel_buffer, move |tx| {
            index.get_recent_permanodes(cancel, &tx, owner, n, before)
        })?;

        let recent: Vec<RecentItem> = rows
            .into_iter()
            .map(|row| RecentItem {
                blobref: row.permanode,
                modtime: row.last_modified,
                owner: row.signer,
            })
            .collect();
        let meta = self.describe_all(
            cancel,
            recent.iter().map(|item| item.blobref.clone()).collect(),
            self.fixed_now(),
        )?;
        Ok(RecentResponse { recent, meta })
    }

    /// Permanodes carrying an attribute value, described.
    pub fn get_permanodes_with_attr(
        &self,
        cancel: &Cancel,
        req: &WithAttrRequest,
    ) -> KeepsakeResult<WithAttrResponse> {
        let _share = read_share(self.index());
        if req.attr.is_empty() && !req.fuzzy {
            return Err(KeepsakeError::invalid_input(
                "fuzzy is required when no attribute is given",
            ));
        }
        let query = PermanodeByAttrQuery {
            attr: req.attr.clone(),
            value: req.value.clone(),
            signer: req
                .signer
                .clone()
                .unwrap_or_else(|| self.owner().to_string()),
            fuzzy: req.fuzzy,
            max: self.limits().clamp_query_limit(req.max, true),
            at: req.at,
        };
        let index = self.index();
        let query_ref = &query;
        let permanodes = collect_stream(self.limits().channel_buffer, move |tx| {
            index.search_permanodes_with_attr(cancel, &tx, query_ref)
        })?;

        let meta = self.describe_all(cancel, permanodes.clone(), req.at)?;
        Ok(WithAttrResponse {
            with_attr: permanodes
                .into_iter()
                .map(|permanode| WithAttrItem { permanode })
                .collect(),
            meta,
        })
    }

    /// Claim-established paths from a signer to a target blob.
    pub fn get_signer_paths(
        &self,
        cancel: &Cancel,
        req: &SignerPathsRequest,
    ) -> KeepsakeResult<SignerPathsResponse> {
        let _share = read_share(self.index());
        let signer = req.signer.as_deref().unwrap_or(self.owner());
        let mut paths = self
            .index()
            .paths_of_signer_target(cancel, signer, &req.target)?;
        paths.sort_by(|a, b| {
            a.base_ref
                .cmp(&b.base_ref)
                .then_with(|| a.suffix.cmp(&b.suffix))
        });
        Ok(SignerPathsResponse {
            paths: paths
                .into_iter()
                .map(|p| SignerPathsItem {
                    claim_ref: p.claim_ref,
                    base_ref: p.base_ref,
                    suffix: p.suffix,
                })
                .collect(),
        })
    }

    /// Membership edges pointing at a blob, with superseded claims folded
    /// away: a parent that deleted its membership no longer appears.
    pub fn edges_to(&self, cancel: &Cancel, req: &EdgesRequest) -> KeepsakeResult<EdgesResponse> {
        let _share = read_share(self.index());
        let raw = self
            .index()
            .edges_to(cancel, &req.to_ref, &EdgesToOpts::default())?;
        let mut seen: HashSet<BlobRef> = HashSet::new();
        let mut edges_to = Vec::new();
        for edge in raw {
            let mut claims: Vec<Claim> = Vec::new();
            self.index()
                .append_claims(cancel, &mut claims, &edge.from, self.owner(), None)?;
            let folded = fold_claims(&claims, self.fixed_now());
            if folded.has_value(&edge.attr, req.to_ref.as_str()) && seen.insert(edge.from.clone())
            {
                edges_to.push(EdgeItem {
                    from: edge.from,
                    from_type: edge.from_type,
                });
            }
        }
        edges_to.sort_by(|a, b| a.from.cmp(&b.from));
        Ok(EdgesResponse {
            to_ref: req.to_ref.clone(),
            edges_to,
        })
    }
}
