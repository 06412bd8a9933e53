//! Describe engine
//!
//! A describe request expands from seed blobs through attribute references
//! into a meta-map: one public record per reached blob. The walk is a
//! concurrent, deduplicated fan-out over a work queue; per-BlobRef mutexes
//! serialize duplicate describes of the same blob without blocking
//! unrelated work; declarative rules drive further expansion until a fixed
//! point.

use crate::location::{resolve_location, LocationCtx};
use crate::{read_share, SearchHandler};
use keepsake_core::{
    fold_claims, scan_refs, BlobRef, CamliType, Cancel, Claim, FoldedAttrs, KeepsakeError,
    KeepsakeResult, Location, Timestamp, ATTR_NODE_TYPE,
};
use keepsake_index::{FileInfo, ImageInfo, Index};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

/// BlobRef canonical string to its described record.
pub type MetaMap = BTreeMap<String, DescribedBlob>;

/// A declarative expansion step.
///
/// When the optional gates pass for a described blob, every attribute
/// matching one of the name patterns (exact, or prefix via a trailing `*`)
/// contributes its parseable blob references to the walk. Sub-rules apply
/// only to blobs this rule itself produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescribeRule {
    /// Gate: only applies to the request's seed blobs.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub if_result_root: bool,
    /// Gate: only applies when the folded `camliNodeType` equals this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_camli_node_type: Option<String>,
    /// Attribute name patterns to follow.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<String>,
    /// Sub-rules scoped to this rule's expansions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<DescribeRule>,
}

impl DescribeRule {
    fn attr_matches(&self, attr: &str) -> bool {
        self.attrs.iter().any(|pattern| {
            match pattern.strip_suffix('*') {
                Some(prefix) => attr.starts_with(prefix),
                None => attr == pattern,
            }
        })
    }
}

/// A describe request: seeds, expansion rules, and bounds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescribeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_ref: Option<BlobRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blob_refs: Vec<BlobRef>,
    /// Legacy traversal depth; defaults to 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    /// Directory children materialized per node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_dir_children: Option<usize>,
    /// Evaluate permanode views at this time instead of now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<DescribeRule>,
}

impl DescribeRequest {
    /// All seed references, in request order.
    pub fn seed_refs(&self) -> Vec<BlobRef> {
        let mut seeds = Vec::with_capacity(self.blob_refs.len() + 1);
        if let Some(br) = &self.blob_ref {
            seeds.push(br.clone());
        }
        seeds.extend(self.blob_refs.iter().cloned());
        seeds
    }
}

/// The folded permanode view inside a described blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescribedPermanode {
    pub attr: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modtime: Option<Timestamp>,
}

/// The public record for one blob in a describe response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescribedBlob {
    pub blob_ref: Option<BlobRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camli_type: Option<CamliType>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permanode: Option<DescribedPermanode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<FileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_tags: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir_children: Option<Vec<BlobRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// Describe response: the meta-map plus per-blob errors.
///
/// A non-empty error map is the typed multi-error of a partially failed
/// describe; the meta-map still carries everything that succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescribeResponse {
    pub meta: MetaMap,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

impl DescribeResponse {
    /// The typed multi-error, when any per-blob describe failed.
    pub fn error(&self) -> Option<KeepsakeError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(KeepsakeError::Describe {
                errors: self.errors.clone(),
            })
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Default)]
struct WalkState {
    meta: MetaMap,
    started: HashSet<(BlobRef, usize)>,
    errs: BTreeMap<String, String>,
    per_blob: HashMap<BlobRef, Arc<Mutex<()>>>,
    folded: HashMap<BlobRef, Arc<FoldedAttrs>>,
    /// Per flattened rule: the blobs it produced, scoping its sub-rules.
    rule_hits: Vec<HashSet<BlobRef>>,
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<(BlobRef, usize)>,
    in_flight: usize,
}

struct FlatRule<'r> {
    rule: &'r DescribeRule,
    parent: Option<usize>,
}

fn flatten_rules<'r>(rules: &'r [DescribeRule], parent: Option<usize>, out: &mut Vec<FlatRule<'r>>) {
    for rule in rules {
        let id = out.len();
        out.push(FlatRule { rule, parent });
        flatten_rules(&rule.rules, Some(id), out);
    }
}

struct Describer<'a> {
    index: &'a dyn Index,
    owner: &'a str,
    cancel: &'a Cancel,
    at: Option<Timestamp>,
    dir_limit: usize,
    workers: usize,
    seeds: HashSet<BlobRef>,
    state: Mutex<WalkState>,
    queue: Mutex<Queue>,
    cond: Condvar,
}

impl<'a> Describer<'a> {
    fn state(&self) -> std::sync::MutexGuard<'_, WalkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a describe unit unless that (blob, depth) pair already ran.
    fn schedule(&self, br: BlobRef, depth: usize) {
        if depth == 0 {
            return;
        }
        {
            let mut state = self.state();
            if !state.started.insert((br.clone(), depth)) {
                return;
            }
        }
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.jobs.push_back((br, depth));
        }
        self.cond.notify_one();
    }

    /// Run workers until the queue drains (or cancellation fires).
    fn run_pool(&self) {
        std::thread::scope(|s| {
            for _ in 0..self.workers {
                s.spawn(|| self.worker());
            }
        });
    }

    fn worker(&self) {
        loop {
            let (br, depth) = {
                let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                loop {
                    if self.cancel.is_cancelled() {
                        return;
                    }
                    if let Some(job) = queue.jobs.pop_front() {
                        queue.in_flight += 1;
                        break job;
                    }
                    if queue.in_flight == 0 {
                        return;
                    }
                    queue = self.cond.wait(queue).unwrap_or_else(|e| e.into_inner());
                }
            };
            self.describe_one(&br, depth);
            {
                let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                queue.in_flight -= 1;
            }
            self.cond.notify_all();
        }
    }

    /// Describe a single blob and schedule its follow-ons. Exactly one
    /// concurrent unit builds the record; later units at other depths
    /// reuse it and only re-run traversal.
    fn describe_one(&self, br: &BlobRef, depth: usize) {
        if self.cancel.is_cancelled() {
            return;
        }
        let blob_lock = {
            let mut state = self.state();
            Arc::clone(state.per_blob.entry(br.clone()).or_default())
        };
        let _guard = blob_lock.lock().unwrap_or_else(|e| e.into_inner());

        let existing = self.state().meta.get(br.as_str()).cloned();
        let described = match existing {
            Some(db) => db,
            None => match self.build(br) {
                Ok(Some(db)) => {
                    self.state().meta.insert(br.to_string(), db.clone());
                    db
                }
                // Unknown blob: omitted from the meta-map, not an error.
                Ok(None) => return,
                Err(KeepsakeError::Cancelled) => return,
                Err(e) => {
                    tracing::warn!(blob = %br, error = %e, "describe unit failed");
                    self.state().errs.insert(br.to_string(), e.to_string());
                    return;
                }
            },
        };

        match described.camli_type {
            Some(CamliType::Permanode) => {
                let folded = self.state().folded.get(br).cloned();
                if let Some(folded) = folded {
                    // Defensive scan: references may hide in attribute
                    // names as well as values.
                    for (attr, values) in &folded.attrs {
                        for embedded in scan_refs(attr) {
                            self.schedule(embedded, depth.saturating_sub(1));
                        }
                        for value in values {
                            for embedded in scan_refs(value) {
                                self.schedule(embedded, depth.saturating_sub(1));
                            }
                        }
                    }
                }
            }
            Some(CamliType::Directory) => {
                if let Some(children) = &described.dir_children {
                    for child in children {
                        self.schedule(child.clone(), depth);
                    }
                }
            }
            _ => {}
        }
    }

    /// Build the public record for one blob. `Ok(None)` means the blob is
    /// unknown to the index.
    fn build(&self, br: &BlobRef) -> KeepsakeResult<Option<DescribedBlob>> {
        let meta = match self.index.get_blob_meta(self.cancel, br) {
            Ok(m) => m,
            Err(KeepsakeError::Index(e)) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut db = DescribedBlob {
            blob_ref: Some(br.clone()),
            camli_type: meta.camli_type,
            size: meta.size,
            ..Default::default()
        };

        match meta.camli_type {
            Some(CamliType::Permanode) => {
                let mut claims: Vec<Claim> = Vec::new();
                self.index
                    .append_claims(self.cancel, &mut claims, br, self.owner, None)?;
                let folded = Arc::new(fold_claims(&claims, self.at));
                let loc_ctx = LocationCtx {
                    index: self.index,
                    owner: self.owner,
                    cancel: self.cancel,
                    at: self.at,
                };
                db.location = resolve_location(&loc_ctx, br, &folded)?;
                db.permanode = Some(DescribedPermanode {
                    attr: folded.attrs.clone(),
                    modtime: folded.last_mod,
                });
                self.state().folded.insert(br.clone(), folded);
            }
            Some(CamliType::File) => {
                let info = self.index.get_file_info(self.cancel, br)?;
                if info.is_image() {
                    db.image = self.optional(self.index.get_image_info(self.cancel, br))?;
                    db.location = self.optional(self.index.get_file_location(self.cancel, br))?;
                }
                db.media_tags = self.optional(self.index.get_media_tags(self.cancel, br))?;
                db.file = Some(info);
            }
            Some(CamliType::Directory) => {
                db.dir = Some(self.index.get_file_info(self.cancel, br)?);
                db.dir_children = Some(self.dir_children(br)?);
            }
            Some(CamliType::Bytes) | None => {}
        }
        Ok(Some(db))
    }

    /// Lift a point lookup's not-found into `None`.
    fn optional<T>(&self, res: KeepsakeResult<T>) -> KeepsakeResult<Option<T>> {
        match res {
            Ok(v) => Ok(Some(v)),
            Err(KeepsakeError::Index(e)) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn dir_children(&self, br: &BlobRef) -> KeepsakeResult<Vec<BlobRef>> {
        let (index, cancel, limit) = (self.index, self.cancel, self.dir_limit);
        crate::collect_stream(32, move |tx| index.get_dir_members(cancel, br, &tx, limit))
    }

    /// One rule-expansion sweep over everything described so far. Returns
    /// the number of expansion hits scheduled.
    fn expand_rules(&self, flat: &[FlatRule<'_>]) -> usize {
        let snapshot: Vec<(BlobRef, Arc<FoldedAttrs>)> = {
            let state = self.state();
            state
                .folded
                .iter()
                .map(|(br, attrs)| (br.clone(), Arc::clone(attrs)))
                .collect()
        };
        let mut scheduled = 0;
        for (br, attrs) in &snapshot {
            for (rid, fr) in flat.iter().enumerate() {
                if fr.rule.if_result_root && !self.seeds.contains(br) {
                    continue;
                }
                if let Some(want) = &fr.rule.if_camli_node_type {
                    if attrs.first(ATTR_NODE_TYPE) != want {
                        continue;
                    }
                }
                if let Some(parent) = fr.parent {
                    let in_scope = self.state().rule_hits[parent].contains(br);
                    if !in_scope {
                        continue;
                    }
                }
                for (attr, values) in &attrs.attrs {
                    if !fr.rule.attr_matches(attr) {
                        continue;
                    }
                    for value in values {
                        if let Some(target) = BlobRef::parse(value) {
                            self.state().rule_hits[rid].insert(target.clone());
                            self.schedule(target, 1);
                            scheduled += 1;
                        }
                    }
                }
            }
        }
        scheduled
    }
}

impl SearchHandler {
    /// Materialize the requested blobs (and everything their rules reach)
    /// into a meta-map.
    pub fn describe(
        &self,
        cancel: &Cancel,
        req: &DescribeRequest,
    ) -> KeepsakeResult<DescribeResponse> {
        let _share = read_share(self.index());
        cancel.err_if_cancelled()?;

        let seeds = req.seed_refs();
        if seeds.is_empty() {
            return Err(KeepsakeError::invalid_input("no blobref given to describe"));
        }
        for seed in &seeds {
            if !seed.is_valid() {
                return Err(KeepsakeError::invalid_input(format!(
                    "invalid blobref {:?}",
                    seed.as_str()
                )));
            }
        }
        let depth = match req.depth {
            Some(d) if d > 0 => d,
            _ => 1,
        };
        tracing::debug!(seeds = seeds.len(), depth, rules = req.rules.len(), "describe");

        let mut flat = Vec::new();
        flatten_rules(&req.rules, None, &mut flat);

        let describer = Describer {
            index: self.index(),
            owner: self.owner(),
            cancel,
            at: req.at.or(self.fixed_now()),
            dir_limit: self.limits().clamp_dir_children(req.max_dir_children),
            workers: self.limits().workers.max(1),
            seeds: seeds.iter().cloned().collect(),
            state: Mutex::new(WalkState {
                rule_hits: vec![HashSet::new(); flat.len()],
                ..Default::default()
            }),
            queue: Mutex::new(Queue::default()),
            cond: Condvar::new(),
        };

        for seed in seeds {
            describer.schedule(seed, depth);
        }
        describer.run_pool();

        // Rule expansion to a fixed point: stop once an expansion sweep
        // no longer grows the meta-map.
        loop {
            cancel.err_if_cancelled()?;
            let before = describer.state().meta.len();
            if describer.expand_rules(&flat) == 0 {
                break;
            }
            describer.run_pool();
            if describer.state().meta.len() == before {
                break;
            }
        }
        cancel.err_if_cancelled()?;

        let state = describer
            .state
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        Ok(DescribeResponse {
            meta: state.meta,
            errors: state.errs,
        })
    }
}
