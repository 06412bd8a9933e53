//! Query executor
//!
//! Runs a plan as a bounded pipeline: one producer streams candidate
//! blobrefs from the chosen source, a fixed worker pool evaluates the
//! constraint tree against each, and matches accumulate in a sort
//! structure owned by the request. Claim folds are memoized per permanode
//! per request.

use crate::describe::DescribeResponse;
use crate::location::{resolve_location, LocationCtx};
use crate::plan::{encode_continue_token, plan_query, CandidateSource, QueryPlan, ResumePoint};
use crate::query::{SearchQuery, SearchResponse, SearchResultBlob, SortType};
use crate::{read_share, SearchHandler};
use keepsake_core::{
    is_hidden, BlobRef, CamliType, Cancel, Claim, Constraint, FileConstraint, FoldedAttrs,
    KeepsakeError, KeepsakeResult, LogicalConstraint, LogicalOp, PermanodeConstraint,
    RelationConstraint, Timestamp, ATTR_MEMBER, ATTR_PATH_PREFIX,
};
use keepsake_expr::{parse_expression, PredicateCtx};
use keepsake_index::{BlobMeta, EdgesToOpts, Index, RecentPermanode};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

struct Candidate {
    br: BlobRef,
    /// Known for recency-ordered sources; computed from the fold
    /// otherwise.
    last_mod: Option<Timestamp>,
}

// ============================================================================
// CONSTRAINT MATCHER
// ============================================================================

/// Evaluates constraint trees against blobs, with request-scoped caches
/// for blob metadata and claim folds.
pub(crate) struct Matcher<'a> {
    index: &'a dyn Index,
    owner: &'a str,
    cancel: &'a Cancel,
    metas: Mutex<HashMap<BlobRef, Option<BlobMeta>>>,
    folds: Mutex<HashMap<(BlobRef, Option<Timestamp>), Arc<FoldedAttrs>>>,
}

impl<'a> Matcher<'a> {
    pub(crate) fn new(index: &'a dyn Index, owner: &'a str, cancel: &'a Cancel) -> Self {
        Matcher {
            index,
            owner,
            cancel,
            metas: Mutex::new(HashMap::new()),
            folds: Mutex::new(HashMap::new()),
        }
    }

    fn blob_meta(&self, br: &BlobRef) -> KeepsakeResult<Option<BlobMeta>> {
        if let Some(cached) = self.metas.lock().unwrap_or_else(|e| e.into_inner()).get(br) {
            return Ok(*cached);
        }
        let meta = match self.index.get_blob_meta(self.cancel, br) {
            Ok(m) => Some(m),
            Err(KeepsakeError::Index(e)) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        self.metas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(br.clone(), meta);
        Ok(meta)
    }

    /// The memoized folded view of a permanode: one fold per
    /// (permanode, time) per request.
    pub(crate) fn folded(
        &self,
        br: &BlobRef,
        at: Option<Timestamp>,
    ) -> KeepsakeResult<Arc<FoldedAttrs>> {
        let key = (br.clone(), at);
        if let Some(hit) = self.folds.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Ok(Arc::clone(hit));
        }
        let mut claims: Vec<Claim> = Vec::new();
        self.index
            .append_claims(self.cancel, &mut claims, br, self.owner, None)?;
        let folded = Arc::new(keepsake_core::fold_claims(&claims, at));
        self.folds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::clone(&folded));
        Ok(folded)
    }

    pub(crate) fn matches(&self, c: &Constraint, br: &BlobRef) -> KeepsakeResult<bool> {
        self.cancel.err_if_cancelled()?;
        match c {
            Constraint::Anything => Ok(true),
            Constraint::AnyCamliType => {
                Ok(self.blob_meta(br)?.and_then(|m| m.camli_type).is_some())
            }
            Constraint::BlobRefPrefix(prefix) => Ok(br.has_prefix(prefix)),
            Constraint::CamliType(want) => Ok(self
                .blob_meta(br)?
                .and_then(|m| m.camli_type)
                .is_some_and(|ct| ct.as_str() == want)),
            Constraint::BlobSize(ic) => Ok(self
                .blob_meta(br)?
                .is_some_and(|m| ic.matches(m.size as i64))),
            Constraint::Logical(l) => self.logical_matches(l, br),
            Constraint::Permanode(pc) => self.permanode_matches(pc, br),
            Constraint::File(fc) => self.file_matches(fc, br),
        }
    }

    fn logical_matches(&self, l: &LogicalConstraint, br: &BlobRef) -> KeepsakeResult<bool> {
        if l.op == LogicalOp::Not {
            return Ok(!self.matches(&l.a, br)?);
        }
        let Some(b) = &l.b else {
            return Err(KeepsakeError::invalid_input(
                "binary logical constraint missing second operand",
            ));
        };
        match l.op {
            LogicalOp::And => Ok(self.matches(&l.a, br)? && self.matches(b, br)?),
            LogicalOp::Or => Ok(self.matches(&l.a, br)? || self.matches(b, br)?),
            LogicalOp::Xor => Ok(self.matches(&l.a, br)? ^ self.matches(b, br)?),
            LogicalOp::Not => unreachable!("handled above"),
        }
    }

    fn permanode_matches(&self, pc: &PermanodeConstraint, br: &BlobRef) -> KeepsakeResult<bool> {
        let is_permanode = self
            .blob_meta(br)?
            .and_then(|m| m.camli_type)
            .is_some_and(|ct| ct == CamliType::Permanode);
        if !is_permanode {
            return Ok(false);
        }
        let folded = self.folded(br, pc.at)?;

        if pc.skip_hidden && is_hidden(&folded) {
            return Ok(false);
        }

        // With an empty attribute name the constraint ranges over every
        // value of every attribute (fulltext fallback).
        let values: Vec<&String> = if pc.attr.is_empty() {
            folded.attrs.values().flatten().collect()
        } else {
            folded.values(&pc.attr).iter().collect()
        };

        if let Some(want) = &pc.value {
            if want.is_empty() {
                if !values.is_empty() {
                    return Ok(false);
                }
            } else if !values.iter().any(|v| *v == want) {
                return Ok(false);
            }
        }
        if let Some(sc) = &pc.value_matches {
            let ok = if pc.value_all {
                !values.is_empty() && values.iter().all(|v| sc.matches(v))
            } else {
                values.iter().any(|v| sc.matches(v))
            };
            if !ok {
                return Ok(false);
            }
        }
        if let Some(sub) = &pc.value_in_set {
            let mut hit = false;
            for value in &values {
                if let Some(target) = BlobRef::parse(value) {
                    if self.matches(sub, &target)? {
                        hit = true;
                        break;
                    }
                }
            }
            if !hit {
                return Ok(false);
            }
        }
        if let Some(ic) = &pc.num_value {
            if !ic.matches(values.len() as i64) {
                return Ok(false);
            }
        }
        if let Some(tc) = &pc.mod_time {
            match folded.last_mod {
                Some(t) if tc.matches(t) => {}
                _ => return Ok(false),
            }
        }
        if let Some(lc) = &pc.location {
            let ctx = LocationCtx {
                index: self.index,
                owner: self.owner,
                cancel: self.cancel,
                at: pc.at,
            };
            match resolve_location(&ctx, br, &folded)? {
                Some(loc) if lc.matches(loc) => {}
                _ => return Ok(false),
            }
        }
        if let Some(rel) = &pc.relation {
            if !self.relation_matches(rel, br, &folded)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn relation_matches(
        &self,
        rel: &RelationConstraint,
        br: &BlobRef,
        folded: &FoldedAttrs,
    ) -> KeepsakeResult<bool> {
        let related: Vec<BlobRef> = match rel.relation.as_str() {
            "parent" => self.live_parents(br)?,
            "child" => folded
                .attrs
                .iter()
                .filter(|(attr, _)| *attr == ATTR_MEMBER || attr.starts_with(ATTR_PATH_PREFIX))
                .flat_map(|(_, values)| values.iter())
                .filter_map(|v| BlobRef::parse(v))
                .collect(),
            other => {
                return Err(KeepsakeError::invalid_input(format!(
                    "unknown relation {other:?}; expected parent or child"
                )))
            }
        };
        if let Some(any) = &rel.any {
            for r in &related {
                if self.matches(any, r)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        if let Some(all) = &rel.all {
            if related.is_empty() {
                return Ok(false);
            }
            for r in &related {
                if !self.matches(all, r)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        Err(KeepsakeError::invalid_input(
            "relation constraint needs an any or all sub-constraint",
        ))
    }

    /// Permanodes whose *current* folded membership attributes still
    /// reference `br`. Raw index edges include superseded claims.
    fn live_parents(&self, br: &BlobRef) -> KeepsakeResult<Vec<BlobRef>> {
        let raw = self
            .index
            .edges_to(self.cancel, br, &EdgesToOpts::default())?;
        let mut parents = Vec::new();
        for edge in raw {
            let folded = self.folded(&edge.from, None)?;
            if folded.has_value(&edge.attr, br.as_str()) && !parents.contains(&edge.from) {
                parents.push(edge.from);
            }
        }
        Ok(parents)
    }

    fn file_matches(&self, fc: &FileConstraint, br: &BlobRef) -> KeepsakeResult<bool> {
        let is_file = self
            .blob_meta(br)?
            .and_then(|m| m.camli_type)
            .is_some_and(|ct| ct == CamliType::File);
        if !is_file {
            return Ok(false);
        }
        let info = match self.index.get_file_info(self.cancel, br) {
            Ok(info) => info,
            Err(KeepsakeError::Index(e)) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };

        if let Some(sc) = &fc.file_name {
            if !sc.matches(&info.file_name) {
                return Ok(false);
            }
        }
        if let Some(sc) = &fc.mime_type {
            if !sc.matches(&info.mime_type) {
                return Ok(false);
            }
        }
        if let Some(ic) = &fc.file_size {
            if !ic.matches(info.size) {
                return Ok(false);
            }
        }

        let needs_image = fc.is_image
            || fc.width.is_some()
            || fc.height.is_some()
            || fc.wh_ratio.is_some();
        if needs_image {
            let image = match self.index.get_image_info(self.cancel, br) {
                Ok(image) => image,
                Err(KeepsakeError::Index(e)) if e.is_not_found() => return Ok(false),
                Err(e) => return Err(e),
            };
            if let Some(ic) = &fc.width {
                if !ic.matches(image.width as i64) {
                    return Ok(false);
                }
            }
            if let Some(ic) = &fc.height {
                if !ic.matches(image.height as i64) {
                    return Ok(false);
                }
            }
            if let Some(rc) = &fc.wh_ratio {
                if image.height == 0 {
                    return Ok(false);
                }
                if !rc.matches(image.width as f64 / image.height as f64) {
                    return Ok(false);
                }
            }
        }
        if let Some(lc) = &fc.location {
            match self.index.get_file_location(self.cancel, br) {
                Ok(loc) if lc.matches(loc) => {}
                Ok(_) => return Ok(false),
                Err(KeepsakeError::Index(e)) if e.is_not_found() => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

// ============================================================================
// RESULT ACCUMULATION
// ============================================================================

enum Accumulator {
    /// Last-modified descending: a limit-sized min-heap over
    /// (modtime, blobref); ties resolve on the blobref.
    Heap {
        heap: BinaryHeap<Reverse<(Timestamp, BlobRef)>>,
        limit: usize,
        matched: usize,
    },
    /// Unspecified sort: arrival order until the limit is hit.
    Arrival { rows: Vec<BlobRef>, limit: usize },
}

impl Accumulator {
    fn new(sort: SortType, limit: usize) -> Self {
        match sort {
            SortType::LastModifiedDesc => Accumulator::Heap {
                heap: BinaryHeap::with_capacity(limit + 1),
                limit,
                matched: 0,
            },
            SortType::Unspecified => Accumulator::Arrival {
                rows: Vec::new(),
                limit,
            },
        }
    }

    fn push(&mut self, br: BlobRef, last_mod: Timestamp) {
        match self {
            Accumulator::Heap {
                heap,
                limit,
                matched,
            } => {
                *matched += 1;
                heap.push(Reverse((last_mod, br)));
                if heap.len() > *limit {
                    heap.pop();
                }
            }
            Accumulator::Arrival { rows, limit } => {
                if rows.len() < *limit {
                    rows.push(br);
                }
            }
        }
    }

    /// Whether workers can stop consuming candidates early.
    fn saturated(&self) -> bool {
        match self {
            // The heap must see every match to sort correctly.
            Accumulator::Heap { .. } => false,
            Accumulator::Arrival { rows, limit } => rows.len() >= *limit,
        }
    }

    /// Sorted rows plus the continuation sort key, when more matches
    /// exist past the limit.
    fn finalize(self) -> (Vec<BlobRef>, Option<(Timestamp, BlobRef)>) {
        match self {
            Accumulator::Heap {
                heap,
                limit,
                matched,
            } => {
                let mut rows: Vec<(Timestamp, BlobRef)> =
                    heap.into_iter().map(|Reverse(key)| key).collect();
                rows.sort_by(|a, b| b.cmp(a));
                let next = if matched > limit {
                    rows.last().cloned()
                } else {
                    None
                };
                (rows.into_iter().map(|(_, br)| br).collect(), next)
            }
            Accumulator::Arrival { rows, .. } => (rows, None),
        }
    }
}

/// Strictly after the resume point in (modtime desc, blobref desc) order.
fn past_resume(resume: &ResumePoint, last_mod: Timestamp, br: &BlobRef) -> bool {
    last_mod < resume.last_mod || (last_mod == resume.last_mod && *br < resume.blob_ref)
}

fn store_first(slot: &Mutex<Option<KeepsakeError>>, err: KeepsakeError) {
    let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
    if slot.is_none() {
        *slot = Some(err);
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

impl SearchHandler {
    /// Run a search query: constraint (or compiled expression) against the
    /// planned candidate source, with sorting, limit, continuation, and
    /// optional describe-after-query.
    pub fn query(&self, cancel: &Cancel, q: &SearchQuery) -> KeepsakeResult<SearchResponse> {
        let _share = read_share(self.index());
        cancel.err_if_cancelled()?;

        let constraint = match (&q.constraint, &q.expression) {
            (Some(_), Some(expr)) if !expr.trim().is_empty() => {
                return Err(KeepsakeError::invalid_input(
                    "cannot set both constraint and expression",
                ))
            }
            (Some(c), _) => c.clone(),
            (None, Some(expr)) => {
                let ctx = PredicateCtx {
                    cancel,
                    geocoder: self.geocoder_ref(),
                    at: self.fixed_now(),
                };
                parse_expression(&ctx, expr)?
            }
            (None, None) => Constraint::skip_hidden_base(),
        };

        let plan = plan_query(
            self.limits(),
            constraint,
            q.sort,
            q.limit,
            q.continue_token.as_deref(),
        )?;
        self.observe_source(plan.source.name());
        tracing::debug!(
            source = plan.source.name(),
            limit = plan.limit,
            "running query"
        );

        let mut response = self.run_plan(cancel, &plan)?;

        if let Some(describe) = &q.describe {
            let description = if response.blobs.is_empty() {
                DescribeResponse::default()
            } else {
                let mut dreq = describe.clone();
                dreq.blob_ref = None;
                dreq.blob_refs = response.blobs.iter().map(|b| b.blob.clone()).collect();
                self.describe(cancel, &dreq)?
            };
            response.description = Some(description);
        }
        Ok(response)
    }

    fn run_plan(&self, cancel: &Cancel, plan: &QueryPlan) -> KeepsakeResult<SearchResponse> {
        let index = self.index();
        let owner = self.owner();
        let buffer = self.limits().channel_buffer.max(1);
        let workers = self.limits().workers.max(1);

        let matcher = Matcher::new(index, owner, cancel);
        let acc = Mutex::new(Accumulator::new(plan.sort, plan.limit));
        let source_err: Mutex<Option<KeepsakeError>> = Mutex::new(None);
        let match_err: Mutex<Option<KeepsakeError>> = Mutex::new(None);

        std::thread::scope(|s| {
            let (cand_tx, cand_rx) = mpsc::sync_channel::<Candidate>(buffer);

            // Producer side: the index enumerator streams into a typed
            // channel; a forwarder adapts rows into candidates. The
            // enumerator stops cleanly once the consumer hangs up.
            match plan.source.clone() {
                CandidateSource::PermanodeLastMod => {
                    let (tx, rx) = mpsc::sync_channel::<RecentPermanode>(buffer);
                    let source_err = &source_err;
                    s.spawn(move || {
                        if let Err(e) = index.enumerate_permanodes_last_mod(cancel, &tx, owner) {
                            store_first(source_err, e);
                        }
                    });
                    s.spawn(move || {
                        for row in rx {
                            let cand = Candidate {
                                br: row.permanode,
                                last_mod: Some(row.last_modified),
                            };
                            if cand_tx.send(cand).is_err() {
                                break;
                            }
                        }
                    });
                }
                source => {
                    let (tx, rx) = mpsc::sync_channel::<BlobRef>(buffer);
                    let source_err = &source_err;
                    s.spawn(move || {
                        let res = match &source {
                            CandidateSource::PermanodeAll => {
                                index.enumerate_permanodes(cancel, &tx, owner)
                            }
                            CandidateSource::AllBlobs => index.enumerate_all_blobs(cancel, &tx),
                            CandidateSource::BlobPrefix(prefix) => {
                                index.enumerate_blobs_with_prefix(cancel, &tx, prefix)
                            }
                            CandidateSource::PermanodeLastMod => unreachable!("handled above"),
                        };
                        if let Err(e) = res {
                            store_first(source_err, e);
                        }
                    });
                    s.spawn(move || {
                        for br in rx {
                            if cand_tx.send(Candidate { br, last_mod: None }).is_err() {
                                break;
                            }
                        }
                    });
                }
            }

            // Worker pool.
            let cand_rx = Arc::new(Mutex::new(cand_rx));
            for _ in 0..workers {
                let cand_rx = Arc::clone(&cand_rx);
                let matcher = &matcher;
                let acc = &acc;
                let match_err = &match_err;
                let resume = plan.resume.as_ref();
                let constraint = &plan.constraint;
                s.spawn(move || loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let next = {
                        let rx = cand_rx.lock().unwrap_or_else(|e| e.into_inner());
                        rx.recv()
                    };
                    let Ok(cand) = next else { return };
                    if acc.lock().unwrap_or_else(|e| e.into_inner()).saturated() {
                        return;
                    }
                    // Cheap pre-filter when the source already knows the
                    // sort key.
                    if let (Some(rp), Some(t)) = (resume, cand.last_mod) {
                        if !past_resume(rp, t, &cand.br) {
                            continue;
                        }
                    }
                    match matcher.matches(constraint, &cand.br) {
                        Ok(false) => {}
                        Ok(true) => {
                            let last_mod = match cand.last_mod {
                                Some(t) => Some(t),
                                None => match matcher.folded(&cand.br, None) {
                                    Ok(folded) => folded.last_mod,
                                    Err(e) => {
                                        store_first(match_err, e);
                                        continue;
                                    }
                                },
                            };
                            let last_mod =
                                last_mod.unwrap_or(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH);
                            if let Some(rp) = resume {
                                if !past_resume(rp, last_mod, &cand.br) {
                                    continue;
                                }
                            }
                            acc.lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .push(cand.br, last_mod);
                        }
                        Err(KeepsakeError::Cancelled) => return,
                        Err(e) => store_first(match_err, e),
                    }
                });
            }
            drop(cand_rx);
        });

        cancel.err_if_cancelled()?;

        let (rows, next) = acc.into_inner().unwrap_or_else(|e| e.into_inner()).finalize();
        let error = source_err
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .or(match_err.into_inner().unwrap_or_else(|e| e.into_inner()));
        if let Some(err) = error {
            if rows.is_empty() {
                return Err(err);
            }
            tracing::warn!(error = %err, "query returned partial results");
            return Ok(SearchResponse {
                blobs: rows
                    .into_iter()
                    .map(|blob| SearchResultBlob { blob })
                    .collect(),
                incomplete: true,
                ..Default::default()
            });
        }

        let continue_token =
            next.map(|(t, br)| encode_continue_token(&plan.fingerprint, t, &br));
        Ok(SearchResponse {
            blobs: rows
                .into_iter()
                .map(|blob| SearchResultBlob { blob })
                .collect(),
            continue_token,
            ..Default::default()
        })
    }
}
