//! In-memory Index implementation for testing.
//!
//! Secondary tables are materialized lazily from a flat claim list rather
//! than maintained incrementally; with test-sized stores that keeps the
//! implementation small while preserving the trait's observable behavior.

use crate::{
    BlobMeta, Edge, EdgesToOpts, FileInfo, ImageInfo, Index, PermanodeByAttrQuery,
    RecentPermanode, SharedLock, SignerPath,
};
use keepsake_core::{
    fold_claims, BlobRef, CamliType, Cancel, Claim, ClaimKind, FoldedAttrs, IndexError,
    KeepsakeResult, Location, Timestamp, ATTR_MEMBER, ATTR_PATH_PREFIX,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc::SyncSender;
use std::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    blobs: BTreeMap<BlobRef, BlobMeta>,
    claims: Vec<Claim>,
    files: HashMap<BlobRef, FileInfo>,
    images: HashMap<BlobRef, ImageInfo>,
    media_tags: HashMap<BlobRef, BTreeMap<String, String>>,
    file_locations: HashMap<BlobRef, Location>,
    dirs: HashMap<BlobRef, Vec<BlobRef>>,
}

/// In-memory [`Index`] implementation.
///
/// Interior state sits behind an `RwLock`; the coarse consistency boundary
/// the trait exposes is a separate [`SharedLock`], mirroring how the
/// production index layers its locks.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    lock: SharedLock,
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // === Test-construction helpers ===

    /// Register a raw or schema blob and return its reference.
    pub fn put_blob(&self, content: &[u8], camli_type: Option<CamliType>) -> BlobRef {
        let br = BlobRef::from_content(content);
        self.write().blobs.insert(
            br.clone(),
            BlobMeta {
                size: content.len() as u64,
                camli_type,
            },
        );
        br
    }

    /// Create a permanode blob from a seed string.
    pub fn new_permanode(&self, seed: &str) -> BlobRef {
        self.put_blob(
            format!("permanode:{seed}").as_bytes(),
            Some(CamliType::Permanode),
        )
    }

    /// Record a claim, returning the claim blob's reference.
    pub fn add_claim(
        &self,
        signer: &str,
        permanode: &BlobRef,
        kind: ClaimKind,
        attr: &str,
        value: &str,
        date: Timestamp,
    ) -> BlobRef {
        let blob_ref = BlobRef::from_content(
            format!(
                "claim:{signer}:{permanode}:{}:{attr}:{value}:{date}",
                kind.as_str()
            )
            .as_bytes(),
        );
        self.write().claims.push(Claim {
            blob_ref: blob_ref.clone(),
            signer: signer.to_string(),
            permanode: permanode.clone(),
            date,
            kind,
            attr: attr.to_string(),
            value: value.to_string(),
        });
        blob_ref
    }

    /// Register a file schema blob with its metadata.
    pub fn add_file(&self, info: FileInfo) -> BlobRef {
        let br = self.put_blob(
            format!("file:{}:{}", info.file_name, info.size).as_bytes(),
            Some(CamliType::File),
        );
        self.write().files.insert(br.clone(), info);
        br
    }

    /// Register a directory blob with its members.
    pub fn add_dir(&self, name: &str, members: Vec<BlobRef>) -> BlobRef {
        let br = self.put_blob(format!("dir:{name}").as_bytes(), Some(CamliType::Directory));
        let mut state = self.write();
        state.files.insert(
            br.clone(),
            FileInfo {
                file_name: name.to_string(),
                size: 0,
                mime_type: String::new(),
                whole_ref: None,
            },
        );
        state.dirs.insert(br.clone(), members);
        br
    }

    pub fn set_image_info(&self, br: &BlobRef, width: i32, height: i32) {
        self.write()
            .images
            .insert(br.clone(), ImageInfo { width, height });
    }

    pub fn set_media_tags(&self, br: &BlobRef, tags: BTreeMap<String, String>) {
        self.write().media_tags.insert(br.clone(), tags);
    }

    pub fn set_file_location(&self, br: &BlobRef, latitude: f64, longitude: f64) {
        self.write().file_locations.insert(
            br.clone(),
            Location {
                latitude,
                longitude,
            },
        );
    }

    // Test construction happens before queries run, so the helpers take
    // only the interior lock, not the coarse consistency boundary.
    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> KeepsakeResult<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| IndexError::LockPoisoned.into())
    }
}

/// Fold the view of `permanode` as claimed by `owner` at time `at`.
fn folded(state: &State, permanode: &BlobRef, owner: &str, at: Option<Timestamp>) -> FoldedAttrs {
    let claims: Vec<Claim> = state
        .claims
        .iter()
        .filter(|c| &c.permanode == permanode && c.signer == owner)
        .cloned()
        .collect();
    fold_claims(&claims, at)
}

/// Distinct permanodes `owner` has claimed on, in blobref order.
fn owned_permanodes(state: &State, owner: &str) -> Vec<BlobRef> {
    let mut set: Vec<BlobRef> = state
        .claims
        .iter()
        .filter(|c| c.signer == owner)
        .map(|c| c.permanode.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    set.sort();
    set
}

/// Owner's permanodes with their last-modified times, newest first,
/// blobref descending on ties. This matches the executor's output order
/// for last-modified sorts, which the recency candidate source relies on.
fn permanodes_by_recency(state: &State, owner: &str) -> Vec<RecentPermanode> {
    let mut rows: Vec<RecentPermanode> = owned_permanodes(state, owner)
        .into_iter()
        .filter_map(|pn| {
            folded(state, &pn, owner, None).last_mod.map(|t| RecentPermanode {
                permanode: pn,
                signer: owner.to_string(),
                last_modified: t,
            })
        })
        .collect();
    rows.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| b.permanode.cmp(&a.permanode))
    });
    rows
}

/// Push into a bounded channel. `Ok(false)` means the receiver hung up
/// and the enumeration should stop cleanly.
fn send_or_stop<T>(cancel: &Cancel, dst: &SyncSender<T>, item: T) -> KeepsakeResult<bool> {
    cancel.err_if_cancelled()?;
    Ok(dst.send(item).is_ok())
}

fn is_membership_attr(attr: &str) -> bool {
    attr == ATTR_MEMBER || attr.starts_with(ATTR_PATH_PREFIX)
}

impl Index for InMemoryIndex {
    fn rlock(&self) {
        self.lock.rlock();
    }

    fn runlock(&self) {
        self.lock.runlock();
    }

    fn append_claims(
        &self,
        cancel: &Cancel,
        dst: &mut Vec<Claim>,
        permanode: &BlobRef,
        owner: &str,
        attr_filter: Option<&str>,
    ) -> KeepsakeResult<()> {
        cancel.err_if_cancelled()?;
        let state = self.read()?;
        dst.extend(
            state
                .claims
                .iter()
                .filter(|c| &c.permanode == permanode && c.signer == owner)
                .filter(|c| attr_filter.map_or(true, |a| c.attr == a))
                .cloned(),
        );
        Ok(())
    }

    fn get_blob_meta(&self, cancel: &Cancel, br: &BlobRef) -> KeepsakeResult<BlobMeta> {
        cancel.err_if_cancelled()?;
        let state = self.read()?;
        state
            .blobs
            .get(br)
            .copied()
            .ok_or_else(|| IndexError::NotFound(br.clone()).into())
    }

    fn get_file_info(&self, cancel: &Cancel, br: &BlobRef) -> KeepsakeResult<FileInfo> {
        cancel.err_if_cancelled()?;
        let state = self.read()?;
        state
            .files
            .get(br)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(br.clone()).into())
    }

    fn get_image_info(&self, cancel: &Cancel, br: &BlobRef) -> KeepsakeResult<ImageInfo> {
        cancel.err_if_cancelled()?;
        let state = self.read()?;
        state
            .images
            .get(br)
            .copied()
            .ok_or_else(|| IndexError::NotFound(br.clone()).into())
    }

    fn get_media_tags(
        &self,
        cancel: &Cancel,
        br: &BlobRef,
    ) -> KeepsakeResult<BTreeMap<String, String>> {
        cancel.err_if_cancelled()?;
        let state = self.read()?;
        state
            .media_tags
            .get(br)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(br.clone()).into())
    }

    fn get_file_location(&self, cancel: &Cancel, br: &BlobRef) -> KeepsakeResult<Location> {
        cancel.err_if_cancelled()?;
        let state = self.read()?;
        state
            .file_locations
            .get(br)
            .copied()
            .ok_or_else(|| IndexError::NotFound(br.clone()).into())
    }

    fn get_dir_members(
        &self,
        cancel: &Cancel,
        br: &BlobRef,
        dst: &SyncSender<BlobRef>,
        limit: usize,
    ) -> KeepsakeResult<()> {
        let members = {
            let state = self.read()?;
            state
                .dirs
                .get(br)
                .cloned()
                .ok_or_else(|| IndexError::NotFound(br.clone()))?
        };
        for member in members.into_iter().take(limit) {
            if !send_or_stop(cancel, dst, member)? {
                break;
            }
        }
        Ok(())
    }

    fn get_recent_permanodes(
        &self,
        cancel: &Cancel,
        dst: &SyncSender<RecentPermanode>,
        owner: &str,
        limit: usize,
        before: Option<Timestamp>,
    ) -> KeepsakeResult<()> {
        let rows = {
            let state = self.read()?;
            permanodes_by_recency(&state, owner)
        };
        let mut sent = 0;
        for row in rows {
            if let Some(before) = before {
                if row.last_modified >= before {
                    continue;
                }
            }
            if !send_or_stop(cancel, dst, row)? {
                return Ok(());
            }
            sent += 1;
            if limit > 0 && sent >= limit {
                break;
            }
        }
        Ok(())
    }

    fn search_permanodes_with_attr(
        &self,
        cancel: &Cancel,
        dst: &SyncSender<BlobRef>,
        query: &PermanodeByAttrQuery,
    ) -> KeepsakeResult<()> {
        let matches = {
            let state = self.read()?;
            let mut matches = Vec::new();
            for pn in owned_permanodes(&state, &query.signer) {
                cancel.err_if_cancelled()?;
                let attrs = folded(&state, &pn, &query.signer, query.at);
                let candidates: Vec<&String> = if query.attr.is_empty() {
                    attrs.attrs.values().flatten().collect()
                } else {
                    attrs.values(&query.attr).iter().collect()
                };
                let hit = candidates.iter().any(|v| {
                    if query.fuzzy {
                        v.to_lowercase().contains(&query.value.to_lowercase())
                    } else {
                        v.as_str() == query.value
                    }
                });
                if hit {
                    matches.push(pn);
                }
            }
            matches
        };
        let mut sent = 0;
        for pn in matches {
            if !send_or_stop(cancel, dst, pn)? {
                return Ok(());
            }
            sent += 1;
            if query.max > 0 && sent >= query.max {
                break;
            }
        }
        Ok(())
    }

    fn permanode_of_signer_attr_value(
        &self,
        cancel: &Cancel,
        signer: &str,
        attr: &str,
        value: &str,
    ) -> KeepsakeResult<BlobRef> {
        cancel.err_if_cancelled()?;
        let state = self.read()?;
        for pn in owned_permanodes(&state, signer) {
            if folded(&state, &pn, signer, None).has_value(attr, value) {
                return Ok(pn);
            }
        }
        Err(IndexError::NoMatch {
            what: format!("permanode of {signer} with {attr}={value}"),
        }
        .into())
    }

    fn paths_of_signer_target(
        &self,
        cancel: &Cancel,
        signer: &str,
        target: &BlobRef,
    ) -> KeepsakeResult<Vec<SignerPath>> {
        cancel.err_if_cancelled()?;
        let state = self.read()?;
        let mut ordered: Vec<&Claim> = state
            .claims
            .iter()
            .filter(|c| c.signer == signer && c.attr.starts_with(ATTR_PATH_PREFIX))
            .collect();
        ordered.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.blob_ref.cmp(&b.blob_ref)));

        // Current establishing claim per (base permanode, path attr).
        let mut current: BTreeMap<(BlobRef, String), &Claim> = BTreeMap::new();
        for claim in ordered {
            let key = (claim.permanode.clone(), claim.attr.clone());
            match claim.kind {
                ClaimKind::SetAttribute | ClaimKind::AddAttribute => {
                    current.insert(key, claim);
                }
                ClaimKind::DelAttribute => {
                    if claim.value.is_empty()
                        || current.get(&key).is_some_and(|c| c.value == claim.value)
                    {
                        current.remove(&key);
                    }
                }
                ClaimKind::Other(_) => {}
            }
        }

        Ok(current
            .into_iter()
            .filter(|(_, claim)| claim.value == target.as_str())
            .map(|((base, attr), claim)| SignerPath {
                claim_ref: claim.blob_ref.clone(),
                base_ref: base,
                suffix: attr[ATTR_PATH_PREFIX.len()..].to_string(),
            })
            .collect())
    }

    fn edges_to(
        &self,
        cancel: &Cancel,
        to: &BlobRef,
        opts: &EdgesToOpts,
    ) -> KeepsakeResult<Vec<Edge>> {
        cancel.err_if_cancelled()?;
        let state = self.read()?;
        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for claim in &state.claims {
            if !is_membership_attr(&claim.attr) || claim.value != to.as_str() {
                continue;
            }
            if !matches!(claim.kind, ClaimKind::AddAttribute | ClaimKind::SetAttribute) {
                continue;
            }
            if !seen.insert((claim.permanode.clone(), claim.attr.clone())) {
                continue;
            }
            edges.push(Edge {
                from: claim.permanode.clone(),
                from_type: CamliType::Permanode,
                attr: claim.attr.clone(),
                to: to.clone(),
            });
            if opts.max.is_some_and(|m| edges.len() >= m) {
                break;
            }
        }
        edges.sort_by(|a, b| a.from.cmp(&b.from).then_with(|| a.attr.cmp(&b.attr)));
        Ok(edges)
    }

    fn existing_file_schemas(
        &self,
        cancel: &Cancel,
        whole_refs: &[BlobRef],
    ) -> KeepsakeResult<BTreeMap<BlobRef, Vec<BlobRef>>> {
        cancel.err_if_cancelled()?;
        let state = self.read()?;
        let mut out: BTreeMap<BlobRef, Vec<BlobRef>> = BTreeMap::new();
        for (br, info) in &state.files {
            if let Some(whole) = &info.whole_ref {
                if whole_refs.contains(whole) {
                    out.entry(whole.clone()).or_default().push(br.clone());
                }
            }
        }
        for schemas in out.values_mut() {
            schemas.sort();
        }
        Ok(out)
    }

    fn enumerate_permanodes_last_mod(
        &self,
        cancel: &Cancel,
        dst: &SyncSender<RecentPermanode>,
        owner: &str,
    ) -> KeepsakeResult<()> {
        let rows = {
            let state = self.read()?;
            permanodes_by_recency(&state, owner)
        };
        for row in rows {
            if !send_or_stop(cancel, dst, row)? {
                break;
            }
        }
        Ok(())
    }

    fn enumerate_permanodes(
        &self,
        cancel: &Cancel,
        dst: &SyncSender<BlobRef>,
        owner: &str,
    ) -> KeepsakeResult<()> {
        let permanodes = {
            let state = self.read()?;
            owned_permanodes(&state, owner)
        };
        for pn in permanodes {
            if !send_or_stop(cancel, dst, pn)? {
                break;
            }
        }
        Ok(())
    }

    fn enumerate_all_blobs(
        &self,
        cancel: &Cancel,
        dst: &SyncSender<BlobRef>,
    ) -> KeepsakeResult<()> {
        let blobs: Vec<BlobRef> = {
            let state = self.read()?;
            state.blobs.keys().cloned().collect()
        };
        for br in blobs {
            if !send_or_stop(cancel, dst, br)? {
                break;
            }
        }
        Ok(())
    }

    fn enumerate_blobs_with_prefix(
        &self,
        cancel: &Cancel,
        dst: &SyncSender<BlobRef>,
        prefix: &str,
    ) -> KeepsakeResult<()> {
        let blobs: Vec<BlobRef> = {
            let state = self.read()?;
            state
                .blobs
                .keys()
                .filter(|br| br.has_prefix(prefix))
                .cloned()
                .collect()
        };
        for br in blobs {
            if !send_or_stop(cancel, dst, br)? {
                break;
            }
        }
        Ok(())
    }
}
