//! Permanode location resolution
//!
//! A permanode's location is derived by a three-rule priority:
//!
//! 1. Direct: folded `latitude`/`longitude` attributes parse as floats.
//! 2. Alternate reference: the folded `camliNodeType` names a known type
//!    whose location lives on a referenced permanode (e.g. a check-in's
//!    venue). The referenced node is resolved with rules 1 and 3 only, so
//!    reference chains never recurse further.
//! 3. File content: the folded `camliContent` points at a file the index
//!    has a location for (typically from Exif).
//!
//! The resolver runs once per result row on large result sets, so the
//! no-location path allocates nothing beyond the claim fetch.

use keepsake_core::{
    fold_claims, BlobRef, Cancel, Claim, FoldedAttrs, KeepsakeError, KeepsakeResult, Location,
    Timestamp, ATTR_CONTENT, ATTR_LATITUDE, ATTR_LONGITUDE, ATTR_NODE_TYPE,
};
use keepsake_index::Index;

/// Node types whose location is carried by a referenced permanode:
/// `(camliNodeType value, attribute naming the referenced permanode)`.
const ALT_LOCATION_REFS: &[(&str, &str)] = &[("foursquare:checkin", "foursquareVenuePermanode")];

pub(crate) struct LocationCtx<'a> {
    pub index: &'a dyn Index,
    pub owner: &'a str,
    pub cancel: &'a Cancel,
    pub at: Option<Timestamp>,
}

/// Resolve the location of a permanode whose folded view is `attrs`.
/// `Ok(None)` means no rule applied.
pub(crate) fn resolve_location(
    ctx: &LocationCtx<'_>,
    br: &BlobRef,
    attrs: &FoldedAttrs,
) -> KeepsakeResult<Option<Location>> {
    resolve(ctx, br, attrs, true, &mut Vec::new())
}

fn resolve(
    ctx: &LocationCtx<'_>,
    br: &BlobRef,
    attrs: &FoldedAttrs,
    follow_refs: bool,
    visited: &mut Vec<BlobRef>,
) -> KeepsakeResult<Option<Location>> {
    ctx.cancel.err_if_cancelled()?;

    // Rule 1: direct attributes.
    if let (Ok(latitude), Ok(longitude)) = (
        attrs.first(ATTR_LATITUDE).parse::<f64>(),
        attrs.first(ATTR_LONGITUDE).parse::<f64>(),
    ) {
        return Ok(Some(Location {
            latitude,
            longitude,
        }));
    }

    // Rule 2: alternate-reference node types, one hop at most.
    if follow_refs {
        let node_type = attrs.first(ATTR_NODE_TYPE);
        if let Some((_, ref_attr)) = ALT_LOCATION_REFS.iter().find(|(t, _)| *t == node_type) {
            if let Some(target) = BlobRef::parse(attrs.first(ref_attr)) {
                if !visited.contains(&target) && &target != br {
                    visited.push(target.clone());
                    let mut claims: Vec<Claim> = Vec::new();
                    ctx.index.append_claims(
                        ctx.cancel,
                        &mut claims,
                        &target,
                        ctx.owner,
                        None,
                    )?;
                    let target_attrs = fold_claims(&claims, ctx.at);
                    if let Some(loc) = resolve(ctx, &target, &target_attrs, false, visited)? {
                        return Ok(Some(loc));
                    }
                }
            }
        }
    }

    // Rule 3: location of the content file.
    if let Some(content) = BlobRef::parse(attrs.first(ATTR_CONTENT)) {
        match ctx.index.get_file_location(ctx.cancel, &content) {
            Ok(loc) => return Ok(Some(loc)),
            Err(KeepsakeError::Index(e)) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    Ok(None)
}
