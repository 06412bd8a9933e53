//! Property-Based Tests for Claim Folding
//!
//! Properties:
//! - Determinism: folding is a pure function of the claim *set*; input
//!   order never matters (the folder sorts on (date, claim blobref)).
//! - Time monotonicity: folding at t1 <= t2 sees exactly the claims with
//!   date <= t1; no later claim leaks into the earlier view.

use chrono::{TimeZone, Utc};
use keepsake_core::{fold_claims, BlobRef, Claim, ClaimKind, Timestamp};
use proptest::prelude::*;

// ============================================================================
// ARBITRATORS
// ============================================================================

fn arb_kind() -> impl Strategy<Value = ClaimKind> {
    prop_oneof![
        Just(ClaimKind::SetAttribute),
        Just(ClaimKind::AddAttribute),
        Just(ClaimKind::DelAttribute),
        Just(ClaimKind::Other("keep-claim".to_string())),
    ]
}

fn arb_date() -> impl Strategy<Value = Timestamp> {
    // A handful of instants so timestamp collisions actually happen.
    (0i64..8).prop_map(|n| Utc.timestamp_opt(1_600_000_000 + n * 60, 0).unwrap())
}

fn arb_claims() -> impl Strategy<Value = Vec<Claim>> {
    // Distinct seeds give every claim a distinct blobref, as in the store:
    // two distinct claim blobs never share a reference.
    prop::collection::vec(
        (
            any::<u32>(),
            arb_kind(),
            arb_date(),
            prop::sample::select(vec!["tag", "title", "camliContent"]),
            prop::sample::select(vec!["", "a", "b", "c"]),
        ),
        0..24,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .map(|(seed, kind, date, attr, value)| Claim {
                blob_ref: BlobRef::from_content(format!("claim-{seed}").as_bytes()),
                signer: "key1".to_string(),
                permanode: BlobRef::from_content(b"pn"),
                date,
                kind,
                attr: attr.to_string(),
                value: value.to_string(),
            })
            .collect()
    })
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn folding_ignores_input_order(
        orders in arb_claims().prop_flat_map(|claims| {
            (Just(claims.clone()), Just(claims).prop_shuffle())
        }),
    ) {
        let (a, b) = orders;
        prop_assert_eq!(fold_claims(&a, None), fold_claims(&b, None));
    }

    #[test]
    fn folding_at_earlier_time_sees_only_earlier_claims(
        claims in arb_claims(),
        cutoff in arb_date(),
    ) {
        let at_cutoff = fold_claims(&claims, Some(cutoff));
        let truncated: Vec<Claim> = claims
            .iter()
            .filter(|c| c.date <= cutoff)
            .cloned()
            .collect();
        prop_assert_eq!(at_cutoff, fold_claims(&truncated, None));
    }

    #[test]
    fn folded_values_are_distinct_per_attribute(claims in arb_claims()) {
        let folded = fold_claims(&claims, None);
        for (attr, values) in &folded.attrs {
            let mut seen = std::collections::HashSet::new();
            for v in values {
                prop_assert!(seen.insert(v), "duplicate value {:?} under {:?}", v, attr);
                prop_assert!(!v.is_empty(), "empty value stored under {:?}", attr);
            }
        }
    }
}
