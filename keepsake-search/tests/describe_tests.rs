//! Describe engine integration tests

mod support;

use keepsake_core::{BlobRef, Cancel, CamliType};
use keepsake_index::FileInfo;
use keepsake_search::{DescribeRequest, DescribeRule};
use support::*;

fn content_rule() -> DescribeRule {
    DescribeRule {
        attrs: vec!["camliContent".to_string()],
        ..Default::default()
    }
}

#[test]
fn permanode_with_content_file_expands_through_rule() {
    let (index, handler) = fixture();
    let cancel = Cancel::new();

    let file = index.add_file(FileInfo {
        file_name: "dude-gps.jpg".to_string(),
        size: 4096,
        mime_type: "image/jpeg".to_string(),
        whole_ref: None,
    });
    let pn = index.new_permanode("photo");
    set_attr(&index, &pn, "camliContent", file.as_str(), 1);

    let res = handler
        .describe(
            &cancel,
            &DescribeRequest {
                blob_ref: Some(pn.clone()),
                rules: vec![content_rule()],
                ..Default::default()
            },
        )
        .unwrap();

    assert!(res.errors.is_empty());
    assert_eq!(res.meta.len(), 2, "seed and its content file");
    let described_pn = &res.meta[pn.as_str()];
    let permanode = described_pn.permanode.as_ref().unwrap();
    assert_eq!(
        permanode.attr["camliContent"],
        vec![file.as_str().to_string()]
    );
    assert_eq!(permanode.modtime, Some(ts(1)));
    let described_file = &res.meta[file.as_str()];
    assert_eq!(
        described_file.file.as_ref().unwrap().file_name,
        "dude-gps.jpg"
    );
    assert_eq!(described_file.camli_type, Some(CamliType::File));
}

#[test]
fn duplicate_seeds_produce_one_entry() {
    let (index, handler) = fixture();
    let cancel = Cancel::new();
    let pn = index.new_permanode("dup");
    set_attr(&index, &pn, "title", "once", 1);

    let res = handler
        .describe(
            &cancel,
            &DescribeRequest {
                blob_ref: Some(pn.clone()),
                blob_refs: vec![pn.clone(), pn.clone()],
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(res.meta.len(), 1);
    assert!(res.meta.contains_key(pn.as_str()));
}

#[test]
fn cyclic_membership_terminates() {
    let (index, handler) = fixture();
    let cancel = Cancel::new();
    let a = index.new_permanode("cycle-a");
    let b = index.new_permanode("cycle-b");
    add_attr(&index, &a, "camliMember", b.as_str(), 1);
    add_attr(&index, &b, "camliMember", a.as_str(), 2);

    let res = handler
        .describe(
            &cancel,
            &DescribeRequest {
                blob_ref: Some(a.clone()),
                rules: vec![DescribeRule {
                    attrs: vec!["camliMember".to_string()],
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
        .unwrap();
    // Finite meta despite the cycle: just the two nodes.
    assert_eq!(res.meta.len(), 2);
    assert!(res.meta.contains_key(a.as_str()) && res.meta.contains_key(b.as_str()));
}

#[test]
fn sub_rules_are_scoped_to_parent_expansions() {
    let (index, handler) = fixture();
    let cancel = Cancel::new();

    // seed1 --a--> mid --b--> deep     (rule chain should reach deep)
    // seed2 --b--> stray               (no parent-rule production: stays out)
    let deep = index.new_permanode("deep");
    let stray = index.new_permanode("stray");
    let mid = index.new_permanode("mid");
    set_attr(&index, &mid, "b", deep.as_str(), 1);
    let seed1 = index.new_permanode("seed1");
    set_attr(&index, &seed1, "a", mid.as_str(), 2);
    let seed2 = index.new_permanode("seed2");
    set_attr(&index, &seed2, "b", stray.as_str(), 3);

    let res = handler
        .describe(
            &cancel,
            &DescribeRequest {
                blob_refs: vec![seed1.clone(), seed2.clone()],
                rules: vec![DescribeRule {
                    attrs: vec!["a".to_string()],
                    rules: vec![DescribeRule {
                        attrs: vec!["b".to_string()],
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
        .unwrap();

    assert!(res.meta.contains_key(mid.as_str()), "parent rule fired");
    assert!(res.meta.contains_key(deep.as_str()), "sub-rule fired on mid");
    assert!(
        !res.meta.contains_key(stray.as_str()),
        "sub-rule must not fire on seed2: it was not produced by the parent rule"
    );
}

#[test]
fn result_root_gate_limits_rules_to_seeds() {
    let (index, handler) = fixture();
    let cancel = Cancel::new();

    let inner = index.new_permanode("inner");
    let outer = index.new_permanode("outer");
    set_attr(&index, &outer, "link", inner.as_str(), 1);
    let seed = index.new_permanode("root-seed");
    set_attr(&index, &seed, "link", outer.as_str(), 2);

    let res = handler
        .describe(
            &cancel,
            &DescribeRequest {
                blob_ref: Some(seed.clone()),
                rules: vec![DescribeRule {
                    if_result_root: true,
                    attrs: vec!["link".to_string()],
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
        .unwrap();

    assert!(res.meta.contains_key(outer.as_str()));
    assert!(
        !res.meta.contains_key(inner.as_str()),
        "root-gated rule must not fire on non-seed blobs"
    );
}

#[test]
fn node_type_gate() {
    let (index, handler) = fixture();
    let cancel = Cancel::new();

    let venue = index.new_permanode("venue");
    let checkin = index.new_permanode("checkin");
    set_attr(&index, &checkin, "camliNodeType", "foursquare:checkin", 1);
    set_attr(&index, &checkin, "venue", venue.as_str(), 2);
    let plain = index.new_permanode("plain");
    set_attr(&index, &plain, "venue", venue.as_str(), 3);

    let rule = DescribeRule {
        if_camli_node_type: Some("foursquare:checkin".to_string()),
        attrs: vec!["venue".to_string()],
        ..Default::default()
    };
    let res = handler
        .describe(
            &cancel,
            &DescribeRequest {
                blob_ref: Some(checkin.clone()),
                rules: vec![rule.clone()],
                ..Default::default()
            },
        )
        .unwrap();
    assert!(res.meta.contains_key(venue.as_str()));

    let res = handler
        .describe(
            &cancel,
            &DescribeRequest {
                blob_ref: Some(plain.clone()),
                rules: vec![rule],
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!res.meta.contains_key(venue.as_str()));
}

#[test]
fn wildcard_attr_patterns_follow_path_attributes() {
    let (index, handler) = fixture();
    let cancel = Cancel::new();
    let child = index.new_permanode("pathchild");
    let base = index.new_permanode("pathbase");
    set_attr(&index, &base, "camliPath:photos/2016", child.as_str(), 1);

    let res = handler
        .describe(
            &cancel,
            &DescribeRequest {
                blob_ref: Some(base.clone()),
                rules: vec![DescribeRule {
                    attrs: vec!["camliPath:*".to_string()],
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
        .unwrap();
    assert!(res.meta.contains_key(child.as_str()));
}

#[test]
fn directory_children_are_bounded_and_described() {
    let (index, handler) = fixture();
    let cancel = Cancel::new();

    let f1 = index.add_file(FileInfo {
        file_name: "a.txt".to_string(),
        size: 1,
        mime_type: "text/plain".to_string(),
        whole_ref: None,
    });
    let f2 = index.add_file(FileInfo {
        file_name: "b.txt".to_string(),
        size: 2,
        mime_type: "text/plain".to_string(),
        whole_ref: None,
    });
    let dir = index.add_dir("stuff", vec![f1.clone(), f2.clone()]);

    let res = handler
        .describe(
            &cancel,
            &DescribeRequest {
                blob_ref: Some(dir.clone()),
                ..Default::default()
            },
        )
        .unwrap();
    let described = &res.meta[dir.as_str()];
    assert_eq!(described.camli_type, Some(CamliType::Directory));
    assert_eq!(
        described.dir_children.as_ref().unwrap(),
        &vec![f1.clone(), f2.clone()]
    );
    // Children ride along at the same depth.
    assert!(res.meta.contains_key(f1.as_str()) && res.meta.contains_key(f2.as_str()));

    let res = handler
        .describe(
            &cancel,
            &DescribeRequest {
                blob_ref: Some(dir.clone()),
                max_dir_children: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(res.meta[dir.as_str()].dir_children.as_ref().unwrap().len(), 1);
}

#[test]
fn missing_blob_is_omitted_without_error() {
    let (_index, handler) = fixture();
    let cancel = Cancel::new();
    let ghost = BlobRef::from_content(b"never uploaded");

    let res = handler
        .describe(
            &cancel,
            &DescribeRequest {
                blob_ref: Some(ghost.clone()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(res.meta.is_empty());
    assert!(res.errors.is_empty());
    assert!(res.error().is_none());
}

#[test]
fn per_blob_failures_do_not_abort_the_walk() {
    let (index, handler) = fixture();
    let cancel = Cancel::new();

    // A blob declared as a file with no file-info row is an index
    // inconsistency: its describe fails, the other seed still lands.
    let broken = index.put_blob(b"broken file", Some(CamliType::File));
    let ok = index.new_permanode("fine");
    set_attr(&index, &ok, "title", "fine", 1);

    let res = handler
        .describe(
            &cancel,
            &DescribeRequest {
                blob_refs: vec![broken.clone(), ok.clone()],
                ..Default::default()
            },
        )
        .unwrap();
    assert!(res.meta.contains_key(ok.as_str()));
    assert!(res.errors.contains_key(broken.as_str()));
    assert!(matches!(
        res.error(),
        Some(keepsake_core::KeepsakeError::Describe { .. })
    ));
}

#[test]
fn cancelled_describe_returns_promptly() {
    let (index, handler) = fixture();
    let cancel = Cancel::new();
    let pn = index.new_permanode("cancelme");
    cancel.cancel();
    let err = handler
        .describe(
            &cancel,
            &DescribeRequest {
                blob_ref: Some(pn),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, keepsake_core::KeepsakeError::Cancelled));
}
