//! Integration tests: entry-by-entry scanning of bound branches.

use readsimple_root::fixture::{Column, FileBuilder, TreeSpec};
use readsimple_root::{RootError, RootFile, Value};
use std::path::PathBuf;

fn file(compressed: bool) -> RootFile {
    let n = 9;
    let bytes = FileBuilder::new("scan.root")
        .compressed(compressed)
        .tree(
            TreeSpec::new("twoMuon")
                .branch("mass_mumu", Column::F32((0..n).map(|i| 3.0 + i as f32).collect()))
                .branch("px", Column::F32((0..n).map(|i| -(i as f32)).collect()))
                .branch("nmu", Column::I32((0..n).map(|i| 2 + i % 2).collect()))
                .array_branch("p4", 4, Column::F32(vec![0.0; n as usize * 4]))
                .basket_entries(4),
        )
        .build();
    RootFile::from_bytes(bytes, PathBuf::from("scan.root")).unwrap()
}

#[test]
fn walks_every_entry_in_order() {
    for compressed in [false, true] {
        let f = file(compressed);
        let tree = f.get_tree("twoMuon").unwrap();
        let mut sc = f.scanner(&tree, &["mass_mumu", "px"]).unwrap();
        sc.require::<f32>().unwrap();
        assert_eq!(sc.entries(), 9);
        assert_eq!(sc.entry(), -1);

        let mut seen = Vec::new();
        while sc.next() {
            sc.scan().unwrap();
            let mass: f32 = sc.get(0).unwrap();
            let px: f32 = sc.get(1).unwrap();
            seen.push((sc.entry(), mass, px));
        }
        assert_eq!(seen.len(), 9);
        assert_eq!(seen[0], (0, 3.0, 0.0));
        assert_eq!(seen[5], (5, 8.0, -5.0));
        assert_eq!(seen[8], (8, 11.0, -8.0));
        assert!(!sc.next());
    }
}

#[test]
fn first_record_only() {
    let f = file(true);
    let tree = f.get_tree("twoMuon").unwrap();
    let mut sc = f.scanner(&tree, &["mass_mumu", "px"]).unwrap();
    assert!(sc.next());
    sc.scan().unwrap();
    assert_eq!(sc.entry(), 0);
    assert_eq!(sc.values().unwrap(), &[Value::F32(3.0), Value::F32(-0.0)]);
    let total: f32 = sc.values().unwrap().iter().map(|v| v.as_f64() as f32).sum();
    assert_eq!(total, 3.0);
}

#[test]
fn scan_before_next_is_an_error() {
    let f = file(false);
    let tree = f.get_tree("twoMuon").unwrap();
    let mut sc = f.scanner(&tree, &["px"]).unwrap();
    assert!(matches!(sc.scan(), Err(RootError::Scanner(_))));
    assert!(matches!(sc.values(), Err(RootError::Scanner(_))));
}

#[test]
fn scan_past_end_is_an_error() {
    let f = file(false);
    let tree = f.get_tree("twoMuon").unwrap();
    let mut sc = f.scanner(&tree, &["px"]).unwrap();
    while sc.next() {}
    assert_eq!(sc.entry(), 9);
    assert!(matches!(sc.scan(), Err(RootError::Scanner(_))));
}

#[test]
fn seek_then_scan() {
    let f = file(true);
    let tree = f.get_tree("twoMuon").unwrap();
    let mut sc = f.scanner(&tree, &["mass_mumu", "nmu"]).unwrap();
    sc.seek(6).unwrap();
    sc.scan().unwrap();
    assert_eq!(sc.get::<f32>(0).unwrap(), 9.0);
    assert_eq!(sc.get::<i32>(1).unwrap(), 2);
    assert!(sc.next());
    sc.scan().unwrap();
    assert_eq!(sc.get::<i32>(1).unwrap(), 3);
    assert!(matches!(sc.seek(9), Err(RootError::Scanner(_))));
}

#[test]
fn unknown_branch_is_rejected() {
    let f = file(false);
    let tree = f.get_tree("twoMuon").unwrap();
    match f.scanner(&tree, &["px", "pt"]) {
        Err(RootError::BranchNotFound(name)) => assert_eq!(name, "pt"),
        other => panic!("expected BranchNotFound, got {:?}", other.err()),
    }
}

#[test]
fn type_mismatches() {
    let f = file(false);
    let tree = f.get_tree("twoMuon").unwrap();

    assert!(matches!(f.scanner(&tree, &["p4"]), Err(RootError::TypeMismatch(_))));

    let mut sc = f.scanner(&tree, &["mass_mumu", "nmu"]).unwrap();
    assert_eq!(sc.names(), vec!["mass_mumu", "nmu"]);
    assert!(matches!(sc.require::<f32>(), Err(RootError::TypeMismatch(_))));

    assert!(sc.next());
    sc.scan().unwrap();
    assert!(matches!(sc.get::<f32>(1), Err(RootError::TypeMismatch(_))));
    assert!(matches!(sc.get::<f64>(0), Err(RootError::TypeMismatch(_))));
    assert!(matches!(sc.get::<f32>(5), Err(RootError::Scanner(_))));
}

#[test]
fn empty_tree_never_advances() {
    let bytes = FileBuilder::new("empty.root")
        .tree(TreeSpec::new("t").branch("x", Column::F32(vec![])))
        .build();
    let f = RootFile::from_bytes(bytes, PathBuf::from("empty.root")).unwrap();
    let tree = f.get_tree("t").unwrap();
    let mut sc = f.scanner(&tree, &["x"]).unwrap();
    assert!(!sc.next());
    assert_eq!(sc.entry(), 0);
    assert!(matches!(sc.scan(), Err(RootError::Scanner(_))));
}

#[test]
fn walks_into_recovered_baskets() {
    let bytes = FileBuilder::new("unflushed.root")
        .compressed(true)
        .tree(
            TreeSpec::new("twoMuon")
                .branch("mass_mumu", Column::F32((0..5).map(|i| 3.0 + i as f32).collect()))
                .branch("nmu", Column::I32(vec![2, 3, 2, 2, 4]))
                .basket_entries(2)
                .unflushed(),
        )
        .build();
    let f = RootFile::from_bytes(bytes, PathBuf::from("unflushed.root")).unwrap();
    let tree = f.get_tree("twoMuon").unwrap();
    let mut sc = f.scanner(&tree, &["mass_mumu", "nmu"]).unwrap();

    let mut seen = Vec::new();
    while sc.next() {
        sc.scan().unwrap();
        seen.push((sc.get::<f32>(0).unwrap(), sc.get::<i32>(1).unwrap()));
    }
    assert_eq!(seen, vec![(3.0, 2), (4.0, 3), (5.0, 2), (6.0, 2), (7.0, 4)]);

    sc.seek(4).unwrap();
    sc.scan().unwrap();
    assert_eq!(sc.get::<i32>(1).unwrap(), 4);
}
