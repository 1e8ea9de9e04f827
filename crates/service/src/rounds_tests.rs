// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::fusion::DirFusionManager;

fn write(root: &Path, rel: &str, body: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
}

#[test]
fn baseline_and_round_capture_produce_patch_and_summary() {
    let artifacts = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    let rounds_root = artifacts.path().join("rounds");
    std::fs::create_dir_all(&rounds_root).unwrap();
    let fusion = DirFusionManager::new(artifacts.path().join("snaps"));

    write(workspace.path(), "src/lib.rs", b"fn a() {}\n");
    let baseline = initialize_round_baseline(&rounds_root, workspace.path()).unwrap();
    assert!(baseline.ends_with("round-000-snapshot"));

    // Round 1 edits one file, adds another.
    write(workspace.path(), "src/lib.rs", b"fn a() {}\nfn b() {}\n");
    write(workspace.path(), "src/new.rs", b"fn c() {}\n");
    let (payload, snapshot) = capture_round_artifacts(
        &fusion,
        &rounds_root,
        1,
        &baseline,
        workspace.path(),
        "gate_failed",
        "tests_failed",
    )
    .unwrap();

    assert!(snapshot.ends_with("round-001-snapshot"));
    assert_eq!(payload["round"], 1);
    assert_eq!(payload["added_files"].as_array().unwrap().len(), 1);
    assert_eq!(payload["modified_files"].as_array().unwrap().len(), 1);

    let patch = std::fs::read_to_string(rounds_root.join("round-1.patch")).unwrap();
    assert!(patch.contains("fn b() {}"));
    let summary = std::fs::read_to_string(rounds_root.join("round-1.md")).unwrap();
    assert!(summary.contains("# Round 1 Summary"));
    assert!(summary.contains("`tests_failed`"));
    assert!(summary.contains("src/new.rs"));
}

#[test]
fn binary_files_are_marked_not_diffed() {
    let artifacts = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    let rounds_root = artifacts.path().join("rounds");
    std::fs::create_dir_all(&rounds_root).unwrap();
    let fusion = DirFusionManager::new(artifacts.path().join("snaps"));

    write(workspace.path(), "blob.bin", &[0u8, 1, 2, 3]);
    let baseline = initialize_round_baseline(&rounds_root, workspace.path()).unwrap();
    write(workspace.path(), "blob.bin", &[9u8, 9, 0, 9]);
    capture_round_artifacts(
        &fusion,
        &rounds_root,
        1,
        &baseline,
        workspace.path(),
        "gate_passed",
        "passed",
    )
    .unwrap();
    let patch = std::fs::read_to_string(rounds_root.join("round-1.patch")).unwrap();
    assert!(patch.contains("Binary files differ"));
}

#[test]
fn unchanged_round_writes_placeholder_patch() {
    let artifacts = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    let rounds_root = artifacts.path().join("rounds");
    std::fs::create_dir_all(&rounds_root).unwrap();
    let fusion = DirFusionManager::new(artifacts.path().join("snaps"));

    write(workspace.path(), "same.rs", b"fn same() {}\n");
    let baseline = initialize_round_baseline(&rounds_root, workspace.path()).unwrap();
    let (payload, _) = capture_round_artifacts(
        &fusion,
        &rounds_root,
        1,
        &baseline,
        workspace.path(),
        "gate_failed",
        "review_blocker",
    )
    .unwrap();
    assert!(payload["changed_paths"].as_array().unwrap().is_empty());
    let patch = std::fs::read_to_string(rounds_root.join("round-1.patch")).unwrap();
    assert!(patch.contains("no file-level changes"));
}
