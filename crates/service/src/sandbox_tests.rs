// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;
use yare::parameterized;

#[parameterized(
    git = { ".git/config", true },
    env_file = { ".env", true },
    env_variant = { "conf/.env.production", true },
    envrc = { ".envrc", true },
    env_no_dot = { "conf/.envlocal", true },
    pem = { "certs/server.pem", true },
    key = { "certs/server.key", true },
    node_modules = { "node_modules/pkg/index.js", true },
    venv = { ".venv/bin/python", true },
    pycache = { "__pycache__/mod.pyc", true },
    target_dir = { "target/debug/app", true },
    token_file = { "ci/deploy-token.txt", true },
    secrets = { "config/secrets.yaml", true },
    reserved_con = { "docs/CON", true },
    reserved_com = { "COM3.txt", true },
    normal_source = { "src/lib.rs", false },
    normal_nested = { "docs/guide.md", false },
    tokenizer_is_fine = { "src/tokenize.rs", false },
)]
fn sandbox_filter(rel: &str, ignored: bool) {
    assert_eq!(is_sandbox_ignored(rel), ignored, "{rel}");
}

#[parameterized(
    con = { "CON", true },
    con_ext = { "con.txt", true },
    nul = { "NUL", true },
    lpt9 = { "lpt9", true },
    com0 = { "COM0", false },
    console = { "console.rs", false },
)]
fn reserved_device_names(name: &str, reserved: bool) {
    assert_eq!(is_windows_reserved_device_name(name), reserved, "{name}");
}

#[test]
fn bootstrap_copies_project_minus_filtered_entries() {
    let project = tempfile::tempdir().unwrap();
    let sandbox = tempfile::tempdir().unwrap();
    for (rel, body) in [
        ("src/lib.rs", "code"),
        ("README.md", "docs"),
        (".git/HEAD", "ref"),
        (".env", "SECRET=1"),
        ("certs/ca.pem", "cert"),
        ("node_modules/x/i.js", "dep"),
        ("ci/api-key.json", "key"),
    ] {
        let path = project.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    bootstrap_sandbox_workspace(project.path(), sandbox.path()).unwrap();

    assert!(sandbox.path().join("src/lib.rs").is_file());
    assert!(sandbox.path().join("README.md").is_file());
    assert!(!sandbox.path().join(".git").exists());
    assert!(!sandbox.path().join(".env").exists());
    assert!(!sandbox.path().join("certs/ca.pem").exists());
    assert!(!sandbox.path().join("node_modules").exists());
    assert!(!sandbox.path().join("ci/api-key.json").exists());
}

#[test]
fn bootstrap_skips_non_empty_sandbox() {
    let project = tempfile::tempdir().unwrap();
    let sandbox = tempfile::tempdir().unwrap();
    std::fs::write(project.path().join("new.rs"), "x").unwrap();
    std::fs::write(sandbox.path().join("existing.rs"), "keep me").unwrap();
    bootstrap_sandbox_workspace(project.path(), sandbox.path()).unwrap();
    assert!(!sandbox.path().join("new.rs").exists());
    assert!(sandbox.path().join("existing.rs").is_file());
}

#[test]
#[serial]
fn default_sandbox_path_honors_base_override() {
    let base = tempfile::tempdir().unwrap();
    std::env::set_var(SANDBOX_BASE_ENV, base.path());
    let project = tempfile::tempdir().unwrap();
    let path = default_sandbox_path(project.path());
    std::env::remove_var(SANDBOX_BASE_ENV);
    assert!(path.starts_with(base.path()));
    assert!(path
        .to_string_lossy()
        .contains(&format!("{}-lab", project.path().file_name().unwrap().to_string_lossy())));
}

#[test]
#[serial]
fn default_sandbox_paths_are_unique() {
    let base = tempfile::tempdir().unwrap();
    std::env::set_var(SANDBOX_BASE_ENV, base.path());
    let project = tempfile::tempdir().unwrap();
    let a = default_sandbox_path(project.path());
    let b = default_sandbox_path(project.path());
    std::env::remove_var(SANDBOX_BASE_ENV);
    assert_ne!(a, b);
}

#[test]
fn head_signature_tracks_top_level_changes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.rs"), "x").unwrap();
    let before = workspace_head_signature(dir.path());
    std::fs::write(dir.path().join("b.rs"), "y").unwrap();
    let after = workspace_head_signature(dir.path());
    assert_ne!(before, after);
    assert_eq!(after, workspace_head_signature(dir.path()));
    assert_eq!(workspace_head_signature(&dir.path().join("missing")), "missing");
}

#[test]
fn fingerprint_compares_stably() {
    let project = tempfile::tempdir().unwrap();
    std::fs::write(project.path().join("f.rs"), "x").unwrap();
    let a = build_workspace_fingerprint(project.path(), project.path(), false, None, None);
    let b = build_workspace_fingerprint(project.path(), project.path(), false, None, None);
    assert_eq!(a, b);
    assert_eq!(a.schema, "workspace_fingerprint.v1");
    // Mutating the workspace shifts the head signature.
    std::fs::write(project.path().join("g.rs"), "y").unwrap();
    let c = build_workspace_fingerprint(project.path(), project.path(), false, None, None);
    assert_ne!(a.workspace_head_signature, c.workspace_head_signature);
}

#[test]
fn cleanup_refuses_to_remove_the_project_itself() {
    let project = tempfile::tempdir().unwrap();
    std::fs::write(project.path().join("keep.rs"), "x").unwrap();
    cleanup_generated_sandbox(project.path(), project.path());
    assert!(project.path().join("keep.rs").is_file());

    let sandbox = tempfile::tempdir().unwrap();
    let sandbox_path = sandbox.path().to_path_buf();
    std::fs::write(sandbox_path.join("tmp.rs"), "x").unwrap();
    cleanup_generated_sandbox(project.path(), &sandbox_path);
    assert!(!sandbox_path.exists());
    let _ = sandbox.close();
}
