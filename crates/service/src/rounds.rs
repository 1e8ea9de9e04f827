// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-round workspace snapshots, manifest diffs, and patches.
//!
//! Enabled for multi-round tasks without auto-merge: a baseline
//! snapshot before round 1, then one snapshot per gate, a unified
//! `round-N.patch`, a human `round-N.md` summary, and a JSON metadata
//! artifact.

use crate::fusion::FusionManager;
use crate::sandbox::is_sandbox_ignored;
use chrono::Utc;
use serde_json::{json, Value};
use similar::TextDiff;
use std::path::{Path, PathBuf};

const PATCH_BINARY_MAX_BYTES: usize = 2 * 1024 * 1024;
const SUMMARY_MAX_PATHS: usize = 200;

pub fn round_snapshot_dir(rounds_root: &Path, round: u32) -> PathBuf {
    rounds_root.join(format!("round-{round:03}-snapshot"))
}

fn copy_workspace_snapshot(source_root: &Path, target_root: &Path) -> std::io::Result<()> {
    copy_dir(source_root, source_root, target_root)
}

fn copy_dir(root: &Path, dir: &Path, target_root: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        if is_sandbox_ignored(&rel) {
            continue;
        }
        if path.is_dir() {
            copy_dir(root, &path, target_root)?;
        } else if path.is_file() {
            let dst = target_root.join(&rel);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&path, &dst)?;
        }
    }
    Ok(())
}

/// Reset and fill the baseline (`round-000`) snapshot.
pub fn initialize_round_baseline(
    rounds_root: &Path,
    workspace_root: &Path,
) -> std::io::Result<PathBuf> {
    let baseline = round_snapshot_dir(rounds_root, 0);
    if baseline.exists() {
        std::fs::remove_dir_all(&baseline)?;
    }
    std::fs::create_dir_all(&baseline)?;
    copy_workspace_snapshot(workspace_root, &baseline)?;
    Ok(baseline)
}

/// Text content for diffing, or `None` for binary/oversized/missing.
fn read_text_for_patch(path: &Path) -> Option<String> {
    if !path.is_file() {
        return Some(String::new());
    }
    let data = std::fs::read(path).ok()?;
    if data.len() > PATCH_BINARY_MAX_BYTES || data.contains(&0) {
        return None;
    }
    String::from_utf8(data).ok()
}

fn build_patch_text(from_root: &Path, to_root: &Path, changed_paths: &[String]) -> String {
    let mut output = Vec::new();
    for rel in changed_paths {
        let old_path = from_root.join(rel);
        let new_path = to_root.join(rel);
        let (old_text, new_text) = match (read_text_for_patch(&old_path), read_text_for_patch(&new_path)) {
            (Some(old_text), Some(new_text)) => (old_text, new_text),
            _ => {
                output.push(format!("diff --git a/{rel} b/{rel}"));
                output.push("Binary files differ".to_string());
                output.push(String::new());
                continue;
            }
        };
        let from_name = if old_path.is_file() {
            format!("a/{rel}")
        } else {
            "/dev/null".to_string()
        };
        let to_name = if new_path.is_file() {
            format!("b/{rel}")
        } else {
            "/dev/null".to_string()
        };
        let diff = TextDiff::from_lines(&old_text, &new_text);
        let rendered = diff
            .unified_diff()
            .header(&from_name, &to_name)
            .to_string();
        if rendered.trim().is_empty() {
            continue;
        }
        output.push(rendered.trim_end().to_string());
        output.push(String::new());
    }
    if output.is_empty() {
        String::new()
    } else {
        format!("{}\n", output.join("\n").trim_end())
    }
}

/// Snapshot the workspace after a gate, diff it against the previous
/// snapshot, and write patch/summary/metadata. Returns the metadata
/// payload and the new snapshot path.
pub fn capture_round_artifacts(
    fusion: &dyn FusionManager,
    rounds_root: &Path,
    round: u32,
    previous_snapshot: &Path,
    workspace_root: &Path,
    gate_status: &str,
    gate_reason: &str,
) -> std::io::Result<(Value, PathBuf)> {
    let next_snapshot = round_snapshot_dir(rounds_root, round);
    if next_snapshot.exists() {
        std::fs::remove_dir_all(&next_snapshot)?;
    }
    std::fs::create_dir_all(&next_snapshot)?;
    copy_workspace_snapshot(workspace_root, &next_snapshot)?;

    let before = fusion.build_manifest(previous_snapshot);
    let after = fusion.build_manifest(&next_snapshot);
    let mut changed: Vec<String> = before
        .keys()
        .chain(after.keys())
        .filter(|rel| before.get(*rel) != after.get(*rel))
        .cloned()
        .collect();
    changed.sort();
    changed.dedup();
    let added: Vec<String> = after
        .keys()
        .filter(|rel| !before.contains_key(*rel))
        .cloned()
        .collect();
    let deleted: Vec<String> = before
        .keys()
        .filter(|rel| !after.contains_key(*rel))
        .cloned()
        .collect();
    let modified: Vec<String> = changed
        .iter()
        .filter(|rel| before.contains_key(*rel) && after.contains_key(*rel))
        .cloned()
        .collect();

    let patch_text = build_patch_text(previous_snapshot, &next_snapshot, &changed);
    let patch_path = rounds_root.join(format!("round-{round}.patch"));
    if patch_text.trim().is_empty() {
        std::fs::write(&patch_path, "# no file-level changes detected for this round\n")?;
    } else {
        std::fs::write(&patch_path, &patch_text)?;
    }

    let summary_path = rounds_root.join(format!("round-{round}.md"));
    let mut lines = vec![
        format!("# Round {round} Summary"),
        String::new(),
        format!("- status: `{gate_status}`"),
        format!(
            "- reason: `{}`",
            if gate_reason.is_empty() { "n/a" } else { gate_reason }
        ),
        format!("- changed_files: `{}`", changed.len()),
        format!("- added_files: `{}`", added.len()),
        format!("- modified_files: `{}`", modified.len()),
        format!("- deleted_files: `{}`", deleted.len()),
        format!("- patch: `{}`", patch_path.display()),
        format!("- snapshot: `{}`", next_snapshot.display()),
        String::new(),
    ];
    if !changed.is_empty() {
        lines.push("## Changed Paths".to_string());
        lines.push(String::new());
        for rel in changed.iter().take(SUMMARY_MAX_PATHS) {
            lines.push(format!("- `{rel}`"));
        }
        if changed.len() > SUMMARY_MAX_PATHS {
            lines.push(format!("- ... ({} more)", changed.len() - SUMMARY_MAX_PATHS));
        }
        lines.push(String::new());
    }
    std::fs::write(&summary_path, lines.join("\n"))?;

    let payload = json!({
        "round": round,
        "status": gate_status,
        "reason": if gate_reason.is_empty() { Value::Null } else { Value::String(gate_reason.to_string()) },
        "changed_paths": changed,
        "added_files": added,
        "modified_files": modified,
        "deleted_files": deleted,
        "patch_path": patch_path.to_string_lossy(),
        "summary_path": summary_path.to_string_lossy(),
        "snapshot_path": next_snapshot.to_string_lossy(),
        "created_at": Utc::now().to_rfc3339(),
    });
    Ok((payload, next_snapshot))
}

#[cfg(test)]
#[path = "rounds_tests.rs"]
mod tests;
