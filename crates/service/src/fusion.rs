// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auto-merge fusion: the only writer of the merge target.
//!
//! A manifest is a map of repo-relative path to content SHA-256 over
//! the filtered tree. `run` copies changed/added files from source to
//! target and deletes files that disappeared relative to the pre-run
//! manifest, after snapshotting the target.

use crate::sandbox::is_sandbox_ignored;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, serde::Serialize)]
pub struct FusionSummary {
    pub source_path: String,
    pub target_path: String,
    pub changed_files: usize,
    pub copied_files: usize,
    pub deleted_files: usize,
    pub snapshot_path: Option<String>,
    pub changelog_path: Option<String>,
    pub merged_at: String,
    pub mode: String,
}

/// Contract the orchestrator promotes through. Injected so tests can
/// observe or replace promotion behavior.
pub trait FusionManager: Send + Sync {
    /// Content manifest of the filtered tree under `root`.
    fn build_manifest(&self, root: &Path) -> BTreeMap<String, String>;

    fn run(
        &self,
        task_id: &str,
        source_root: &Path,
        target_root: &Path,
        before_manifest: &BTreeMap<String, String>,
    ) -> std::io::Result<FusionSummary>;
}

/// Filesystem copier with pre-merge snapshots under a snapshot root.
pub struct DirFusionManager {
    snapshot_root: PathBuf,
}

impl DirFusionManager {
    pub fn new(snapshot_root: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_root: snapshot_root.into(),
        }
    }

    fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
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
                Self::collect_files(root, &path, out);
            } else if path.is_file() {
                out.push(path);
            }
        }
    }

    fn hash_file(path: &Path) -> Option<String> {
        let data = std::fs::read(path).ok()?;
        let digest = Sha256::digest(&data);
        Some(format!("{digest:x}"))
    }
}

impl FusionManager for DirFusionManager {
    fn build_manifest(&self, root: &Path) -> BTreeMap<String, String> {
        let mut files = Vec::new();
        Self::collect_files(root, root, &mut files);
        let mut manifest = BTreeMap::new();
        for path in files {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            if let Some(hash) = Self::hash_file(&path) {
                manifest.insert(rel, hash);
            }
        }
        manifest
    }

    fn run(
        &self,
        task_id: &str,
        source_root: &Path,
        target_root: &Path,
        before_manifest: &BTreeMap<String, String>,
    ) -> std::io::Result<FusionSummary> {
        let after_manifest = self.build_manifest(source_root);
        let target_manifest = self.build_manifest(target_root);

        // Snapshot the target before any mutation.
        let snapshot_dir = self.snapshot_root.join(task_id);
        if snapshot_dir.exists() {
            std::fs::remove_dir_all(&snapshot_dir)?;
        }
        std::fs::create_dir_all(&snapshot_dir)?;
        for rel in target_manifest.keys() {
            let src = target_root.join(rel);
            let dst = snapshot_dir.join(rel);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&src, &dst)?;
        }

        let mut copied = Vec::new();
        for (rel, hash) in &after_manifest {
            if target_manifest.get(rel) == Some(hash) {
                continue;
            }
            let src = source_root.join(rel);
            let dst = target_root.join(rel);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&src, &dst)?;
            copied.push(rel.clone());
        }

        // Files present before the run but gone from the workspace
        // were deleted by the task; mirror the deletion.
        let mut deleted = Vec::new();
        for rel in before_manifest.keys() {
            if !after_manifest.contains_key(rel) && target_root.join(rel).is_file() {
                std::fs::remove_file(target_root.join(rel))?;
                deleted.push(rel.clone());
            }
        }

        let changelog_path = snapshot_dir.join("CHANGELOG.md");
        let mut changelog = format!(
            "# Merge {task_id}\n\n- copied: {}\n- deleted: {}\n\n",
            copied.len(),
            deleted.len()
        );
        for rel in &copied {
            changelog.push_str(&format!("- copy `{rel}`\n"));
        }
        for rel in &deleted {
            changelog.push_str(&format!("- delete `{rel}`\n"));
        }
        std::fs::write(&changelog_path, changelog)?;

        tracing::info!(
            task_id,
            copied = copied.len(),
            deleted = deleted.len(),
            "auto_merge_applied"
        );
        Ok(FusionSummary {
            source_path: source_root.to_string_lossy().into_owned(),
            target_path: target_root.to_string_lossy().into_owned(),
            changed_files: copied.len() + deleted.len(),
            copied_files: copied.len(),
            deleted_files: deleted.len(),
            snapshot_path: Some(snapshot_dir.to_string_lossy().into_owned()),
            changelog_path: Some(changelog_path.to_string_lossy().into_owned()),
            merged_at: Utc::now().to_rfc3339(),
            mode: "copy".to_string(),
        })
    }
}

#[cfg(test)]
#[path = "fusion_tests.rs"]
mod tests;
