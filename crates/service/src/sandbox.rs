// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox bootstrap, the copy filter, and workspace fingerprints.

use awe_core::WorkspaceFingerprint;
use chrono::Local;
use rand::Rng;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Override for the sandbox base directory.
pub const SANDBOX_BASE_ENV: &str = "AWE_SANDBOX_BASE";
/// Opt-in to a world-readable sandbox base.
pub const SANDBOX_PUBLIC_BASE_ENV: &str = "AWE_SANDBOX_USE_PUBLIC_BASE";

const FINGERPRINT_SCHEMA: &str = "workspace_fingerprint.v1";
const HEAD_SIGNATURE_MAX_ENTRIES: usize = 128;

const IGNORED_HEADS: [&str; 13] = [
    ".git",
    ".agents",
    ".claude",
    ".venv",
    "__pycache__",
    ".pytest_cache",
    ".ruff_cache",
    "node_modules",
    ".mypy_cache",
    ".idea",
    ".vscode",
    "target",
    ".cargo",
];

#[allow(clippy::unwrap_used)]
fn secret_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(^|[._-])(token|tokens|secret|secrets|apikey|api-key|access-key)([._-]|$)")
            .unwrap()
    })
}

/// Windows reserved device names are ignored regardless of extension.
pub fn is_windows_reserved_device_name(filename: &str) -> bool {
    let normalized = filename.trim().trim_end_matches([' ', '.']).to_ascii_lowercase();
    if normalized.is_empty() {
        return false;
    }
    let normalized = normalized.split(':').next().unwrap_or("");
    let stem = normalized.split('.').next().unwrap_or("");
    if matches!(stem, "con" | "prn" | "aux" | "nul") {
        return true;
    }
    if let Some(rest) = stem.strip_prefix("com").or_else(|| stem.strip_prefix("lpt")) {
        return rest.len() == 1 && rest.chars().all(|c| ('1'..='9').contains(&c));
    }
    false
}

/// Paths excluded from sandbox bootstrap, snapshots, and manifests:
/// VCS/cache directories, virtualenvs, editor metadata, compiled
/// artifacts, Windows reserved device names, and secret-shaped names.
pub fn is_sandbox_ignored(rel_path: &str) -> bool {
    let mut normalized = rel_path.replace('\\', "/");
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }
    while let Some(stripped) = normalized.strip_prefix('/') {
        normalized = stripped.to_string();
    }
    let normalized = normalized.trim();
    if normalized.is_empty() {
        return false;
    }
    let head = normalized.split('/').next().unwrap_or("");
    if IGNORED_HEADS.contains(&head) {
        return true;
    }
    if normalized.ends_with(".pyc") || normalized.ends_with(".pyo") {
        return true;
    }
    let leaf = normalized.rsplit('/').next().unwrap_or("");
    if is_windows_reserved_device_name(leaf) {
        return true;
    }
    let leaf = leaf.to_ascii_lowercase();
    // `.env*` is a prefix glob: .env, .env.production, .envrc, ...
    if leaf.starts_with(".env") {
        return true;
    }
    if leaf.ends_with(".pem") || leaf.ends_with(".key") {
        return true;
    }
    secret_name_regex().is_match(&leaf)
}

/// Deterministic-scheme sandbox path for a project: env-overridable
/// base, optional public base, default under the private home.
pub fn default_sandbox_path(project_root: &Path) -> PathBuf {
    let base = {
        let configured = std::env::var(SANDBOX_BASE_ENV).unwrap_or_default();
        if !configured.trim().is_empty() {
            PathBuf::from(configured.trim())
        } else {
            let public_opt_in = matches!(
                std::env::var(SANDBOX_PUBLIC_BASE_ENV)
                    .unwrap_or_default()
                    .trim()
                    .to_ascii_lowercase()
                    .as_str(),
                "1" | "true" | "yes" | "on"
            );
            if public_opt_in {
                if cfg!(windows) {
                    PathBuf::from(
                        std::env::var("PUBLIC").unwrap_or_else(|_| "C:/Users/Public".to_string()),
                    )
                    .join("awe-agentcheck-sandboxes")
                } else {
                    PathBuf::from("/tmp/awe-agentcheck-sandboxes")
                }
            } else {
                dirs::home_dir()
                    .unwrap_or_else(std::env::temp_dir)
                    .join(".awe-agentcheck")
                    .join("sandboxes")
            }
        }
    };
    let project_name = project_root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let suffix: String = {
        let mut rng = rand::rng();
        (0..6)
            .map(|_| {
                let n: u8 = rng.random_range(0..16);
                char::from_digit(u32::from(n), 16).unwrap_or('0')
            })
            .collect()
    };
    base.join(format!("{project_name}-lab"))
        .join(format!("{stamp}-{suffix}"))
}

/// Copy the project into an empty sandbox, applying the ignore filter.
/// A non-empty sandbox is left untouched.
pub fn bootstrap_sandbox_workspace(project_root: &Path, sandbox_root: &Path) -> std::io::Result<()> {
    let has_entries = std::fs::read_dir(sandbox_root)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if has_entries {
        return Ok(());
    }
    copy_filtered(project_root, project_root, sandbox_root)
}

fn copy_filtered(root: &Path, dir: &Path, target_root: &Path) -> std::io::Result<()> {
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
            copy_filtered(root, &path, target_root)?;
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

/// Best-effort removal of a generated sandbox that is not the project
/// itself.
pub fn cleanup_generated_sandbox(project_root: &Path, sandbox_root: &Path) {
    let project = project_root
        .canonicalize()
        .unwrap_or_else(|_| project_root.to_path_buf());
    let sandbox = sandbox_root
        .canonicalize()
        .unwrap_or_else(|_| sandbox_root.to_path_buf());
    if sandbox == project {
        return;
    }
    if sandbox.exists() {
        if let Err(error) = std::fs::remove_dir_all(&sandbox) {
            tracing::debug!(%error, "sandbox_cleanup_failed");
        }
    }
}

/// Normalize a path for fingerprint comparison: forward slashes, and
/// lowercased on Windows so drive-letter casing never mismatches.
pub fn normalize_fingerprint_path(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return String::new();
    };
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let text = resolved.to_string_lossy().replace('\\', "/");
    if cfg!(windows) {
        text.to_ascii_lowercase()
    } else {
        text
    }
}

/// Shallow hash of the directory's top-level entries (names + kinds),
/// cheap enough to recompute on every start.
pub fn workspace_head_signature(root: &Path) -> String {
    if !root.is_dir() {
        return "missing".to_string();
    }
    let Ok(entries) = std::fs::read_dir(root) else {
        return "unreadable".to_string();
    };
    let mut listed: Vec<(bool, String)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.is_empty() || is_sandbox_ignored(&name) {
                return None;
            }
            let is_dir = entry.path().is_dir();
            Some((is_dir, name))
        })
        .collect();
    listed.sort_by(|a, b| (!a.0, a.1.to_ascii_lowercase()).cmp(&(!b.0, b.1.to_ascii_lowercase())));
    listed.truncate(HEAD_SIGNATURE_MAX_ENTRIES);
    if listed.is_empty() {
        return "empty".to_string();
    }
    let payload: Vec<String> = listed
        .into_iter()
        .map(|(is_dir, name)| {
            let kind = if is_dir { 'd' } else { 'f' };
            let label = if cfg!(windows) {
                name.to_ascii_lowercase()
            } else {
                name
            };
            format!("{kind}:{label}")
        })
        .collect();
    let digest = Sha256::digest(payload.join("\n").as_bytes());
    format!("{digest:x}")[..20].to_string()
}

/// Build the resume-guard fingerprint for a task's workspace setup.
pub fn build_workspace_fingerprint(
    project_root: &Path,
    workspace_root: &Path,
    sandbox_mode: bool,
    sandbox_workspace_path: Option<&Path>,
    merge_target_path: Option<&Path>,
) -> WorkspaceFingerprint {
    WorkspaceFingerprint {
        schema: FINGERPRINT_SCHEMA.to_string(),
        project_path: normalize_fingerprint_path(Some(project_root)),
        workspace_path: normalize_fingerprint_path(Some(workspace_root)),
        sandbox_mode,
        sandbox_workspace_path: normalize_fingerprint_path(sandbox_workspace_path),
        merge_target_path: normalize_fingerprint_path(merge_target_path),
        project_has_git: project_root.join(".git").exists(),
        workspace_head_signature: workspace_head_signature(workspace_root),
        project_head_signature: workspace_head_signature(project_root),
    }
}

#[cfg(test)]
#[path = "sandbox_tests.rs"]
mod tests;
