// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Architecture audit: oversized-source-file detection.

use std::path::Path;

/// `off` (default) | `warn` (advisory) | `hard` (gates the round).
pub const ARCH_AUDIT_MODE_ENV: &str = "AWE_ARCH_AUDIT_MODE";
/// Line-count threshold per source file.
pub const ARCH_FILE_LINES_ENV: &str = "AWE_ARCH_PYTHON_FILE_LINES_MAX";

const DEFAULT_FILE_LINES_MAX: usize = 800;
const AUDIT_EXTENSIONS: [&str; 5] = ["py", "rs", "ts", "js", "go"];
const SKIPPED_DIRS: [&str; 8] = [
    ".git",
    ".venv",
    "__pycache__",
    "node_modules",
    "target",
    ".pytest_cache",
    ".ruff_cache",
    ".mypy_cache",
];
const MAX_VIOLATIONS_REPORTED: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchitectureAudit {
    pub enabled: bool,
    pub passed: bool,
    pub mode: String,
    pub reason: String,
    pub threshold: usize,
    pub violations: Vec<String>,
    pub scanned_files: usize,
}

fn audit_mode() -> String {
    let raw = std::env::var(ARCH_AUDIT_MODE_ENV)
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match raw.as_str() {
        "warn" | "hard" => raw,
        _ => "off".to_string(),
    }
}

fn line_threshold() -> usize {
    std::env::var(ARCH_FILE_LINES_ENV)
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_FILE_LINES_MAX)
}

fn scan(dir: &Path, root: &Path, threshold: usize, violations: &mut Vec<String>, scanned: &mut usize) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() {
            if !SKIPPED_DIRS.contains(&name.as_str()) {
                scan(&path, root, threshold, violations, scanned);
            }
            continue;
        }
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !AUDIT_EXTENSIONS.contains(&extension) {
            continue;
        }
        *scanned += 1;
        let Ok(raw) = std::fs::read(&path) else {
            continue;
        };
        let lines = raw.iter().filter(|byte| **byte == b'\n').count() + 1;
        if lines > threshold {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            violations.push(format!("{relative}: {lines} lines (max {threshold})"));
        }
    }
}

/// Scan the workspace for oversized source files. Disabled unless the
/// mode env var opts in; evolution level 0 tasks are never gated hard.
pub fn run_architecture_audit(cwd: &Path, evolution_level: u8) -> ArchitectureAudit {
    let mut mode = audit_mode();
    let enabled = mode != "off";
    let threshold = line_threshold();
    if !enabled {
        return ArchitectureAudit {
            enabled: false,
            passed: true,
            mode,
            reason: "architecture_audit_disabled".to_string(),
            threshold,
            violations: Vec::new(),
            scanned_files: 0,
        };
    }
    if mode == "hard" && evolution_level == 0 {
        mode = "warn".to_string();
    }

    let mut violations = Vec::new();
    let mut scanned = 0usize;
    scan(cwd, cwd, threshold, &mut violations, &mut scanned);
    violations.sort();
    violations.truncate(MAX_VIOLATIONS_REPORTED);

    let passed = violations.is_empty();
    let reason = if passed {
        "passed".to_string()
    } else if mode == "hard" {
        "architecture_threshold_exceeded".to_string()
    } else {
        "architecture_threshold_warning".to_string()
    };
    ArchitectureAudit {
        enabled,
        passed,
        mode,
        reason,
        threshold,
        violations,
        scanned_files: scanned,
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
