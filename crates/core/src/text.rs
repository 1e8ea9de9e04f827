// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Text clipping and stable content signatures.

use sha2::{Digest, Sha256};

/// Clip `text` to at most `max_chars` characters, appending a marker
/// naming how many characters were dropped. Operates on characters,
/// never splitting a UTF-8 sequence.
pub fn clip_text(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    let dropped = total - max_chars;
    format!("{kept}…[clipped {dropped} chars]")
}

/// Stable 16-hex-char signature of `text` clipped to `max_chars`.
///
/// Used for loop detection and prompt-cache probes; empty input yields
/// an empty signature so callers can treat "no content" specially.
pub fn text_signature(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let clipped: String = trimmed.chars().take(max_chars).collect();
    let digest = Sha256::digest(clipped.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
#[path = "text_tests.rs"]
mod tests;
