// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task identifier.

/// Maximum byte length for an inline task ID.
///
/// Generated IDs are exactly 17 bytes (`task-` prefix + 12-char nanoid);
/// parsed IDs may be shorter but never longer than this.
pub const TASK_ID_MAX_LEN: usize = 24;

const PREFIX: &str = "task-";
const SUFFIX_LEN: usize = 12;

/// Opaque task identifier. Fixed-size inline buffer, always ASCII, `Copy`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TaskId {
    len: u8,
    buf: [u8; TASK_ID_MAX_LEN],
}

impl TaskId {
    /// Generate a fresh random ID (`task-` + 12 nanoid chars).
    pub fn generate() -> Self {
        Self::from_str_lossy(&format!("{PREFIX}{}", nanoid::nanoid!(SUFFIX_LEN)))
    }

    /// Build an ID from an existing string, truncating anything beyond
    /// the inline capacity. Callers parsing external input should have
    /// validated length already; truncation keeps the type total.
    pub fn from_str_lossy(s: &str) -> Self {
        let bytes = s.as_bytes();
        let mut len = bytes.len().min(TASK_ID_MAX_LEN);
        // Never split a UTF-8 sequence mid-character.
        while len > 0 && !s.is_char_boundary(len) {
            len -= 1;
        }
        let mut buf = [0u8; TASK_ID_MAX_LEN];
        buf[..len].copy_from_slice(&bytes[..len]);
        Self { len: len as u8, buf }
    }

    pub fn as_str(&self) -> &str {
        // Invariant: only constructed from &str on char boundaries.
        std::str::from_utf8(&self.buf[..self.len as usize]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// ID suffix without the `task-` prefix.
    pub fn suffix(&self) -> &str {
        self.as_str().strip_prefix(PREFIX).unwrap_or(self.as_str())
    }
}

impl std::hash::Hash for TaskId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Hash only the active bytes so it matches str::hash,
        // which is required for Borrow<str> HashMap lookups.
        self.as_str().hash(state);
    }
}

impl std::borrow::Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::ops::Deref for TaskId {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<str> for TaskId {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for TaskId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::from_str_lossy(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self::from_str_lossy(&s)
    }
}

impl std::fmt::Debug for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for TaskId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for TaskId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.len() > TASK_ID_MAX_LEN {
            return Err(serde::de::Error::custom(format!(
                "task id exceeds {TASK_ID_MAX_LEN} bytes"
            )));
        }
        Ok(TaskId::from_str_lossy(&s))
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
