//! Baseline labels and snapshot records.
//!
//! A baseline label names the snapshot slot the benchmark runner saves into
//! and later compares against. The label is always an explicit parameter of
//! the save and compare operations; nothing in the engine falls back to an
//! implicit global. Executions whose snapshot storage may be shared derive a
//! per-execution label from their concurrency-group key so that concurrent
//! gates never clobber each other's snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label used when the snapshot store is private to one execution.
pub const DEFAULT_BASELINE_LABEL: &str = "base";

/// Maximum accepted label length, matching what benchmark harnesses accept
/// as a baseline name without truncation.
pub const MAX_LABEL_LEN: usize = 64;

// ---------------------------------------------------------------------------
// BaselineLabel — validated snapshot slot name
// ---------------------------------------------------------------------------

/// Validated baseline label: 1..=64 characters drawn from
/// `[a-z0-9._-]`, starting with an ASCII alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaselineLabel(String);

impl BaselineLabel {
    pub fn new(raw: impl Into<String>) -> Result<Self, LabelError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(LabelError::Empty);
        }
        if raw.len() > MAX_LABEL_LEN {
            return Err(LabelError::TooLong {
                length: raw.len(),
                max: MAX_LABEL_LEN,
            });
        }
        let first = raw.chars().next().unwrap_or('\0');
        if !first.is_ascii_alphanumeric() {
            return Err(LabelError::BadLeadingCharacter { label: raw });
        }
        if let Some(bad) = raw
            .chars()
            .find(|ch| !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '.' | '_' | '-')))
        {
            return Err(LabelError::BadCharacter {
                label: raw.clone(),
                character: bad,
            });
        }
        Ok(Self(raw))
    }

    /// Default label for executions with a private snapshot store.
    pub fn default_label() -> Self {
        Self(DEFAULT_BASELINE_LABEL.to_string())
    }

    /// Derive a per-execution label from a concurrency-group key.
    ///
    /// The group key is sanitized character by character: anything other
    /// than an ASCII alphanumeric becomes `-`, consecutive separators
    /// collapse, and the result is truncated to fit with the `base-` prefix.
    /// Two distinct well-formed group keys map to distinct labels as long as
    /// they differ within the truncation window.
    pub fn for_group(group_key: &str) -> Self {
        let mut sanitized = String::with_capacity(group_key.len());
        let mut last_was_separator = false;
        for ch in group_key.chars() {
            if ch.is_ascii_alphanumeric() {
                sanitized.push(ch.to_ascii_lowercase());
                last_was_separator = false;
            } else if !last_was_separator {
                sanitized.push('-');
                last_was_separator = true;
            }
        }
        let sanitized = sanitized.trim_matches('-');
        let mut label = String::from(DEFAULT_BASELINE_LABEL);
        if !sanitized.is_empty() {
            label.push('-');
            label.push_str(sanitized);
        }
        label.truncate(MAX_LABEL_LEN);
        let trimmed = label.trim_end_matches('-').to_string();
        Self(trimmed)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BaselineLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validation failures for baseline labels.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("baseline label must not be empty")]
    Empty,
    #[error("baseline label is {length} characters, maximum is {max}")]
    TooLong { length: usize, max: usize },
    #[error("baseline label `{label}` must start with an ASCII alphanumeric")]
    BadLeadingCharacter { label: String },
    #[error("baseline label `{label}` contains invalid character `{character}`")]
    BadCharacter { label: String, character: char },
}

// ---------------------------------------------------------------------------
// BaselineSnapshotRecord — bookkeeping for a persisted baseline
// ---------------------------------------------------------------------------

/// Record of a baseline snapshot saved by the measurement phase.
///
/// The snapshot itself lives wherever the benchmark runner persists it; the
/// gate only tracks that the save happened, under which label, and by whom,
/// so the compare phase can be guarded on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineSnapshotRecord {
    pub label: BaselineLabel,
    pub saved_by_execution: String,
    pub runner_identity: String,
    pub duration_ms: u64,
}
