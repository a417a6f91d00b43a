//! Revision references and the source-tree checkout contract.
//!
//! The gate switches the working tree between two revisions during one
//! execution: the baseline checkout is clean (local modifications are
//! discarded), while the candidate checkout preserves artifacts produced
//! earlier in the run (test vectors, saved baseline snapshots under the
//! target directory). Checkout mechanics live behind the [`SourceTree`]
//! trait; a git-backed implementation is provided for the CLI and a scripted
//! one for tests.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// RevisionRef — validated revision reference
// ---------------------------------------------------------------------------

/// A branch name, tag, or commit hash accepted by the underlying VCS.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionRef(String);

impl RevisionRef {
    pub fn new(raw: impl Into<String>) -> Result<Self, CheckoutError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(CheckoutError::EmptyRevision);
        }
        if raw.starts_with('-') || raw.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
            return Err(CheckoutError::MalformedRevision { revision: raw });
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Checkout requests
// ---------------------------------------------------------------------------

/// Which side of the comparison a checkout serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionRole {
    Baseline,
    Candidate,
}

impl RevisionRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Candidate => "candidate",
        }
    }
}

impl fmt::Display for RevisionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a checkout may discard working-tree state.
///
/// `Clean` resets the tree to the target revision outright.
/// `PreserveArtifacts` switches revisions while keeping untracked build
/// output in place, which is what lets the candidate phase reuse the vector
/// store and the saved baseline snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    Clean,
    PreserveArtifacts,
}

impl CheckoutMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::PreserveArtifacts => "preserve_artifacts",
        }
    }
}

impl fmt::Display for CheckoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One checkout order issued by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub revision: RevisionRef,
    pub role: RevisionRole,
    pub mode: CheckoutMode,
}

/// Acknowledgement returned by a completed checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub revision: RevisionRef,
    pub role: RevisionRole,
    pub mode: CheckoutMode,
    /// Human-readable description of what the backend did.
    pub detail: String,
}

/// Checkout failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("revision ref must not be empty")]
    EmptyRevision,
    #[error("revision ref `{revision}` contains whitespace, control characters, or a leading `-`")]
    MalformedRevision { revision: String },
    #[error("failed to spawn `{command}`: {detail}")]
    Spawn { command: String, detail: String },
    #[error("{role} checkout of `{revision}` exited with status {status}: {stderr}")]
    CommandFailed {
        role: RevisionRole,
        revision: String,
        status: String,
        stderr: String,
    },
    #[error("{role} checkout of `{revision}` rejected by source tree: {detail}")]
    Rejected {
        role: RevisionRole,
        revision: String,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// SourceTree — external-collaborator seam
// ---------------------------------------------------------------------------

/// The working tree the gate measures in.
pub trait SourceTree {
    fn checkout(&mut self, request: &CheckoutRequest) -> Result<CheckoutReceipt, CheckoutError>;

    /// Identity string recorded in reports.
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// GitSourceTree — git-backed implementation
// ---------------------------------------------------------------------------

/// Checkout backend driving `git` in a local repository.
#[derive(Debug, Clone)]
pub struct GitSourceTree {
    repo_root: PathBuf,
}

impl GitSourceTree {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// Argument vector for one checkout, exposed for inspection.
    pub fn checkout_args(mode: CheckoutMode, revision: &RevisionRef) -> Vec<String> {
        let mut args = vec!["checkout".to_string()];
        if mode == CheckoutMode::Clean {
            args.push("--force".to_string());
        }
        args.push(revision.as_str().to_string());
        args
    }
}

impl SourceTree for GitSourceTree {
    fn checkout(&mut self, request: &CheckoutRequest) -> Result<CheckoutReceipt, CheckoutError> {
        let args = Self::checkout_args(request.mode, &request.revision);
        let rendered = format!("git {}", args.join(" "));
        let output = Command::new("git")
            .args(&args)
            .current_dir(&self.repo_root)
            .output()
            .map_err(|error| CheckoutError::Spawn {
                command: rendered.clone(),
                detail: error.to_string(),
            })?;
        if !output.status.success() {
            let status = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            return Err(CheckoutError::CommandFailed {
                role: request.role,
                revision: request.revision.as_str().to_string(),
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(CheckoutReceipt {
            revision: request.revision.clone(),
            role: request.role,
            mode: request.mode,
            detail: rendered,
        })
    }

    fn describe(&self) -> String {
        format!("git:{}", self.repo_root.display())
    }
}

// ---------------------------------------------------------------------------
// ScriptedSourceTree — deterministic test double
// ---------------------------------------------------------------------------

/// In-memory tree that records every request and can be scripted to fail.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSourceTree {
    pub requests: Vec<CheckoutRequest>,
    current: Option<RevisionRef>,
    fail_revisions: BTreeSet<String>,
}

impl ScriptedSourceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next checkout of `revision` to fail.
    pub fn fail_checkout_of(&mut self, revision: &str) {
        self.fail_revisions.insert(revision.to_string());
    }

    pub fn current_revision(&self) -> Option<&RevisionRef> {
        self.current.as_ref()
    }
}

impl SourceTree for ScriptedSourceTree {
    fn checkout(&mut self, request: &CheckoutRequest) -> Result<CheckoutReceipt, CheckoutError> {
        self.requests.push(request.clone());
        if self.fail_revisions.contains(request.revision.as_str()) {
            return Err(CheckoutError::Rejected {
                role: request.role,
                revision: request.revision.as_str().to_string(),
                detail: "scripted checkout failure".to_string(),
            });
        }
        self.current = Some(request.revision.clone());
        Ok(CheckoutReceipt {
            revision: request.revision.clone(),
            role: request.role,
            mode: request.mode,
            detail: "scripted".to_string(),
        })
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
