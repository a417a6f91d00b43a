//! Provisioning checks for the benchmark runner.
//!
//! Measurement in an unprovisioned environment wastes a full benchmark run
//! before failing, so the gate probes the selected runner before the first
//! checkout: the program must spawn, answer `--version`, and (when the
//! catalog pins one) report the expected version. All three failures are
//! provisioning errors and abort the execution up front.

use std::collections::BTreeMap;
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runner::RunnerSpec;

// ---------------------------------------------------------------------------
// Version probe seam
// ---------------------------------------------------------------------------

/// Low-level probe failures, mapped to [`PreflightError`] by the check.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    #[error("cannot spawn probe: {detail}")]
    NotFound { detail: String },
    #[error("probe exited with status {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Asks a program for its version string.
pub trait VersionProbe {
    fn probe(&mut self, program: &str) -> Result<String, ProbeFailure>;
}

/// Probe backed by `<program> --version`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandVersionProbe;

impl VersionProbe for CommandVersionProbe {
    fn probe(&mut self, program: &str) -> Result<String, ProbeFailure> {
        let output = Command::new(program)
            .arg("--version")
            .output()
            .map_err(|error| ProbeFailure::NotFound {
                detail: error.to_string(),
            })?;
        if !output.status.success() {
            let status = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            return Err(ProbeFailure::Failed {
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

/// Scripted probe for tests: fixed responses per program name.
#[derive(Debug, Clone, Default)]
pub struct ScriptedVersionProbe {
    responses: BTreeMap<String, Result<String, ProbeFailure>>,
}

impl ScriptedVersionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responding(mut self, program: &str, version_line: &str) -> Self {
        self.responses
            .insert(program.to_string(), Ok(version_line.to_string()));
        self
    }

    pub fn missing(mut self, program: &str, detail: &str) -> Self {
        self.responses.insert(
            program.to_string(),
            Err(ProbeFailure::NotFound {
                detail: detail.to_string(),
            }),
        );
        self
    }

    pub fn failing(mut self, program: &str, status: &str, stderr: &str) -> Self {
        self.responses.insert(
            program.to_string(),
            Err(ProbeFailure::Failed {
                status: status.to_string(),
                stderr: stderr.to_string(),
            }),
        );
        self
    }
}

impl VersionProbe for ScriptedVersionProbe {
    fn probe(&mut self, program: &str) -> Result<String, ProbeFailure> {
        match self.responses.get(program) {
            Some(response) => response.clone(),
            None => Err(ProbeFailure::NotFound {
                detail: "no scripted response".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Preflight check
// ---------------------------------------------------------------------------

/// Evidence that the runner answered its probe before measurement began.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReceipt {
    pub runner_id: String,
    pub program: String,
    pub reported_version: String,
    pub version_pin: String,
}

/// Provisioning failures. Every variant aborts before the first checkout.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreflightError {
    #[error("benchmark runner `{runner_id}` ({program}) not found: {detail}")]
    RunnerNotFound {
        runner_id: String,
        program: String,
        detail: String,
    },
    #[error("benchmark runner `{runner_id}` ({program}) version probe exited with status {status}: {stderr}")]
    ProbeFailed {
        runner_id: String,
        program: String,
        status: String,
        stderr: String,
    },
    #[error("benchmark runner `{runner_id}` reports `{observed}`, expected version pin `{expected}`")]
    VersionMismatch {
        runner_id: String,
        observed: String,
        expected: String,
    },
}

/// Verify the selected runner is provisioned.
///
/// An empty `version_pin` accepts any reported version; a non-empty pin must
/// appear as a substring of the probe's version line.
pub fn verify_runner(
    spec: &RunnerSpec,
    probe: &mut dyn VersionProbe,
) -> Result<PreflightReceipt, PreflightError> {
    let reported = probe.probe(&spec.program).map_err(|failure| match failure {
        ProbeFailure::NotFound { detail } => PreflightError::RunnerNotFound {
            runner_id: spec.runner_id.clone(),
            program: spec.program.clone(),
            detail,
        },
        ProbeFailure::Failed { status, stderr } => PreflightError::ProbeFailed {
            runner_id: spec.runner_id.clone(),
            program: spec.program.clone(),
            status,
            stderr,
        },
    })?;
    if !spec.version_pin.is_empty() && !reported.contains(&spec.version_pin) {
        return Err(PreflightError::VersionMismatch {
            runner_id: spec.runner_id.clone(),
            observed: reported,
            expected: spec.version_pin.clone(),
        });
    }
    Ok(PreflightReceipt {
        runner_id: spec.runner_id.clone(),
        program: spec.program.clone(),
        reported_version: reported,
        version_pin: spec.version_pin.clone(),
    })
}
