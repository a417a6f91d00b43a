//! Gate run reports and structured log events.
//!
//! Every execution produces one schema-versioned JSON report: the resolved
//! plan identity, the per-step records, the verdict, and the event log. The
//! comparison section carries the runner's own diagnostic output verbatim;
//! the gate never rewrites or interprets it beyond the exit status.

use serde::{Deserialize, Serialize};

use crate::baseline::{BaselineLabel, BaselineSnapshotRecord};
use crate::checkout::RevisionRef;
use crate::gate::{GateState, StepRecord};
use crate::runner::BenchTargetSpec;
use crate::trigger::TriggerDecision;

/// Schema tag written into every gate run report.
pub const GATE_RUN_REPORT_SCHEMA_VERSION: &str = "benchgate.gate-run-report.v1";

// ---------------------------------------------------------------------------
// GateLogEvent — structured log record
// ---------------------------------------------------------------------------

/// One structured event emitted by the engine or its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateLogEvent {
    pub execution_id: String,
    pub component: String,
    pub event: String,
    pub outcome: String,
    pub step: Option<String>,
    pub error_code: Option<String>,
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// ComparisonReport — the runner's verdict, carried verbatim
// ---------------------------------------------------------------------------

/// Result of the compare invocation against the stored baseline snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub label: BaselineLabel,
    pub exit_code: i32,
    pub passed: bool,
    /// Runner stdout, untouched.
    pub stdout: String,
    /// Runner stderr, untouched.
    pub stderr: String,
    pub duration_ms: u64,
}

/// Condensed view of the vector store at generation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStoreSummary {
    pub root: String,
    pub file_count: u64,
    pub fingerprint: String,
}

// ---------------------------------------------------------------------------
// GateRunReport
// ---------------------------------------------------------------------------

/// The one artifact an execution leaves behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRunReport {
    pub schema_version: String,
    pub generated_at_utc: String,
    pub execution_id: String,
    pub group_key: String,
    pub trigger: TriggerDecision,
    pub baseline_label: BaselineLabel,
    pub baseline_revision: RevisionRef,
    pub candidate_revision: RevisionRef,
    pub target: BenchTargetSpec,
    pub state: GateState,
    pub steps: Vec<StepRecord>,
    pub vector_store: Option<VectorStoreSummary>,
    pub baseline_snapshot: Option<BaselineSnapshotRecord>,
    pub comparison: Option<ComparisonReport>,
    pub events: Vec<GateLogEvent>,
    pub exit_code: i32,
}

impl GateRunReport {
    /// `key=value` lines for terse CI log output.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("benchgate.execution_id={}", self.execution_id),
            format!("benchgate.group_key={}", self.group_key),
            format!("benchgate.state={}", self.state),
            format!("benchgate.baseline_label={}", self.baseline_label),
            format!("benchgate.steps_recorded={}", self.steps.len()),
            format!(
                "benchgate.steps_passed={}",
                self.steps.iter().filter(|step| step.status.is_success()).count()
            ),
        ];
        if let Some(summary) = &self.vector_store {
            lines.push(format!("benchgate.vector_files={}", summary.file_count));
            lines.push(format!("benchgate.vector_fingerprint={}", summary.fingerprint));
        }
        if let Some(comparison) = &self.comparison {
            lines.push(format!("benchgate.comparison_passed={}", comparison.passed));
            lines.push(format!("benchgate.comparison_exit_code={}", comparison.exit_code));
        }
        lines.push(format!("benchgate.exit_code={}", self.exit_code));
        lines
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
