//! The measurement protocol as a guarded state machine.
//!
//! One execution drives five steps in a fixed order:
//!
//! 1. generate test vectors (once, under the baseline tree),
//! 2. check out the baseline revision (clean),
//! 3. measure the baseline and save the snapshot under the label,
//! 4. check out the candidate revision preserving artifacts,
//! 5. measure the candidate and compare against the snapshot.
//!
//! States: `Init → VectorsGenerated → BaselineCaptured → Compared`, with
//! `Failed` absorbing any fatal error. Operations invoked out of order
//! return a typed [`StepOrderViolation`] and leave state untouched. A
//! failing compare verdict is not fatal: the execution still reaches
//! `Compared` so the report can distinguish a regression (exit 2) from an
//! infrastructure fault (exit 1).

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::baseline::{BaselineLabel, BaselineSnapshotRecord};
use crate::checkout::{
    CheckoutError, CheckoutMode, CheckoutRequest, RevisionRef, RevisionRole, SourceTree,
};
use crate::error_code::GateErrorCode;
use crate::report::{ComparisonReport, GateLogEvent, GateRunReport, VectorStoreSummary};
use crate::runner::{BenchRunner, BenchTargetSpec, RunnerError, RunnerInvocation, RunnerMode};
use crate::supersede::ExecutionTicket;
use crate::test_vectors::{VectorError, VectorGenerator, VectorGeneratorSpec, VectorManifest};
use crate::trigger::TriggerDecision;

/// Component name stamped on engine log events.
pub const GATE_COMPONENT: &str = "regression_gate";

// ---------------------------------------------------------------------------
// GateState
// ---------------------------------------------------------------------------

/// Lifecycle of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Init,
    VectorsGenerated,
    BaselineCaptured,
    Compared,
    Failed,
}

impl GateState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::VectorsGenerated => "vectors_generated",
            Self::BaselineCaptured => "baseline_captured",
            Self::Compared => "compared",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Compared | Self::Failed)
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StepId and StepRecord
// ---------------------------------------------------------------------------

/// The five protocol steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    GenerateVectors,
    CheckoutBaseline,
    MeasureBaseline,
    CheckoutCandidate,
    MeasureCandidate,
}

/// Execution order of the protocol steps.
pub const ALL_STEPS: &[StepId] = &[
    StepId::GenerateVectors,
    StepId::CheckoutBaseline,
    StepId::MeasureBaseline,
    StepId::CheckoutCandidate,
    StepId::MeasureCandidate,
];

impl StepId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerateVectors => "generate_vectors",
            Self::CheckoutBaseline => "checkout_baseline",
            Self::MeasureBaseline => "measure_baseline",
            Self::CheckoutCandidate => "checkout_candidate",
            Self::MeasureCandidate => "measure_candidate",
        }
    }

    /// 1-based position in the protocol.
    pub fn ordinal(self) -> u8 {
        match self {
            Self::GenerateVectors => 1,
            Self::CheckoutBaseline => 2,
            Self::MeasureBaseline => 3,
            Self::CheckoutCandidate => 4,
            Self::MeasureCandidate => 5,
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed { error_code: String, detail: String },
    Cancelled,
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// One step as it ran: command, exit, captured output, duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: StepId,
    pub status: StepStatus,
    pub command: Option<String>,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// An operation was invoked in a state that does not permit it.
///
/// Violations never mutate engine state; the caller holds the bug, not the
/// execution.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("operation `{attempted}` is invalid in state `{state}` for execution {execution_id}")]
pub struct StepOrderViolation {
    pub state: GateState,
    pub attempted: String,
    pub execution_id: String,
}

/// Fatal and caller-side failures of the protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error(transparent)]
    OrderViolation(#[from] StepOrderViolation),
    #[error("execution {execution_id} superseded before step `{step}`")]
    Superseded { execution_id: String, step: StepId },
    #[error("invalid gate plan: {detail}")]
    InvalidPlan { detail: String },
    #[error("compare label `{requested}` does not match saved baseline label `{saved}`")]
    LabelMismatch { saved: String, requested: String },
    #[error("vector generation failed: {source}")]
    Generation {
        #[source]
        source: VectorError,
    },
    #[error("{role} checkout failed: {source}")]
    Checkout {
        role: RevisionRole,
        #[source]
        source: CheckoutError,
    },
    #[error("baseline measurement runner failed: {source}")]
    MeasurementRunner {
        #[source]
        source: RunnerError,
    },
    #[error("baseline measurement exited with status {exit_code}")]
    MeasurementExit { exit_code: i32 },
    #[error("comparison runner failed: {source}")]
    ComparisonRunner {
        #[source]
        source: RunnerError,
    },
}

impl GateError {
    pub fn code(&self) -> GateErrorCode {
        match self {
            Self::OrderViolation(_) => GateErrorCode::StepOrderViolation,
            Self::Superseded { .. } => GateErrorCode::ExecutionSuperseded,
            Self::InvalidPlan { .. } => GateErrorCode::InvalidPlan,
            Self::LabelMismatch { .. } => GateErrorCode::InvalidBaselineLabel,
            Self::Generation { source } => match source {
                VectorError::StoreUnreadable { .. } => GateErrorCode::VectorStoreUnreadable,
                VectorError::Drift { .. } => GateErrorCode::VectorSetChanged,
                _ => GateErrorCode::VectorGenerationFailed,
            },
            Self::Checkout { .. } => GateErrorCode::CheckoutFailed,
            Self::MeasurementRunner { .. } | Self::MeasurementExit { .. } => {
                GateErrorCode::MeasurementFailed
            }
            Self::ComparisonRunner { .. } => GateErrorCode::ComparisonFailed,
        }
    }

    pub fn stable_code(&self) -> String {
        self.code().stable_code()
    }
}

// ---------------------------------------------------------------------------
// GatePlan
// ---------------------------------------------------------------------------

/// Everything resolved before the first step runs.
///
/// Baseline and candidate revisions may be equal: measuring a revision
/// against itself is the determinism probe for the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePlan {
    pub execution_id: String,
    pub group_key: String,
    pub trigger: TriggerDecision,
    pub baseline_revision: RevisionRef,
    pub candidate_revision: RevisionRef,
    pub target: BenchTargetSpec,
    pub generator: VectorGeneratorSpec,
    pub label: BaselineLabel,
    /// Environment handed through to runner and generator subprocesses.
    pub runner_env: BTreeMap<String, String>,
}

impl GatePlan {
    pub fn validate(&self) -> Result<(), GateError> {
        if self.execution_id.trim().is_empty() {
            return Err(GateError::InvalidPlan {
                detail: "execution_id must not be empty".to_string(),
            });
        }
        if self.group_key.trim().is_empty() {
            return Err(GateError::InvalidPlan {
                detail: "group_key must not be empty".to_string(),
            });
        }
        self.target.validate().map_err(|error| GateError::InvalidPlan {
            detail: error.to_string(),
        })?;
        self.generator.validate().map_err(|error| GateError::InvalidPlan {
            detail: error.to_string(),
        })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RegressionGate — the engine
// ---------------------------------------------------------------------------

/// Drives one execution through the protocol.
///
/// Collaborators are passed per operation so tests can swap in scripted
/// doubles; the plan and the cancellation ticket are fixed at construction.
#[derive(Debug)]
pub struct RegressionGate {
    plan: GatePlan,
    ticket: ExecutionTicket,
    state: GateState,
    records: Vec<StepRecord>,
    events: Vec<GateLogEvent>,
    manifest: Option<VectorManifest>,
    snapshot: Option<BaselineSnapshotRecord>,
    comparison: Option<ComparisonReport>,
}

impl RegressionGate {
    pub fn new(plan: GatePlan, ticket: ExecutionTicket) -> Result<Self, GateError> {
        plan.validate()?;
        Ok(Self {
            plan,
            ticket,
            state: GateState::Init,
            records: Vec::new(),
            events: Vec::new(),
            manifest: None,
            snapshot: None,
            comparison: None,
        })
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn plan(&self) -> &GatePlan {
        &self.plan
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn events(&self) -> &[GateLogEvent] {
        &self.events
    }

    pub fn vector_manifest(&self) -> Option<&VectorManifest> {
        self.manifest.as_ref()
    }

    pub fn comparison(&self) -> Option<&ComparisonReport> {
        self.comparison.as_ref()
    }

    /// Step 1: run the generator once and capture the store manifest.
    pub fn generate_vectors(
        &mut self,
        generator: &mut dyn VectorGenerator,
    ) -> Result<VectorManifest, GateError> {
        self.guard(GateState::Init, "generate_vectors")?;
        self.check_ticket(StepId::GenerateVectors)?;
        let started = Instant::now();
        let summary = match generator.generate(&self.plan.generator) {
            Ok(summary) => summary,
            Err(error) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                return Err(self.fail_step(
                    StepId::GenerateVectors,
                    None,
                    None,
                    None,
                    None,
                    duration_ms,
                    GateError::Generation { source: error },
                ));
            }
        };
        let manifest = match VectorManifest::capture(&self.plan.generator.output_dir) {
            Ok(manifest) => manifest,
            Err(error) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                return Err(self.fail_step(
                    StepId::GenerateVectors,
                    Some(summary.command),
                    None,
                    None,
                    None,
                    duration_ms,
                    GateError::Generation { source: error },
                ));
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        self.pass_step(
            StepId::GenerateVectors,
            Some(summary.command),
            Some(0),
            non_empty(summary.stdout),
            non_empty(summary.stderr),
            duration_ms,
        );
        self.emit(
            "vectors_generated",
            "ok",
            Some(StepId::GenerateVectors),
            None,
            Some(format!(
                "{} file(s), fingerprint {}",
                manifest.file_count(),
                manifest.fingerprint()
            )),
        );
        self.manifest = Some(manifest.clone());
        self.state = GateState::VectorsGenerated;
        Ok(manifest)
    }

    /// Steps 2 and 3: clean-checkout the baseline and save the snapshot.
    pub fn capture_baseline(
        &mut self,
        tree: &mut dyn SourceTree,
        runner: &mut dyn BenchRunner,
        label: &BaselineLabel,
    ) -> Result<BaselineSnapshotRecord, GateError> {
        self.guard(GateState::VectorsGenerated, "capture_baseline")?;
        self.check_ticket(StepId::CheckoutBaseline)?;
        self.run_checkout(
            tree,
            StepId::CheckoutBaseline,
            RevisionRole::Baseline,
            CheckoutMode::Clean,
        )?;

        self.check_ticket(StepId::MeasureBaseline)?;
        let invocation = RunnerInvocation {
            target: self.plan.target.clone(),
            mode: RunnerMode::SaveBaseline,
            label: label.clone(),
            env: self.plan.runner_env.clone(),
        };
        let rendered = invocation.rendered(&runner.identity());
        let started = Instant::now();
        let outcome = match runner.run(&invocation) {
            Ok(outcome) => outcome,
            Err(error) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                return Err(self.fail_step(
                    StepId::MeasureBaseline,
                    Some(rendered),
                    None,
                    None,
                    None,
                    duration_ms,
                    GateError::MeasurementRunner { source: error },
                ));
            }
        };
        if !outcome.success() {
            return Err(self.fail_step(
                StepId::MeasureBaseline,
                Some(rendered),
                Some(outcome.exit_code),
                non_empty(outcome.stdout),
                non_empty(outcome.stderr),
                outcome.duration_ms,
                GateError::MeasurementExit {
                    exit_code: outcome.exit_code,
                },
            ));
        }
        self.pass_step(
            StepId::MeasureBaseline,
            Some(rendered),
            Some(outcome.exit_code),
            non_empty(outcome.stdout),
            non_empty(outcome.stderr),
            outcome.duration_ms,
        );
        let record = BaselineSnapshotRecord {
            label: label.clone(),
            saved_by_execution: self.plan.execution_id.clone(),
            runner_identity: runner.identity(),
            duration_ms: outcome.duration_ms,
        };
        self.emit(
            "baseline_captured",
            "ok",
            Some(StepId::MeasureBaseline),
            None,
            Some(format!("label {label}")),
        );
        self.snapshot = Some(record.clone());
        self.state = GateState::BaselineCaptured;
        Ok(record)
    }

    /// Steps 4 and 5: checkout the candidate preserving artifacts, verify
    /// the vector store, and run the compare.
    pub fn capture_and_compare(
        &mut self,
        tree: &mut dyn SourceTree,
        runner: &mut dyn BenchRunner,
        label: &BaselineLabel,
    ) -> Result<ComparisonReport, GateError> {
        self.guard(GateState::BaselineCaptured, "capture_and_compare")?;
        if let Some(snapshot) = &self.snapshot
            && &snapshot.label != label
        {
            return Err(GateError::LabelMismatch {
                saved: snapshot.label.as_str().to_string(),
                requested: label.as_str().to_string(),
            });
        }
        self.check_ticket(StepId::CheckoutCandidate)?;
        self.run_checkout(
            tree,
            StepId::CheckoutCandidate,
            RevisionRole::Candidate,
            CheckoutMode::PreserveArtifacts,
        )?;

        self.check_ticket(StepId::MeasureCandidate)?;
        if let Some(manifest) = self.manifest.clone() {
            if let Err(error) = manifest.verify_unchanged(&self.plan.generator.output_dir) {
                return Err(self.fail_step(
                    StepId::MeasureCandidate,
                    None,
                    None,
                    None,
                    None,
                    0,
                    GateError::Generation { source: error },
                ));
            }
            self.emit(
                "vectors_verified",
                "ok",
                Some(StepId::MeasureCandidate),
                None,
                None,
            );
        }
        let invocation = RunnerInvocation {
            target: self.plan.target.clone(),
            mode: RunnerMode::CompareBaseline,
            label: label.clone(),
            env: self.plan.runner_env.clone(),
        };
        let rendered = invocation.rendered(&runner.identity());
        let started = Instant::now();
        let outcome = match runner.run(&invocation) {
            Ok(outcome) => outcome,
            Err(error) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                return Err(self.fail_step(
                    StepId::MeasureCandidate,
                    Some(rendered),
                    None,
                    None,
                    None,
                    duration_ms,
                    GateError::ComparisonRunner { source: error },
                ));
            }
        };
        let report = ComparisonReport {
            label: label.clone(),
            exit_code: outcome.exit_code,
            passed: outcome.success(),
            stdout: outcome.stdout.clone(),
            stderr: outcome.stderr.clone(),
            duration_ms: outcome.duration_ms,
        };
        if report.passed {
            self.pass_step(
                StepId::MeasureCandidate,
                Some(rendered),
                Some(outcome.exit_code),
                non_empty(outcome.stdout),
                non_empty(outcome.stderr),
                outcome.duration_ms,
            );
            self.emit(
                "comparison_clean",
                "ok",
                Some(StepId::MeasureCandidate),
                None,
                None,
            );
        } else {
            // Verdict failure, not an infrastructure fault: the step is
            // recorded as failed but the protocol itself completed.
            let code = GateErrorCode::ComparisonFailed.stable_code();
            self.records.push(StepRecord {
                step: StepId::MeasureCandidate,
                status: StepStatus::Failed {
                    error_code: code.clone(),
                    detail: format!("comparison exited with status {}", outcome.exit_code),
                },
                command: Some(rendered),
                exit_code: Some(outcome.exit_code),
                stdout: non_empty(outcome.stdout),
                stderr: non_empty(outcome.stderr),
                duration_ms: outcome.duration_ms,
            });
            self.emit(
                "comparison_regressed",
                "fail",
                Some(StepId::MeasureCandidate),
                Some(code),
                Some(format!("exit status {}", outcome.exit_code)),
            );
        }
        self.comparison = Some(report.clone());
        self.state = GateState::Compared;
        Ok(report)
    }

    /// Drive all five steps, stopping at the first fatal failure.
    pub fn run_to_completion(
        &mut self,
        generator: &mut dyn VectorGenerator,
        tree: &mut dyn SourceTree,
        runner: &mut dyn BenchRunner,
    ) -> Result<(), GateError> {
        let label = self.plan.label.clone();
        self.generate_vectors(generator)?;
        self.capture_baseline(tree, runner, &label)?;
        self.capture_and_compare(tree, runner, &label)?;
        Ok(())
    }

    /// Exit contract: logical AND of all step statuses.
    ///
    /// `0` — every step succeeded. `2` — the protocol completed and the
    /// only failure is the comparison verdict. `1` — a fatal failure
    /// stopped the protocol early.
    pub fn exit_code(&self) -> i32 {
        let all_passed = self.state == GateState::Compared
            && self.records.len() == ALL_STEPS.len()
            && self.records.iter().all(|record| record.status.is_success());
        if all_passed {
            0
        } else if self.state == GateState::Compared {
            2
        } else {
            1
        }
    }

    /// Consume the engine into its report artifact.
    pub fn finalize_report(self, generated_at_utc: impl Into<String>) -> GateRunReport {
        let exit_code = self.exit_code();
        let vector_store = self.manifest.as_ref().map(|manifest| VectorStoreSummary {
            root: manifest.vector_root.clone(),
            file_count: manifest.file_count() as u64,
            fingerprint: manifest.fingerprint(),
        });
        GateRunReport {
            schema_version: crate::report::GATE_RUN_REPORT_SCHEMA_VERSION.to_string(),
            generated_at_utc: generated_at_utc.into(),
            execution_id: self.plan.execution_id,
            group_key: self.plan.group_key,
            trigger: self.plan.trigger,
            baseline_label: self.plan.label,
            baseline_revision: self.plan.baseline_revision,
            candidate_revision: self.plan.candidate_revision,
            target: self.plan.target,
            state: self.state,
            steps: self.records,
            vector_store,
            baseline_snapshot: self.snapshot,
            comparison: self.comparison,
            events: self.events,
            exit_code,
        }
    }

    // -- internals --

    fn guard(&self, expected: GateState, attempted: &str) -> Result<(), GateError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(StepOrderViolation {
                state: self.state,
                attempted: attempted.to_string(),
                execution_id: self.plan.execution_id.clone(),
            }
            .into())
        }
    }

    fn check_ticket(&mut self, step: StepId) -> Result<(), GateError> {
        if !self.ticket.is_cancelled() {
            return Ok(());
        }
        let error = GateError::Superseded {
            execution_id: self.plan.execution_id.clone(),
            step,
        };
        self.records.push(StepRecord {
            step,
            status: StepStatus::Cancelled,
            command: None,
            exit_code: None,
            stdout: None,
            stderr: None,
            duration_ms: 0,
        });
        self.emit(
            "execution_cancelled",
            "cancelled",
            Some(step),
            Some(error.stable_code()),
            None,
        );
        self.state = GateState::Failed;
        Err(error)
    }

    fn run_checkout(
        &mut self,
        tree: &mut dyn SourceTree,
        step: StepId,
        role: RevisionRole,
        mode: CheckoutMode,
    ) -> Result<(), GateError> {
        let revision = match role {
            RevisionRole::Baseline => self.plan.baseline_revision.clone(),
            RevisionRole::Candidate => self.plan.candidate_revision.clone(),
        };
        let request = CheckoutRequest {
            revision,
            role,
            mode,
        };
        let started = Instant::now();
        match tree.checkout(&request) {
            Ok(receipt) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                self.pass_step(step, Some(receipt.detail), None, None, None, duration_ms);
                self.emit(
                    "revision_checked_out",
                    "ok",
                    Some(step),
                    None,
                    Some(format!("{role} -> {}", request.revision)),
                );
                Ok(())
            }
            Err(error) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                Err(self.fail_step(
                    step,
                    None,
                    None,
                    None,
                    None,
                    duration_ms,
                    GateError::Checkout {
                        role,
                        source: error,
                    },
                ))
            }
        }
    }

    fn pass_step(
        &mut self,
        step: StepId,
        command: Option<String>,
        exit_code: Option<i32>,
        stdout: Option<String>,
        stderr: Option<String>,
        duration_ms: u64,
    ) {
        self.records.push(StepRecord {
            step,
            status: StepStatus::Succeeded,
            command,
            exit_code,
            stdout,
            stderr,
            duration_ms,
        });
        self.emit("step_completed", "ok", Some(step), None, None);
    }

    #[allow(clippy::too_many_arguments)]
    fn fail_step(
        &mut self,
        step: StepId,
        command: Option<String>,
        exit_code: Option<i32>,
        stdout: Option<String>,
        stderr: Option<String>,
        duration_ms: u64,
        error: GateError,
    ) -> GateError {
        self.records.push(StepRecord {
            step,
            status: StepStatus::Failed {
                error_code: error.stable_code(),
                detail: error.to_string(),
            },
            command,
            exit_code,
            stdout,
            stderr,
            duration_ms,
        });
        self.emit(
            "step_failed",
            "fail",
            Some(step),
            Some(error.stable_code()),
            Some(error.to_string()),
        );
        self.state = GateState::Failed;
        error
    }

    fn emit(
        &mut self,
        event: &str,
        outcome: &str,
        step: Option<StepId>,
        error_code: Option<String>,
        detail: Option<String>,
    ) {
        self.events.push(GateLogEvent {
            execution_id: self.plan.execution_id.clone(),
            component: GATE_COMPONENT.to_string(),
            event: event.to_string(),
            outcome: outcome.to_string(),
            step: step.map(|step| step.as_str().to_string()),
            error_code,
            detail,
        });
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}
