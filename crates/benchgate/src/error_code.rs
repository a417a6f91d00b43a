use std::fmt;

use serde::{Deserialize, Serialize};

use crate::baseline::LabelError;
use crate::checkout::CheckoutError;
use crate::env_config::EnvConfigError;
use crate::gate::{GateError, StepOrderViolation};
use crate::preflight::PreflightError;
use crate::runner::{CatalogError, RunnerError};
use crate::test_vectors::VectorError;

pub const ERROR_CODE_REGISTRY_VERSION: u32 = 1;
pub const ERROR_CODE_COMPATIBILITY_POLICY: &str =
    "append-only: assigned codes are permanent, never reused, and may only be marked deprecated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Critical,
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSubsystem {
    Provisioning,
    Generation,
    Measurement,
    Comparison,
    Ordering,
    Configuration,
    Reserved,
}

impl ErrorSubsystem {
    pub const fn includes(self, numeric: u16) -> bool {
        let (start, end) = self.range();
        numeric >= start && numeric <= end
    }

    pub const fn range(self) -> (u16, u16) {
        match self {
            Self::Provisioning => (1000, 1999),
            Self::Generation => (2000, 2999),
            Self::Measurement => (3000, 3999),
            Self::Comparison => (4000, 4999),
            Self::Ordering => (5000, 5999),
            Self::Configuration => (6000, 6999),
            Self::Reserved => (7000, 9999),
        }
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateErrorCode {
    RunnerNotFound = 1000,
    RunnerVersionMismatch = 1001,
    RunnerCatalogInvalid = 1002,
    RunnerProbeFailed = 1003,

    VectorGenerationFailed = 2000,
    VectorStoreUnreadable = 2001,
    VectorSetChanged = 2002,

    CheckoutFailed = 3000,
    MeasurementFailed = 3001,

    ComparisonFailed = 4000,

    StepOrderViolation = 5000,
    ExecutionSuperseded = 5001,

    InvalidBaselineLabel = 6000,
    InvalidPlan = 6001,
    InvalidEnvironment = 6002,
}

pub const ALL_ERROR_CODES: &[GateErrorCode] = &[
    GateErrorCode::RunnerNotFound,
    GateErrorCode::RunnerVersionMismatch,
    GateErrorCode::RunnerCatalogInvalid,
    GateErrorCode::RunnerProbeFailed,
    GateErrorCode::VectorGenerationFailed,
    GateErrorCode::VectorStoreUnreadable,
    GateErrorCode::VectorSetChanged,
    GateErrorCode::CheckoutFailed,
    GateErrorCode::MeasurementFailed,
    GateErrorCode::ComparisonFailed,
    GateErrorCode::StepOrderViolation,
    GateErrorCode::ExecutionSuperseded,
    GateErrorCode::InvalidBaselineLabel,
    GateErrorCode::InvalidPlan,
    GateErrorCode::InvalidEnvironment,
];

impl GateErrorCode {
    pub const fn numeric(self) -> u16 {
        self as u16
    }

    pub fn stable_code(self) -> String {
        format!("BG-{:04}", self.numeric())
    }

    pub const fn subsystem(self) -> ErrorSubsystem {
        match self.numeric() {
            1000..=1999 => ErrorSubsystem::Provisioning,
            2000..=2999 => ErrorSubsystem::Generation,
            3000..=3999 => ErrorSubsystem::Measurement,
            4000..=4999 => ErrorSubsystem::Comparison,
            5000..=5999 => ErrorSubsystem::Ordering,
            6000..=6999 => ErrorSubsystem::Configuration,
            _ => ErrorSubsystem::Reserved,
        }
    }

    pub const fn severity(self) -> ErrorSeverity {
        match self {
            Self::VectorSetChanged | Self::StepOrderViolation => ErrorSeverity::Critical,
            Self::ExecutionSuperseded => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::RunnerNotFound => {
                "Requested bench runner is absent from the catalog or not installed on the host."
            }
            Self::RunnerVersionMismatch => {
                "Installed bench runner version does not satisfy the catalog version pin."
            }
            Self::RunnerCatalogInvalid => {
                "Runner catalog failed schema, uniqueness, or field validation."
            }
            Self::RunnerProbeFailed => {
                "Bench runner version probe exited with a failure status."
            }
            Self::VectorGenerationFailed => {
                "Test vector generator could not produce the vector store."
            }
            Self::VectorStoreUnreadable => {
                "Vector store on disk could not be read while capturing its manifest."
            }
            Self::VectorSetChanged => {
                "Vector store content drifted between baseline and candidate measurement."
            }
            Self::CheckoutFailed => {
                "Source tree checkout of the baseline or candidate revision failed."
            }
            Self::MeasurementFailed => {
                "Baseline measurement run failed to start or exited with a failure status."
            }
            Self::ComparisonFailed => {
                "Comparison run reported a regression or failed to start."
            }
            Self::StepOrderViolation => {
                "A protocol operation was invoked out of the fixed five-step order."
            }
            Self::ExecutionSuperseded => {
                "Execution was cancelled because a newer run claimed its concurrency group."
            }
            Self::InvalidBaselineLabel => {
                "Baseline label failed validation or did not match the saved snapshot."
            }
            Self::InvalidPlan => "Gate plan failed validation before the first step ran.",
            Self::InvalidEnvironment => {
                "A recognized environment variable carried a value the gate cannot use."
            }
        }
    }

    pub const fn operator_action(self) -> &'static str {
        match self {
            Self::RunnerNotFound => {
                "Install the runner or select a catalog entry that exists on this host."
            }
            Self::RunnerVersionMismatch => {
                "Upgrade or downgrade the runner to the pinned version, or update the pin."
            }
            Self::RunnerCatalogInvalid => {
                "Fix the catalog document and re-validate it before dispatching executions."
            }
            Self::RunnerProbeFailed => {
                "Run the version probe by hand and repair the runner installation."
            }
            Self::VectorGenerationFailed => {
                "Inspect generator stderr, free disk space, and re-run generation."
            }
            Self::VectorStoreUnreadable => {
                "Check store permissions and filesystem health, then regenerate the vectors."
            }
            Self::VectorSetChanged => {
                "Discard the run; both measurements must read byte-identical vectors."
            }
            Self::CheckoutFailed => {
                "Verify the revision exists and the working tree is clean enough to switch."
            }
            Self::MeasurementFailed => {
                "Read the runner output, fix the bench target or harness, and re-run."
            }
            Self::ComparisonFailed => {
                "Review the comparison output; a genuine regression blocks the candidate."
            }
            Self::StepOrderViolation => {
                "Fix the driving code; the protocol order is not configurable."
            }
            Self::ExecutionSuperseded => {
                "No action; the newer execution for the group carries the result."
            }
            Self::InvalidBaselineLabel => {
                "Supply a label of lowercase alphanumerics, dots, underscores, and hyphens."
            }
            Self::InvalidPlan => "Correct the plan fields reported in the error detail.",
            Self::InvalidEnvironment => {
                "Unset or correct the environment variable named in the error."
            }
        }
    }

    pub const fn deprecated(self) -> bool {
        false
    }

    pub fn from_numeric(numeric: u16) -> Option<Self> {
        ALL_ERROR_CODES
            .iter()
            .copied()
            .find(|candidate| candidate.numeric() == numeric)
    }

    pub fn to_registry_entry(self) -> ErrorCodeEntry {
        ErrorCodeEntry {
            code: self.stable_code(),
            numeric: self.numeric(),
            subsystem: self.subsystem(),
            severity: self.severity(),
            description: self.description().to_string(),
            operator_action: self.operator_action().to_string(),
            deprecated: self.deprecated(),
        }
    }
}

impl fmt::Display for GateErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stable_code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCodeEntry {
    pub code: String,
    pub numeric: u16,
    pub subsystem: ErrorSubsystem,
    pub severity: ErrorSeverity,
    pub description: String,
    pub operator_action: String,
    pub deprecated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCodeRegistry {
    pub version: u32,
    pub compatibility_policy: String,
    pub entries: Vec<ErrorCodeEntry>,
}

pub fn error_code_registry() -> ErrorCodeRegistry {
    ErrorCodeRegistry {
        version: ERROR_CODE_REGISTRY_VERSION,
        compatibility_policy: ERROR_CODE_COMPATIBILITY_POLICY.to_string(),
        entries: ALL_ERROR_CODES
            .iter()
            .copied()
            .map(GateErrorCode::to_registry_entry)
            .collect(),
    }
}

pub trait HasErrorCode {
    fn error_code(&self) -> GateErrorCode;
}

impl HasErrorCode for LabelError {
    fn error_code(&self) -> GateErrorCode {
        match self {
            LabelError::Empty
            | LabelError::TooLong { .. }
            | LabelError::BadLeadingCharacter { .. }
            | LabelError::BadCharacter { .. } => GateErrorCode::InvalidBaselineLabel,
        }
    }
}

impl HasErrorCode for CheckoutError {
    fn error_code(&self) -> GateErrorCode {
        match self {
            CheckoutError::EmptyRevision
            | CheckoutError::MalformedRevision { .. }
            | CheckoutError::Spawn { .. }
            | CheckoutError::CommandFailed { .. }
            | CheckoutError::Rejected { .. } => GateErrorCode::CheckoutFailed,
        }
    }
}

impl HasErrorCode for VectorError {
    fn error_code(&self) -> GateErrorCode {
        match self {
            VectorError::InvalidSpec { .. }
            | VectorError::Spawn { .. }
            | VectorError::GeneratorFailed { .. }
            | VectorError::EmptyStore { .. } => GateErrorCode::VectorGenerationFailed,
            VectorError::StoreUnreadable { .. } => GateErrorCode::VectorStoreUnreadable,
            VectorError::Drift { .. } => GateErrorCode::VectorSetChanged,
        }
    }
}

impl HasErrorCode for RunnerError {
    fn error_code(&self) -> GateErrorCode {
        match self {
            RunnerError::InvalidTarget { .. } | RunnerError::Spawn { .. } => {
                GateErrorCode::MeasurementFailed
            }
        }
    }
}

impl HasErrorCode for CatalogError {
    fn error_code(&self) -> GateErrorCode {
        match self {
            CatalogError::Read { .. }
            | CatalogError::Parse { .. }
            | CatalogError::SchemaVersionMismatch { .. }
            | CatalogError::NoRunners
            | CatalogError::EmptyField { .. }
            | CatalogError::DuplicateRunnerId { .. } => GateErrorCode::RunnerCatalogInvalid,
            CatalogError::UnknownRunner { .. } | CatalogError::RunnerDisabled { .. } => {
                GateErrorCode::RunnerNotFound
            }
        }
    }
}

impl HasErrorCode for PreflightError {
    fn error_code(&self) -> GateErrorCode {
        match self {
            PreflightError::RunnerNotFound { .. } => GateErrorCode::RunnerNotFound,
            PreflightError::ProbeFailed { .. } => GateErrorCode::RunnerProbeFailed,
            PreflightError::VersionMismatch { .. } => GateErrorCode::RunnerVersionMismatch,
        }
    }
}

impl HasErrorCode for EnvConfigError {
    fn error_code(&self) -> GateErrorCode {
        match self {
            EnvConfigError::Invalid { .. } => GateErrorCode::InvalidEnvironment,
        }
    }
}

impl HasErrorCode for StepOrderViolation {
    fn error_code(&self) -> GateErrorCode {
        GateErrorCode::StepOrderViolation
    }
}

impl HasErrorCode for GateError {
    fn error_code(&self) -> GateErrorCode {
        self.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    // -- Registry invariants --

    #[test]
    fn numeric_codes_are_unique() {
        let mut seen = BTreeSet::new();
        for code in ALL_ERROR_CODES {
            assert!(
                seen.insert(code.numeric()),
                "duplicate numeric code {}",
                code.numeric()
            );
        }
        assert_eq!(seen.len(), ALL_ERROR_CODES.len());
    }

    #[test]
    fn stable_codes_are_unique_and_formatted() {
        let mut seen = BTreeSet::new();
        for code in ALL_ERROR_CODES {
            let stable = code.stable_code();
            assert!(stable.starts_with("BG-"), "bad prefix: {stable}");
            assert_eq!(stable.len(), 7, "bad width: {stable}");
            assert!(seen.insert(stable));
        }
    }

    #[test]
    fn every_code_sits_inside_its_subsystem_band() {
        for code in ALL_ERROR_CODES {
            assert!(
                code.subsystem().includes(code.numeric()),
                "{} outside {:?} band",
                code.stable_code(),
                code.subsystem()
            );
        }
    }

    #[test]
    fn from_numeric_round_trips_every_code() {
        for code in ALL_ERROR_CODES {
            assert_eq!(GateErrorCode::from_numeric(code.numeric()), Some(*code));
        }
        assert_eq!(GateErrorCode::from_numeric(9999), None);
        assert_eq!(GateErrorCode::from_numeric(0), None);
    }

    #[test]
    fn descriptions_and_actions_are_nonempty() {
        for code in ALL_ERROR_CODES {
            assert!(!code.description().is_empty());
            assert!(!code.operator_action().is_empty());
        }
    }

    #[test]
    fn registry_snapshot_carries_every_entry() {
        let registry = error_code_registry();
        assert_eq!(registry.version, ERROR_CODE_REGISTRY_VERSION);
        assert_eq!(registry.entries.len(), ALL_ERROR_CODES.len());
        assert!(registry.entries.iter().any(|entry| entry.code == "BG-2002"));
    }

    #[test]
    fn registry_serializes_to_json() {
        let registry = error_code_registry();
        let json = serde_json::to_string(&registry).expect("serialize registry");
        let parsed: ErrorCodeRegistry = serde_json::from_str(&json).expect("parse registry");
        assert_eq!(parsed, registry);
    }

    // -- Severity and band policy --

    #[test]
    fn drift_and_order_violations_are_critical() {
        assert_eq!(
            GateErrorCode::VectorSetChanged.severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(
            GateErrorCode::StepOrderViolation.severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(
            GateErrorCode::ExecutionSuperseded.severity(),
            ErrorSeverity::Warning
        );
        assert_eq!(
            GateErrorCode::ComparisonFailed.severity(),
            ErrorSeverity::Error
        );
    }

    // -- Module error mapping --

    #[test]
    fn module_errors_map_into_their_bands() {
        use crate::baseline::LabelError;
        use crate::test_vectors::VectorError;

        assert_eq!(
            LabelError::Empty.error_code(),
            GateErrorCode::InvalidBaselineLabel
        );
        assert_eq!(
            VectorError::Drift { drifts: Vec::new() }.error_code(),
            GateErrorCode::VectorSetChanged
        );
        assert_eq!(
            VectorError::EmptyStore {
                path: "/tmp/x".to_string()
            }
            .error_code(),
            GateErrorCode::VectorGenerationFailed
        );
        assert_eq!(
            CheckoutError::EmptyRevision.error_code(),
            GateErrorCode::CheckoutFailed
        );
        assert_eq!(
            CatalogError::NoRunners.error_code(),
            GateErrorCode::RunnerCatalogInvalid
        );
        assert_eq!(
            CatalogError::UnknownRunner {
                runner_id: "iai".to_string()
            }
            .error_code(),
            GateErrorCode::RunnerNotFound
        );
    }
}
