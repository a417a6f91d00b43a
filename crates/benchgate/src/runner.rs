//! Benchmark runner invocation model and runner catalog.
//!
//! The runner owns measurement and the regression verdict; the gate owns the
//! protocol around it. An invocation renders to a cargo-bench-shaped argument
//! vector with the baseline label threaded explicitly: save mode persists a
//! snapshot under the label, compare mode measures again and judges against
//! that snapshot via its exit status. A non-zero compare exit is data for the
//! report, not an infrastructure error.
//!
//! Deployments that measure through a wrapper tool declare it in a
//! schema-versioned TOML catalog and select it by runner id.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::baseline::BaselineLabel;

/// Schema tag expected at the top of a runner catalog file.
pub const RUNNER_CATALOG_SCHEMA_VERSION: &str = "benchgate.runner-catalog.v1";

// ---------------------------------------------------------------------------
// BenchTargetSpec — what gets measured
// ---------------------------------------------------------------------------

/// The benchmark target both phases measure with identical settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchTargetSpec {
    /// Bench harness name passed to `--bench`.
    pub bench_id: String,
    /// Optional package selector passed to `--package`.
    pub package: Option<String>,
    /// Build profile passed to `--profile`.
    pub profile: String,
    /// Feature selectors joined into one `--features` argument.
    pub features: Vec<String>,
}

impl BenchTargetSpec {
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.bench_id.trim().is_empty() {
            return Err(RunnerError::InvalidTarget {
                detail: "bench_id must not be empty".to_string(),
            });
        }
        if self.profile.trim().is_empty() {
            return Err(RunnerError::InvalidTarget {
                detail: "profile must not be empty".to_string(),
            });
        }
        if let Some(package) = &self.package
            && package.trim().is_empty()
        {
            return Err(RunnerError::InvalidTarget {
                detail: "package selector must not be empty when present".to_string(),
            });
        }
        if self.features.iter().any(|feature| feature.trim().is_empty()) {
            return Err(RunnerError::InvalidTarget {
                detail: "feature selectors must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RunnerMode and RunnerInvocation
// ---------------------------------------------------------------------------

/// Save a snapshot under the label, or compare against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerMode {
    SaveBaseline,
    CompareBaseline,
}

impl RunnerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SaveBaseline => "save_baseline",
            Self::CompareBaseline => "compare_baseline",
        }
    }
}

impl fmt::Display for RunnerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fully specified runner call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerInvocation {
    pub target: BenchTargetSpec,
    pub mode: RunnerMode,
    pub label: BaselineLabel,
    /// Environment handed through to the runner process.
    pub env: BTreeMap<String, String>,
}

impl RunnerInvocation {
    /// Render the cargo-bench-shaped argument vector.
    ///
    /// Shape: `bench [--package <p>] --bench <id> --profile <profile>
    /// [--features <csv>] -- --save-baseline=<label>` (or
    /// `--baseline=<label>` in compare mode).
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["bench".to_string()];
        if let Some(package) = &self.target.package {
            args.push("--package".to_string());
            args.push(package.clone());
        }
        args.push("--bench".to_string());
        args.push(self.target.bench_id.clone());
        args.push("--profile".to_string());
        args.push(self.target.profile.clone());
        if !self.target.features.is_empty() {
            args.push("--features".to_string());
            args.push(self.target.features.join(","));
        }
        args.push("--".to_string());
        match self.mode {
            RunnerMode::SaveBaseline => args.push(format!("--save-baseline={}", self.label)),
            RunnerMode::CompareBaseline => args.push(format!("--baseline={}", self.label)),
        }
        args
    }

    /// Rendered command line for logs and reports.
    pub fn rendered(&self, program: &str) -> String {
        let mut parts = vec![program.to_string()];
        parts.extend(self.to_args());
        parts.join(" ")
    }
}

/// What a runner call produced. Non-zero exits are carried, not raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl RunnerOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runner failures that prevent an outcome from existing at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("invalid bench target: {detail}")]
    InvalidTarget { detail: String },
    #[error("failed to spawn `{command}`: {detail}")]
    Spawn { command: String, detail: String },
}

/// Executes runner invocations. Implemented by a subprocess wrapper in
/// production and a scripted double in tests.
pub trait BenchRunner {
    fn run(&mut self, invocation: &RunnerInvocation) -> Result<RunnerOutcome, RunnerError>;

    /// Identity string recorded in snapshot records and reports.
    fn identity(&self) -> String;
}

// ---------------------------------------------------------------------------
// CommandBenchRunner — subprocess implementation
// ---------------------------------------------------------------------------

/// Runs `<program> <catalog args..> <invocation args..>` in the source tree.
#[derive(Debug, Clone)]
pub struct CommandBenchRunner {
    program: String,
    leading_args: Vec<String>,
    working_dir: PathBuf,
}

impl CommandBenchRunner {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn from_spec(spec: &RunnerSpec, working_dir: impl Into<PathBuf>) -> Self {
        Self::new(spec.program.clone(), working_dir).with_leading_args(spec.args.clone())
    }
}

impl BenchRunner for CommandBenchRunner {
    fn run(&mut self, invocation: &RunnerInvocation) -> Result<RunnerOutcome, RunnerError> {
        invocation.target.validate()?;
        let mut all_args = self.leading_args.clone();
        all_args.extend(invocation.to_args());
        let rendered = {
            let mut parts = vec![self.program.clone()];
            parts.extend(all_args.iter().cloned());
            parts.join(" ")
        };
        let started = Instant::now();
        let output = Command::new(&self.program)
            .args(&all_args)
            .envs(&invocation.env)
            .current_dir(&self.working_dir)
            .output()
            .map_err(|error| RunnerError::Spawn {
                command: rendered,
                detail: error.to_string(),
            })?;
        Ok(RunnerOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn identity(&self) -> String {
        if self.leading_args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.leading_args.join(" "))
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedBenchRunner — test double
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum ScriptedRun {
    Outcome(RunnerOutcome),
    SpawnFailure(String),
}

/// Replays a scripted queue of outcomes and records every invocation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBenchRunner {
    script: VecDeque<ScriptedRun>,
    pub invocations: Vec<RunnerInvocation>,
}

impl ScriptedBenchRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_exit(mut self, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        self.script.push_back(ScriptedRun::Outcome(RunnerOutcome {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration_ms: 1,
        }));
        self
    }

    pub fn then_success(self) -> Self {
        self.then_exit(0, "", "")
    }

    pub fn then_spawn_failure(mut self, detail: &str) -> Self {
        self.script.push_back(ScriptedRun::SpawnFailure(detail.to_string()));
        self
    }
}

impl BenchRunner for ScriptedBenchRunner {
    fn run(&mut self, invocation: &RunnerInvocation) -> Result<RunnerOutcome, RunnerError> {
        invocation.target.validate()?;
        self.invocations.push(invocation.clone());
        match self.script.pop_front() {
            Some(ScriptedRun::Outcome(outcome)) => Ok(outcome),
            Some(ScriptedRun::SpawnFailure(detail)) => Err(RunnerError::Spawn {
                command: invocation.rendered("scripted"),
                detail,
            }),
            None => Err(RunnerError::Spawn {
                command: invocation.rendered("scripted"),
                detail: "scripted runner exhausted".to_string(),
            }),
        }
    }

    fn identity(&self) -> String {
        "scripted".to_string()
    }
}

// ---------------------------------------------------------------------------
// Runner catalog — TOML-declared measurement tools
// ---------------------------------------------------------------------------

fn default_runner_enabled() -> bool {
    true
}

/// One measurement tool a deployment may select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSpec {
    pub runner_id: String,
    pub display_name: String,
    /// Program invoked for every runner call.
    pub program: String,
    /// Substring expected in `--version` output; empty means unpinned.
    #[serde(default)]
    pub version_pin: String,
    /// Arguments inserted before the invocation's own arguments.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_runner_enabled")]
    pub enabled: bool,
}

impl RunnerSpec {
    /// Built-in default used when no catalog is configured.
    pub fn builtin_cargo() -> Self {
        Self {
            runner_id: "cargo-bench".to_string(),
            display_name: "cargo bench".to_string(),
            program: "cargo".to_string(),
            version_pin: String::new(),
            args: Vec::new(),
            enabled: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunnerCatalogFile {
    schema_version: String,
    runners: Vec<RunnerSpec>,
}

/// Catalog loading and selection failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("failed to read runner catalog `{path}`: {detail}")]
    Read { path: String, detail: String },
    #[error("failed to parse runner catalog `{path}`: {detail}")]
    Parse { path: String, detail: String },
    #[error("runner catalog schema version `{found}` does not match `{expected}`")]
    SchemaVersionMismatch { expected: String, found: String },
    #[error("runner catalog declares no runners")]
    NoRunners,
    #[error("runner catalog entry `{runner_id}` has empty {field}")]
    EmptyField { runner_id: String, field: String },
    #[error("runner catalog declares duplicate runner id `{runner_id}`")]
    DuplicateRunnerId { runner_id: String },
    #[error("runner id `{runner_id}` not present in catalog")]
    UnknownRunner { runner_id: String },
    #[error("runner `{runner_id}` is disabled in the catalog")]
    RunnerDisabled { runner_id: String },
}

/// Parse catalog text, validating schema version and per-entry fields.
pub fn parse_runner_catalog(text: &str, origin: &str) -> Result<Vec<RunnerSpec>, CatalogError> {
    let file: RunnerCatalogFile = toml::from_str(text).map_err(|error| CatalogError::Parse {
        path: origin.to_string(),
        detail: error.to_string(),
    })?;
    if file.schema_version != RUNNER_CATALOG_SCHEMA_VERSION {
        return Err(CatalogError::SchemaVersionMismatch {
            expected: RUNNER_CATALOG_SCHEMA_VERSION.to_string(),
            found: file.schema_version,
        });
    }
    if file.runners.is_empty() {
        return Err(CatalogError::NoRunners);
    }
    let mut seen = BTreeSet::new();
    for runner in &file.runners {
        if runner.runner_id.trim().is_empty() {
            return Err(CatalogError::EmptyField {
                runner_id: "<unnamed>".to_string(),
                field: "runner_id".to_string(),
            });
        }
        if runner.display_name.trim().is_empty() {
            return Err(CatalogError::EmptyField {
                runner_id: runner.runner_id.clone(),
                field: "display_name".to_string(),
            });
        }
        if runner.program.trim().is_empty() {
            return Err(CatalogError::EmptyField {
                runner_id: runner.runner_id.clone(),
                field: "program".to_string(),
            });
        }
        if !seen.insert(runner.runner_id.clone()) {
            return Err(CatalogError::DuplicateRunnerId {
                runner_id: runner.runner_id.clone(),
            });
        }
    }
    Ok(file.runners)
}

/// Load and validate a catalog file.
pub fn load_runner_catalog(path: &Path) -> Result<Vec<RunnerSpec>, CatalogError> {
    let text = fs::read_to_string(path).map_err(|error| CatalogError::Read {
        path: path.display().to_string(),
        detail: error.to_string(),
    })?;
    parse_runner_catalog(&text, &path.display().to_string())
}

/// Resolve a runner id against the catalog.
pub fn select_runner<'a>(
    runners: &'a [RunnerSpec],
    runner_id: &str,
) -> Result<&'a RunnerSpec, CatalogError> {
    let runner = runners
        .iter()
        .find(|runner| runner.runner_id == runner_id)
        .ok_or_else(|| CatalogError::UnknownRunner {
            runner_id: runner_id.to_string(),
        })?;
    if !runner.enabled {
        return Err(CatalogError::RunnerDisabled {
            runner_id: runner_id.to_string(),
        });
    }
    Ok(runner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> BenchTargetSpec {
        BenchTargetSpec {
            bench_id: "iai".to_string(),
            package: Some("storage-db".to_string()),
            profile: "profiling".to_string(),
            features: vec!["test-utils".to_string()],
        }
    }

    fn invocation(mode: RunnerMode) -> RunnerInvocation {
        RunnerInvocation {
            target: target(),
            mode,
            label: BaselineLabel::default_label(),
            env: BTreeMap::new(),
        }
    }

    // -- Argument rendering --

    #[test]
    fn save_mode_renders_save_baseline_argument() {
        let args = invocation(RunnerMode::SaveBaseline).to_args();
        assert_eq!(
            args,
            vec![
                "bench",
                "--package",
                "storage-db",
                "--bench",
                "iai",
                "--profile",
                "profiling",
                "--features",
                "test-utils",
                "--",
                "--save-baseline=base",
            ]
        );
    }

    #[test]
    fn compare_mode_renders_baseline_argument() {
        let args = invocation(RunnerMode::CompareBaseline).to_args();
        assert_eq!(args.last().map(String::as_str), Some("--baseline=base"));
        assert!(!args.iter().any(|arg| arg.starts_with("--save-baseline")));
    }

    #[test]
    fn optional_selectors_are_omitted() {
        let mut invocation = invocation(RunnerMode::SaveBaseline);
        invocation.target.package = None;
        invocation.target.features.clear();
        let args = invocation.to_args();
        assert_eq!(
            args,
            vec![
                "bench",
                "--bench",
                "iai",
                "--profile",
                "profiling",
                "--",
                "--save-baseline=base",
            ]
        );
    }

    #[test]
    fn features_join_into_single_selector() {
        let mut invocation = invocation(RunnerMode::SaveBaseline);
        invocation.target.features = vec!["a".to_string(), "b".to_string()];
        let args = invocation.to_args();
        let position = args.iter().position(|arg| arg == "--features").expect("features");
        assert_eq!(args[position + 1], "a,b");
    }

    #[test]
    fn rendered_command_includes_program() {
        let rendered = invocation(RunnerMode::CompareBaseline).rendered("cargo");
        assert!(rendered.starts_with("cargo bench "));
        assert!(rendered.ends_with("--baseline=base"));
    }

    // -- Target validation --

    #[test]
    fn target_rejects_empty_fields() {
        let mut bad = target();
        bad.bench_id = String::new();
        assert!(matches!(bad.validate(), Err(RunnerError::InvalidTarget { .. })));

        let mut bad = target();
        bad.profile = " ".to_string();
        assert!(matches!(bad.validate(), Err(RunnerError::InvalidTarget { .. })));

        let mut bad = target();
        bad.package = Some(String::new());
        assert!(matches!(bad.validate(), Err(RunnerError::InvalidTarget { .. })));

        let mut bad = target();
        bad.features = vec![String::new()];
        assert!(matches!(bad.validate(), Err(RunnerError::InvalidTarget { .. })));
    }

    // -- Scripted runner --

    #[test]
    fn scripted_runner_replays_outcomes_in_order() {
        let mut runner = ScriptedBenchRunner::new()
            .then_success()
            .then_exit(2, "regressed", "delta above threshold");
        let first = runner.run(&invocation(RunnerMode::SaveBaseline)).expect("first");
        assert!(first.success());
        let second = runner.run(&invocation(RunnerMode::CompareBaseline)).expect("second");
        assert_eq!(second.exit_code, 2);
        assert_eq!(second.stdout, "regressed");
        assert_eq!(runner.invocations.len(), 2);
        assert_eq!(runner.invocations[0].mode, RunnerMode::SaveBaseline);
        assert_eq!(runner.invocations[1].mode, RunnerMode::CompareBaseline);
    }

    #[test]
    fn scripted_runner_exhaustion_is_a_spawn_error() {
        let mut runner = ScriptedBenchRunner::new();
        let err = runner.run(&invocation(RunnerMode::SaveBaseline)).unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[test]
    fn scripted_spawn_failure_surfaces() {
        let mut runner = ScriptedBenchRunner::new().then_spawn_failure("missing binary");
        let err = runner.run(&invocation(RunnerMode::SaveBaseline)).unwrap_err();
        match err {
            RunnerError::Spawn { detail, .. } => assert_eq!(detail, "missing binary"),
            other => panic!("expected spawn failure, got {other:?}"),
        }
    }

    // -- Catalog --

    const CATALOG: &str = r#"
schema_version = "benchgate.runner-catalog.v1"

[[runners]]
runner_id = "cargo-bench"
display_name = "cargo bench"
program = "cargo"

[[runners]]
runner_id = "callgrind"
display_name = "iai-callgrind wrapper"
program = "iai-runner"
version_pin = "0.7"
args = ["--quiet"]
enabled = false
"#;

    #[test]
    fn catalog_parses_with_defaults() {
        let runners = parse_runner_catalog(CATALOG, "inline").expect("parse");
        assert_eq!(runners.len(), 2);
        assert_eq!(runners[0].runner_id, "cargo-bench");
        assert!(runners[0].enabled);
        assert!(runners[0].version_pin.is_empty());
        assert!(runners[0].args.is_empty());
        assert_eq!(runners[1].args, vec!["--quiet"]);
        assert!(!runners[1].enabled);
    }

    #[test]
    fn catalog_rejects_wrong_schema_version() {
        let text = CATALOG.replace("benchgate.runner-catalog.v1", "benchgate.runner-catalog.v9");
        let err = parse_runner_catalog(&text, "inline").unwrap_err();
        assert!(matches!(err, CatalogError::SchemaVersionMismatch { .. }));
    }

    #[test]
    fn catalog_rejects_duplicate_runner_ids() {
        let text = CATALOG.replace("callgrind", "cargo-bench");
        let err = parse_runner_catalog(&text, "inline").unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateRunnerId { .. }));
    }

    #[test]
    fn catalog_rejects_empty_program() {
        let text = CATALOG.replace("program = \"cargo\"", "program = \"\"");
        let err = parse_runner_catalog(&text, "inline").unwrap_err();
        assert!(matches!(err, CatalogError::EmptyField { .. }));
    }

    #[test]
    fn selection_resolves_enabled_runner() {
        let runners = parse_runner_catalog(CATALOG, "inline").expect("parse");
        let runner = select_runner(&runners, "cargo-bench").expect("select");
        assert_eq!(runner.program, "cargo");
    }

    #[test]
    fn selection_rejects_unknown_and_disabled() {
        let runners = parse_runner_catalog(CATALOG, "inline").expect("parse");
        assert!(matches!(
            select_runner(&runners, "nope"),
            Err(CatalogError::UnknownRunner { .. })
        ));
        assert!(matches!(
            select_runner(&runners, "callgrind"),
            Err(CatalogError::RunnerDisabled { .. })
        ));
    }

    #[test]
    fn builtin_cargo_spec_is_enabled_and_unpinned() {
        let spec = RunnerSpec::builtin_cargo();
        assert_eq!(spec.program, "cargo");
        assert!(spec.enabled);
        assert!(spec.version_pin.is_empty());
    }

    // -- Serde --

    #[test]
    fn invocation_roundtrips() {
        let invocation = invocation(RunnerMode::SaveBaseline);
        let encoded = serde_json::to_string(&invocation).expect("encode");
        assert!(encoded.contains("\"save_baseline\""));
        let decoded: RunnerInvocation = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, invocation);
    }
}
