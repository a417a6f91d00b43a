//! Test vector generation and byte-identity manifests.
//!
//! Vectors are generated exactly once per execution, under the baseline
//! revision's tree, and both measurement phases consume the same files. The
//! engine enforces that by capturing a digest manifest of the vector store
//! right after generation and re-verifying it before the candidate
//! measurement runs. Any drift (added, removed, or modified files) fails the
//! gate before the compare is invoked.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Schema tag written into every persisted manifest.
pub const VECTOR_MANIFEST_SCHEMA_VERSION: &str = "benchgate.vector-manifest.v1";

// ---------------------------------------------------------------------------
// Generator spec and seam
// ---------------------------------------------------------------------------

/// What to ask the generator for and where the output lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorGeneratorSpec {
    /// Generator subcommand, e.g. `test-vectors`.
    pub subcommand: String,
    /// Vector family to generate, e.g. `tables`.
    pub target: String,
    /// Directory the generator populates and the manifest captures.
    pub output_dir: PathBuf,
}

impl VectorGeneratorSpec {
    pub fn validate(&self) -> Result<(), VectorError> {
        if self.subcommand.trim().is_empty() {
            return Err(VectorError::InvalidSpec {
                detail: "generator subcommand must not be empty".to_string(),
            });
        }
        if self.target.trim().is_empty() {
            return Err(VectorError::InvalidSpec {
                detail: "generator target must not be empty".to_string(),
            });
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(VectorError::InvalidSpec {
                detail: "vector output directory must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Result of one generator invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub command: String,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
}

/// Produces the vector store. Implemented by a subprocess wrapper in
/// production and by a scripted double in tests.
pub trait VectorGenerator {
    fn generate(&mut self, spec: &VectorGeneratorSpec) -> Result<GenerationSummary, VectorError>;

    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// CommandVectorGenerator — subprocess implementation
// ---------------------------------------------------------------------------

/// Runs `<program> <leading_args..> <subcommand> <target>` in the source
/// tree. Generators that need to be told the output directory take it via
/// `leading_args`.
#[derive(Debug, Clone)]
pub struct CommandVectorGenerator {
    program: String,
    leading_args: Vec<String>,
    working_dir: PathBuf,
    env: BTreeMap<String, String>,
}

impl CommandVectorGenerator {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    fn rendered_command(&self, spec: &VectorGeneratorSpec) -> String {
        let mut parts = Vec::with_capacity(self.leading_args.len() + 3);
        parts.push(self.program.clone());
        parts.extend(self.leading_args.iter().cloned());
        parts.push(spec.subcommand.clone());
        parts.push(spec.target.clone());
        parts.join(" ")
    }
}

impl VectorGenerator for CommandVectorGenerator {
    fn generate(&mut self, spec: &VectorGeneratorSpec) -> Result<GenerationSummary, VectorError> {
        spec.validate()?;
        let rendered = self.rendered_command(spec);
        let started = Instant::now();
        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .arg(&spec.subcommand)
            .arg(&spec.target)
            .envs(&self.env)
            .current_dir(&self.working_dir)
            .output()
            .map_err(|error| VectorError::Spawn {
                command: rendered.clone(),
                detail: error.to_string(),
            })?;
        let duration_ms = started.elapsed().as_millis() as u64;
        if !output.status.success() {
            let status = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            return Err(VectorError::GeneratorFailed {
                command: rendered,
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(GenerationSummary {
            command: rendered,
            duration_ms,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn describe(&self) -> String {
        self.program.clone()
    }
}

// ---------------------------------------------------------------------------
// ScriptedVectorGenerator — test double
// ---------------------------------------------------------------------------

/// Materializes a fixed file set into the requested output directory, or
/// fails on request. Records every invocation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedVectorGenerator {
    files: BTreeMap<String, Vec<u8>>,
    fail_with: Option<String>,
    pub invocations: Vec<String>,
}

impl ScriptedVectorGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, relative_path: &str, contents: &[u8]) -> Self {
        self.files.insert(relative_path.to_string(), contents.to_vec());
        self
    }

    pub fn failing_with(mut self, detail: &str) -> Self {
        self.fail_with = Some(detail.to_string());
        self
    }
}

impl VectorGenerator for ScriptedVectorGenerator {
    fn generate(&mut self, spec: &VectorGeneratorSpec) -> Result<GenerationSummary, VectorError> {
        spec.validate()?;
        let rendered = format!("scripted {} {}", spec.subcommand, spec.target);
        self.invocations.push(rendered.clone());
        if let Some(detail) = &self.fail_with {
            return Err(VectorError::GeneratorFailed {
                command: rendered,
                status: "1".to_string(),
                stderr: detail.clone(),
            });
        }
        for (relative_path, contents) in &self.files {
            let path = spec.output_dir.join(relative_path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|error| VectorError::StoreUnreadable {
                    path: parent.display().to_string(),
                    detail: error.to_string(),
                })?;
            }
            fs::write(&path, contents).map_err(|error| VectorError::StoreUnreadable {
                path: path.display().to_string(),
                detail: error.to_string(),
            })?;
        }
        Ok(GenerationSummary {
            command: rendered,
            duration_ms: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

// ---------------------------------------------------------------------------
// VectorManifest — digest inventory of the vector store
// ---------------------------------------------------------------------------

/// Sorted inventory of the vector store: relative path to SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorManifest {
    pub schema_version: String,
    pub vector_root: String,
    pub entries: BTreeMap<String, String>,
}

impl VectorManifest {
    /// Capture a manifest by hashing every file under `root`.
    ///
    /// Files are visited in sorted order; relative paths use `/` regardless
    /// of platform. An empty store is an error: generation that produced no
    /// vectors cannot feed a meaningful measurement.
    pub fn capture(root: &Path) -> Result<Self, VectorError> {
        let mut files = Vec::new();
        collect_files(root, root, &mut files)?;
        if files.is_empty() {
            return Err(VectorError::EmptyStore {
                path: root.display().to_string(),
            });
        }
        let mut entries = BTreeMap::new();
        for path in files {
            let contents = fs::read(&path).map_err(|error| VectorError::StoreUnreadable {
                path: path.display().to_string(),
                detail: error.to_string(),
            })?;
            let digest = hex::encode(Sha256::digest(&contents));
            entries.insert(relative_key(root, &path), digest);
        }
        Ok(Self {
            schema_version: VECTOR_MANIFEST_SCHEMA_VERSION.to_string(),
            vector_root: root.display().to_string(),
            entries,
        })
    }

    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    /// Digest over the sorted entries; two manifests with identical content
    /// have identical fingerprints regardless of capture order or root path.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, digest) in &self.entries {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(digest.as_bytes());
            hasher.update([b'\n']);
        }
        hex::encode(hasher.finalize())
    }

    /// Per-file differences between this manifest and a later capture.
    pub fn diff(&self, later: &VectorManifest) -> Vec<VectorDrift> {
        let mut drifts = Vec::new();
        for (path, digest) in &self.entries {
            match later.entries.get(path) {
                None => drifts.push(VectorDrift {
                    path: path.clone(),
                    kind: VectorDriftKind::Removed,
                }),
                Some(other) if other != digest => drifts.push(VectorDrift {
                    path: path.clone(),
                    kind: VectorDriftKind::Modified,
                }),
                Some(_) => {}
            }
        }
        for path in later.entries.keys() {
            if !self.entries.contains_key(path) {
                drifts.push(VectorDrift {
                    path: path.clone(),
                    kind: VectorDriftKind::Added,
                });
            }
        }
        drifts.sort_by(|a, b| a.path.cmp(&b.path));
        drifts
    }

    /// Re-capture `root` and fail when the store no longer matches.
    pub fn verify_unchanged(&self, root: &Path) -> Result<(), VectorError> {
        let later = Self::capture(root)?;
        let drifts = self.diff(&later);
        if drifts.is_empty() {
            Ok(())
        } else {
            Err(VectorError::Drift { drifts })
        }
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), VectorError> {
    let read_dir = fs::read_dir(dir).map_err(|error| VectorError::StoreUnreadable {
        path: dir.display().to_string(),
        detail: error.to_string(),
    })?;
    let mut children = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|error| VectorError::StoreUnreadable {
            path: dir.display().to_string(),
            detail: error.to_string(),
        })?;
        children.push(entry.path());
    }
    children.sort();
    for child in children {
        if child.is_dir() {
            collect_files(root, &child, out)?;
        } else {
            out.push(child);
        }
    }
    Ok(())
}

fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// How one file drifted between captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorDriftKind {
    Added,
    Removed,
    Modified,
}

impl VectorDriftKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
        }
    }
}

impl fmt::Display for VectorDriftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One drifted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorDrift {
    pub path: String,
    pub kind: VectorDriftKind,
}

/// Vector generation and store failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VectorError {
    #[error("invalid generator spec: {detail}")]
    InvalidSpec { detail: String },
    #[error("failed to spawn `{command}`: {detail}")]
    Spawn { command: String, detail: String },
    #[error("vector generator `{command}` exited with status {status}: {stderr}")]
    GeneratorFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("vector store at `{path}` unreadable: {detail}")]
    StoreUnreadable { path: String, detail: String },
    #[error("vector store at `{path}` contains no files")]
    EmptyStore { path: String },
    #[error("vector store drifted after generation: {} file(s) affected", .drifts.len())]
    Drift { drifts: Vec<VectorDrift> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn spec_for(dir: &Path) -> VectorGeneratorSpec {
        VectorGeneratorSpec {
            subcommand: "test-vectors".to_string(),
            target: "tables".to_string(),
            output_dir: dir.to_path_buf(),
        }
    }

    // -- Spec validation --

    #[test]
    fn spec_rejects_empty_fields() {
        let dir = PathBuf::from("vectors");
        let mut spec = spec_for(&dir);
        spec.subcommand = String::new();
        assert!(matches!(spec.validate(), Err(VectorError::InvalidSpec { .. })));
        let mut spec = spec_for(&dir);
        spec.target = "  ".to_string();
        assert!(matches!(spec.validate(), Err(VectorError::InvalidSpec { .. })));
    }

    // -- Scripted generation + capture --

    #[test]
    fn scripted_generator_materializes_files_and_manifest_captures_them() {
        let dir = unique_temp_dir("benchgate-vectors");
        let mut generator = ScriptedVectorGenerator::new()
            .with_file("tables/accounts.json", b"{\"rows\":3}")
            .with_file("tables/storage.json", b"{\"rows\":9}");
        generator.generate(&spec_for(&dir)).expect("generate");
        assert_eq!(generator.invocations.len(), 1);

        let manifest = VectorManifest::capture(&dir).expect("capture");
        assert_eq!(manifest.file_count(), 2);
        assert!(manifest.entries.contains_key("tables/accounts.json"));
        assert!(manifest.entries.contains_key("tables/storage.json"));
        fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn scripted_generator_honours_failure_script() {
        let dir = unique_temp_dir("benchgate-vectors-fail");
        let mut generator = ScriptedVectorGenerator::new().failing_with("no space left");
        let err = generator.generate(&spec_for(&dir)).unwrap_err();
        assert!(matches!(err, VectorError::GeneratorFailed { .. }));
        fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn capturing_empty_store_is_an_error() {
        let dir = unique_temp_dir("benchgate-vectors-empty");
        let err = VectorManifest::capture(&dir).unwrap_err();
        assert!(matches!(err, VectorError::EmptyStore { .. }));
        fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn capturing_missing_store_is_unreadable() {
        let dir = unique_temp_dir("benchgate-vectors-missing").join("nope");
        let err = VectorManifest::capture(&dir).unwrap_err();
        assert!(matches!(err, VectorError::StoreUnreadable { .. }));
    }

    // -- Fingerprints and drift --

    fn manifest_with(entries: &[(&str, &str)]) -> VectorManifest {
        VectorManifest {
            schema_version: VECTOR_MANIFEST_SCHEMA_VERSION.to_string(),
            vector_root: "vectors".to_string(),
            entries: entries
                .iter()
                .map(|(path, digest)| (path.to_string(), digest.to_string()))
                .collect(),
        }
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = manifest_with(&[("a.json", "00"), ("b.json", "11")]);
        let b = manifest_with(&[("b.json", "11"), ("a.json", "00")]);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = manifest_with(&[("a.json", "00"), ("b.json", "22")]);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_root_path() {
        let mut a = manifest_with(&[("a.json", "00")]);
        a.vector_root = "/tmp/one".to_string();
        let mut b = manifest_with(&[("a.json", "00")]);
        b.vector_root = "/tmp/two".to_string();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn diff_reports_added_removed_and_modified() {
        let before = manifest_with(&[("a.json", "00"), ("b.json", "11"), ("c.json", "22")]);
        let after = manifest_with(&[("a.json", "00"), ("b.json", "ff"), ("d.json", "33")]);
        let drifts = before.diff(&after);
        assert_eq!(
            drifts,
            vec![
                VectorDrift {
                    path: "b.json".to_string(),
                    kind: VectorDriftKind::Modified
                },
                VectorDrift {
                    path: "c.json".to_string(),
                    kind: VectorDriftKind::Removed
                },
                VectorDrift {
                    path: "d.json".to_string(),
                    kind: VectorDriftKind::Added
                },
            ]
        );
    }

    #[test]
    fn verify_unchanged_accepts_identical_store() {
        let dir = unique_temp_dir("benchgate-vectors-verify");
        let mut generator = ScriptedVectorGenerator::new().with_file("t/a.bin", b"alpha");
        generator.generate(&spec_for(&dir)).expect("generate");
        let manifest = VectorManifest::capture(&dir).expect("capture");
        manifest.verify_unchanged(&dir).expect("unchanged");
        fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn verify_unchanged_detects_mutation() {
        let dir = unique_temp_dir("benchgate-vectors-mutate");
        let mut generator = ScriptedVectorGenerator::new().with_file("t/a.bin", b"alpha");
        generator.generate(&spec_for(&dir)).expect("generate");
        let manifest = VectorManifest::capture(&dir).expect("capture");
        fs::write(dir.join("t/a.bin"), b"beta").expect("mutate");
        let err = manifest.verify_unchanged(&dir).unwrap_err();
        match err {
            VectorError::Drift { drifts } => {
                assert_eq!(drifts.len(), 1);
                assert_eq!(drifts[0].kind, VectorDriftKind::Modified);
                assert_eq!(drifts[0].path, "t/a.bin");
            }
            other => panic!("expected drift, got {other:?}"),
        }
        fs::remove_dir_all(&dir).expect("cleanup");
    }

    // -- Serde --

    #[test]
    fn manifest_roundtrips_with_schema_version() {
        let manifest = manifest_with(&[("a.json", "00")]);
        let encoded = serde_json::to_string_pretty(&manifest).expect("encode");
        assert!(encoded.contains(VECTOR_MANIFEST_SCHEMA_VERSION));
        let decoded: VectorManifest = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, manifest);
    }
}
