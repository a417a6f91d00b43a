use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{now}", std::process::id()));
    fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn seeded_store(prefix: &str) -> PathBuf {
    let store = unique_temp_dir(prefix);
    fs::create_dir_all(store.join("tables")).expect("store subdir");
    fs::write(store.join("tables/accounts.json"), b"{\"rows\":64}").expect("seed vector");
    fs::write(store.join("tables/storage.json"), b"{\"rows\":128}").expect("seed vector");
    store
}

fn audit(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_benchgate_vector_audit"))
        .args(args)
        .output()
        .expect("should execute benchgate_vector_audit")
}

// ===========================================================================
// Capture
// ===========================================================================

#[test]
fn help_prints_usage_and_exits_zero() {
    let output = audit(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--write-manifest"));
    assert!(stdout.contains("exit codes:"));
}

#[test]
fn captured_manifest_lands_on_stdout() {
    let store = seeded_store("benchgate-audit-capture");
    let output = audit(&["--dir", store.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let manifest: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be a json manifest");
    assert_eq!(manifest["schema_version"], "benchgate.vector-manifest.v1");
    let entries = manifest["entries"].as_object().expect("entries map");
    assert_eq!(entries.len(), 2);
    assert!(entries.contains_key("tables/accounts.json"));
    assert_eq!(
        entries["tables/accounts.json"].as_str().map(str::len),
        Some(64)
    );

    let _ = fs::remove_dir_all(store);
}

#[test]
fn summary_emits_stable_keys() {
    let store = seeded_store("benchgate-audit-summary");
    let output = audit(&["--dir", store.to_str().unwrap(), "--summary"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("vector_audit.file_count=2"));
    let fingerprint = stdout
        .lines()
        .find_map(|line| line.strip_prefix("vector_audit.fingerprint="))
        .expect("summary should carry the fingerprint");
    assert_eq!(fingerprint.len(), 64);

    let _ = fs::remove_dir_all(store);
}

// ===========================================================================
// Verification
// ===========================================================================

#[test]
fn write_then_verify_round_trips_clean() {
    let store = seeded_store("benchgate-audit-roundtrip");
    let manifest_path = store.with_extension("manifest.json");

    let write = audit(&[
        "--dir",
        store.to_str().unwrap(),
        "--write-manifest",
        manifest_path.to_str().unwrap(),
    ]);
    assert!(write.status.success());

    let verify = audit(&[
        "--dir",
        store.to_str().unwrap(),
        "--verify",
        manifest_path.to_str().unwrap(),
        "--summary",
    ]);
    assert!(verify.status.success());
    let stdout = String::from_utf8_lossy(&verify.stdout);
    assert!(stdout.contains("vector_audit.drift_count=0"));
    assert!(verify.stderr.is_empty());

    let _ = fs::remove_dir_all(store);
    let _ = fs::remove_file(manifest_path);
}

#[test]
fn drifted_store_fails_verification_with_exit_two() {
    let store = seeded_store("benchgate-audit-drift");
    let manifest_path = store.with_extension("manifest.json");

    let write = audit(&[
        "--dir",
        store.to_str().unwrap(),
        "--write-manifest",
        manifest_path.to_str().unwrap(),
    ]);
    assert!(write.status.success());

    fs::write(store.join("tables/accounts.json"), b"{\"rows\":65}").expect("mutate vector");
    fs::write(store.join("tables/extra.json"), b"{}").expect("add vector");

    let verify = audit(&[
        "--dir",
        store.to_str().unwrap(),
        "--verify",
        manifest_path.to_str().unwrap(),
        "--summary",
    ]);
    assert_eq!(verify.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&verify.stdout);
    assert!(stdout.contains("vector_audit.drift_count=2"));
    let stderr = String::from_utf8_lossy(&verify.stderr);
    assert!(stderr.contains("vector_audit.drift modified tables/accounts.json"));
    assert!(stderr.contains("vector_audit.drift added tables/extra.json"));

    let _ = fs::remove_dir_all(store);
    let _ = fs::remove_file(manifest_path);
}

// ===========================================================================
// Failures
// ===========================================================================

#[test]
fn missing_store_directory_is_an_error() {
    let output = audit(&["--dir", "/nonexistent/benchgate-vectors"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unreadable"));
}

#[test]
fn empty_store_is_an_error() {
    let store = unique_temp_dir("benchgate-audit-empty");
    let output = audit(&["--dir", store.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("contains no files"));

    let _ = fs::remove_dir_all(store);
}

#[test]
fn missing_dir_flag_is_rejected() {
    let output = audit(&["--summary"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--dir is required"));
}
