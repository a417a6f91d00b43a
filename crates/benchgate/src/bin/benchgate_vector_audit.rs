#![forbid(unsafe_code)]

//! Standalone audit tool for test vector stores.
//!
//! Captures a digest manifest of a vector store, optionally persists it,
//! and optionally verifies the store against a previously written manifest.
//!
//! Exit semantics:
//! - `0` => store captured (and matched the expected manifest, if given)
//! - `2` => store drifted from the expected manifest (drift list emitted)
//! - `1` => CLI or filesystem failure

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use benchgate::test_vectors::VectorManifest;

#[derive(Debug)]
struct CliArgs {
    store_dir: PathBuf,
    write_manifest: Option<PathBuf>,
    verify_against: Option<PathBuf>,
    summary: bool,
    print_help: bool,
}

fn main() {
    match run() {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32, Box<dyn Error>> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.print_help {
        return Ok(0);
    }

    let manifest = VectorManifest::capture(&args.store_dir)?;

    if let Some(out_path) = &args.write_manifest {
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(out_path, serde_json::to_string_pretty(&manifest)?.as_bytes())?;
    }

    let mut drift_count = 0usize;
    if let Some(expected_path) = &args.verify_against {
        let bytes = fs::read(expected_path)?;
        let expected: VectorManifest = serde_json::from_slice(&bytes)?;
        let drifts = expected.diff(&manifest);
        drift_count = drifts.len();
        for drift in &drifts {
            eprintln!("vector_audit.drift {} {}", drift.kind, drift.path);
        }
    }

    if args.summary {
        println!("vector_audit.root={}", manifest.vector_root);
        println!("vector_audit.file_count={}", manifest.file_count());
        println!("vector_audit.fingerprint={}", manifest.fingerprint());
        if args.verify_against.is_some() {
            println!("vector_audit.drift_count={drift_count}");
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
    }

    if drift_count == 0 { Ok(0) } else { Ok(2) }
}

fn parse_args<I>(args: I) -> Result<CliArgs, Box<dyn Error>>
where
    I: IntoIterator<Item = String>,
{
    let mut store_dir = None::<PathBuf>;
    let mut write_manifest = None::<PathBuf>;
    let mut verify_against = None::<PathBuf>;
    let mut summary = false;
    let mut print_help_flag = false;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dir" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "missing value for --dir".to_string())?;
                store_dir = Some(PathBuf::from(value));
            }
            "--write-manifest" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "missing value for --write-manifest".to_string())?;
                write_manifest = Some(PathBuf::from(value));
            }
            "--verify" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "missing value for --verify".to_string())?;
                verify_against = Some(PathBuf::from(value));
            }
            "--summary" => summary = true,
            "--help" | "-h" => {
                print_help();
                print_help_flag = true;
            }
            other => return Err(format!("unknown argument `{other}`").into()),
        }
    }

    let store_dir = if print_help_flag {
        PathBuf::new()
    } else {
        store_dir.ok_or_else(|| "--dir is required".to_string())?
    };

    Ok(CliArgs {
        store_dir,
        write_manifest,
        verify_against,
        summary,
        print_help: print_help_flag,
    })
}

fn print_help() {
    println!("benchgate_vector_audit");
    println!("  --dir <path>             Required vector store directory");
    println!("  --write-manifest <path>  Write the captured manifest JSON to this path");
    println!("  --verify <path>          Verify the store against this manifest JSON");
    println!("  --summary                Print stable key=value summary instead of JSON");
    println!("  --help, -h               Show this message");
    println!();
    println!("exit codes:");
    println!("  0   store captured (and matched, when --verify is given)");
    println!("  2   store drifted from the expected manifest");
    println!("  1   CLI or filesystem error");
}
