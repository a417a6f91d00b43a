#![forbid(unsafe_code)]

//! CLI driver for the benchmark regression gate.
//!
//! Exit semantics:
//! - `0` => gate passed (or the trigger policy skipped the run)
//! - `2` => protocol completed and the comparison reported a regression
//! - `1` => provisioning, generation, measurement, or CLI failure

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use benchgate::baseline::BaselineLabel;
use benchgate::checkout::{GitSourceTree, RevisionRef};
use benchgate::env_config::GateEnv;
use benchgate::gate::{GatePlan, RegressionGate};
use benchgate::preflight::{CommandVersionProbe, verify_runner};
use benchgate::runner::{
    BenchTargetSpec, CommandBenchRunner, RunnerSpec, load_runner_catalog, select_runner,
};
use benchgate::supersede::{ConcurrencyGroup, ExecutionTicket};
use benchgate::test_vectors::{CommandVectorGenerator, VectorGeneratorSpec};
use benchgate::trigger::{TriggerDecision, TriggerEvent, TriggerPolicy};

const SKIP_REPORT_SCHEMA_VERSION: &str = "benchgate.trigger-skip-report.v1";

#[derive(Debug)]
struct CliArgs {
    event: String,
    branch: Option<String>,
    workflow: String,
    trunk: String,
    run_id: String,
    baseline_rev: String,
    candidate_rev: String,
    repo_root: PathBuf,
    bench_id: String,
    package: Option<String>,
    profile: String,
    features: Vec<String>,
    vectors_dir: PathBuf,
    generator_program: String,
    generator_args: Vec<String>,
    generator_subcommand: String,
    generator_target: String,
    catalog_path: Option<PathBuf>,
    runner_id: Option<String>,
    label: Option<String>,
    shared_store: bool,
    out_path: Option<PathBuf>,
    summary: bool,
    plan_only: bool,
    print_help: bool,
}

#[derive(Debug, Clone, Serialize)]
struct SkipCliReport {
    schema_version: String,
    generated_at_utc: String,
    workflow: String,
    trigger: TriggerDecision,
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

    let env = GateEnv::capture()?;
    let event = build_event(&args)?;
    let policy = TriggerPolicy::new(args.trunk.clone());
    let decision = policy.decide(&event);

    if !decision.should_execute() {
        let report = SkipCliReport {
            schema_version: SKIP_REPORT_SCHEMA_VERSION.to_string(),
            generated_at_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            workflow: args.workflow.clone(),
            trigger: decision,
        };
        let json = serde_json::to_string_pretty(&report)?;
        if let Some(out_path) = &args.out_path {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(out_path, json.as_bytes())?;
        }
        if args.summary {
            println!("benchgate.decision=skip");
            println!("benchgate.exit_code=0");
        } else {
            println!("{json}");
        }
        return Ok(0);
    }

    let group = ConcurrencyGroup::derive(&args.workflow, &event, &args.run_id);
    let execution_id = format!("{}-{}", args.workflow, args.run_id);
    let label = resolve_label(&args, &env, &group)?;

    let plan = GatePlan {
        execution_id: execution_id.clone(),
        group_key: group.key(),
        trigger: decision,
        baseline_revision: RevisionRef::new(args.baseline_rev.clone())?,
        candidate_revision: RevisionRef::new(args.candidate_rev.clone())?,
        target: BenchTargetSpec {
            bench_id: args.bench_id.clone(),
            package: args.package.clone(),
            profile: args.profile.clone(),
            features: args.features.clone(),
        },
        generator: VectorGeneratorSpec {
            subcommand: args.generator_subcommand.clone(),
            target: args.generator_target.clone(),
            output_dir: args.vectors_dir.clone(),
        },
        label,
        runner_env: env.runner_env(),
    };

    if args.plan_only {
        plan.validate()?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(0);
    }

    let runner_spec = resolve_runner(&args, &env)?;
    let mut probe = CommandVersionProbe;
    let receipt = verify_runner(&runner_spec, &mut probe)?;
    eprintln!(
        "benchgate: runner {} ({}) version `{}`",
        receipt.runner_id, receipt.program, receipt.reported_version
    );

    let ticket = ExecutionTicket::standalone(execution_id);
    let mut gate = RegressionGate::new(plan, ticket)?;
    let mut generator = CommandVectorGenerator::new(&args.generator_program, &args.repo_root)
        .with_leading_args(args.generator_args.clone())
        .with_env(env.runner_env());
    let mut tree = GitSourceTree::new(&args.repo_root);
    let mut runner = CommandBenchRunner::from_spec(&runner_spec, &args.repo_root);

    if let Err(error) = gate.run_to_completion(&mut generator, &mut tree, &mut runner) {
        // The failure is captured in the report; surface it on stderr too.
        eprintln!("benchgate: {error}");
    }

    let report = gate.finalize_report(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    let json = report.to_json_pretty()?;
    if let Some(out_path) = &args.out_path {
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(out_path, json.as_bytes())?;
    }
    if args.summary {
        for line in report.summary_lines() {
            println!("{line}");
        }
    } else {
        println!("{json}");
    }

    Ok(report.exit_code)
}

fn build_event(args: &CliArgs) -> Result<TriggerEvent, Box<dyn Error>> {
    let branch = args.branch.clone().unwrap_or_else(|| args.trunk.clone());
    match args.event.as_str() {
        "trunk-push" => Ok(TriggerEvent::TrunkPush { branch }),
        "merge-queue" => Ok(TriggerEvent::MergeQueue {
            queue_branch: branch,
        }),
        "review" => Ok(TriggerEvent::ReviewUpdate {
            source_branch: branch,
        }),
        other => Err(format!(
            "unknown event `{other}` (expected trunk-push, merge-queue, or review)"
        )
        .into()),
    }
}

fn resolve_label(
    args: &CliArgs,
    env: &GateEnv,
    group: &ConcurrencyGroup,
) -> Result<BaselineLabel, Box<dyn Error>> {
    if let Some(label) = &args.label {
        return Ok(BaselineLabel::new(label.clone())?);
    }
    if let Some(label) = &env.baseline_label {
        return Ok(label.clone());
    }
    if args.shared_store {
        return Ok(BaselineLabel::for_group(&group.key()));
    }
    Ok(BaselineLabel::default_label())
}

fn resolve_runner(args: &CliArgs, env: &GateEnv) -> Result<RunnerSpec, Box<dyn Error>> {
    let requested = args.runner_id.clone().or_else(|| env.runner_id.clone());
    match &args.catalog_path {
        Some(path) => {
            let runners = load_runner_catalog(path)?;
            let runner_id = requested.unwrap_or_else(|| runners[0].runner_id.clone());
            Ok(select_runner(&runners, &runner_id)?.clone())
        }
        None => {
            let builtin = RunnerSpec::builtin_cargo();
            if let Some(runner_id) = requested
                && runner_id != builtin.runner_id
            {
                return Err(format!(
                    "runner `{runner_id}` requested but no --runner-catalog was given"
                )
                .into());
            }
            Ok(builtin)
        }
    }
}

fn parse_args<I>(args: I) -> Result<CliArgs, Box<dyn Error>>
where
    I: IntoIterator<Item = String>,
{
    let mut event = None::<String>;
    let mut branch = None::<String>;
    let mut workflow = "bench".to_string();
    let mut trunk = "main".to_string();
    let mut run_id = None::<String>;
    let mut baseline_rev = None::<String>;
    let mut candidate_rev = None::<String>;
    let mut repo_root = PathBuf::from(".");
    let mut bench_id = None::<String>;
    let mut package = None::<String>;
    let mut profile = "profiling".to_string();
    let mut features = Vec::new();
    let mut vectors_dir = None::<PathBuf>;
    let mut generator_program = "cargo".to_string();
    let mut generator_args = Vec::new();
    let mut generator_subcommand = "test-vectors".to_string();
    let mut generator_target = "tables".to_string();
    let mut catalog_path = None::<PathBuf>;
    let mut runner_id = None::<String>;
    let mut label = None::<String>;
    let mut shared_store = false;
    let mut out_path = None::<PathBuf>;
    let mut summary = false;
    let mut plan_only = false;
    let mut print_help_flag = false;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--event" => event = Some(require_value(&mut iter, "--event")?),
            "--branch" => branch = Some(require_value(&mut iter, "--branch")?),
            "--workflow" => workflow = require_value(&mut iter, "--workflow")?,
            "--trunk" => trunk = require_value(&mut iter, "--trunk")?,
            "--run-id" => run_id = Some(require_value(&mut iter, "--run-id")?),
            "--baseline-rev" => baseline_rev = Some(require_value(&mut iter, "--baseline-rev")?),
            "--candidate-rev" => candidate_rev = Some(require_value(&mut iter, "--candidate-rev")?),
            "--repo" => repo_root = PathBuf::from(require_value(&mut iter, "--repo")?),
            "--bench" => bench_id = Some(require_value(&mut iter, "--bench")?),
            "--package" => package = Some(require_value(&mut iter, "--package")?),
            "--profile" => profile = require_value(&mut iter, "--profile")?,
            "--features" => {
                features = require_value(&mut iter, "--features")?
                    .split(',')
                    .map(|feature| feature.trim().to_string())
                    .filter(|feature| !feature.is_empty())
                    .collect();
            }
            "--vectors-dir" => {
                vectors_dir = Some(PathBuf::from(require_value(&mut iter, "--vectors-dir")?));
            }
            "--generator-program" => {
                generator_program = require_value(&mut iter, "--generator-program")?;
            }
            "--generator-arg" => {
                generator_args.push(require_value(&mut iter, "--generator-arg")?);
            }
            "--generator-subcommand" => {
                generator_subcommand = require_value(&mut iter, "--generator-subcommand")?;
            }
            "--generator-target" => {
                generator_target = require_value(&mut iter, "--generator-target")?;
            }
            "--runner-catalog" => {
                catalog_path = Some(PathBuf::from(require_value(&mut iter, "--runner-catalog")?));
            }
            "--runner" => runner_id = Some(require_value(&mut iter, "--runner")?),
            "--label" => label = Some(require_value(&mut iter, "--label")?),
            "--shared-store" => shared_store = true,
            "--out" => out_path = Some(PathBuf::from(require_value(&mut iter, "--out")?)),
            "--summary" => summary = true,
            "--plan" => plan_only = true,
            "--help" | "-h" => {
                print_help();
                print_help_flag = true;
            }
            other => return Err(format!("unknown argument `{other}`").into()),
        }
    }

    let required = |value: Option<String>, flag: &str| -> Result<String, Box<dyn Error>> {
        if print_help_flag {
            return Ok(String::new());
        }
        value.ok_or_else(|| format!("{flag} is required").into())
    };

    let event = required(event, "--event")?;
    let run_id = required(run_id, "--run-id")?;
    let baseline_rev = required(baseline_rev, "--baseline-rev")?;
    let candidate_rev = required(candidate_rev, "--candidate-rev")?;
    let bench_id = required(bench_id, "--bench")?;
    let vectors_dir = if print_help_flag {
        PathBuf::new()
    } else {
        vectors_dir.ok_or_else(|| "--vectors-dir is required".to_string())?
    };

    Ok(CliArgs {
        event,
        branch,
        workflow,
        trunk,
        run_id,
        baseline_rev,
        candidate_rev,
        repo_root,
        bench_id,
        package,
        profile,
        features,
        vectors_dir,
        generator_program,
        generator_args,
        generator_subcommand,
        generator_target,
        catalog_path,
        runner_id,
        label,
        shared_store,
        out_path,
        summary,
        plan_only,
        print_help: print_help_flag,
    })
}

fn require_value<I>(iter: &mut I, flag: &str) -> Result<String, Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    iter.next()
        .ok_or_else(|| format!("missing value for {flag}").into())
}

fn print_help() {
    println!("benchgate");
    println!("  --event <kind>             Required: trunk-push, merge-queue, or review");
    println!("  --branch <name>            Branch the event is about (defaults to --trunk)");
    println!("  --workflow <name>          Workflow name for concurrency grouping [bench]");
    println!("  --trunk <branch>           Trunk branch name [main]");
    println!("  --run-id <id>              Required unique run id");
    println!("  --baseline-rev <rev>       Required baseline revision");
    println!("  --candidate-rev <rev>      Required candidate revision");
    println!("  --repo <path>              Repository root [.]");
    println!("  --bench <id>               Required bench target id");
    println!("  --package <name>           Package selector for the bench target");
    println!("  --profile <name>           Build profile [profiling]");
    println!("  --features <a,b>           Comma-separated feature list");
    println!("  --vectors-dir <path>       Required vector store directory");
    println!("  --generator-program <p>    Vector generator program [cargo]");
    println!("  --generator-arg <arg>      Leading generator argument (repeatable)");
    println!("  --generator-subcommand <s> Generator subcommand [test-vectors]");
    println!("  --generator-target <t>     Vector family to generate [tables]");
    println!("  --runner-catalog <path>    Runner catalog TOML (builtin cargo if absent)");
    println!("  --runner <id>              Runner id (or BENCHGATE_RUNNER)");
    println!("  --label <label>            Baseline label (or BENCHGATE_BASELINE)");
    println!("  --shared-store             Derive the label from the concurrency group");
    println!("  --out <path>               Write the report JSON to this path");
    println!("  --summary                  Print stable key=value summary instead of JSON");
    println!("  --plan                     Validate and print the plan, then exit");
    println!("  --help, -h                 Show this message");
    println!();
    println!("exit codes:");
    println!("  0   gate passed (or trigger policy skipped the run)");
    println!("  2   comparison reported a regression");
    println!("  1   provisioning, generation, measurement, or CLI error");
}
