//! drydock - gated CI/CD pipelines from a `drydock.toml`
//!
//! ## Commands
//!
//! - `run`: route a trigger to CI or CD and run it; the outcome is printed as JSON
//! - `validate`: wiring-check both pipelines without running anything
//! - `plan`: show which pipeline a trigger would run
//!
//! The process exits with the pipeline's status: 0 for success (with or
//! without warnings) and unrouted triggers, 1 for a blocking failure, 2 for
//! an aborted run, 3 when the config cannot be loaded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, Level};

use drydock::collab::EnvCredentialsProvider;
use drydock::config::DEFAULT_CONFIG_FILE;
use drydock::{
    ArtifactStore, Dispatch, DrydockConfig, FsArtifactStore, OutputPolicy, Payload,
    PipelineDefinition, PipelineOrchestrator, PipelineOutcome, PipelineRunner, PipelineStatus,
    StageStatus, TriggerEvent,
};

/// Exit status when the config cannot be read, parsed or wired.
const EXIT_CONFIG: i32 = 3;

#[derive(Parser)]
#[command(name = "drydock")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Gated CI/CD pipeline runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline config file
    #[arg(short, long, global = true, env = "DRYDOCK_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a trigger and run the selected pipeline
    Run {
        /// Trigger descriptor: push:<branch>, tag:<name> or manual:<ci|cd>
        #[arg(short, long, env = "DRYDOCK_TRIGGER")]
        trigger: TriggerEvent,

        /// Seed an artifact before the first stage (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
        seeds: Vec<(String, String)>,

        /// Keep artifacts on disk in this (empty) directory
        #[arg(long)]
        artifact_dir: Option<PathBuf>,

        /// Fail stages that succeed without producing every declared output
        #[arg(long)]
        strict_outputs: bool,

        /// Pretty-print the JSON outcome
        #[arg(long)]
        pretty: bool,
    },

    /// Check that both pipelines are correctly wired
    Validate,

    /// Show the pipeline a trigger selects, without running it
    Plan {
        /// Trigger descriptor: push:<branch>, tag:<name> or manual:<ci|cd>
        #[arg(short, long, env = "DRYDOCK_TRIGGER")]
        trigger: TriggerEvent,
    },
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if !drydock::artifact::is_valid_key(key) {
        return Err(format!("invalid artifact key '{key}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    drydock::telemetry::init_tracing(cli.json, level);

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("✗ {e:#}");
            EXIT_CONFIG
        }
    };
    std::process::exit(code);
}

async fn execute(cli: Cli) -> Result<i32> {
    let Cli {
        config,
        command,
        json,
        ..
    } = cli;

    match command {
        Commands::Run {
            trigger,
            seeds,
            artifact_dir,
            strict_outputs,
            pretty,
        } => {
            let options = RunOptions {
                seeds,
                artifact_dir,
                strict_outputs,
            };
            let (report, code) = cmd_run(&config, &trigger, options, !json).await?;
            let rendered = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{rendered}");
            Ok(code)
        }
        Commands::Validate => cmd_validate(&config),
        Commands::Plan { trigger } => cmd_plan(&config, &trigger),
    }
}

fn load(path: &Path) -> Result<(DrydockConfig, PipelineDefinition, PipelineDefinition)> {
    let config = DrydockConfig::load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let (ci, cd) = config
        .build_definitions()
        .context("Pipeline wiring check failed")?;
    Ok((config, ci, cd))
}

#[derive(Default)]
struct RunOptions {
    seeds: Vec<(String, String)>,
    artifact_dir: Option<PathBuf>,
    strict_outputs: bool,
}

/// Run the pipeline selected by `trigger`. Returns the JSON report and the exit code.
async fn cmd_run(
    config_path: &Path,
    trigger: &TriggerEvent,
    options: RunOptions,
    summary: bool,
) -> Result<(Value, i32)> {
    let (config, ci, cd) = load(config_path)?;

    let policy = if options.strict_outputs {
        OutputPolicy::Enforce
    } else {
        config.orchestrator.output_policy()
    };
    let runner = PipelineRunner::new()
        .with_credentials(Arc::new(EnvCredentialsProvider::new()))
        .with_output_policy(policy);
    let orchestrator = PipelineOrchestrator::new(ci, cd)?.with_runner(runner);

    let initial: Vec<(String, Payload)> = options
        .seeds
        .into_iter()
        .map(|(key, value)| (key, Payload::Bytes(value.into_bytes())))
        .collect();

    info!(trigger = %trigger, config = %config_path.display(), "Dispatching trigger");
    let dispatch = match &options.artifact_dir {
        Some(dir) => {
            let store = FsArtifactStore::new(dir)
                .with_context(|| format!("Failed to open artifact dir {}", dir.display()))?;
            if !store.keys().is_empty() {
                anyhow::bail!(
                    "Artifact dir {} already holds artifacts from another run",
                    dir.display()
                );
            }
            orchestrator.dispatch_with_store(trigger, store, initial).await
        }
        None => orchestrator.dispatch(trigger, initial).await,
    };

    if summary {
        match &dispatch {
            Dispatch::Ran(outcome) => print_summary(outcome),
            Dispatch::Unrouted(err) => eprintln!("- {err}: nothing to run"),
        }
    }

    Ok((dispatch_report(trigger, &dispatch)?, dispatch.exit_code()))
}

fn dispatch_report(trigger: &TriggerEvent, dispatch: &Dispatch) -> Result<Value> {
    match dispatch {
        Dispatch::Ran(outcome) => {
            let mut report = serde_json::to_value(outcome)?;
            if let Some(map) = report.as_object_mut() {
                map.insert("trigger".to_string(), json!(trigger));
            }
            Ok(report)
        }
        Dispatch::Unrouted(err) => Ok(json!({
            "trigger": trigger,
            "status": "unrouted",
            "reason": err.to_string(),
        })),
    }
}

fn status_label(status: PipelineStatus) -> &'static str {
    match status {
        PipelineStatus::Success => "✓ PASSED",
        PipelineStatus::SuccessWithWarnings => "✓ PASSED (with warnings)",
        PipelineStatus::Failed => "✗ FAILED",
        PipelineStatus::Aborted => "✗ ABORTED",
    }
}

/// Human-readable run summary on stderr; stdout carries the JSON report.
fn print_summary(outcome: &PipelineOutcome) {
    eprintln!("Run ID: {}", outcome.run_id);
    eprintln!("Pipeline: {}", outcome.pipeline);
    eprintln!();
    for result in outcome.results.entries() {
        let mark = match result.status() {
            StageStatus::Success => "✓",
            StageStatus::Failure => "✗",
            StageStatus::Skipped => "-",
        };
        eprintln!(
            "  {} {} [{}] ({}ms)",
            mark,
            result.stage_name(),
            result.gate(),
            result.duration_ms()
        );
        for warning in result.warnings() {
            eprintln!("      warning: {warning}");
        }
    }
    eprintln!();
    eprintln!(
        "Summary: {}/{} stages passed",
        outcome.passed_count(),
        outcome.results.len()
    );
    if let Some(reason) = &outcome.abort_reason {
        eprintln!("Aborted: {reason}");
    }
    eprintln!("Status: {} ({}ms)", status_label(outcome.status), outcome.duration_ms);
}

fn describe(definition: &PipelineDefinition) {
    println!(
        "{} pipeline, trigger {} ({})",
        definition.name(),
        definition.trigger(),
        &definition.digest()[..12]
    );
    for (i, stage) in definition.stages().iter().enumerate() {
        println!(
            "  {}. {} ({}, {})",
            i + 1,
            stage.name(),
            stage.kind(),
            stage.gate_policy()
        );
        if !stage.inputs().is_empty() {
            println!("       in:  {}", stage.inputs().join(", "));
        }
        if !stage.outputs().is_empty() {
            println!("       out: {}", stage.outputs().join(", "));
        }
    }
}

fn cmd_validate(config_path: &Path) -> Result<i32> {
    let (_, ci, cd) = load(config_path)?;
    for definition in [&ci, &cd] {
        println!(
            "✓ {}: {} stage(s), digest {}",
            definition.name(),
            definition.stages().len(),
            &definition.digest()[..12]
        );
    }
    Ok(0)
}

fn cmd_plan(config_path: &Path, trigger: &TriggerEvent) -> Result<i32> {
    let (_, ci, cd) = load(config_path)?;
    let orchestrator = PipelineOrchestrator::new(ci, cd)?;
    match orchestrator.select(trigger) {
        Ok(definition) => describe(definition),
        Err(err) => println!("- {err}: nothing would run"),
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[[ci.stages]]
name = "checkout"
kind = "checkout"
command = ["true"]

[[ci.stages]]
name = "lint"
kind = "lint"
gate = "advisory"
command = ["false"]

[[ci.stages]]
name = "build"
kind = "build"
command = ["sh", "-c", "echo built > app.bin"]
outputs = ["binary"]
artifact_paths = { binary = "app.bin" }

[[cd.stages]]
name = "deploy"
kind = "deploy"
command = ["false"]
inputs = ["trigger-ref"]
"#;

    fn write_config(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("image-ref=app:1").unwrap(),
            ("image-ref".to_string(), "app:1".to_string())
        );
        assert!(parse_assignment("no-equals").is_err());
        assert!(parse_assignment("bad/key=x").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "drydock",
            "--config",
            "ci.toml",
            "run",
            "--trigger",
            "tag:v1.0.0",
            "--set",
            "image-ref=app:1",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("ci.toml"));
        match cli.command {
            Commands::Run { trigger, seeds, .. } => {
                assert_eq!(trigger, TriggerEvent::tag("v1.0.0"));
                assert_eq!(seeds.len(), 1);
            }
            _ => panic!("expected run"),
        }
        assert!(Cli::try_parse_from(["drydock", "run", "--trigger", "pr:1"]).is_err());
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG);
        assert_eq!(cmd_validate(&path).unwrap(), 0);

        let broken = write_config(
            dir.path(),
            "[[ci.stages]]\nname = \"push\"\nkind = \"registry-push\"\ncommand = [\"true\"]\ninputs = [\"image\"]\n",
        );
        let err = cmd_validate(&broken).unwrap_err();
        assert!(format!("{err:#}").contains("image"));
    }

    #[test]
    fn test_plan_unrouted_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG);
        assert_eq!(cmd_plan(&path, &TriggerEvent::push("feature/x")).unwrap(), 0);
        assert_eq!(cmd_plan(&path, &TriggerEvent::push("main")).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_ci_with_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG);
        let artifacts = dir.path().join("store");

        let options = RunOptions {
            artifact_dir: Some(artifacts.clone()),
            ..Default::default()
        };
        let (report, code) = cmd_run(&path, &TriggerEvent::push("main"), options, false)
            .await
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(report["status"], "success_with_warnings");
        assert_eq!(report["trigger"], "push:main");
        assert!(artifacts.join("artifacts").join("binary.json").exists());

        // a second run into the same directory is refused
        let again = RunOptions {
            artifact_dir: Some(artifacts),
            ..Default::default()
        };
        assert!(cmd_run(&path, &TriggerEvent::push("main"), again, false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_run_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG);

        let (report, code) = cmd_run(&path, &TriggerEvent::tag("v1.0.0"), RunOptions::default(), false)
            .await
            .unwrap();
        assert_eq!(report["status"], "failed");
        assert_eq!(code, 1);

        let (report, code) = cmd_run(&path, &"manual:cd".parse().unwrap(), RunOptions::default(), false)
            .await
            .unwrap();
        assert_eq!(report["status"], "aborted");
        assert_eq!(code, 2);

        let (report, code) = cmd_run(&path, &TriggerEvent::tag("latest"), RunOptions::default(), false)
            .await
            .unwrap();
        assert_eq!(report["status"], "unrouted");
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_run_strict_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[[ci.stages]]
name = "build"
kind = "build"
command = ["true"]
outputs = ["binary"]
artifact_paths = { binary = "missing.bin" }

[[cd.stages]]
name = "deploy"
kind = "deploy"
command = ["true"]
"#,
        );
        let options = RunOptions {
            strict_outputs: true,
            ..Default::default()
        };
        let (report, code) = cmd_run(&path, &TriggerEvent::push("main"), options, false)
            .await
            .unwrap();
        assert_eq!(report["status"], "failed");
        assert_eq!(code, 1);
    }
}
