//! `drydock.toml`: the CI and CD stage lists, trigger routing and scan thresholds.
//!
//! ```toml
//! [orchestrator]
//! primary_branch = "main"
//!
//! [scan]
//! severity_threshold = "high"
//!
//! [[ci.stages]]
//! name = "build"
//! kind = "build"
//! command = ["cargo", "build", "--release"]
//! outputs = ["binary"]
//! artifact_paths = { binary = "target/release/app" }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collab::{CommandExecutor, CommandScanner, ScanExecutor, Severity, WithTimeout};
use crate::error::ConfigError;
use crate::pipeline::{PipelineDefinition, PipelineName, TRIGGER_REF_KEY};
use crate::runner::OutputPolicy;
use crate::stage::{GatePolicy, Stage, StageExecutor, StageKind};
use crate::trigger::{TriggerRule, DEFAULT_RELEASE_PATTERN};

pub const DEFAULT_CONFIG_FILE: &str = "drydock.toml";

/// Default per-stage wall-clock limit.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DrydockConfig {
    pub orchestrator: OrchestratorConfig,
    pub workspace: WorkspaceConfig,
    pub scan: ScanConfig,
    pub ci: PipelineConfig,
    pub cd: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Pushes to this branch run CI.
    pub primary_branch: String,
    /// Tags matching this regex run CD.
    pub release_pattern: String,
    /// Fail stages that succeed without producing every declared output.
    pub strict_outputs: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            primary_branch: "main".to_string(),
            release_pattern: DEFAULT_RELEASE_PATTERN.to_string(),
            strict_outputs: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn output_policy(&self) -> OutputPolicy {
        if self.strict_outputs {
            OutputPolicy::Enforce
        } else {
            OutputPolicy::Warn
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Working directory for stage commands. Relative paths resolve against
    /// the config file's directory.
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    pub severity_threshold: Severity,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            severity_threshold: Severity::High,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Keys the caller supplies before the first stage. `trigger-ref` is
    /// always available.
    pub seeds: Vec<String>,
    pub stages: Vec<StageConfig>,
}

/// One `[[ci.stages]]` / `[[cd.stages]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub name: String,
    pub kind: StageKind,
    #[serde(default)]
    pub gate: GatePolicy,
    pub command: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub credentials: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Output key -> file the command leaves behind.
    #[serde(default)]
    pub artifact_paths: BTreeMap<String, PathBuf>,
    /// Output whose contents are the command's trimmed stdout.
    #[serde(default)]
    pub stdout_output: Option<String>,
    /// Scan stages: input artifact holding the scan target. Defaults to the
    /// workspace root.
    #[serde(default)]
    pub scan_target: Option<String>,
    /// Scan stages: overrides `[scan] severity_threshold`.
    #[serde(default)]
    pub severity_threshold: Option<Severity>,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl DrydockConfig {
    /// Read and parse `path`, then apply `DRYDOCK_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::parse(&text)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;

        if config.workspace.root.is_relative() {
            if let Some(dir) = path.parent() {
                config.workspace.root = dir.join(&config.workspace.root);
            }
        }
        debug!(path = %path.display(), ci = config.ci.stages.len(), cd = config.cd.stages.len(), "Config loaded");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply overrides from `lookup` (the process environment in [`load`](Self::load)).
    ///
    /// Recognised: `DRYDOCK_PRIMARY_BRANCH`, `DRYDOCK_RELEASE_PATTERN`,
    /// `DRYDOCK_WORKSPACE`, `DRYDOCK_SEVERITY_THRESHOLD`, `DRYDOCK_STRICT_OUTPUTS`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(branch) = lookup("DRYDOCK_PRIMARY_BRANCH") {
            self.orchestrator.primary_branch = branch;
        }
        if let Some(pattern) = lookup("DRYDOCK_RELEASE_PATTERN") {
            self.orchestrator.release_pattern = pattern;
        }
        if let Some(root) = lookup("DRYDOCK_WORKSPACE") {
            self.workspace.root = PathBuf::from(root);
        }
        if let Some(threshold) = lookup("DRYDOCK_SEVERITY_THRESHOLD") {
            self.scan.severity_threshold =
                threshold.parse().map_err(|reason| ConfigError::Override {
                    variable: "DRYDOCK_SEVERITY_THRESHOLD".to_string(),
                    reason,
                })?;
        }
        if let Some(strict) = lookup("DRYDOCK_STRICT_OUTPUTS") {
            self.orchestrator.strict_outputs = match strict.trim() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => {
                    return Err(ConfigError::Override {
                        variable: "DRYDOCK_STRICT_OUTPUTS".to_string(),
                        reason: format!("expected true or false, got '{other}'"),
                    })
                }
            };
        }
        Ok(())
    }

    /// Build both definitions, running the wiring check on each.
    pub fn build_definitions(&self) -> Result<(PipelineDefinition, PipelineDefinition), ConfigError> {
        let ci = self.build_definition(
            PipelineName::Ci,
            TriggerRule::branch(&self.orchestrator.primary_branch),
        )?;
        let cd = self.build_definition(
            PipelineName::Cd,
            TriggerRule::tag_pattern(&self.orchestrator.release_pattern)?,
        )?;
        Ok((ci, cd))
    }

    fn build_definition(
        &self,
        name: PipelineName,
        trigger: TriggerRule,
    ) -> Result<PipelineDefinition, ConfigError> {
        let pipeline = match name {
            PipelineName::Ci => &self.ci,
            PipelineName::Cd => &self.cd,
        };

        let mut builder = PipelineDefinition::builder(name)
            .trigger(trigger)
            .seed(TRIGGER_REF_KEY);
        for seed in &pipeline.seeds {
            builder = builder.seed(seed);
        }
        for stage in &pipeline.stages {
            builder = builder.stage(self.build_stage(stage)?);
        }
        Ok(builder.build()?)
    }

    fn build_stage(&self, config: &StageConfig) -> Result<Stage, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidStage {
            stage: config.name.clone(),
            reason,
        };

        if config.command.is_empty() {
            return Err(invalid("command is empty".to_string()));
        }
        if config.timeout_secs == 0 {
            return Err(invalid("timeout_secs must be positive".to_string()));
        }
        if let Some(key) = config.artifact_paths.keys().find(|k| !config.outputs.contains(k)) {
            return Err(invalid(format!("artifact path given for undeclared output '{key}'")));
        }
        if let Some(key) = &config.stdout_output {
            if config.kind.is_scan() {
                return Err(invalid("stdout_output is not valid on scan stages".to_string()));
            }
            if !config.outputs.contains(key) {
                return Err(invalid(format!("stdout_output '{key}' is not a declared output")));
            }
            if config.artifact_paths.contains_key(key) {
                return Err(invalid(format!("output '{key}' has both a path and stdout_output")));
            }
        }
        if let Some(target) = &config.scan_target {
            if !config.kind.is_scan() {
                return Err(invalid("scan_target is only valid on scan stages".to_string()));
            }
            if !config.inputs.contains(target) {
                return Err(invalid(format!("scan target '{target}' is not a declared input")));
            }
        }

        let executor: Arc<dyn StageExecutor> = if config.kind.is_scan() {
            let scanner = CommandScanner::new(config.command.clone(), &self.workspace.root);
            let threshold = config
                .severity_threshold
                .unwrap_or(self.scan.severity_threshold);
            let mut scan = ScanExecutor::new(
                Arc::new(scanner),
                threshold,
                self.workspace.root.display().to_string(),
            );
            if let Some(target) = &config.scan_target {
                scan = scan.target_artifact(target);
            }
            Arc::new(scan)
        } else {
            let mut command = CommandExecutor::new(config.command.clone(), &self.workspace.root);
            for (key, path) in &config.artifact_paths {
                command = command.artifact_path(key, path);
            }
            if let Some(key) = &config.stdout_output {
                command = command.stdout_artifact(key);
            }
            Arc::new(command)
        };
        let executor = WithTimeout::new(executor, Duration::from_secs(config.timeout_secs));

        let mut stage = Stage::new(&config.name, config.kind, executor).gate(config.gate);
        for key in &config.inputs {
            stage = stage.input(key);
        }
        for key in &config.outputs {
            stage = stage.output(key);
        }
        for name in &config.credentials {
            stage = stage.credential(name);
        }
        Ok(stage)
    }
}
