//! Static, dependency and image scanners gated on a severity threshold.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use super::command::{run_command, stage_env};
use crate::artifact::Payload;
use crate::stage::{StageContext, StageExecution, StageExecutor};

/// Finding severity, ordered from least to most severe.
///
/// `Unknown` covers any label a tool emits outside the known scale, such as
/// trivy's `UNKNOWN` or a vendor-specific grade. It ranks between `Info` and
/// `Low`, so it only blocks at an `info` or `unknown` threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Unknown => "unknown",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "unknown" => Ok(Severity::Unknown),
            "low" => Ok(Severity::Low),
            "medium" | "moderate" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// One scanner finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    /// Advisory or rule identifier, e.g. `CVE-2024-1234`.
    pub id: String,
    /// Severity as graded by the tool. Labels outside the known scale,
    /// in any case, become [`Severity::Unknown`].
    #[serde(deserialize_with = "tool_severity")]
    pub severity: Severity,
    /// Short human-readable summary.
    #[serde(default)]
    pub title: String,
}

fn tool_severity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Severity, D::Error> {
    let label = String::deserialize(deserializer)?;
    Ok(label.parse().unwrap_or(Severity::Unknown))
}

/// Normalized scanner output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScanReport {
    /// What was scanned: a path or an image reference.
    #[serde(default)]
    pub target: String,
    /// Every finding, in the order the tool reported them.
    #[serde(default)]
    pub findings: Vec<Finding>,
}

impl ScanReport {
    /// Findings at or above `threshold`.
    pub fn blocking_findings(&self, threshold: Severity) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity >= threshold)
            .collect()
    }

    pub fn passes(&self, threshold: Severity) -> bool {
        self.blocking_findings(threshold).is_empty()
    }
}

/// A security scanner invoked on a source tree or image reference.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Scan `target`. `env` is the stage environment (run id, inputs and
    /// resolved credentials) for scanners that hand it to a child process.
    async fn scan(
        &self,
        target: &str,
        threshold: Severity,
        env: &[(String, String)],
    ) -> anyhow::Result<ScanReport>;
}

/// Scanner backed by an external tool that prints findings as JSON.
///
/// The tool receives the stage environment (`DRYDOCK_INPUT_*`,
/// `DRYDOCK_CREDENTIAL_*`) plus `DRYDOCK_SCAN_TARGET` and
/// `DRYDOCK_SEVERITY_THRESHOLD`, and must print either `{"findings": [...]}` or a bare findings array.
/// A non-zero exit with parseable findings is normal for most scanners;
/// a non-zero exit with unparseable output is a scanner error.
#[derive(Debug, Clone)]
pub struct CommandScanner {
    command: Vec<String>,
    workdir: PathBuf,
}

impl CommandScanner {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            workdir: workdir.into(),
        }
    }
}

fn parse_findings(stdout: &str) -> Option<Vec<Finding>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Some(Vec::new());
    }
    if let Ok(report) = serde_json::from_str::<ScanReport>(trimmed) {
        return Some(report.findings);
    }
    serde_json::from_str::<Vec<Finding>>(trimmed).ok()
}

#[async_trait]
impl Scanner for CommandScanner {
    async fn scan(
        &self,
        target: &str,
        threshold: Severity,
        env: &[(String, String)],
    ) -> anyhow::Result<ScanReport> {
        let mut env = env.to_vec();
        env.push(("DRYDOCK_SCAN_TARGET".to_string(), target.to_string()));
        env.push((
            "DRYDOCK_SEVERITY_THRESHOLD".to_string(),
            threshold.to_string(),
        ));
        let output = run_command(&self.command, &self.workdir, &env).await?;
        if !output.success() && output.stdout.trim().is_empty() {
            anyhow::bail!("scanner failed: {}", output.detail());
        }

        match parse_findings(&output.stdout) {
            Some(findings) => Ok(ScanReport {
                target: target.to_string(),
                findings,
            }),
            None if output.success() => {
                anyhow::bail!("scanner output is not a findings report")
            }
            None => anyhow::bail!("scanner failed: {}", output.detail()),
        }
    }
}

/// Adapts a [`Scanner`] to a stage.
///
/// Publishes the report under the stage's first declared output and fails
/// the stage when any finding reaches the threshold.
pub struct ScanExecutor {
    scanner: Arc<dyn Scanner>,
    threshold: Severity,
    target_key: Option<String>,
    default_target: String,
}

impl ScanExecutor {
    /// Scan `default_target` (typically the workspace path).
    pub fn new(scanner: Arc<dyn Scanner>, threshold: Severity, default_target: impl Into<String>) -> Self {
        Self {
            scanner,
            threshold,
            target_key: None,
            default_target: default_target.into(),
        }
    }

    /// Scan the artifact under `key` instead, e.g. a built image reference.
    pub fn target_artifact(mut self, key: impl Into<String>) -> Self {
        self.target_key = Some(key.into());
        self
    }
}

#[async_trait]
impl StageExecutor for ScanExecutor {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageExecution> {
        let target = match &self.target_key {
            Some(key) => ctx
                .input(key)
                .map(|artifact| artifact.payload.to_text())
                .ok_or_else(|| anyhow::anyhow!("scan target '{}' not among stage inputs", key))?,
            None => self.default_target.clone(),
        };

        let report = self
            .scanner
            .scan(&target, self.threshold, &stage_env(ctx))
            .await?;
        let blocking = report.blocking_findings(self.threshold);
        info!(
            stage = %ctx.stage_name,
            target = %target,
            findings = report.findings.len(),
            blocking = blocking.len(),
            threshold = %self.threshold,
            "Scan complete"
        );

        let mut execution = if blocking.is_empty() {
            StageExecution::success(format!(
                "{} finding(s), none at or above {}",
                report.findings.len(),
                self.threshold
            ))
        } else {
            let ids: Vec<&str> = blocking.iter().map(|f| f.id.as_str()).collect();
            StageExecution::failure(format!(
                "{} finding(s) at or above {}: {}",
                blocking.len(),
                self.threshold,
                ids.join(", ")
            ))
        };

        if let Some(key) = ctx.primary_output() {
            execution = execution.with_artifact(key, Payload::Report(serde_json::to_value(&report)?));
        }
        Ok(execution)
    }
}
