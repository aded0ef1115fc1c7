//! Sequential stage execution with gating and artifact propagation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::artifact::{ArtifactRecord, ArtifactStore, MemoryArtifactStore, Payload};
use crate::collab::{CredentialHandle, CredentialsProvider, StaticCredentialsProvider};
use crate::error::{ArtifactError, RunError};
use crate::gate::{GateAction, GateEvaluator};
use crate::pipeline::{PipelineDefinition, PipelineName};
use crate::result::{RunLog, StageResult, StageStatus};
use crate::stage::{Stage, StageContext, StageExecution};

/// How to treat a stage that reports success without producing every
/// declared output.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputPolicy {
    /// Record a warning; the run finishes as success with warnings at best.
    #[default]
    Warn,
    /// Turn the stage into a failure, subject to its gate.
    Enforce,
}

/// Overall result of one pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    SuccessWithWarnings,
    /// A blocking stage failed.
    Failed,
    /// A run-time contract was violated (missing input, store conflict).
    Aborted,
}

impl PipelineStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineStatus::Success | PipelineStatus::SuccessWithWarnings)
    }

    fn downgrade(self) -> Self {
        match self {
            PipelineStatus::Success => PipelineStatus::SuccessWithWarnings,
            other => other,
        }
    }
}

/// Everything a run leaves behind once its artifact store is gone.
#[derive(Debug, Serialize)]
pub struct PipelineOutcome {
    /// Unique run identifier (UUID v4).
    pub run_id: String,
    /// Which definition ran.
    pub pipeline: PipelineName,
    /// Digest of the definition's stage list.
    pub definition_digest: String,
    /// Final run status.
    pub status: PipelineStatus,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// One result per stage, in declared order.
    pub results: RunLog,
    /// Store contents at the end of the run, keys and digests only.
    pub artifacts: Vec<ArtifactRecord>,
    /// Error text of the fatal violation, when aborted.
    pub abort_reason: Option<String>,
    /// The same error, typed.
    #[serde(skip)]
    pub abort_error: Option<RunError>,
}

impl PipelineOutcome {
    pub fn passed_count(&self) -> usize {
        self.results.count(StageStatus::Success)
    }

    pub fn failed_count(&self) -> usize {
        self.results.count(StageStatus::Failure)
    }

    pub fn skipped_count(&self) -> usize {
        self.results.count(StageStatus::Skipped)
    }

    pub fn artifact_keys(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.key.as_str()).collect()
    }
}

/// Executes one pipeline definition at a time, stage by stage.
pub struct PipelineRunner {
    credentials: Arc<dyn CredentialsProvider>,
    output_policy: OutputPolicy,
}

impl Default for PipelineRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRunner {
    /// A runner with no credentials available.
    pub fn new() -> Self {
        Self {
            credentials: Arc::new(StaticCredentialsProvider::new()),
            output_policy: OutputPolicy::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_output_policy(mut self, policy: OutputPolicy) -> Self {
        self.output_policy = policy;
        self
    }

    /// Run `definition` against a fresh in-memory store seeded with `initial`.
    pub async fn run(
        &self,
        definition: &PipelineDefinition,
        initial: Vec<(String, Payload)>,
    ) -> PipelineOutcome {
        self.run_with_store(definition, MemoryArtifactStore::new(), initial)
            .await
    }

    /// Run `definition` with a caller-chosen store. The store is consumed and
    /// dropped when the run ends.
    pub async fn run_with_store<S: ArtifactStore>(
        &self,
        definition: &PipelineDefinition,
        store: S,
        initial: Vec<(String, Payload)>,
    ) -> PipelineOutcome {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "drydock.run",
            run_id = %run_id,
            pipeline = %definition.name()
        );
        self.execute(definition, &store, initial, run_id)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        definition: &PipelineDefinition,
        store: &dyn ArtifactStore,
        initial: Vec<(String, Payload)>,
        run_id: String,
    ) -> PipelineOutcome {
        let start = Instant::now();
        info!(
            event = "run.started",
            stages = definition.stages().len(),
            digest = %definition.digest()
        );

        let mut log = RunLog::new();
        let mut status = PipelineStatus::Success;
        let mut abort_error: Option<RunError> = None;
        // Set once the run stops; every later stage is recorded as skipped with this reason.
        let mut halted: Option<String> = None;

        for (key, payload) in initial {
            if let Err(source) = store.put(&key, payload) {
                error!(event = "run.seed_failed", key = %key, error = %source);
                halted = Some("skipped: initial artifacts could not be stored".to_string());
                abort_error = Some(RunError::Store {
                    stage: "seed".to_string(),
                    source,
                });
                status = PipelineStatus::Aborted;
                break;
            }
        }

        for stage in definition.stages() {
            if let Some(reason) = &halted {
                info!(event = "stage.skipped", stage = %stage.name());
                log.append(StageResult::skipped(stage, reason));
                continue;
            }

            let inputs = match collect_inputs(stage, store) {
                Ok(inputs) => inputs,
                Err(err) => {
                    error!(event = "run.aborted", stage = %stage.name(), error = %err);
                    log.append(StageResult::executed(
                        stage,
                        StageStatus::Failure,
                        err.to_string(),
                        Utc::now(),
                        0,
                        Vec::new(),
                        Vec::new(),
                    ));
                    halted = Some(format!("skipped: run aborted at '{}'", stage.name()));
                    abort_error = Some(err);
                    status = PipelineStatus::Aborted;
                    continue;
                }
            };

            info!(
                event = "stage.started",
                stage = %stage.name(),
                kind = %stage.kind(),
                gate = %stage.gate_policy()
            );
            let started_at = Utc::now();
            let clock = Instant::now();
            let execution = match self.resolve_credentials(stage) {
                Ok(credentials) => {
                    let ctx = StageContext {
                        run_id: run_id.clone(),
                        stage_name: stage.name().to_string(),
                        kind: stage.kind(),
                        inputs,
                        outputs: stage.outputs().to_vec(),
                        credentials,
                    };
                    match stage.executor().execute(&ctx).await {
                        Ok(execution) => execution,
                        Err(e) => StageExecution::failure(format!("{e:#}")),
                    }
                }
                Err(e) => StageExecution::failure(e.to_string()),
            };
            let duration_ms = clock.elapsed().as_millis() as u64;

            let mut stage_status = if execution.success {
                StageStatus::Success
            } else {
                StageStatus::Failure
            };
            let mut detail = execution.detail;
            let mut warnings = Vec::new();
            let mut produced: Vec<String> = Vec::new();
            let mut store_error = None;

            for (key, payload) in execution.artifacts {
                if !stage.outputs().contains(&key) {
                    warn!(event = "stage.undeclared_artifact", stage = %stage.name(), key = %key);
                    warnings.push(format!("undeclared artifact '{key}' ignored"));
                    continue;
                }
                if produced.contains(&key) {
                    warnings.push(format!("artifact '{key}' produced twice; first value kept"));
                    continue;
                }
                match store.put(&key, payload) {
                    Ok(()) => produced.push(key),
                    Err(source) => {
                        store_error = Some(RunError::Store {
                            stage: stage.name().to_string(),
                            source,
                        });
                        break;
                    }
                }
            }

            if stage_status == StageStatus::Success && store_error.is_none() {
                let missing: Vec<&str> = stage
                    .outputs()
                    .iter()
                    .filter(|key| !produced.contains(key))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    let message = format!("declared output(s) not produced: {}", missing.join(", "));
                    warn!(event = "stage.output_missing", stage = %stage.name(), missing = %missing.join(","));
                    match self.output_policy {
                        OutputPolicy::Warn => warnings.push(message),
                        OutputPolicy::Enforce => {
                            stage_status = StageStatus::Failure;
                            detail = if detail.is_empty() {
                                message
                            } else {
                                format!("{detail}\n{message}")
                            };
                        }
                    }
                }
            }

            info!(
                event = "stage.finished",
                stage = %stage.name(),
                status = ?stage_status,
                duration_ms,
                produced = produced.len()
            );
            let had_warnings = !warnings.is_empty();
            log.append(StageResult::executed(
                stage,
                stage_status,
                detail,
                started_at,
                duration_ms,
                produced,
                warnings,
            ));

            if let Some(err) = store_error {
                error!(event = "run.aborted", stage = %stage.name(), error = %err);
                halted = Some(format!("skipped: run aborted at '{}'", stage.name()));
                abort_error = Some(err);
                status = PipelineStatus::Aborted;
                continue;
            }

            match GateEvaluator::evaluate(stage.gate_policy(), stage_status) {
                GateAction::Abort => {
                    warn!(event = "gate.blocked", stage = %stage.name());
                    halted = Some(format!("skipped: blocking stage '{}' failed", stage.name()));
                    status = PipelineStatus::Failed;
                }
                GateAction::Continue => {
                    if stage_status == StageStatus::Failure || had_warnings {
                        status = status.downgrade();
                    }
                }
            }
        }

        let artifacts = store.snapshot().unwrap_or_else(|e| {
            warn!(event = "run.snapshot_failed", error = %e);
            Vec::new()
        });
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(event = "run.finished", status = ?status, duration_ms);

        PipelineOutcome {
            run_id,
            pipeline: definition.name(),
            definition_digest: definition.digest().to_string(),
            status,
            duration_ms,
            results: log,
            artifacts,
            abort_reason: abort_error.as_ref().map(|e| e.to_string()),
            abort_error,
        }
    }

    fn resolve_credentials(
        &self,
        stage: &Stage,
    ) -> Result<Vec<CredentialHandle>, crate::error::CredentialError> {
        stage
            .credentials()
            .iter()
            .map(|name| self.credentials.resolve(name))
            .collect()
    }
}

fn collect_inputs(
    stage: &Stage,
    store: &dyn ArtifactStore,
) -> Result<BTreeMap<String, crate::artifact::Artifact>, RunError> {
    let mut inputs = BTreeMap::new();
    for key in stage.inputs() {
        match store.get(key) {
            Ok(artifact) => {
                inputs.insert(key.clone(), artifact);
            }
            Err(ArtifactError::Missing(_)) => {
                return Err(RunError::MissingArtifact {
                    stage: stage.name().to_string(),
                    key: key.clone(),
                })
            }
            Err(source) => {
                return Err(RunError::Store {
                    stage: stage.name().to_string(),
                    source,
                })
            }
        }
    }
    Ok(inputs)
}
