//! Stage outcome records and the append-only run log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::{GatePolicy, Stage, StageKind};

/// Outcome of one stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failure,
    /// Imposed by the runner after an abort; never reported by an executor.
    Skipped,
}

/// Immutable record of one stage execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    /// Stage name.
    stage_name: String,
    /// Stage kind.
    kind: StageKind,
    /// Gate policy in force when the stage ran.
    gate: GatePolicy,
    /// Execution status.
    status: StageStatus,
    /// Executor detail: tool output, failure reason or skip reason.
    exit_detail: String,
    /// Duration in milliseconds.
    duration_ms: u64,
    /// When execution began. `None` for skipped stages.
    started_at: Option<DateTime<Utc>>,
    /// Declared outputs actually written to the store.
    produced_artifacts: Vec<String>,
    /// Output-contract inconsistencies noticed by the runner.
    warnings: Vec<String>,
}

impl StageResult {
    pub(crate) fn executed(
        stage: &Stage,
        status: StageStatus,
        exit_detail: String,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        produced_artifacts: Vec<String>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            stage_name: stage.name().to_string(),
            kind: stage.kind(),
            gate: stage.gate_policy(),
            status,
            exit_detail,
            duration_ms,
            started_at: Some(started_at),
            produced_artifacts,
            warnings,
        }
    }

    pub(crate) fn skipped(stage: &Stage, reason: &str) -> Self {
        Self {
            stage_name: stage.name().to_string(),
            kind: stage.kind(),
            gate: stage.gate_policy(),
            status: StageStatus::Skipped,
            exit_detail: reason.to_string(),
            duration_ms: 0,
            started_at: None,
            produced_artifacts: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn gate(&self) -> GatePolicy {
        self.gate
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    pub fn exit_detail(&self) -> &str {
        &self.exit_detail
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn produced_artifacts(&self) -> &[String] {
        &self.produced_artifacts
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn passed(&self) -> bool {
        self.status == StageStatus::Success
    }
}

/// Ordered, append-only log of stage results for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct RunLog {
    entries: Vec<StageResult>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, result: StageResult) {
        self.entries.push(result);
    }

    pub fn entries(&self) -> &[StageResult] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, stage_name: &str) -> Option<&StageResult> {
        self.entries.iter().find(|r| r.stage_name == stage_name)
    }

    pub fn count(&self, status: StageStatus) -> usize {
        self.entries.iter().filter(|r| r.status == status).count()
    }

    pub fn statuses(&self) -> Vec<(&str, StageStatus)> {
        self.entries
            .iter()
            .map(|r| (r.stage_name.as_str(), r.status))
            .collect()
    }
}
