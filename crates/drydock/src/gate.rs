//! Gate evaluation: does a stage result permit the pipeline to continue?

use serde::{Deserialize, Serialize};

use crate::result::StageStatus;
use crate::stage::GatePolicy;

/// What the runner should do after a stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    Continue,
    Abort,
}

/// Stateless gate rules.
pub struct GateEvaluator;

impl GateEvaluator {
    /// Decide whether the pipeline continues.
    ///
    /// | gate     | status          | action   |
    /// |----------|-----------------|----------|
    /// | blocking | success         | continue |
    /// | blocking | failure         | abort    |
    /// | advisory | success/failure | continue |
    /// | any      | skipped         | continue |
    pub fn evaluate(gate: GatePolicy, status: StageStatus) -> GateAction {
        match (gate, status) {
            (GatePolicy::Blocking, StageStatus::Failure) => GateAction::Abort,
            _ => GateAction::Continue,
        }
    }
}
