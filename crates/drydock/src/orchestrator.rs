//! Trigger routing and the final exit status.

use tracing::{info, warn};

use crate::artifact::{ArtifactStore, MemoryArtifactStore, Payload};
use crate::error::{UnroutedTriggerError, WiringError};
use crate::pipeline::{PipelineDefinition, PipelineName, TRIGGER_REF_KEY};
use crate::runner::{PipelineOutcome, PipelineRunner, PipelineStatus};
use crate::trigger::TriggerEvent;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ABORTED: i32 = 2;

impl PipelineStatus {
    /// Process exit code for a finished run.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineStatus::Success | PipelineStatus::SuccessWithWarnings => EXIT_OK,
            PipelineStatus::Failed => EXIT_FAILED,
            PipelineStatus::Aborted => EXIT_ABORTED,
        }
    }
}

/// What happened to a trigger.
#[derive(Debug)]
pub enum Dispatch {
    Ran(PipelineOutcome),
    /// No pipeline accepted the trigger; nothing ran.
    Unrouted(UnroutedTriggerError),
}

impl Dispatch {
    pub fn exit_code(&self) -> i32 {
        match self {
            Dispatch::Ran(outcome) => outcome.status.exit_code(),
            Dispatch::Unrouted(_) => EXIT_OK,
        }
    }

    pub fn outcome(&self) -> Option<&PipelineOutcome> {
        match self {
            Dispatch::Ran(outcome) => Some(outcome),
            Dispatch::Unrouted(_) => None,
        }
    }
}

/// Owns the CI and CD definitions and routes triggers between them.
pub struct PipelineOrchestrator {
    ci: PipelineDefinition,
    cd: PipelineDefinition,
    runner: PipelineRunner,
}

impl PipelineOrchestrator {
    /// Fails with [`WiringError::PipelineMismatch`] when the definitions
    /// are not named CI and CD respectively.
    pub fn new(ci: PipelineDefinition, cd: PipelineDefinition) -> Result<Self, WiringError> {
        for (expected, definition) in [(PipelineName::Ci, &ci), (PipelineName::Cd, &cd)] {
            if definition.name() != expected {
                return Err(WiringError::PipelineMismatch {
                    expected,
                    found: definition.name(),
                });
            }
        }
        Ok(Self {
            ci,
            cd,
            runner: PipelineRunner::new(),
        })
    }

    pub fn with_runner(mut self, runner: PipelineRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn definition(&self, name: PipelineName) -> &PipelineDefinition {
        match name {
            PipelineName::Ci => &self.ci,
            PipelineName::Cd => &self.cd,
        }
    }

    /// Pick the definition a trigger should run.
    ///
    /// Manual triggers name their pipeline directly. Pushes and tags go to
    /// the first definition whose trigger rule accepts them, CI first.
    pub fn select(&self, event: &TriggerEvent) -> Result<&PipelineDefinition, UnroutedTriggerError> {
        if let TriggerEvent::Manual { pipeline } = event {
            return Ok(self.definition(*pipeline));
        }
        [&self.ci, &self.cd]
            .into_iter()
            .find(|definition| definition.accepts(event))
            .ok_or_else(|| UnroutedTriggerError(event.to_string()))
    }

    /// Select and run against a fresh in-memory store.
    pub async fn dispatch(&self, event: &TriggerEvent, initial: Vec<(String, Payload)>) -> Dispatch {
        self.dispatch_with_store(event, MemoryArtifactStore::new(), initial)
            .await
    }

    /// Select and run against `store`. The triggering ref is seeded as
    /// `trigger-ref` unless the caller already supplied one.
    pub async fn dispatch_with_store<S: ArtifactStore>(
        &self,
        event: &TriggerEvent,
        store: S,
        mut initial: Vec<(String, Payload)>,
    ) -> Dispatch {
        let definition = match self.select(event) {
            Ok(definition) => definition,
            Err(err) => {
                warn!(event = "trigger.unrouted", trigger = %event);
                return Dispatch::Unrouted(err);
            }
        };
        info!(event = "trigger.routed", trigger = %event, pipeline = %definition.name());

        if let Some(git_ref) = event.git_ref() {
            if !initial.iter().any(|(key, _)| key == TRIGGER_REF_KEY) {
                initial.push((
                    TRIGGER_REF_KEY.to_string(),
                    Payload::Bytes(git_ref.as_bytes().to_vec()),
                ));
            }
        }

        Dispatch::Ran(self.runner.run_with_store(definition, store, initial).await)
    }
}
