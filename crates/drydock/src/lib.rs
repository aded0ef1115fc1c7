//! Drydock - gated CI/CD pipeline orchestration
//!
//! Runs a fixed two-phase delivery workflow:
//! - Routes a trigger (push, tag, manual) to the CI or CD pipeline
//! - Executes stages in declared order, passing artifacts through a write-once store
//! - Applies blocking/advisory gates and maps the outcome to an exit code
//!
//! Pipelines are wired at construction: every stage input must be produced
//! by an earlier stage or seeded by the caller, otherwise
//! [`PipelineBuilder::build`] returns a [`WiringError`].

pub mod artifact;
pub mod collab;
pub mod config;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod pipeline;
pub mod result;
pub mod runner;
pub mod stage;
pub mod telemetry;
pub mod trigger;

// Re-export key types
pub use artifact::{Artifact, ArtifactRecord, ArtifactStore, FsArtifactStore, MemoryArtifactStore, Payload};
pub use config::DrydockConfig;
pub use error::{
    ArtifactError, ConfigError, CredentialError, RunError, TriggerParseError, UnroutedTriggerError,
    WiringError,
};
pub use gate::{GateAction, GateEvaluator};
pub use orchestrator::{Dispatch, PipelineOrchestrator};
pub use pipeline::{PipelineBuilder, PipelineDefinition, PipelineName, TRIGGER_REF_KEY};
pub use result::{RunLog, StageResult, StageStatus};
pub use runner::{OutputPolicy, PipelineOutcome, PipelineRunner, PipelineStatus};
pub use stage::{
    FnExecutor, GatePolicy, Stage, StageContext, StageExecution, StageExecutor, StageKind,
};
pub use trigger::{TriggerEvent, TriggerRule};
