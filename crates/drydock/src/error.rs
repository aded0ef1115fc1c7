//! Error taxonomy for pipeline construction, artifact passing and routing.

use thiserror::Error;

use crate::pipeline::PipelineName;

/// Static wiring problems found while building a pipeline definition.
///
/// Always raised before any executor runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WiringError {
    #[error("stage '{stage}' requires artifact '{key}' but no earlier stage produces it")]
    UnsatisfiedInput { stage: String, key: String },

    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("artifact '{key}' is produced by both '{first}' and '{second}'")]
    DuplicateOutput {
        key: String,
        first: String,
        second: String,
    },

    #[error("pipeline '{0}' has no stages")]
    EmptyPipeline(String),

    #[error("invalid artifact key '{0}'")]
    InvalidKey(String),

    #[error("invalid trigger pattern '{pattern}': {reason}")]
    InvalidTriggerPattern { pattern: String, reason: String },

    #[error("expected the {expected} definition, got {found}")]
    PipelineMismatch {
        expected: PipelineName,
        found: PipelineName,
    },
}

/// Errors from artifact store operations.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    Missing(String),

    #[error("artifact already written: {0}")]
    DuplicateKey(String),

    #[error("invalid artifact key '{0}'")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fatal run-time errors. Either one aborts the run regardless of gate policy.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("stage '{stage}' is missing required artifact '{key}'")]
    MissingArtifact { stage: String, key: String },

    #[error("stage '{stage}' could not store artifact: {source}")]
    Store {
        stage: String,
        #[source]
        source: ArtifactError,
    },
}

/// No pipeline definition accepts the trigger. Treated as a no-op.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no pipeline routed for trigger '{0}'")]
pub struct UnroutedTriggerError(pub String);

/// Malformed trigger descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerParseError {
    #[error("trigger descriptor must look like '<push|tag|manual>:<value>', got '{0}'")]
    Malformed(String),

    #[error("unknown trigger type '{0}'")]
    UnknownType(String),

    #[error("unknown pipeline '{0}' (expected 'ci' or 'cd')")]
    UnknownPipeline(String),
}

/// Credential lookup failure. Never carries secret material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential '{0}' is not available")]
    Unavailable(String),
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("stage '{stage}': {reason}")]
    InvalidStage { stage: String, reason: String },

    #[error("invalid value for {variable}: {reason}")]
    Override { variable: String, reason: String },

    #[error("wiring error: {0}")]
    Wiring(#[from] WiringError),
}
