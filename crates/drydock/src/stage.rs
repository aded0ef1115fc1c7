//! Stage definitions and the executor contract.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, Payload};
use crate::collab::CredentialHandle;

/// Kinds of delivery stage a pipeline can contain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Checkout,
    Setup,
    Lint,
    Sast,
    Sca,
    UnitTest,
    Build,
    ContainerBuild,
    ContainerScan,
    ContainerTest,
    RegistryPush,
    ClusterSetup,
    Deploy,
    Verify,
    Dast,
    IntegrationTest,
}

impl StageKind {
    pub const ALL: [StageKind; 16] = [
        StageKind::Checkout,
        StageKind::Setup,
        StageKind::Lint,
        StageKind::Sast,
        StageKind::Sca,
        StageKind::UnitTest,
        StageKind::Build,
        StageKind::ContainerBuild,
        StageKind::ContainerScan,
        StageKind::ContainerTest,
        StageKind::RegistryPush,
        StageKind::ClusterSetup,
        StageKind::Deploy,
        StageKind::Verify,
        StageKind::Dast,
        StageKind::IntegrationTest,
    ];

    /// Get the kind as its kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Checkout => "checkout",
            StageKind::Setup => "setup",
            StageKind::Lint => "lint",
            StageKind::Sast => "sast",
            StageKind::Sca => "sca",
            StageKind::UnitTest => "unit-test",
            StageKind::Build => "build",
            StageKind::ContainerBuild => "container-build",
            StageKind::ContainerScan => "container-scan",
            StageKind::ContainerTest => "container-test",
            StageKind::RegistryPush => "registry-push",
            StageKind::ClusterSetup => "cluster-setup",
            StageKind::Deploy => "deploy",
            StageKind::Verify => "verify",
            StageKind::Dast => "dast",
            StageKind::IntegrationTest => "integration-test",
        }
    }

    /// Scanner stages gate on findings rather than a plain exit status.
    pub fn is_scan(&self) -> bool {
        matches!(
            self,
            StageKind::Sast | StageKind::Sca | StageKind::ContainerScan | StageKind::Dast
        )
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown stage kind '{s}'"))
    }
}

/// What a stage failure means for the rest of the pipeline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// Failure aborts the pipeline.
    #[default]
    Blocking,
    /// Failure is recorded, execution continues.
    Advisory,
}

impl fmt::Display for GatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GatePolicy::Blocking => "blocking",
            GatePolicy::Advisory => "advisory",
        })
    }
}

/// Everything an executor is handed for one stage execution.
///
/// Inputs and credentials are resolved by the runner; executors never reach
/// into the artifact store or the environment for them.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub run_id: String,
    pub stage_name: String,
    pub kind: StageKind,
    pub inputs: BTreeMap<String, Artifact>,
    pub outputs: Vec<String>,
    pub credentials: Vec<CredentialHandle>,
}

impl StageContext {
    pub fn input(&self, key: &str) -> Option<&Artifact> {
        self.inputs.get(key)
    }

    pub fn credential(&self, name: &str) -> Option<&CredentialHandle> {
        self.credentials.iter().find(|c| c.name() == name)
    }

    /// The first declared output, where most single-artifact stages write.
    pub fn primary_output(&self) -> Option<&str> {
        self.outputs.first().map(String::as_str)
    }
}

/// What an executor reports back to the runner.
#[derive(Debug, Clone, PartialEq)]
pub struct StageExecution {
    pub success: bool,
    pub detail: String,
    pub artifacts: Vec<(String, Payload)>,
}

impl StageExecution {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, key: impl Into<String>, payload: Payload) -> Self {
        self.artifacts.push((key.into(), payload));
        self
    }
}

/// The work behind a stage.
///
/// Returning `Err` is treated the same as a reported failure: the error
/// chain becomes the stage's exit detail.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageExecution>;
}

/// Executor backed by a plain closure.
pub struct FnExecutor<F>(F);

impl<F> FnExecutor<F>
where
    F: Fn(&StageContext) -> anyhow::Result<StageExecution> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> StageExecutor for FnExecutor<F>
where
    F: Fn(&StageContext) -> anyhow::Result<StageExecution> + Send + Sync,
{
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageExecution> {
        (self.0)(ctx)
    }
}

/// A named unit of work with a gating policy and declared artifact wiring.
#[derive(Clone)]
pub struct Stage {
    name: String,
    kind: StageKind,
    gate: GatePolicy,
    inputs: Vec<String>,
    outputs: Vec<String>,
    credentials: Vec<String>,
    executor: Arc<dyn StageExecutor>,
}

impl Stage {
    /// Create a blocking stage with no declared artifacts.
    pub fn new(
        name: impl Into<String>,
        kind: StageKind,
        executor: impl StageExecutor + 'static,
    ) -> Self {
        Self::with_executor(name, kind, Arc::new(executor))
    }

    pub fn with_executor(
        name: impl Into<String>,
        kind: StageKind,
        executor: Arc<dyn StageExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            gate: GatePolicy::Blocking,
            inputs: Vec::new(),
            outputs: Vec::new(),
            credentials: Vec::new(),
            executor,
        }
    }

    pub fn gate(mut self, gate: GatePolicy) -> Self {
        self.gate = gate;
        self
    }

    pub fn advisory(self) -> Self {
        self.gate(GatePolicy::Advisory)
    }

    /// Declare a required input. Repeated keys are kept once.
    pub fn input(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.inputs.contains(&key) {
            self.inputs.push(key);
        }
        self
    }

    /// Declare a promised output. Repeated keys are kept once.
    pub fn output(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.outputs.contains(&key) {
            self.outputs.push(key);
        }
        self
    }

    pub fn credential(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.credentials.contains(&name) {
            self.credentials.push(name);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn gate_policy(&self) -> GatePolicy {
        self.gate
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn credentials(&self) -> &[String] {
        &self.credentials
    }

    pub(crate) fn executor(&self) -> &dyn StageExecutor {
        self.executor.as_ref()
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("gate", &self.gate)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}
