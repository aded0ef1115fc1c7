//! Pipeline definitions and the static wiring check.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::artifact::is_valid_key;
use crate::error::WiringError;
use crate::stage::Stage;
use crate::trigger::{TriggerEvent, TriggerRule};

/// Artifact the orchestrator seeds with the branch or tag that triggered the run.
pub const TRIGGER_REF_KEY: &str = "trigger-ref";

/// The two phases of delivery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PipelineName {
    Ci,
    Cd,
}

impl PipelineName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineName::Ci => "ci",
            PipelineName::Cd => "cd",
        }
    }
}

impl fmt::Display for PipelineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ci" => Ok(PipelineName::Ci),
            "cd" => Ok(PipelineName::Cd),
            other => Err(format!("unknown pipeline '{other}'")),
        }
    }
}

/// An ordered, validated list of stages plus the trigger rule that selects it.
///
/// Only obtainable through [`PipelineBuilder::build`], so every instance has
/// passed the wiring check. Stage order is fixed.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    name: PipelineName,
    trigger: TriggerRule,
    seeds: Vec<String>,
    stages: Vec<Stage>,
    digest: String,
}

impl PipelineDefinition {
    pub fn builder(name: PipelineName) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub fn name(&self) -> PipelineName {
        self.name
    }

    pub fn trigger(&self) -> &TriggerRule {
        &self.trigger
    }

    /// Keys the caller must supply as initial artifacts.
    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// SHA-256 of the ordered stage names, kinds and gates.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn accepts(&self, event: &TriggerEvent) -> bool {
        match event {
            TriggerEvent::Manual { pipeline } => *pipeline == self.name,
            other => self.trigger.matches(other),
        }
    }
}

/// Builder for [`PipelineDefinition`].
pub struct PipelineBuilder {
    name: PipelineName,
    trigger: TriggerRule,
    seeds: Vec<String>,
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn new(name: PipelineName) -> Self {
        Self {
            name,
            trigger: TriggerRule::ManualOnly,
            seeds: Vec::new(),
            stages: Vec::new(),
        }
    }

    pub fn trigger(mut self, trigger: TriggerRule) -> Self {
        self.trigger = trigger;
        self
    }

    /// Declare an artifact supplied by the caller rather than by a stage.
    pub fn seed(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.seeds.contains(&key) {
            self.seeds.push(key);
        }
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Run the wiring check and freeze the definition.
    ///
    /// Every stage input must be a seed or an output of an earlier stage;
    /// stage names are unique and no key has two producers.
    pub fn build(self) -> Result<PipelineDefinition, WiringError> {
        if self.stages.is_empty() {
            return Err(WiringError::EmptyPipeline(self.name.to_string()));
        }

        // key -> producer ("seed" for caller-supplied keys)
        let mut available: BTreeMap<&str, &str> = BTreeMap::new();
        for seed in &self.seeds {
            if !is_valid_key(seed) {
                return Err(WiringError::InvalidKey(seed.clone()));
            }
            available.insert(seed, "seed");
        }

        let mut names = HashSet::new();
        for stage in &self.stages {
            if !names.insert(stage.name()) {
                return Err(WiringError::DuplicateStage(stage.name().to_string()));
            }

            for key in stage.inputs() {
                if !available.contains_key(key.as_str()) {
                    return Err(WiringError::UnsatisfiedInput {
                        stage: stage.name().to_string(),
                        key: key.clone(),
                    });
                }
            }

            for key in stage.outputs() {
                if !is_valid_key(key) {
                    return Err(WiringError::InvalidKey(key.clone()));
                }
                if let Some(first) = available.insert(key, stage.name()) {
                    return Err(WiringError::DuplicateOutput {
                        key: key.clone(),
                        first: first.to_string(),
                        second: stage.name().to_string(),
                    });
                }
            }
        }

        let digest = compute_stages_digest(&self.stages);
        Ok(PipelineDefinition {
            name: self.name,
            trigger: self.trigger,
            seeds: self.seeds,
            stages: self.stages,
            digest,
        })
    }
}

/// Compute deterministic digest of the ordered stage list.
fn compute_stages_digest(stages: &[Stage]) -> String {
    let mut hasher = Sha256::new();
    for stage in stages {
        hasher.update(stage.name().as_bytes());
        hasher.update(b"\0");
        hasher.update(stage.kind().as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(stage.gate_policy().to_string().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{FnExecutor, StageContext, StageExecution, StageKind};

    fn stage(name: &str, kind: StageKind) -> Stage {
        Stage::new(
            name,
            kind,
            FnExecutor::new(|_: &StageContext| Ok(StageExecution::success(""))),
        )
    }

    #[test]
    fn test_valid_wiring() {
        let def = PipelineBuilder::new(PipelineName::Ci)
            .stage(stage("checkout", StageKind::Checkout).output("source"))
            .stage(stage("build", StageKind::Build).input("source").output("binary"))
            .stage(stage("test", StageKind::UnitTest).input("binary"))
            .build()
            .expect("wiring should pass");
        assert_eq!(def.stages().len(), 3);
        assert_eq!(def.name(), PipelineName::Ci);
    }

    #[test]
    fn test_input_without_producer_rejected() {
        let err = PipelineBuilder::new(PipelineName::Ci)
            .stage(stage("build", StageKind::Build).input("source"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            WiringError::UnsatisfiedInput {
                stage: "build".to_string(),
                key: "source".to_string()
            }
        );
    }

    #[test]
    fn test_input_from_later_stage_rejected() {
        let err = PipelineBuilder::new(PipelineName::Ci)
            .stage(stage("test", StageKind::UnitTest).input("binary"))
            .stage(stage("build", StageKind::Build).output("binary"))
            .build()
            .unwrap_err();
        assert!(matches!(err, WiringError::UnsatisfiedInput { .. }));
    }

    #[test]
    fn test_seed_satisfies_input() {
        let def = PipelineBuilder::new(PipelineName::Cd)
            .seed(TRIGGER_REF_KEY)
            .stage(stage("deploy", StageKind::Deploy).input(TRIGGER_REF_KEY))
            .build();
        assert!(def.is_ok());
    }

    #[test]
    fn test_duplicate_stage_name_rejected() {
        let err = PipelineBuilder::new(PipelineName::Ci)
            .stage(stage("lint", StageKind::Lint))
            .stage(stage("lint", StageKind::Lint))
            .build()
            .unwrap_err();
        assert_eq!(err, WiringError::DuplicateStage("lint".to_string()));
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let err = PipelineBuilder::new(PipelineName::Ci)
            .seed("image")
            .stage(stage("build-image", StageKind::ContainerBuild).output("image"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            WiringError::DuplicateOutput { ref first, .. } if first == "seed"
        ));
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = PipelineBuilder::new(PipelineName::Cd).build().unwrap_err();
        assert_eq!(err, WiringError::EmptyPipeline("cd".to_string()));
    }

    #[test]
    fn test_invalid_output_key_rejected() {
        let err = PipelineBuilder::new(PipelineName::Ci)
            .stage(stage("build", StageKind::Build).output("target/app"))
            .build()
            .unwrap_err();
        assert_eq!(err, WiringError::InvalidKey("target/app".to_string()));
    }

    #[test]
    fn test_digest_order_sensitive() {
        let a = PipelineBuilder::new(PipelineName::Ci)
            .stage(stage("lint", StageKind::Lint))
            .stage(stage("test", StageKind::UnitTest))
            .build()
            .unwrap();
        let b = PipelineBuilder::new(PipelineName::Ci)
            .stage(stage("test", StageKind::UnitTest))
            .stage(stage("lint", StageKind::Lint))
            .build()
            .unwrap();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_manual_accepts_by_name() {
        let def = PipelineBuilder::new(PipelineName::Cd)
            .trigger(TriggerRule::release_tags())
            .stage(stage("deploy", StageKind::Deploy))
            .build()
            .unwrap();
        assert!(def.accepts(&TriggerEvent::manual(PipelineName::Cd)));
        assert!(!def.accepts(&TriggerEvent::manual(PipelineName::Ci)));
        assert!(def.accepts(&TriggerEvent::tag("v2.0.0")));
    }
}
