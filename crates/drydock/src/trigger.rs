//! Trigger descriptors and the rules pipelines use to accept them.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::{TriggerParseError, WiringError};
use crate::pipeline::PipelineName;

/// Release tags: `v1.2.3`, optionally with a pre-release suffix such as `-rc.1`.
pub const DEFAULT_RELEASE_PATTERN: &str = r"^v\d+\.\d+\.\d+(-[0-9A-Za-z.-]+)?$";

/// The external event that asks for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    Push { branch: String },
    Tag { name: String },
    Manual { pipeline: PipelineName },
}

impl TriggerEvent {
    pub fn push(branch: impl Into<String>) -> Self {
        TriggerEvent::Push {
            branch: branch.into(),
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        TriggerEvent::Tag { name: name.into() }
    }

    pub fn manual(pipeline: PipelineName) -> Self {
        TriggerEvent::Manual { pipeline }
    }

    /// The git ref the run is about, if any.
    pub fn git_ref(&self) -> Option<&str> {
        match self {
            TriggerEvent::Push { branch } => Some(branch),
            TriggerEvent::Tag { name } => Some(name),
            TriggerEvent::Manual { .. } => None,
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::Push { branch } => write!(f, "push:{branch}"),
            TriggerEvent::Tag { name } => write!(f, "tag:{name}"),
            TriggerEvent::Manual { pipeline } => write!(f, "manual:{pipeline}"),
        }
    }
}

impl FromStr for TriggerEvent {
    type Err = TriggerParseError;

    /// Parse `push:<branch>`, `tag:<name>` or `manual:<ci|cd>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .split_once(':')
            .filter(|(_, value)| !value.trim().is_empty())
            .ok_or_else(|| TriggerParseError::Malformed(s.to_string()))?;
        let value = value.trim();

        match kind.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(TriggerEvent::push(value)),
            "tag" => Ok(TriggerEvent::tag(value)),
            "manual" => value
                .parse::<PipelineName>()
                .map(TriggerEvent::manual)
                .map_err(|_| TriggerParseError::UnknownPipeline(value.to_string())),
            other => Err(TriggerParseError::UnknownType(other.to_string())),
        }
    }
}

impl Serialize for TriggerEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Which automatic triggers a pipeline definition accepts.
///
/// Manual triggers name their pipeline directly and bypass the rule.
#[derive(Debug, Clone)]
pub enum TriggerRule {
    BranchPush { branch: String },
    TagPattern { pattern: Regex },
    ManualOnly,
}

impl TriggerRule {
    pub fn branch(branch: impl Into<String>) -> Self {
        TriggerRule::BranchPush {
            branch: branch.into(),
        }
    }

    pub fn tag_pattern(pattern: &str) -> Result<Self, WiringError> {
        let pattern = Regex::new(pattern).map_err(|e| WiringError::InvalidTriggerPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(TriggerRule::TagPattern { pattern })
    }

    pub fn release_tags() -> Self {
        TriggerRule::TagPattern {
            pattern: Regex::new(DEFAULT_RELEASE_PATTERN).expect("release pattern is valid"),
        }
    }

    pub fn matches(&self, event: &TriggerEvent) -> bool {
        match (self, event) {
            (TriggerRule::BranchPush { branch }, TriggerEvent::Push { branch: pushed }) => {
                branch == pushed
            }
            (TriggerRule::TagPattern { pattern }, TriggerEvent::Tag { name }) => {
                pattern.is_match(name)
            }
            _ => false,
        }
    }
}

impl fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerRule::BranchPush { branch } => write!(f, "push:{branch}"),
            TriggerRule::TagPattern { pattern } => write!(f, "tag:/{}/", pattern.as_str()),
            TriggerRule::ManualOnly => f.write_str("manual"),
        }
    }
}
