use std::collections::HashMap;
use std::fmt;

use crate::error::CredentialError;

/// Opaque credential handed to an executor.
///
/// The secret is only reachable through [`CredentialHandle::expose`]; `Debug`
/// and `Display` print the handle name alone.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialHandle {
    name: String,
    secret: String,
}

impl CredentialHandle {
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expose(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialHandle")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "credential:{}", self.name)
    }
}

/// Source of credential handles.
pub trait CredentialsProvider: Send + Sync {
    fn resolve(&self, name: &str) -> Result<CredentialHandle, CredentialError>;
}

/// Resolves `<name>` from the `<PREFIX><NAME>` environment variable,
/// e.g. `registry` → `DRYDOCK_SECRET_REGISTRY`.
#[derive(Debug, Clone)]
pub struct EnvCredentialsProvider {
    prefix: String,
}

impl EnvCredentialsProvider {
    pub const DEFAULT_PREFIX: &'static str = "DRYDOCK_SECRET_";

    pub fn new() -> Self {
        Self::with_prefix(Self::DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn variable_for(&self, name: &str) -> String {
        format!("{}{}", self.prefix, env_suffix(name))
    }
}

impl Default for EnvCredentialsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialsProvider for EnvCredentialsProvider {
    fn resolve(&self, name: &str) -> Result<CredentialHandle, CredentialError> {
        std::env::var(self.variable_for(name))
            .ok()
            .filter(|v| !v.is_empty())
            .map(|secret| CredentialHandle::new(name, secret))
            .ok_or_else(|| CredentialError::Unavailable(name.to_string()))
    }
}

/// Fixed set of credentials, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialsProvider {
    handles: HashMap<String, CredentialHandle>,
}

impl StaticCredentialsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, secret: impl Into<String>) -> Self {
        let name = name.into();
        self.handles
            .insert(name.clone(), CredentialHandle::new(name, secret));
        self
    }
}

impl CredentialsProvider for StaticCredentialsProvider {
    fn resolve(&self, name: &str) -> Result<CredentialHandle, CredentialError> {
        self.handles
            .get(name)
            .cloned()
            .ok_or_else(|| CredentialError::Unavailable(name.to_string()))
    }
}

/// `image-ref` → `IMAGE_REF`.
pub(crate) fn env_suffix(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
