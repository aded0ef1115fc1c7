//! External collaborators and the executors that adapt them to stages.
//!
//! - Build/test commands: [`CommandExecutor`], with [`WithTimeout`] for wall-clock limits
//! - Scanners: [`Scanner`], [`CommandScanner`], [`ScanExecutor`]
//! - Registry: [`RegistryClient`], [`RegistryPushExecutor`]
//! - Cluster: [`ClusterClient`], [`DeployExecutor`], [`VerifyExecutor`]
//! - Secrets: [`CredentialsProvider`] handing out opaque [`CredentialHandle`]s

pub mod cluster;
pub mod command;
pub mod credentials;
pub mod registry;
pub mod scan;

pub use cluster::{ClusterClient, DeployExecutor, Readiness, VerifyExecutor};
pub use command::{CommandExecutor, CommandOutput, WithTimeout};
pub use credentials::{
    CredentialHandle, CredentialsProvider, EnvCredentialsProvider, StaticCredentialsProvider,
};
pub use registry::{RegistryClient, RegistryPushExecutor};
pub use scan::{CommandScanner, Finding, ScanExecutor, ScanReport, Scanner, Severity};
