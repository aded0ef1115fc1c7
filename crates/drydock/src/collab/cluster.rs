use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::CredentialHandle;
use crate::artifact::Payload;
use crate::stage::{StageContext, StageExecution, StageExecutor};

/// Workload readiness after an apply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Readiness {
    /// Replicas reporting ready.
    pub ready: u32,
    /// Replicas the workload asks for.
    pub desired: u32,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.desired > 0 && self.ready >= self.desired
    }
}

/// Cluster control plane client.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Apply a manifest set; returns a short summary of what changed.
    async fn apply(&self, manifests: &[PathBuf], credential: &CredentialHandle) -> anyhow::Result<String>;

    /// Current pod/service readiness of the deployed workload.
    async fn readiness(&self, credential: &CredentialHandle) -> anyhow::Result<Readiness>;
}

fn granted<'a>(ctx: &'a StageContext, name: &str) -> anyhow::Result<&'a CredentialHandle> {
    ctx.credential(name)
        .ok_or_else(|| anyhow::anyhow!("credential '{}' not granted to stage", name))
}

/// Applies manifests and records the apply summary under the first output.
pub struct DeployExecutor {
    client: Arc<dyn ClusterClient>,
    manifests: Vec<PathBuf>,
    credential: String,
}

impl DeployExecutor {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        manifests: Vec<PathBuf>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            client,
            manifests,
            credential: credential.into(),
        }
    }
}

#[async_trait]
impl StageExecutor for DeployExecutor {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageExecution> {
        let credential = granted(ctx, &self.credential)?;
        let summary = self.client.apply(&self.manifests, credential).await?;
        info!(stage = %ctx.stage_name, manifests = self.manifests.len(), "Manifests applied");

        let mut execution = StageExecution::success(summary.clone());
        if let Some(key) = ctx.primary_output() {
            execution = execution.with_artifact(
                key,
                Payload::Report(json!({
                    "manifests": self.manifests,
                    "summary": summary,
                })),
            );
        }
        Ok(execution)
    }
}

/// Polls readiness until the workload is ready or attempts run out.
pub struct VerifyExecutor {
    client: Arc<dyn ClusterClient>,
    credential: String,
    attempts: u32,
    interval: Duration,
}

impl VerifyExecutor {
    pub fn new(client: Arc<dyn ClusterClient>, credential: impl Into<String>) -> Self {
        Self {
            client,
            credential: credential.into(),
            attempts: 10,
            interval: Duration::from_secs(6),
        }
    }

    pub fn polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.interval = interval;
        self
    }
}

#[async_trait]
impl StageExecutor for VerifyExecutor {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageExecution> {
        let credential = granted(ctx, &self.credential)?;

        let mut last = Readiness { ready: 0, desired: 0 };
        for attempt in 1..=self.attempts {
            last = self.client.readiness(credential).await?;
            debug!(stage = %ctx.stage_name, attempt, ready = last.ready, desired = last.desired, "Readiness probe");
            if last.is_ready() {
                let mut execution =
                    StageExecution::success(format!("{}/{} ready", last.ready, last.desired));
                if let Some(key) = ctx.primary_output() {
                    execution = execution.with_artifact(key, Payload::Report(serde_json::to_value(last)?));
                }
                return Ok(execution);
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        Ok(StageExecution::failure(format!(
            "workload not ready after {} attempt(s): {}/{} ready",
            self.attempts, last.ready, last.desired
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Becomes ready after `ready_after` probes.
    struct FakeCluster {
        probes: AtomicU32,
        ready_after: u32,
    }

    #[async_trait]
    impl ClusterClient for FakeCluster {
        async fn apply(&self, manifests: &[PathBuf], _credential: &CredentialHandle) -> anyhow::Result<String> {
            Ok(format!("{} object(s) configured", manifests.len()))
        }

        async fn readiness(&self, _credential: &CredentialHandle) -> anyhow::Result<Readiness> {
            let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
            let ready = if n >= self.ready_after { 3 } else { 1 };
            Ok(Readiness { ready, desired: 3 })
        }
    }

    fn cluster(ready_after: u32) -> Arc<FakeCluster> {
        Arc::new(FakeCluster {
            probes: AtomicU32::new(0),
            ready_after,
        })
    }

    fn ctx(kind: StageKind, outputs: &[&str]) -> StageContext {
        StageContext {
            run_id: "run-1".to_string(),
            stage_name: kind.as_str().to_string(),
            kind,
            inputs: Default::default(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            credentials: vec![CredentialHandle::new("cluster", "kubeconfig")],
        }
    }

    #[test]
    fn test_readiness() {
        assert!(Readiness { ready: 2, desired: 2 }.is_ready());
        assert!(!Readiness { ready: 1, desired: 2 }.is_ready());
        assert!(!Readiness { ready: 0, desired: 0 }.is_ready());
    }

    #[tokio::test]
    async fn test_deploy_applies_and_reports() {
        let exec = DeployExecutor::new(
            cluster(1),
            vec![PathBuf::from("k8s/deployment.yaml"), PathBuf::from("k8s/service.yaml")],
            "cluster",
        );
        let result = exec.execute(&ctx(StageKind::Deploy, &["deploy-report"])).await.unwrap();
        assert!(result.success);
        assert!(result.detail.contains("2 object(s)"));
        assert_eq!(result.artifacts[0].0, "deploy-report");
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_polls_until_ready() {
        let fake = cluster(3);
        let exec = VerifyExecutor::new(fake.clone(), "cluster").polling(5, Duration::from_secs(1));
        let result = exec.execute(&ctx(StageKind::Verify, &[])).await.unwrap();
        assert!(result.success);
        assert_eq!(fake.probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_gives_up() {
        let exec = VerifyExecutor::new(cluster(100), "cluster").polling(2, Duration::from_secs(1));
        let result = exec.execute(&ctx(StageKind::Verify, &[])).await.unwrap();
        assert!(!result.success);
        assert!(result.detail.contains("1/3"));
    }

    #[tokio::test]
    async fn test_deploy_requires_credential() {
        let exec = DeployExecutor::new(cluster(1), vec![], "other");
        assert!(exec.execute(&ctx(StageKind::Deploy, &[])).await.is_err());
    }
}
