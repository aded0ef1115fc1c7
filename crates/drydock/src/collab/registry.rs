use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::CredentialHandle;
use crate::artifact::Payload;
use crate::stage::{StageContext, StageExecution, StageExecutor};

/// Container registry client.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Push `image` and return the pushed reference (ideally digest-pinned).
    async fn push(&self, image: &str, credential: &CredentialHandle) -> anyhow::Result<String>;
}

/// Pushes the image named by the `image_key` input and records the pushed
/// reference under the stage's first declared output.
pub struct RegistryPushExecutor {
    client: Arc<dyn RegistryClient>,
    image_key: String,
    credential: String,
}

impl RegistryPushExecutor {
    pub fn new(
        client: Arc<dyn RegistryClient>,
        image_key: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            client,
            image_key: image_key.into(),
            credential: credential.into(),
        }
    }
}

#[async_trait]
impl StageExecutor for RegistryPushExecutor {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageExecution> {
        let image = ctx
            .input(&self.image_key)
            .map(|artifact| artifact.payload.to_text())
            .ok_or_else(|| anyhow::anyhow!("image '{}' not among stage inputs", self.image_key))?;
        let credential = ctx
            .credential(&self.credential)
            .ok_or_else(|| anyhow::anyhow!("credential '{}' not granted to stage", self.credential))?;

        let pushed = self.client.push(image.trim(), credential).await?;
        info!(stage = %ctx.stage_name, image = %image.trim(), pushed = %pushed, "Image pushed");

        let mut execution = StageExecution::success(format!("pushed {pushed}"));
        if let Some(key) = ctx.primary_output() {
            execution = execution.with_artifact(key, Payload::Bytes(pushed.into_bytes()));
        }
        Ok(execution)
    }
}
