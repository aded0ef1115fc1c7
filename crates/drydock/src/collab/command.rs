//! Build/test executor: runs an external command in a working directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;
use tracing::debug;

use super::credentials::env_suffix;
use crate::artifact::Payload;
use crate::stage::{StageContext, StageExecution, StageExecutor};

/// Runs `command` in `workdir`; exit status 0 is success.
///
/// Inputs are exposed as `DRYDOCK_INPUT_<KEY>` and credentials as
/// `DRYDOCK_CREDENTIAL_<NAME>`. Nothing else from the pipeline leaks into
/// the child environment.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: Vec<String>,
    workdir: PathBuf,
    artifact_paths: BTreeMap<String, PathBuf>,
    stdout_key: Option<String>,
}

impl CommandExecutor {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            workdir: workdir.into(),
            artifact_paths: BTreeMap::new(),
            stdout_key: None,
        }
    }

    /// Publish the file at `path` (relative to the workdir) as output `key`.
    ///
    /// Outputs without a path are published as a JSON capture of the
    /// command's exit code, stdout and stderr.
    pub fn artifact_path(mut self, key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.artifact_paths.insert(key.into(), path.into());
        self
    }

    /// Publish the command's trimmed stdout as the contents of output `key`,
    /// e.g. an image reference printed by `docker build -q`.
    pub fn stdout_artifact(mut self, key: impl Into<String>) -> Self {
        self.stdout_key = Some(key.into());
        self
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }
}

/// Captured result of one command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Exit code followed by the tool's own output, unmodified.
    pub fn detail(&self) -> String {
        let mut detail = format!("exit code {}", self.exit_code);
        for stream in [&self.stdout, &self.stderr] {
            if !stream.trim().is_empty() {
                detail.push('\n');
                detail.push_str(stream.trim_end());
            }
        }
        detail
    }
}

/// Environment handed to a stage's child process: run identity, inputs and credentials.
pub(crate) fn stage_env(ctx: &StageContext) -> Vec<(String, String)> {
    let mut env = vec![
        ("DRYDOCK_RUN_ID".to_string(), ctx.run_id.clone()),
        ("DRYDOCK_STAGE".to_string(), ctx.stage_name.clone()),
    ];
    for (key, artifact) in &ctx.inputs {
        env.push((
            format!("DRYDOCK_INPUT_{}", env_suffix(key)),
            artifact.payload.to_text(),
        ));
    }
    for credential in &ctx.credentials {
        env.push((
            format!("DRYDOCK_CREDENTIAL_{}", env_suffix(credential.name())),
            credential.expose().to_string(),
        ));
    }
    env
}

/// Spawn `command` in `workdir` with `env` added and wait for it to exit.
pub(crate) async fn run_command(
    command: &[String],
    workdir: &Path,
    env: &[(String, String)],
) -> anyhow::Result<CommandOutput> {
    let Some((exe, args)) = command.split_first() else {
        anyhow::bail!("empty command");
    };

    let mut cmd = Command::new(exe);
    cmd.args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    debug!(program = %exe, workdir = %workdir.display(), "Spawning command");
    let output = cmd
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to spawn '{}': {}", exe, e))?
        .wait_with_output()
        .await?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[async_trait]
impl StageExecutor for CommandExecutor {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageExecution> {
        if self.command.is_empty() {
            anyhow::bail!("Stage {} has empty command", ctx.stage_name);
        }
        let output = run_command(&self.command, &self.workdir, &stage_env(ctx)).await?;

        let mut execution = if output.success() {
            StageExecution::success(output.detail())
        } else {
            StageExecution::failure(output.detail())
        };

        for key in &ctx.outputs {
            if self.stdout_key.as_ref() == Some(key) {
                let text = output.stdout.trim();
                if !text.is_empty() {
                    execution = execution.with_artifact(key, Payload::Bytes(text.as_bytes().to_vec()));
                }
                continue;
            }
            match self.artifact_paths.get(key) {
                Some(path) => {
                    let path = self.resolve(path);
                    // A missing file is reported by the runner as an unmet output.
                    if path.exists() {
                        execution = execution.with_artifact(key, Payload::Path(path));
                    }
                }
                None => {
                    execution = execution.with_artifact(
                        key,
                        Payload::Report(json!({
                            "exit_code": output.exit_code,
                            "stdout": output.stdout,
                            "stderr": output.stderr,
                        })),
                    );
                }
            }
        }

        Ok(execution)
    }
}

/// Wall-clock limit around another executor. A timeout is a stage failure.
pub struct WithTimeout {
    inner: Arc<dyn StageExecutor>,
    limit: Duration,
}

impl WithTimeout {
    pub fn new(inner: Arc<dyn StageExecutor>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl StageExecutor for WithTimeout {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageExecution> {
        match tokio::time::timeout(self.limit, self.inner.execute(ctx)).await {
            Ok(result) => result,
            Err(_) => Ok(StageExecution::failure(format!(
                "Stage {} timed out after {} seconds",
                ctx.stage_name,
                self.limit.as_secs_f64()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;
    use crate::collab::CredentialHandle;
    use crate::stage::{FnExecutor, StageKind};

    fn ctx(outputs: &[&str]) -> StageContext {
        StageContext {
            run_id: "run-1".to_string(),
            stage_name: "unit".to_string(),
            kind: StageKind::UnitTest,
            inputs: Default::default(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            credentials: Vec::new(),
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let exec = CommandExecutor::new(vec!["echo".to_string(), "hello".to_string()], ".");
        let result = exec.execute(&ctx(&[])).await.expect("execute failed");
        assert!(result.success);
        assert!(result.detail.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let exec = CommandExecutor::new(vec!["false".to_string()], ".");
        let result = exec.execute(&ctx(&[])).await.expect("execute failed");
        assert!(!result.success);
        assert!(result.detail.starts_with("exit code"));
    }

    #[tokio::test]
    async fn test_spawn_error_is_err() {
        let exec = CommandExecutor::new(
            vec!["/nonexistent-binary-that-does-not-exist".to_string()],
            ".",
        );
        assert!(exec.execute(&ctx(&[])).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_command_is_err() {
        let exec = CommandExecutor::new(Vec::new(), ".");
        let err = exec.execute(&ctx(&[])).await.unwrap_err();
        assert!(err.to_string().contains("empty command"));
    }

    #[tokio::test]
    async fn test_inputs_and_credentials_in_env() {
        let exec = CommandExecutor::new(
            sh("printf '%s|%s' \"$DRYDOCK_INPUT_IMAGE_REF\" \"$DRYDOCK_CREDENTIAL_REGISTRY\""),
            ".",
        );
        let mut context = ctx(&[]);
        context.inputs.insert(
            "image-ref".to_string(),
            Artifact::new(Payload::Bytes(b"registry.local/app:1".to_vec())),
        );
        context
            .credentials
            .push(CredentialHandle::new("registry", "s3cret"));

        let result = exec.execute(&context).await.unwrap();
        assert!(result.success);
        assert!(result.detail.contains("registry.local/app:1|s3cret"));
    }

    #[tokio::test]
    async fn test_outputs_from_path_and_capture() {
        let dir = tempfile::tempdir().unwrap();
        let exec = CommandExecutor::new(sh("echo built > app.bin"), dir.path())
            .artifact_path("binary", "app.bin")
            .artifact_path("never-written", "missing.bin");

        let result = exec
            .execute(&ctx(&["binary", "build-log", "never-written"]))
            .await
            .unwrap();

        let keys: Vec<&str> = result.artifacts.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["binary", "build-log"]);
        assert_eq!(
            result.artifacts[0].1,
            Payload::Path(dir.path().join("app.bin"))
        );
        assert!(matches!(result.artifacts[1].1, Payload::Report(_)));
    }

    #[tokio::test]
    async fn test_stdout_artifact_carries_contents() {
        let exec = CommandExecutor::new(sh("echo 'sha256:abc123'"), ".").stdout_artifact("image-ref");
        let result = exec.execute(&ctx(&["image-ref"])).await.unwrap();
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].1.to_text(), "sha256:abc123");

        let silent = CommandExecutor::new(vec!["true".to_string()], ".").stdout_artifact("image-ref");
        let result = silent.execute(&ctx(&["image-ref"])).await.unwrap();
        assert!(result.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_reports_failure() {
        let slow = CommandExecutor::new(vec!["sleep".to_string(), "5".to_string()], ".");
        let exec = WithTimeout::new(Arc::new(slow), Duration::from_millis(100));
        let result = exec.execute(&ctx(&[])).await.unwrap();
        assert!(!result.success);
        assert!(result.detail.contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_passes_through_fast_result() {
        let fast = FnExecutor::new(|_: &StageContext| Ok(StageExecution::success("quick")));
        let exec = WithTimeout::new(Arc::new(fast), Duration::from_secs(5));
        let result = exec.execute(&ctx(&[])).await.unwrap();
        assert!(result.success);
        assert_eq!(result.detail, "quick");
    }
}
