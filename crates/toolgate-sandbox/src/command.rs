use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, instrument, warn};

use crate::{OverrideEnvelope, OverrideRequest, OverrideRunner};

/// Runs override scripts through an external sandbox binary.
///
/// The request is written to the child's stdin as one JSON document and the
/// child must print a single [`OverrideEnvelope`] on stdout. The environment
/// is cleared and the child is killed once `limits.max_duration_ms` elapses.
#[derive(Debug, Clone)]
pub struct CommandOverrideRunner {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub max_output_bytes: usize,
}

impl CommandOverrideRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            max_output_bytes: 64 * 1024,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn truncate(mut output: Vec<u8>, max_output_bytes: usize) -> String {
        if output.len() > max_output_bytes {
            output.truncate(max_output_bytes);
        }
        String::from_utf8_lossy(&output).into_owned()
    }
}

#[async_trait]
impl OverrideRunner for CommandOverrideRunner {
    #[instrument(
        skip(self, request),
        fields(
            program = %self.program.display(),
            tool = %request.input.tool,
            cache_key = %request.cache_key
        )
    )]
    async fn run(&self, request: OverrideRequest) -> Result<OverrideEnvelope> {
        let payload = serde_json::to_vec(&request).context("failed to encode override request")?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&request.input.workspace.path)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;
        let stdin = child.stdin.take();
        // Feed stdin while draining stdout so neither pipe can stall the child.
        let exchange = async move {
            let feed = async {
                if let Some(mut stdin) = stdin
                    && let Err(error) = stdin.write_all(&payload).await
                {
                    debug!(%error, "override sandbox stopped reading its request");
                }
            };
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        let limit = Duration::from_millis(request.limits.max_duration_ms.max(1));
        let output = match timeout(limit, exchange).await {
            Ok(output) => output.context("override sandbox did not exit cleanly")?,
            Err(_) => {
                warn!(
                    max_duration_ms = request.limits.max_duration_ms,
                    "override sandbox timed out"
                );
                bail!(
                    "override sandbox timeout after {}ms",
                    request.limits.max_duration_ms
                );
            }
        };

        if !output.status.success() {
            let stderr = Self::truncate(output.stderr, self.max_output_bytes);
            bail!(
                "override sandbox exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let stdout = Self::truncate(output.stdout, self.max_output_bytes);
        let envelope: OverrideEnvelope = serde_json::from_str(stdout.trim())
            .context("override sandbox printed an invalid envelope")?;
        debug!(
            status = match envelope {
                OverrideEnvelope::Success { .. } => "success",
                OverrideEnvelope::Failure { .. } => "failure",
            },
            "override sandbox finished"
        );
        Ok(envelope)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        OverrideDecision, OverrideInput, OverrideLimits, OverrideVerdict, WorkspaceSnapshot,
    };
    use serde_json::json;
    use toolgate_protocol::Workspace;

    fn request(max_duration_ms: u64) -> OverrideRequest {
        let workspace = Workspace::new("ws-cmd", std::env::temp_dir());
        OverrideRequest {
            source: "\"deny\"".into(),
            input: OverrideInput {
                tool: "run_command".into(),
                params: json!({"command": "ls"}),
                gateway_context: None,
                workspace: WorkspaceSnapshot::from(&workspace),
                timestamp_ms: 0,
            },
            limits: OverrideLimits {
                max_duration_ms,
                ..OverrideLimits::default()
            },
            cache_key: "abc".into(),
        }
    }

    fn shell(script: &str) -> CommandOverrideRunner {
        CommandOverrideRunner::new("/bin/sh")
            .with_args(["-c", script])
            .with_env("PATH", "/usr/bin:/bin")
    }

    #[tokio::test]
    async fn parses_success_envelope_from_stdout() -> Result<()> {
        let runner = shell(
            r#"cat > /dev/null; echo '{"status":"success","output":{"decision":"deny","reason":"sandboxed"}}'"#,
        );
        let OverrideEnvelope::Success { output } = runner.run(request(2_000)).await? else {
            bail!("expected a success envelope");
        };
        let decision = OverrideDecision::from_output(&output);
        assert_eq!(decision.decision, OverrideVerdict::Deny);
        assert_eq!(decision.reason.as_deref(), Some("sandboxed"));
        Ok(())
    }

    #[tokio::test]
    async fn request_is_written_to_stdin() -> Result<()> {
        // Echo the tool name back as the reason.
        let runner = shell(
            r#"tool=$(cat | sed 's/.*"tool":"\([a-z_]*\)".*/\1/'); printf '{"status":"success","output":{"decision":"pass","reason":"%s"}}' "$tool""#,
        );
        let OverrideEnvelope::Success { output } = runner.run(request(2_000)).await? else {
            bail!("expected a success envelope");
        };
        assert_eq!(output["reason"], "run_command");
        Ok(())
    }

    #[tokio::test]
    async fn timeout_is_an_error() {
        let runner = shell("cat > /dev/null; sleep 5");
        let error = runner.run(request(50)).await.unwrap_err();
        assert!(error.to_string().contains("timeout after 50ms"));
    }

    #[tokio::test]
    async fn deadline_covers_a_child_that_never_reads_stdin() {
        let mut oversized = request(50);
        oversized.source = "x".repeat(512 * 1024);
        let runner = shell("sleep 3");

        let started = std::time::Instant::now();
        let error = runner.run(oversized).await.unwrap_err();
        assert!(error.to_string().contains("timeout after 50ms"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn large_output_does_not_block_the_request_write() -> Result<()> {
        let mut oversized = request(2_000);
        oversized.source = "x".repeat(512 * 1024);
        // Fill stderr past the pipe buffer before reading any input.
        let runner = shell(
            r#"yes filler | head -c 200000 >&2; cat > /dev/null; echo '{"status":"success","output":"pass"}'"#,
        );
        let envelope = runner.run(oversized).await?;
        assert_eq!(envelope, OverrideEnvelope::Success { output: json!("pass") });
        Ok(())
    }

    #[tokio::test]
    async fn nonzero_exit_and_garbage_are_errors() {
        let failed = shell("cat > /dev/null; echo boom >&2; exit 3")
            .run(request(2_000))
            .await
            .unwrap_err();
        assert!(failed.to_string().contains("exited with 3: boom"));

        let garbage = shell("cat > /dev/null; echo not-json")
            .run(request(2_000))
            .await
            .unwrap_err();
        assert!(garbage.to_string().contains("invalid envelope"));
    }
}
