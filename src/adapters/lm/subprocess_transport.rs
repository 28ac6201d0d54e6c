//! Subprocess-backed `LmTransport`. Spawns the configured LM CLI once per
//! stage invocation and streams its stdout line-by-line; the LM is expected
//! to perform filesystem edits in the given `cwd` as a side effect via tool
//! use (spec §4.3). Retries transient spawn failures with exponential
//! backoff, mirroring the teacher's Claude client retry policy.

use futures::stream::{self, BoxStream, StreamExt};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::domain::ports::lm_transport::{LmTransport, LmTransportError, PermissionMode, StreamOptions, TextChunk};

/// Backoff policy for transient spawn failures, matching the teacher's
/// retry shape: exponential, capped, bounded attempt count.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, initial_backoff: Duration::from_secs(2), max_backoff: Duration::from_secs(30) }
    }
}

pub struct SubprocessLmTransport {
    executable: String,
    retry_policy: RetryPolicy,
}

impl SubprocessLmTransport {
    pub fn new(executable: impl Into<String>) -> Self {
        Self { executable: executable.into(), retry_policy: RetryPolicy::default() }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn build_command(&self, options: &StreamOptions) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("--print")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--model")
            .arg(&options.model)
            .arg("--max-turns")
            .arg(options.max_turns.to_string())
            .arg("--permission-mode")
            .arg(match options.permission_mode {
                PermissionMode::BypassPermissions => "bypassPermissions",
            })
            .arg(&options.prompt)
            .current_dir(&options.cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());
        cmd
    }

    async fn spawn_with_retry(&self, options: &StreamOptions) -> Result<Child, LmTransportError> {
        let mut attempt = 0;
        let mut backoff = self.retry_policy.initial_backoff;
        loop {
            match self.build_command(options).spawn() {
                Ok(child) => return Ok(child),
                Err(e) if attempt < self.retry_policy.max_retries => {
                    tracing::warn!(attempt, error = %e, "lm transport spawn failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.retry_policy.max_backoff);
                    attempt += 1;
                }
                Err(e) => return Err(LmTransportError::Spawn(e.to_string())),
            }
        }
    }
}

#[async_trait::async_trait]
impl LmTransport for SubprocessLmTransport {
    async fn stream_completion(&self, options: StreamOptions) -> BoxStream<'static, TextChunk> {
        let child = match self.spawn_with_retry(&options).await {
            Ok(child) => child,
            Err(e) => return stream::iter(vec![Err(e)]).boxed(),
        };
        line_stream(child).boxed()
    }
}

fn line_stream(mut child: Child) -> BoxStream<'static, TextChunk> {
    let stdout = match child.stdout.take() {
        Some(s) => s,
        None => return stream::iter(vec![Err(LmTransportError::Spawn("no stdout handle".to_string()))]).boxed(),
    };
    let reader = BufReader::new(stdout).lines();

    stream::unfold((reader, Some(child)), |(mut reader, mut child)| async move {
        match reader.next_line().await {
            Ok(Some(line)) => Some((Ok(line), (reader, child))),
            Ok(None) => {
                if let Some(mut c) = child.take() {
                    let status = c.wait().await;
                    if let Ok(status) = status {
                        if !status.success() {
                            return Some((Err(LmTransportError::NonZeroExit(status.code().unwrap_or(-1))), (reader, None)));
                        }
                    }
                }
                None
            }
            Err(e) => Some((Err(LmTransportError::Decode(e.to_string())), (reader, child.take()))),
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn streams_lines_from_echo() {
        let transport = SubprocessLmTransport::new("/bin/sh");
        // Exercise the command-building path without depending on a real
        // LM binary: point at /bin/sh and just check spawn/backoff wiring.
        let options = StreamOptions {
            prompt: "-c".to_string(),
            model: "irrelevant".to_string(),
            cwd: "/tmp".to_string(),
            permission_mode: PermissionMode::BypassPermissions,
            max_turns: 1,
        };
        let mut stream = transport.stream_completion(options).await;
        // /bin/sh will reject the synthesized flags; we only assert the
        // stream terminates rather than hangs.
        let _ = stream.next().await;
    }
}
