//! LM Transport port (spec §4.3, §6): streams a single stage's LM output.
//! The core never constructs shell commands to invoke the LM; transports
//! are the only code that shells out or opens a network connection.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Closed option set the core is allowed to pass to a transport (spec §6
/// "options is a closed set").
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub prompt: String,
    pub model: String,
    pub cwd: String,
    pub permission_mode: PermissionMode,
    pub max_turns: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    BypassPermissions,
}

#[derive(Debug, Error)]
pub enum LmTransportError {
    #[error("transport process failed to start: {0}")]
    Spawn(String),
    #[error("stream chunk decode error: {0}")]
    Decode(String),
    #[error("transport timed out")]
    Timeout,
    #[error("transport exited with non-zero status: {0}")]
    NonZeroExit(i32),
}

pub type TextChunk = Result<String, LmTransportError>;

#[async_trait]
pub trait LmTransport: Send + Sync {
    /// Streams text chunks for a single stage invocation. The LM performs
    /// filesystem edits in `options.cwd` as a side effect via tool use;
    /// the returned stream carries only its accumulated text output.
    async fn stream_completion(&self, options: StreamOptions) -> BoxStream<'static, TextChunk>;
}
