//! LM Stage Runner (spec §4.3): drives one stage's LM invocation through
//! `LmTransport`, accumulating its streamed text and enforcing the
//! per-stage turn budget and overall timeout. Never shells out directly;
//! that is the transport's job.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Stage;
use crate::domain::ports::lm_transport::{LmTransport, PermissionMode, StreamOptions};
use crate::infrastructure::config::LmStageRunnerConfig;

pub struct LmStageRunner {
    transport: Arc<dyn LmTransport>,
    config: LmStageRunnerConfig,
}

impl LmStageRunner {
    pub fn new(transport: Arc<dyn LmTransport>, config: LmStageRunnerConfig) -> Self {
        Self { transport, config }
    }

    /// RED/GREEN get the larger budget; VERIFY/RE_VERIFY run no-edit
    /// tooling passes and need far fewer turns (spec §4.3).
    fn max_turns(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Verify | Stage::ReVerify => self.config.verify_max_turns,
            _ => self.config.red_green_max_turns,
        }
    }

    #[tracing::instrument(skip(self, prompt), fields(stage = stage.as_str(), model))]
    pub async fn run(
        &self,
        stage: Stage,
        prompt: String,
        model: String,
        cwd: String,
        timeout: Option<Duration>,
    ) -> DomainResult<String> {
        let options = StreamOptions {
            prompt,
            model,
            cwd,
            permission_mode: PermissionMode::BypassPermissions,
            max_turns: self.max_turns(stage),
        };
        let budget = timeout.unwrap_or_else(|| Duration::from_secs(self.config.default_timeout_secs));

        let accumulate = async {
            let mut stream = self.transport.stream_completion(options).await;
            let mut accumulated = String::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(text) => accumulated.push_str(&text),
                    Err(err) => return Err(DomainError::LmTransportError(err.to_string())),
                }
            }
            Ok(accumulated)
        };

        match tokio::time::timeout(budget, accumulate).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::StageTimeout(budget.as_secs())),
        }
    }
}
