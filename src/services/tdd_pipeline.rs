//! TDD Pipeline (spec §4.5): the per-task state machine. Owns sequencing
//! of prompt assembly, LM invocation, and stage verification; delegates
//! persistence to the store and breaker state to `CircuitBreakerService`.
//!
//! One `TddPipeline::run` call drives exactly one task from its current
//! stage through to a terminal `ReleaseOutcome`. Stages within a task run
//! strictly sequentially (spec §5 "Ordering").

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::verifier::tool_resolver::ToolResolver;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Attempt, Complexity, CircuitLevel, Stage, Task, TaskType, ToolExitCodes};
use crate::domain::ports::{TaskStore, VerifierTools};
use crate::domain::ports::task_store::ReleaseOutcome;
use crate::services::lm_stage_runner::LmStageRunner;
use crate::services::prompt_builder::{build_prompt, extract_sibling_context, SiblingContext, SiblingTestFile};
use crate::services::stage_verifier::StageVerifier;
use crate::services::circuit_breaker::CircuitBreakerService;
use crate::services::verify_command::run_verify_command;
use crate::adapters::verifier::ast_heuristics::check_needs_refactor;

const MAX_GREEN_ATTEMPTS: u32 = 3;
const TEST_ROOTS: &[&str] = &["tests/unit", "tests/integration", "tests"];

fn model_for_complexity(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Low => "haiku",
        Complexity::Medium => "sonnet",
        Complexity::High => "opus",
    }
}

/// Outcome of one `TddPipeline::run` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub release: ReleaseOutcome,
    pub reason: Option<String>,
}

pub struct TddPipeline {
    store: Arc<dyn TaskStore>,
    lm_runner: Arc<LmStageRunner>,
    tools: Arc<dyn VerifierTools>,
    breakers: Arc<CircuitBreakerService>,
    tool_resolver: ToolResolver,
}

impl TddPipeline {
    pub fn new(
        store: Arc<dyn TaskStore>,
        lm_runner: Arc<LmStageRunner>,
        tools: Arc<dyn VerifierTools>,
        breakers: Arc<CircuitBreakerService>,
        tool_resolver: ToolResolver,
    ) -> Self {
        Self { store, lm_runner, tools, breakers, tool_resolver }
    }

    #[tracing::instrument(skip(self, task), fields(task_key = %task.key))]
    pub async fn run(&self, mut task: Task, cwd: &str) -> DomainResult<PipelineOutcome> {
        let result = if task.task_type == TaskType::VerifyOnly {
            self.run_verify_only(&mut task, cwd).await
        } else {
            self.run_implement(&mut task, cwd).await
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(DomainError::StaticReviewBlocked) => {
                Ok(PipelineOutcome { release: ReleaseOutcome::BlockedStaticReview, reason: Some("static review circuit open".to_string()) })
            }
            Err(err) if is_fatal_to_task(&err) => {
                Ok(PipelineOutcome { release: ReleaseOutcome::Blocked, reason: Some(err.to_string()) })
            }
            Err(err) => Err(err),
        }
    }

    async fn run_implement(&self, task: &mut Task, cwd: &str) -> DomainResult<PipelineOutcome> {
        self.run_red(task, cwd).await?;
        self.run_green_loop(task, cwd).await?;
        let verify_outcome = self.run_verify_cycle(task, cwd, Stage::Verify).await?;
        if !verify_outcome {
            return Ok(PipelineOutcome { release: ReleaseOutcome::Blocked, reason: Some("verify did not pass after fix".to_string()) });
        }
        self.run_refactor_gate(task, cwd).await?;
        self.post_verify_checks(task, cwd).await;
        Ok(PipelineOutcome { release: ReleaseOutcome::Complete, reason: None })
    }

    async fn run_verify_only(&self, task: &mut Task, cwd: &str) -> DomainResult<PipelineOutcome> {
        let verify_outcome = self.run_verify_cycle(task, cwd, Stage::Verify).await?;
        if !verify_outcome {
            return Ok(PipelineOutcome { release: ReleaseOutcome::Blocked, reason: Some("verify-only task failed verification".to_string()) });
        }
        self.post_verify_checks(task, cwd).await;
        Ok(PipelineOutcome { release: ReleaseOutcome::Complete, reason: None })
    }

    async fn run_red(&self, task: &mut Task, cwd: &str) -> DomainResult<()> {
        self.require_breaker(CircuitLevel::Stage, "red").await?;
        let siblings = self.sibling_context(task, cwd).await;
        let prompt = build_prompt(Stage::Red, task, &siblings, None);
        self.lm_runner
            .run(Stage::Red, prompt, model_for_complexity(task.complexity).to_string(), cwd.to_string(), None)
            .await?;

        if !Path::new(cwd).join(&task.test_file).exists() {
            if let Some(discovered) = self.discover_test_file(task, cwd).await {
                self.store.update_task_fields(task.id, Some(&discovered)).await?;
                task.test_file = discovered;
            }
        }

        let verifier = StageVerifier::new(self.tools.as_ref());
        let outcome = verifier.verify(Stage::Red, task, cwd).await?;
        self.record_attempt(task, Stage::Red, outcome.success, outcome.detail.clone(), outcome.exit_codes.clone()).await?;
        if outcome.pre_implemented {
            self.breakers.report_success(CircuitLevel::Stage, "red").await?;
            return Ok(());
        }
        if !outcome.success {
            self.breakers.report_failure(CircuitLevel::Stage, "red", "red stage did not produce a failing test").await?;
            return self.run_static_review_then_red_fix(task, cwd).await;
        }
        self.breakers.report_success(CircuitLevel::Stage, "red").await?;
        self.run_static_review(task, cwd).await
    }

    /// Static review gate between RED and GREEN (spec §4.4): lint + AST
    /// quality checks on `test_file`. On violation, consult the
    /// static-review breaker; if open, the task is blocked for review.
    async fn run_static_review(&self, task: &mut Task, cwd: &str) -> DomainResult<()> {
        let lint = self.tools.run_linter(&task.test_file, cwd).await?;
        let ast_violations = self.tools.check_ast(&task.test_file).await?;
        let blocking = ast_violations.iter().any(|v| v.is_blocking());

        if lint.passed() && !blocking {
            self.breakers.report_success(CircuitLevel::Stage, "static-review").await?;
            return Ok(());
        }

        let allows = self.breakers.allows(CircuitLevel::Stage, "static-review").await?;
        if !allows {
            return Err(DomainError::StaticReviewBlocked);
        }
        self.breakers.report_failure(CircuitLevel::Stage, "static-review", "lint/ast violation on test_file").await?;
        self.run_static_review_then_red_fix(task, cwd).await
    }

    async fn run_static_review_then_red_fix(&self, task: &mut Task, cwd: &str) -> DomainResult<()> {
        self.require_breaker(CircuitLevel::Stage, "red").await?;
        let siblings = self.sibling_context(task, cwd).await;
        let prompt = build_prompt(Stage::RedFix, task, &siblings, None);
        self.lm_runner
            .run(Stage::RedFix, prompt, model_for_complexity(task.complexity).to_string(), cwd.to_string(), None)
            .await?;

        let verifier = StageVerifier::new(self.tools.as_ref());
        let outcome = verifier.verify(Stage::RedFix, task, cwd).await?;
        self.record_attempt(task, Stage::RedFix, outcome.success, outcome.detail.clone(), outcome.exit_codes.clone()).await?;
        if !outcome.success {
            self.breakers.report_failure(CircuitLevel::Stage, "red", "red_fix did not recover").await?;
            return Err(DomainError::FileMissing(task.test_file.clone()));
        }
        self.breakers.report_success(CircuitLevel::Stage, "red").await?;
        self.run_static_review(task, cwd).await
    }

    async fn run_green_loop(&self, task: &mut Task, cwd: &str) -> DomainResult<()> {
        let mut last_failure: Option<String> = None;
        for attempt in 1..=MAX_GREEN_ATTEMPTS {
            self.require_breaker(CircuitLevel::Stage, "green").await?;
            let complexity = (0..attempt - 1).fold(task.complexity, |c, _| c.escalate());
            let siblings = self.sibling_context(task, cwd).await;
            let prompt = build_prompt(Stage::Green, task, &siblings, last_failure.as_deref());

            self.lm_runner
                .run(Stage::Green, prompt, model_for_complexity(complexity).to_string(), cwd.to_string(), None)
                .await?;

            let verifier = StageVerifier::new(self.tools.as_ref());
            let outcome = verifier.verify(Stage::Green, task, cwd).await?;
            self.record_attempt(task, Stage::Green, outcome.success, outcome.detail.clone(), outcome.exit_codes.clone()).await?;
            if outcome.success {
                self.breakers.report_success(CircuitLevel::Stage, "green").await?;
                return Ok(());
            }
            self.breakers.report_failure(CircuitLevel::Stage, "green", "green attempt failed").await?;
            last_failure = outcome.detail;
        }
        Err(DomainError::GreenRetriesExhausted(MAX_GREEN_ATTEMPTS))
    }

    /// Runs one VERIFY attempt; on failure runs FIX -> RE_VERIFY once.
    /// Returns whether the task is now passing.
    async fn run_verify_cycle(&self, task: &mut Task, cwd: &str, first_stage: Stage) -> DomainResult<bool> {
        self.require_breaker(CircuitLevel::Stage, "verify").await?;
        let verifier = StageVerifier::new(self.tools.as_ref());
        let outcome = verifier.verify(first_stage, task, cwd).await?;
        self.record_attempt(task, first_stage, outcome.success, outcome.detail.clone(), outcome.exit_codes.clone()).await?;
        if outcome.success {
            self.breakers.report_success(CircuitLevel::Stage, "verify").await?;
            return Ok(true);
        }
        self.breakers.report_failure(CircuitLevel::Stage, "verify", "verify failed").await?;

        self.require_breaker(CircuitLevel::Stage, "fix").await?;
        let siblings = self.sibling_context(task, cwd).await;
        let prompt = build_prompt(Stage::Fix, task, &siblings, outcome.detail.as_deref());
        self.lm_runner
            .run(Stage::Fix, prompt, model_for_complexity(task.complexity.escalate()).to_string(), cwd.to_string(), None)
            .await?;

        let re_verify = verifier.verify(Stage::ReVerify, task, cwd).await?;
        self.record_attempt(task, Stage::ReVerify, re_verify.success, re_verify.detail.clone(), re_verify.exit_codes.clone()).await?;
        if re_verify.success {
            self.breakers.report_success(CircuitLevel::Stage, "verify").await?;
            Ok(true)
        } else {
            self.breakers.report_failure(CircuitLevel::Stage, "verify", "re_verify failed after fix").await?;
            Ok(false)
        }
    }

    async fn run_refactor_gate(&self, task: &mut Task, cwd: &str) -> DomainResult<()> {
        let path = Path::new(cwd).join(&task.impl_file);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        let reasons = check_needs_refactor(&task.impl_file, &contents);
        if reasons.is_empty() {
            return Ok(());
        }
        tracing::info!(task_key = %task.key, reasons = ?reasons, "refactor gate triggered");

        self.require_breaker(CircuitLevel::Stage, "refactor").await?;
        let siblings = self.sibling_context(task, cwd).await;
        let refactor_prompt = build_prompt(Stage::Refactor, task, &siblings, Some(&reasons.join("; ")));
        self.lm_runner
            .run(Stage::Refactor, refactor_prompt, model_for_complexity(Complexity::High).to_string(), cwd.to_string(), None)
            .await?;

        let passed = self.run_verify_cycle(task, cwd, Stage::ReVerify).await?;
        if !passed {
            return Err(DomainError::PostRefactorFixFailed);
        }
        self.breakers.report_success(CircuitLevel::Stage, "refactor").await?;
        Ok(())
    }

    /// Log-only terminal checks: `verify_command` and done-criteria
    /// heuristics never block task completion (spec §4.5).
    async fn post_verify_checks(&self, task: &Task, cwd: &str) {
        if let Some(command) = &task.verify_command {
            match run_verify_command(command, cwd, &self.tool_resolver).await {
                Ok(result) if result.exit_code == 0 => {
                    tracing::info!(task_key = %task.key, "post_verify verify_command passed");
                }
                Ok(result) => {
                    tracing::warn!(task_key = %task.key, exit_code = result.exit_code, "post_verify verify_command failed");
                }
                Err(err) => {
                    tracing::warn!(task_key = %task.key, error = %err, "post_verify verify_command could not run");
                }
            }
        }
    }

    async fn record_attempt(
        &self,
        task: &Task,
        stage: Stage,
        success: bool,
        error_message: Option<String>,
        exit_codes: ToolExitCodes,
    ) -> DomainResult<()> {
        let attempt_number = self.store.next_attempt_number(task.id, stage).await?;
        let mut attempt = Attempt::start(task.id, stage, attempt_number).with_exit_codes(exit_codes);
        attempt.success = success;
        attempt.error_message = error_message;
        attempt.completed_at = Some(chrono::Utc::now());
        self.store.record_stage_attempt(attempt).await?;
        Ok(())
    }

    async fn require_breaker(&self, level: CircuitLevel, identifier: &str) -> DomainResult<()> {
        if self.breakers.allows(level, identifier).await? {
            Ok(())
        } else {
            Err(DomainError::CircuitOpen { level: level.as_str().to_string(), identifier: identifier.to_string() })
        }
    }

    async fn sibling_context(&self, task: &Task, cwd: &str) -> SiblingContext {
        let Ok(all) = self.store.all_tasks().await else {
            return SiblingContext::default();
        };
        let mut files = Vec::new();
        let mut contents_store = Vec::new();
        for sibling in all.iter().filter(|t| {
            t.impl_file == task.impl_file && t.key != task.key && t.status == crate::domain::models::TaskStatus::Complete
        }) {
            if let Ok(contents) = tokio::fs::read_to_string(Path::new(cwd).join(&sibling.test_file)).await {
                contents_store.push((sibling.test_file.clone(), contents));
            }
        }
        for (path, contents) in &contents_store {
            files.push(SiblingTestFile { path, contents });
        }
        extract_sibling_context(&files)
    }

    /// Post-RED file discovery (spec §4.6): search parent-first under
    /// `impl_file`'s parent directory, then conventional test roots, for a
    /// file the LM may have created at a path other than `task.test_file`.
    async fn discover_test_file(&self, task: &Task, cwd: &str) -> Option<String> {
        let stem = Path::new(&task.impl_file).file_stem()?.to_str()?.to_string();
        let candidates = [format!("test_{stem}.py"), format!("{stem}_test.py")];

        let mut search_dirs = Vec::new();
        if let Some(parent) = Path::new(&task.impl_file).parent() {
            search_dirs.push(parent.to_path_buf());
        }
        for root in TEST_ROOTS {
            search_dirs.push(Path::new(root).to_path_buf());
        }

        for dir in search_dirs {
            for candidate in &candidates {
                let full = Path::new(cwd).join(&dir).join(candidate);
                if full.exists() {
                    return Some(dir.join(candidate).to_string_lossy().replace('\\', "/"));
                }
            }
        }
        None
    }
}

fn is_fatal_to_task(err: &DomainError) -> bool {
    matches!(
        err,
        DomainError::FileMissing(_)
            | DomainError::GreenRetriesExhausted(_)
            | DomainError::PostRefactorFixFailed
            | DomainError::VerifierToolMissing(_)
    )
}
