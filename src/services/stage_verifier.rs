//! Stage Verifier (spec §4.4): decides whether a stage succeeded by
//! consulting the workspace and `VerifierTools`. A thin decision layer —
//! the actual test/lint/type/AST execution lives in the `VerifierTools`
//! implementation.

use std::path::Path;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Stage, Task, ToolExitCodes};
use crate::domain::ports::VerifierTools;

/// Outcome of verifying one stage.
#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
    pub success: bool,
    /// RED short-circuit: tests already pass and `impl_file` exists
    /// (spec §4.4, "pre-implemented").
    pub pre_implemented: bool,
    pub exit_codes: ToolExitCodes,
    pub detail: Option<String>,
}

impl StageOutcome {
    fn ok() -> Self {
        Self { success: true, ..Default::default() }
    }

    fn fail(detail: impl Into<String>) -> Self {
        Self { success: false, detail: Some(detail.into()), ..Default::default() }
    }
}

fn is_python(path: &str) -> bool {
    path.ends_with(".py")
}

pub struct StageVerifier<'a> {
    tools: &'a dyn VerifierTools,
}

impl<'a> StageVerifier<'a> {
    pub fn new(tools: &'a dyn VerifierTools) -> Self {
        Self { tools }
    }

    /// Verify `stage` for `task` against the workspace rooted at `cwd`.
    #[tracing::instrument(skip(self, task), fields(task_key = %task.key, stage = stage.as_str()))]
    pub async fn verify(&self, stage: Stage, task: &Task, cwd: &str) -> DomainResult<StageOutcome> {
        match stage {
            Stage::Red | Stage::RedFix => self.verify_red(task, cwd).await,
            Stage::Green => self.verify_green(task, cwd).await,
            Stage::Verify | Stage::ReVerify => self.verify_full(task, cwd).await,
            Stage::Fix | Stage::Refactor | Stage::Review | Stage::Commit => Ok(StageOutcome::ok()),
        }
    }

    async fn verify_red(&self, task: &Task, cwd: &str) -> DomainResult<StageOutcome> {
        if task.test_file.is_empty() {
            return Err(DomainError::FileMissing(task.test_file.clone()));
        }
        let full_path = Path::new(cwd).join(&task.test_file);
        if !full_path.exists() {
            return Err(DomainError::FileMissing(task.test_file.clone()));
        }

        let run = self.tools.run_tests(&[task.test_file.clone()], cwd, std::time::Duration::from_secs(300)).await?;
        let impl_exists = !task.impl_file.is_empty() && Path::new(cwd).join(&task.impl_file).exists();

        if run.passed() && impl_exists {
            return Ok(StageOutcome { success: true, pre_implemented: true, ..Default::default() });
        }
        if run.passed() {
            // All green with no implementation yet: the test doesn't fail
            // for the right reason.
            return Ok(StageOutcome::fail("test file passed with no implementation present"));
        }
        Ok(StageOutcome { success: !run.failures.is_empty() || !run.passed(), ..Default::default() })
    }

    async fn verify_green(&self, task: &Task, cwd: &str) -> DomainResult<StageOutcome> {
        let run = self.tools.run_tests(&[task.test_file.clone()], cwd, std::time::Duration::from_secs(300)).await?;
        if run.passed() {
            Ok(StageOutcome {
                success: true,
                exit_codes: ToolExitCodes { test_exit_code: Some(run.exit_code), ..Default::default() },
                ..Default::default()
            })
        } else {
            Ok(StageOutcome {
                success: false,
                exit_codes: ToolExitCodes { test_exit_code: Some(run.exit_code), ..Default::default() },
                detail: Some(run.failures.join("; ")),
            })
        }
    }

    async fn verify_full(&self, task: &Task, cwd: &str) -> DomainResult<StageOutcome> {
        let test_result = self.tools.run_tests(&[task.test_file.clone()], cwd, std::time::Duration::from_secs(300)).await?;

        if !is_python(&task.impl_file) {
            return Ok(StageOutcome {
                success: test_result.passed(),
                exit_codes: ToolExitCodes { test_exit_code: Some(test_result.exit_code), ..Default::default() },
                detail: if test_result.passed() { None } else { Some(test_result.failures.join("; ")) },
            });
        }

        let (lint_result, type_result, ast_violations) = tokio::try_join!(
            self.tools.run_linter(&task.impl_file, cwd),
            self.tools.run_type_checker(&task.impl_file, cwd),
            self.tools.check_ast(&task.impl_file),
        )?;

        let blocking_ast = ast_violations.iter().any(|v| v.is_blocking());
        let success = test_result.passed() && lint_result.passed() && type_result.passed() && !blocking_ast;

        let mut reasons = Vec::new();
        if !test_result.passed() {
            reasons.push(format!("tests failed: {}", test_result.failures.join("; ")));
        }
        if !lint_result.passed() {
            reasons.push("lint failed".to_string());
        }
        if !type_result.passed() {
            reasons.push("type check failed".to_string());
        }
        if blocking_ast {
            reasons.push("ast quality check failed".to_string());
        }

        Ok(StageOutcome {
            success,
            exit_codes: ToolExitCodes {
                test_exit_code: Some(test_result.exit_code),
                lint_exit_code: Some(lint_result.exit_code),
                type_exit_code: Some(type_result.exit_code),
            },
            detail: if reasons.is_empty() { None } else { Some(reasons.join("; ")) },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AstViolation;
    use crate::domain::ports::verifier_tools::{LintResult, TestRunResult, TypeCheckResult};
    use async_trait::async_trait;

    struct FakeTools {
        tests_pass: bool,
        lint_pass: bool,
        type_pass: bool,
        ast_blocking: bool,
    }

    #[async_trait]
    impl VerifierTools for FakeTools {
        async fn run_tests(&self, _files: &[String], _cwd: &str, _timeout: std::time::Duration) -> DomainResult<TestRunResult> {
            Ok(TestRunResult {
                exit_code: if self.tests_pass { 0 } else { 1 },
                failures: if self.tests_pass { vec![] } else { vec!["test_x failed".to_string()] },
                ..Default::default()
            })
        }
        async fn run_linter(&self, _file: &str, _cwd: &str) -> DomainResult<LintResult> {
            Ok(LintResult { exit_code: if self.lint_pass { 0 } else { 1 }, ..Default::default() })
        }
        async fn run_type_checker(&self, _file: &str, _cwd: &str) -> DomainResult<TypeCheckResult> {
            Ok(TypeCheckResult { exit_code: if self.type_pass { 0 } else { 1 }, ..Default::default() })
        }
        async fn check_ast(&self, file: &str) -> DomainResult<Vec<AstViolation>> {
            if self.ast_blocking {
                Ok(vec![AstViolation::new(crate::domain::models::Severity::Error, "stub-detected", file, 1, "stub")])
            } else {
                Ok(vec![])
            }
        }
    }

    fn task_with_files() -> Task {
        Task::new("K-1", "t", "g").with_files("tests/test_k.py", "src/k.py")
    }

    #[tokio::test]
    async fn green_succeeds_when_tests_pass() {
        let tools = FakeTools { tests_pass: true, lint_pass: true, type_pass: true, ast_blocking: false };
        let verifier = StageVerifier::new(&tools);
        let outcome = verifier.verify(Stage::Green, &task_with_files(), "/tmp").await.unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn verify_fails_when_ast_check_blocks() {
        let tools = FakeTools { tests_pass: true, lint_pass: true, type_pass: true, ast_blocking: true };
        let verifier = StageVerifier::new(&tools);
        let outcome = verifier.verify(Stage::Verify, &task_with_files(), "/tmp").await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.detail.unwrap().contains("ast quality"));
    }

    #[tokio::test]
    async fn verify_skips_lint_and_type_for_non_python_impl() {
        let tools = FakeTools { tests_pass: true, lint_pass: false, type_pass: false, ast_blocking: true };
        let verifier = StageVerifier::new(&tools);
        let task = Task::new("K-2", "t", "g").with_files("tests/test_k.rs", "src/k.rs");
        let outcome = verifier.verify(Stage::Verify, &task, "/tmp").await.unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn fix_and_refactor_are_trivially_successful() {
        let tools = FakeTools { tests_pass: false, lint_pass: false, type_pass: false, ast_blocking: true };
        let verifier = StageVerifier::new(&tools);
        let outcome = verifier.verify(Stage::Fix, &task_with_files(), "/tmp").await.unwrap();
        assert!(outcome.success);
    }
}
