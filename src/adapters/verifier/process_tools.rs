//! Subprocess-backed `VerifierTools` implementation. Shells out to the
//! resolved pytest/ruff/mypy binaries via direct argv invocation — never a
//! shell — mirroring the teacher's overseer process-invocation pattern.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use crate::adapters::verifier::ast_heuristics::check_ast as heuristic_check_ast;
use crate::adapters::verifier::tool_resolver::ToolResolver;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::AstViolation;
use crate::domain::ports::verifier_tools::{LintResult, TestRunResult, TypeCheckResult, VerifierTools};

pub struct ProcessVerifierTools {
    resolver: ToolResolver,
}

impl ProcessVerifierTools {
    pub fn new(resolver: ToolResolver) -> Self {
        Self { resolver }
    }

    fn resolve_or_missing(&self, tool: &str) -> DomainResult<std::path::PathBuf> {
        self.resolver.resolve(tool).ok_or_else(|| DomainError::VerifierToolMissing(tool.to_string()))
    }
}

fn is_python_file(file: &str) -> bool {
    file.ends_with(".py")
}

#[async_trait]
impl VerifierTools for ProcessVerifierTools {
    #[tracing::instrument(skip(self), err)]
    async fn run_tests(&self, files: &[String], cwd: &str, timeout: Duration) -> DomainResult<TestRunResult> {
        let pytest = self.resolve_or_missing("pytest")?;
        let output = tokio::time::timeout(
            timeout,
            Command::new(&pytest).args(files).current_dir(cwd).output(),
        )
        .await
        .map_err(|_| DomainError::StageTimeout(timeout.as_secs()))?
        .map_err(|e| DomainError::VerifierToolMissing(format!("pytest: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let failures = stdout
            .lines()
            .filter(|l| l.trim_start().starts_with("FAILED "))
            .map(|l| l.trim_start().trim_start_matches("FAILED ").to_string())
            .collect();

        Ok(TestRunResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout,
            stderr,
            failures,
        })
    }

    async fn run_linter(&self, file: &str, cwd: &str) -> DomainResult<LintResult> {
        if !is_python_file(file) {
            return Ok(LintResult { exit_code: 0, stdout: String::new(), stderr: String::new() });
        }
        let ruff = self.resolve_or_missing("ruff")?;
        let output = Command::new(&ruff)
            .arg("check")
            .arg(file)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| DomainError::VerifierToolMissing(format!("ruff: {e}")))?;

        Ok(LintResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn run_type_checker(&self, file: &str, cwd: &str) -> DomainResult<TypeCheckResult> {
        if !is_python_file(file) {
            return Ok(TypeCheckResult { exit_code: 0, stdout: String::new(), stderr: String::new() });
        }
        let mypy = self.resolve_or_missing("mypy")?;
        let output = Command::new(&mypy)
            .arg(file)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| DomainError::VerifierToolMissing(format!("mypy: {e}")))?;

        Ok(TypeCheckResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn check_ast(&self, file: &str) -> DomainResult<Vec<AstViolation>> {
        if !is_python_file(file) {
            return Ok(Vec::new());
        }
        let contents = tokio::fs::read_to_string(Path::new(file))
            .await
            .map_err(|_| DomainError::FileMissing(file.to_string()))?;
        Ok(heuristic_check_ast(file, &contents))
    }

    async fn check_import(&self, module: &str, symbol: Option<&str>, cwd: &str) -> DomainResult<bool> {
        let python = self.resolve_or_missing("python")?;
        let snippet = match symbol {
            Some(symbol) => format!(
                "import importlib, sys; m = importlib.import_module('{module}'); sys.exit(0 if hasattr(m, '{symbol}') else 1)"
            ),
            None => format!("import importlib; importlib.import_module('{module}')"),
        };
        let output = Command::new(&python)
            .arg("-c")
            .arg(&snippet)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| DomainError::VerifierToolMissing(format!("python: {e}")))?;
        Ok(output.status.success())
    }
}
