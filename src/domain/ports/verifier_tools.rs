//! Verifier Tools port (spec §4.4, §6): the interface the core pipeline
//! consumes from test/lint/type-check/AST tooling. `adapters::verifier`
//! provides the one in-process implementation.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::AstViolation;

#[derive(Debug, Clone, Default)]
pub struct TestRunResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub failures: Vec<String>,
}

impl TestRunResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct LintResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl LintResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct TypeCheckResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl TypeCheckResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait VerifierTools: Send + Sync {
    async fn run_tests(&self, files: &[String], cwd: &str, timeout: std::time::Duration) -> DomainResult<TestRunResult>;
    async fn run_linter(&self, file: &str, cwd: &str) -> DomainResult<LintResult>;
    async fn run_type_checker(&self, file: &str, cwd: &str) -> DomainResult<TypeCheckResult>;
    async fn check_ast(&self, file: &str) -> DomainResult<Vec<AstViolation>>;

    /// Subprocess-based import check used by the run validator's
    /// import-existence pass and the `importable`/`exports X` done-criteria
    /// matcher (spec §4.9.2, §4.9 step 3) — distinct from the AC
    /// validator's `import` matcher, which must not spawn a subprocess.
    /// `symbol`, if given, is additionally checked with `hasattr`. Defaults
    /// to "not importable" so implementors that don't care about this check
    /// need not override it.
    async fn check_import(&self, _module: &str, _symbol: Option<&str>, _cwd: &str) -> DomainResult<bool> {
        Ok(false)
    }
}
