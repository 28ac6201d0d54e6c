//! Run Validator (spec §4.9, §4.9.1, §4.9.2): the end-of-run pass that
//! aggregates a final `ValidationDetails` for the `ExecutionRun` — full
//! regression, full lint+type check, import-existence check, and the
//! done-criteria / acceptance-criteria heuristic counts.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AcSummary, AcTaskResult, HeuristicCounts, Task, TaskStatus, ValidationDetails, ValidationStatus};
use crate::domain::ports::{TaskStore, VerifierTools};

const REGRESSION_TIMEOUT_SECS: u64 = 600;
const PER_FILE_TEST_TIMEOUT_SECS: u64 = 60;

pub struct RunValidator {
    store: Arc<dyn TaskStore>,
    tools: Arc<dyn VerifierTools>,
}

impl RunValidator {
    pub fn new(store: Arc<dyn TaskStore>, tools: Arc<dyn VerifierTools>) -> Self {
        Self { store, tools }
    }

    #[tracing::instrument(skip(self))]
    pub async fn validate(&self, cwd: &str) -> DomainResult<ValidationDetails> {
        let started = Instant::now();
        let tasks = self.store.all_tasks().await?;

        let mut regressions = self.run_regression(&tasks, cwd).await?;
        regressions.extend(self.run_lint_and_type(&tasks, cwd).await?);

        let unimportable_exports = self.check_module_exports(&tasks, cwd).await;
        let done = self.evaluate_done_criteria(&tasks, cwd).await;
        let ac = evaluate_acceptance_criteria(&tasks, cwd).await;

        let status = if regressions.is_empty() { ValidationStatus::Passed } else { ValidationStatus::Failed };

        tracing::info!(status = status.as_str(), regressions = regressions.len(), "run validation complete");
        Ok(ValidationDetails {
            status,
            regressions,
            done,
            ac,
            unimportable_exports,
            validation_wall_clock_s: started.elapsed().as_secs_f64(),
        })
    }

    async fn run_regression(&self, tasks: &[Task], cwd: &str) -> DomainResult<Vec<String>> {
        let mut test_files: Vec<String> = tasks.iter().map(|t| t.test_file.clone()).filter(|f| !f.is_empty()).collect();
        test_files.sort();
        test_files.dedup();
        if test_files.is_empty() {
            return Ok(Vec::new());
        }

        let batch = self.tools.run_tests(&test_files, cwd, Duration::from_secs(REGRESSION_TIMEOUT_SECS)).await?;
        if batch.passed() {
            return Ok(Vec::new());
        }

        let mut offenders = Vec::new();
        for file in &test_files {
            let single = vec![file.clone()];
            let result = self.tools.run_tests(&single, cwd, Duration::from_secs(PER_FILE_TEST_TIMEOUT_SECS)).await?;
            if !result.passed() {
                offenders.push(file.clone());
            }
        }
        Ok(offenders)
    }

    async fn run_lint_and_type(&self, tasks: &[Task], cwd: &str) -> DomainResult<Vec<String>> {
        let mut impl_files: Vec<String> = tasks.iter().map(|t| t.impl_file.clone()).filter(|f| !f.is_empty()).collect();
        impl_files.sort();
        impl_files.dedup();

        let mut offenders = Vec::new();
        for file in &impl_files {
            let lint = self.tools.run_linter(file, cwd).await?;
            let types = self.tools.run_type_checker(file, cwd).await?;
            if !lint.passed() || !types.passed() {
                offenders.push(file.clone());
            }
        }
        Ok(offenders)
    }

    /// Import-existence check: log-only, never blocking (spec §4.9 step 3).
    async fn check_module_exports(&self, tasks: &[Task], cwd: &str) -> Vec<String> {
        let mut unimportable = Vec::new();
        for task in tasks {
            if task.impl_file.is_empty() {
                continue;
            }
            let module = file_to_module(&task.impl_file);
            for export in &task.module_exports {
                match self.tools.check_import(&module, Some(export), cwd).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(module, export, "module export not importable");
                        unimportable.push(format!("{module}.{export}"));
                    }
                    Err(err) => {
                        tracing::warn!(module, export, error = %err, "import check failed");
                        unimportable.push(format!("{module}.{export}"));
                    }
                }
            }
        }
        unimportable
    }

    async fn evaluate_done_criteria(&self, tasks: &[Task], cwd: &str) -> HeuristicCounts {
        let mut counts = HeuristicCounts::default();
        for task in tasks {
            let Some(criterion) = &task.done_criteria else { continue };
            counts.total += 1;
            match classify_done_criterion(criterion) {
                DoneCheck::TestsPass => {
                    counts.verifiable += 1;
                    if task.status == TaskStatus::Complete {
                        counts.satisfied += 1;
                    }
                }
                DoneCheck::Importable(symbol) => {
                    counts.verifiable += 1;
                    let module = file_to_module(&task.impl_file);
                    if self.tools.check_import(&module, symbol.as_deref(), cwd).await.unwrap_or(false) {
                        counts.satisfied += 1;
                    }
                }
                DoneCheck::FileExists(path) => {
                    counts.verifiable += 1;
                    if tokio::fs::metadata(Path::new(cwd).join(&path)).await.is_ok() {
                        counts.satisfied += 1;
                    }
                }
                DoneCheck::Unverifiable => {}
            }
        }
        counts
    }
}

fn file_to_module(path: &str) -> String {
    path.trim_end_matches(".py").replace('/', ".")
}

enum DoneCheck {
    TestsPass,
    Importable(Option<String>),
    FileExists(String),
    Unverifiable,
}

fn classify_done_criterion(criterion: &str) -> DoneCheck {
    let lower = criterion.to_lowercase();
    if lower.contains("tests pass") {
        return DoneCheck::TestsPass;
    }
    if let Some(caps) = Regex::new(r"(?i)exports\s+(\w+)").unwrap().captures(criterion) {
        return DoneCheck::Importable(Some(caps[1].to_string()));
    }
    if lower.contains("importable") {
        return DoneCheck::Importable(None);
    }
    if let Some(caps) = Regex::new(r"(?i)file\s+(\S+)\s+exists").unwrap().captures(criterion) {
        return DoneCheck::FileExists(caps[1].to_string());
    }
    DoneCheck::Unverifiable
}

enum AcCheck {
    ErrorHandling(String),
    Export(String),
    Import,
    Endpoint(String, String),
    GivenWhenThen,
    Unverifiable,
}

/// Priority-ordered matchers, spec §4.9.1.
fn classify_ac_criterion(criterion: &str) -> AcCheck {
    if let Some(caps) = Regex::new(r"(?i)\b(?:raises|throws)\s+(\w+)").unwrap().captures(criterion) {
        return AcCheck::ErrorHandling(caps[1].to_string());
    }
    if let Some(caps) = Regex::new(r"(?i)\b(?:exports|expose)\s+(\w+)").unwrap().captures(criterion) {
        return AcCheck::Export(caps[1].to_string());
    }
    if Regex::new(r"(?i)importable|can import").unwrap().is_match(criterion) {
        return AcCheck::Import;
    }
    if let Some(caps) = Regex::new(r"(?i)responds to (GET|POST|PUT|DELETE|PATCH)\s+(\S+)").unwrap().captures(criterion) {
        return AcCheck::Endpoint(caps[1].to_uppercase(), caps[2].to_string());
    }
    if Regex::new(r"(?is)given.*when.*then").unwrap().is_match(criterion) {
        return AcCheck::GivenWhenThen;
    }
    AcCheck::Unverifiable
}

/// Returns `(verifiable, satisfied)` for one criterion string against a
/// task's impl/test file contents. Never spawns a subprocess (spec §4.9.1
/// "import" matcher).
fn evaluate_ac_criterion(criterion: &str, impl_contents: &str, test_contents: &str, impl_exists: bool) -> (bool, bool) {
    match classify_ac_criterion(criterion) {
        AcCheck::ErrorHandling(exc) => {
            let raises = Regex::new(&format!(r"pytest\.raises\(\s*{}\s*[,)]", regex::escape(&exc))).unwrap();
            let raise = Regex::new(&format!(r"raise\s+{}\b", regex::escape(&exc))).unwrap();
            (true, raises.is_match(test_contents) && raise.is_match(impl_contents))
        }
        AcCheck::Export(name) => {
            let re = Regex::new(&format!(r"(?m)^\s*(?:async def|def|class)\s+{}\b", regex::escape(&name))).unwrap();
            (true, re.is_match(impl_contents))
        }
        AcCheck::Import => (true, impl_exists),
        AcCheck::Endpoint(method, path) => {
            let lower = impl_contents.to_lowercase();
            (true, lower.contains(&method.to_lowercase()) && lower.contains(&path.to_lowercase()))
        }
        AcCheck::GivenWhenThen => {
            let satisfied = match Regex::new(r"(?is)when\s+(.*?)\s+then").unwrap().captures(criterion) {
                Some(caps) => {
                    let keywords: Vec<String> =
                        caps[1].split_whitespace().filter(|w| w.len() > 3).map(|w| w.to_lowercase()).collect();
                    !keywords.is_empty() && keywords.iter().any(|k| test_contents.to_lowercase().contains(k.as_str()))
                }
                None => false,
            };
            (true, satisfied)
        }
        AcCheck::Unverifiable => (false, false),
    }
}

async fn evaluate_acceptance_criteria(tasks: &[Task], cwd: &str) -> AcSummary {
    let mut counts = HeuristicCounts::default();
    let mut per_task = Vec::new();

    for task in tasks {
        if task.acceptance_criteria.is_empty() {
            continue;
        }
        let impl_contents = tokio::fs::read_to_string(Path::new(cwd).join(&task.impl_file)).await.unwrap_or_default();
        let test_contents = tokio::fs::read_to_string(Path::new(cwd).join(&task.test_file)).await.unwrap_or_default();
        let impl_exists = !impl_contents.is_empty();

        let mut task_counts = HeuristicCounts::default();
        let mut unverifiable_criteria = Vec::new();
        for criterion in &task.acceptance_criteria {
            task_counts.total += 1;
            let (verifiable, satisfied) = evaluate_ac_criterion(criterion, &impl_contents, &test_contents, impl_exists);
            if verifiable {
                task_counts.verifiable += 1;
                if satisfied {
                    task_counts.satisfied += 1;
                }
            } else {
                unverifiable_criteria.push(criterion.clone());
            }
        }

        counts.total += task_counts.total;
        counts.verifiable += task_counts.verifiable;
        counts.satisfied += task_counts.satisfied;
        per_task.push(AcTaskResult { task_key: task.key.clone(), counts: task_counts, unverifiable_criteria });
    }

    AcSummary { counts, per_task }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_error_handling_criterion() {
        assert!(matches!(classify_ac_criterion("raises ValueError on bad input"), AcCheck::ErrorHandling(e) if e == "ValueError"));
    }

    #[test]
    fn classifies_export_criterion() {
        assert!(matches!(classify_ac_criterion("exports compute_total"), AcCheck::Export(e) if e == "compute_total"));
    }

    #[test]
    fn classifies_endpoint_criterion() {
        assert!(matches!(
            classify_ac_criterion("responds to POST /orders"),
            AcCheck::Endpoint(m, p) if m == "POST" && p == "/orders"
        ));
    }

    #[test]
    fn unmatched_criterion_falls_back_to_unverifiable() {
        assert!(matches!(classify_ac_criterion("looks nice"), AcCheck::Unverifiable));
    }

    #[test]
    fn export_criterion_is_satisfied_when_def_present() {
        let impl_src = "def compute_total(items):\n    return sum(items)\n";
        let (verifiable, satisfied) = evaluate_ac_criterion("exports compute_total", impl_src, "", true);
        assert!(verifiable);
        assert!(satisfied);
    }

    #[test]
    fn error_handling_requires_both_raise_and_pytest_raises() {
        let impl_src = "def f(x):\n    if x < 0:\n        raise ValueError('bad')\n";
        let test_src = "def test_f():\n    with pytest.raises(ValueError):\n        f(-1)\n";
        let (verifiable, satisfied) = evaluate_ac_criterion("raises ValueError", impl_src, test_src, true);
        assert!(verifiable && satisfied);

        let (_, satisfied_missing) = evaluate_ac_criterion("raises ValueError", "def f(x): pass", test_src, true);
        assert!(!satisfied_missing);
    }

    #[test]
    fn done_criteria_classifies_file_exists() {
        assert!(matches!(classify_done_criterion("file pkg/models.py exists"), DoneCheck::FileExists(p) if p == "pkg/models.py"));
    }

    #[test]
    fn done_criteria_classifies_tests_pass() {
        assert!(matches!(classify_done_criterion("tests pass"), DoneCheck::TestsPass));
    }

    #[test]
    fn done_criteria_falls_back_to_unverifiable() {
        assert!(matches!(classify_done_criterion("looks good to the reviewer"), DoneCheck::Unverifiable));
    }
}
