//! Deterministic decomposition post-passes (spec §4.8 "design level"):
//! prerequisite injection, atomicity splitting, phase-dependency wiring,
//! cycle/uniqueness/boundary/overlap/conformance checks, and streaming
//! enrichment. Everything here is plain Rust, not an LM call.

use std::collections::{HashMap, HashSet};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::dag::DependencyGraph;
use crate::domain::models::{Complexity, Task, TaskType};
use crate::infrastructure::config::DecompositionConfig;

const MAX_ACCEPTANCE_CRITERIA_PER_TASK: usize = 8;
const STREAMING_KEYWORDS: &[&str] = &["sse", "eventsource", "websocket", "event-stream", "streaming"];

/// Prepend one Phase 0, verify-only task per `DEPENDENCY CHANGES` entry,
/// shifting every existing task's phase up by one so the prerequisite work
/// always lands before the first TDD cycle.
pub fn inject_prerequisites(tasks: Vec<Task>, dependency_changes: &[String]) -> Vec<Task> {
    if dependency_changes.is_empty() {
        return tasks;
    }

    let mut shifted: Vec<Task> = tasks
        .into_iter()
        .map(|mut t| {
            t.phase += 1;
            t
        })
        .collect();

    let mut prereqs = Vec::with_capacity(dependency_changes.len());
    for (i, change) in dependency_changes.iter().enumerate() {
        let key = format!("PREREQ-{:02}", i + 1);
        let task = Task::new(&key, format!("Apply dependency change: {change}"), change.clone())
            .with_phase(0, i as i64)
            .with_task_type(TaskType::VerifyOnly)
            .with_complexity(Complexity::Low);
        prereqs.push(task);
    }

    let prereq_keys: Vec<String> = prereqs.iter().map(|t| t.key.clone()).collect();
    for task in shifted.iter_mut().filter(|t| t.phase == 1) {
        for key in &prereq_keys {
            task.depends_on.push(key.clone());
        }
    }

    prereqs.extend(shifted);
    prereqs
}

/// Split any task whose `acceptance_criteria` exceeds the per-task cap into
/// a `-A`/`-B` pair, with `-B` depending on `-A`. Recurses until every task
/// is within budget.
pub fn split_oversized_tasks(tasks: Vec<Task>) -> Vec<Task> {
    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        split_one(task, &mut out);
    }
    out
}

fn split_one(task: Task, out: &mut Vec<Task>) {
    if task.acceptance_criteria.len() <= MAX_ACCEPTANCE_CRITERIA_PER_TASK {
        out.push(task);
        return;
    }

    let mid = task.acceptance_criteria.len() / 2;
    let mut first = task.clone();
    first.key = format!("{}-A", task.key);
    first.acceptance_criteria = task.acceptance_criteria[..mid].to_vec();

    let mut second = task;
    second.key = format!("{}-B", second.key);
    second.acceptance_criteria = second.acceptance_criteria[mid..].to_vec();
    second.depends_on.push(first.key.clone());

    split_one(first, out);
    split_one(second, out);
}

/// Every phase-N task depends on every phase-(N-1) key (spec §4.8).
pub fn compute_phase_dependencies(mut tasks: Vec<Task>) -> Vec<Task> {
    let mut keys_by_phase: HashMap<i64, Vec<String>> = HashMap::new();
    for task in &tasks {
        keys_by_phase.entry(task.phase).or_default().push(task.key.clone());
    }

    for task in tasks.iter_mut() {
        if task.phase == 0 {
            continue;
        }
        if let Some(prior_keys) = keys_by_phase.get(&(task.phase - 1)) {
            for key in prior_keys {
                if !task.depends_on.contains(key) {
                    task.depends_on.push(key.clone());
                }
            }
        }
    }
    tasks
}

pub fn detect_cycles(tasks: &[Task]) -> DomainResult<()> {
    let edges: Vec<(&str, &[String])> = tasks.iter().map(|t| (t.key.as_str(), t.depends_on.as_slice())).collect();
    let graph = DependencyGraph::new(edges);
    match graph.topo_sort() {
        Ok(_) => Ok(()),
        Err(remaining) => Err(DomainError::CyclicDependencies(remaining)),
    }
}

pub fn validate_uniqueness(tasks: &[Task]) -> DomainResult<()> {
    let mut seen_keys = HashSet::new();
    let mut seen_pairs = HashSet::new();
    for task in tasks {
        if !seen_keys.insert(task.key.clone()) {
            return Err(DomainError::DuplicateKey(task.key.clone()));
        }
        if task.task_type == TaskType::Implement {
            let pair = (task.impl_file.clone(), task.test_file.clone());
            if !pair.0.is_empty() && !seen_pairs.insert(pair) {
                return Err(DomainError::ValidationFailed(format!(
                    "duplicate (impl_file, test_file) pair for task {}: {} / {}",
                    task.key, task.impl_file, task.test_file
                )));
            }
        }
    }
    Ok(())
}

/// Reject tasks whose `impl_file` is an integration-style surface (per
/// `integration_keywords`) but whose `test_file` lives under a unit-test
/// directory (spec §4.8 integration-boundary check).
pub fn validate_integration_boundaries(tasks: &[Task], config: &DecompositionConfig) -> DomainResult<()> {
    if !config.enforce_integration_boundaries {
        return Ok(());
    }
    for task in tasks {
        let is_integration_surface =
            config.integration_keywords.iter().any(|kw| task.impl_file.contains(kw.as_str()));
        if is_integration_surface && task.test_file.contains("/unit/") {
            return Err(DomainError::BoundaryViolation {
                impl_file: task.impl_file.clone(),
                test_file: task.test_file.clone(),
            });
        }
    }
    Ok(())
}

/// Group tasks by `impl_file`; demote a later task to verify-only if its
/// `module_exports` overlap an earlier task's in the same file. Warns
/// additionally when the overlapping tasks share a (phase, sequence) pair,
/// which would otherwise indicate a decomposition bug.
pub fn detect_overlaps(mut tasks: Vec<Task>) -> Vec<Task> {
    let mut exports_by_file: HashMap<String, HashSet<String>> = HashMap::new();
    let mut seqs_by_file: HashMap<String, HashSet<(i64, i64)>> = HashMap::new();

    for task in tasks.iter_mut() {
        if task.impl_file.is_empty() {
            continue;
        }
        let exports_seen = exports_by_file.entry(task.impl_file.clone()).or_default();
        let overlaps = task.module_exports.iter().any(|e| exports_seen.contains(e));

        if overlaps {
            let seqs_seen = seqs_by_file.entry(task.impl_file.clone()).or_default();
            if seqs_seen.contains(&(task.phase, task.sequence)) {
                tracing::warn!(
                    task_key = %task.key,
                    phase = task.phase,
                    sequence = task.sequence,
                    "overlapping module_exports share a (phase, sequence) pair"
                );
            }
            tracing::warn!(task_key = %task.key, impl_file = %task.impl_file, "overlapping module_exports, demoting to verify-only");
            task.task_type = TaskType::VerifyOnly;
        }

        exports_by_file.entry(task.impl_file.clone()).or_default().extend(task.module_exports.iter().cloned());
        seqs_by_file.entry(task.impl_file.clone()).or_default().insert((task.phase, task.sequence));
    }
    tasks
}

/// Every `impl_file` must fall under a declared module-structure prefix (or
/// the `src/` fallback when none were declared), and no `test_file` may use
/// the reserved `src/integration/` prefix.
pub fn validate_spec_conformance(tasks: &[Task], module_prefixes: &[String]) -> DomainResult<()> {
    for task in tasks {
        if task.impl_file.is_empty() {
            continue;
        }
        let allowed = module_prefixes.is_empty()
            || module_prefixes.iter().any(|p| task.impl_file.starts_with(p.as_str()))
            || task.impl_file.starts_with("src/");
        if !allowed {
            return Err(DomainError::SpecConformance(format!(
                "impl_file {} matches no declared module-structure prefix",
                task.impl_file
            )));
        }
        if task.test_file.starts_with("src/integration/") {
            return Err(DomainError::SpecConformance(format!(
                "test_file {} uses the reserved src/integration/ prefix",
                task.test_file
            )));
        }
    }
    Ok(())
}

/// Tasks whose title/goal/acceptance criteria mention a streaming
/// transport are forced to `complexity=high` and get a standing
/// implementation hint about testing streamed responses.
pub fn enrich_streaming_tasks(mut tasks: Vec<Task>) -> Vec<Task> {
    const HINT: &str =
        "Use sentinel values and a bounded client-side read timeout when asserting on streamed output.";

    for task in tasks.iter_mut() {
        let haystack =
            format!("{} {} {}", task.title, task.goal, task.acceptance_criteria.join(" ")).to_lowercase();
        if STREAMING_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
            task.complexity = Complexity::High;
            task.implementation_hints = Some(match task.implementation_hints.take() {
                Some(existing) => format!("{existing}\n\n{HINT}"),
                None => HINT.to_string(),
            });
        }
    }
    tasks
}
