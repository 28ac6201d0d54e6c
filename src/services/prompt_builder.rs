//! Prompt Builder (spec §4.2): deterministic, stage-specific prompt
//! assembly. Pure functions only — no I/O. Callers (the TDD pipeline) are
//! responsible for reading sibling test file contents off disk and passing
//! them in.

use crate::domain::models::{Stage, Task};

/// Guardrail embedded in every template: the LM must never import using a
/// `src.`-prefixed path (spec §6 "Import-path convention").
const IMPORT_CONVENTION: &str = "IMPORT CONVENTION: never import using a `src.`-prefixed path. \
Source at `src/pkg/mod.py` is imported as `pkg.mod` — strip the `src` layout prefix entirely.";

/// Keywords that, when found in task title/goal/acceptance criteria, mark
/// a task as exercising a streaming endpoint (spec §4.2, §4.8 "streaming
/// enrichment").
const STREAMING_KEYWORDS: &[&str] = &["sse", "eventsource", "websocket", "event-stream", "event stream"];

/// Guidance injected into RED/GREEN prompts for streaming tasks.
const STREAMING_GUIDANCE: &str = "This task exercises a streaming endpoint. Tests must use a \
sentinel value to detect stream completion, drive the client with `client.stream(...)`, and wrap \
blocking reads in an `asyncio.wait_for(..., timeout=...)` to avoid hanging the suite.";

/// A sibling test file (shares `impl_file` with the task being prompted,
/// already `Complete`) whose public surface the LM should be warned about.
pub struct SiblingTestFile<'a> {
    pub path: &'a str,
    pub contents: &'a str,
}

/// Extracted sibling context: public symbol names, import lines, and the
/// first assertion of each test function, across all sibling test files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiblingContext {
    pub public_symbols: Vec<String>,
    pub imports: Vec<String>,
    pub first_assertions: Vec<String>,
}

/// Strip an optional `src.`/`src/` layout prefix from an import or file
/// path, per spec §4.2's import convention (`src/pkg/mod.py` -> `pkg.mod`).
pub fn strip_src_prefix(path: &str) -> String {
    let normalized = path.trim_start_matches("src/").trim_start_matches("src.");
    normalized.trim_end_matches(".py").replace('/', ".")
}

/// Whether any of title/goal/acceptance_criteria mentions a streaming
/// keyword, forcing `complexity=high` treatment in this prompt.
pub fn is_streaming_task(task: &Task) -> bool {
    let haystack = format!("{} {} {}", task.title, task.goal, task.acceptance_criteria.join(" ")).to_lowercase();
    STREAMING_KEYWORDS.iter().any(|kw| haystack.contains(kw))
}

/// Extract public symbols (`def`/`class` at column 0), import lines, and
/// each test function's first `assert` line from a set of sibling test
/// files. Line-oriented regex scanning, not a real parser (spec §4.2).
pub fn extract_sibling_context(files: &[SiblingTestFile<'_>]) -> SiblingContext {
    let mut ctx = SiblingContext::default();
    for file in files {
        let mut current_test_fn: Option<String> = None;
        for line in file.contents.lines() {
            let trimmed = line.trim_start();
            if let Some(name) = line.strip_prefix("def ").and_then(|rest| rest.split(['(', ':']).next()) {
                let name = name.trim();
                if name.starts_with("test_") {
                    current_test_fn = Some(name.to_string());
                } else if !name.starts_with('_') {
                    ctx.public_symbols.push(name.to_string());
                }
            } else if let Some(name) = line.strip_prefix("class ").and_then(|rest| rest.split(['(', ':']).next()) {
                let name = name.trim();
                if !name.starts_with('_') {
                    ctx.public_symbols.push(name.to_string());
                }
            } else if trimmed.starts_with("import ") || trimmed.starts_with("from ") {
                ctx.imports.push(trimmed.to_string());
            } else if trimmed.starts_with("assert ") {
                if let Some(test_fn) = current_test_fn.take() {
                    ctx.first_assertions.push(format!("{test_fn}: {trimmed}"));
                }
            }
        }
    }
    ctx
}

fn stage_instructions(stage: Stage) -> &'static str {
    match stage {
        Stage::Red | Stage::RedFix => {
            "Write a single failing test that exercises the goal above. Do not write any \
implementation code. The test must fail for the right reason (missing behavior, not a syntax or \
import error)."
        }
        Stage::Green => {
            "Write the minimal implementation needed to make the existing failing test pass. Do \
not add functionality beyond what the test requires."
        }
        Stage::Review => "Review the test file for lint and structural issues; do not modify behavior.",
        Stage::Fix => "The previous stage's verification failed. Inspect the reported failures and \
make the minimal change needed to resolve them.",
        Stage::Verify | Stage::ReVerify => {
            "Do not modify any files. This stage only runs verification tooling against the \
current state of the workspace."
        }
        Stage::Refactor => "Improve the internal structure of the implementation (split long \
functions/classes, remove duplication) without changing its externally observable behavior. All \
existing tests must continue to pass.",
        Stage::Commit => "Record this task's change set; no further edits are expected.",
    }
}

/// Assemble the full stage prompt for a task, per spec §4.2.
pub fn build_prompt(stage: Stage, task: &Task, siblings: &SiblingContext, previous_failure: Option<&str>) -> String {
    let mut sections = Vec::new();
    sections.push(format!("# Task: {} ({})", task.title, task.key));
    sections.push(task.goal.clone());
    sections.push(IMPORT_CONVENTION.to_string());

    if !task.test_file.is_empty() || !task.impl_file.is_empty() {
        sections.push(format!(
            "test_file: {}\nimpl_file: {}",
            if task.test_file.is_empty() { "(to be created)" } else { &task.test_file },
            if task.impl_file.is_empty() { "(to be created)" } else { &task.impl_file }
        ));
    }

    if !task.acceptance_criteria.is_empty() {
        sections.push(format!("## Acceptance criteria\n{}", task.acceptance_criteria.join("\n")));
    }
    if !task.module_exports.is_empty() {
        sections.push(format!("## Expected public exports\n{}", task.module_exports.join(", ")));
    }

    if matches!(stage, Stage::Red | Stage::RedFix | Stage::Green) {
        if let Some(hints) = &task.implementation_hints {
            sections.push(format!("## Implementation hints\n{hints}"));
        }
        if is_streaming_task(task) {
            sections.push(STREAMING_GUIDANCE.to_string());
        }
    }

    if !siblings.public_symbols.is_empty() || !siblings.imports.is_empty() || !siblings.first_assertions.is_empty() {
        let mut sibling_section = String::from("## Existing behavior in this module (do not break)\n");
        if !siblings.public_symbols.is_empty() {
            sibling_section.push_str(&format!("Public symbols already defined: {}\n", siblings.public_symbols.join(", ")));
        }
        if !siblings.imports.is_empty() {
            sibling_section.push_str(&format!("Existing imports: {}\n", siblings.imports.join("; ")));
        }
        if !siblings.first_assertions.is_empty() {
            sibling_section.push_str(&format!("Existing test assertions: {}\n", siblings.first_assertions.join("; ")));
        }
        sections.push(sibling_section);
    }

    if let Some(failure) = previous_failure {
        sections.push(format!("## Previous attempt's failure output\n{}", escape_prompt_text(failure)));
    }

    sections.push(format!("## Stage instructions ({})\n{}", stage.as_str(), stage_instructions(stage)));

    sections.join("\n\n")
}

/// Escape brace/quote characters from task-supplied free text before it is
/// substituted into a template, per spec §9's single-pass substitution
/// re-architecture note.
fn escape_prompt_text(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}
