//! Decomposition Pipeline (spec §4.8, "design level"): turns a PRD's TDD
//! cycles into a validated task DAG. The LM passes themselves are treated
//! as black-box structured-text generators; the engineering rigor lives in
//! the deterministic post-passes in `validators`.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Complexity, Task, TaskType};
use crate::domain::ports::lm_transport::{LmTransport, PermissionMode, StreamOptions};
use crate::infrastructure::config::DecompositionConfig;
use crate::services::decomposition::prd_parser::parse_prd;
use crate::services::decomposition::validators;

const DECOMPOSITION_MODEL: &str = "sonnet";
const DECOMPOSITION_MAX_TURNS: u32 = 1;
const DECOMPOSITION_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Deserialize)]
struct CycleRecord {
    id: String,
    summary: String,
}

#[derive(Debug, Deserialize)]
struct TaskRecord {
    key: String,
    title: String,
    goal: String,
    test_file: String,
    impl_file: String,
    complexity: Option<String>,
    task_type: Option<String>,
    #[serde(default)]
    module_exports: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

pub struct DecompositionPipeline {
    transport: Arc<dyn LmTransport>,
    config: DecompositionConfig,
}

impl DecompositionPipeline {
    pub fn new(transport: Arc<dyn LmTransport>, config: DecompositionConfig) -> Self {
        Self { transport, config }
    }

    #[tracing::instrument(skip(self, prd_source), err)]
    pub async fn run(&self, prd_source: &str, cwd: &str) -> DomainResult<Vec<Task>> {
        let parsed = parse_prd(prd_source);
        let cycles = self.extract_cycles(&parsed.tdd_cycles_text, cwd).await?;

        let mut tasks = Vec::new();
        for (cycle_idx, cycle) in cycles.iter().enumerate() {
            let phase = (cycle_idx + 1) as i64;
            let records = self.extract_tasks_for_cycle(cycle, parsed.module_api_text.as_deref(), cwd).await?;
            for (seq, record) in records.into_iter().enumerate() {
                let mut task = Task::new(record.key, record.title, record.goal)
                    .with_phase(phase, seq as i64)
                    .with_files(record.test_file, record.impl_file)
                    .with_complexity(record.complexity.as_deref().and_then(Complexity::from_str).unwrap_or_default())
                    .with_task_type(record.task_type.as_deref().and_then(TaskType::from_str).unwrap_or_default());
                task.module_exports = record.module_exports;
                for dep in record.depends_on {
                    task = task.with_dependency(dep);
                }
                tasks.push(task);
            }
        }

        for task in tasks.iter_mut() {
            task.acceptance_criteria = self.generate_acceptance_criteria(task, cwd).await?;
            task.implementation_hints = self.generate_implementation_hints(task, cwd).await?;
        }

        let tasks = validators::inject_prerequisites(tasks, &parsed.dependency_changes);
        let tasks = validators::split_oversized_tasks(tasks);
        let tasks = validators::detect_overlaps(tasks);
        let tasks = validators::compute_phase_dependencies(tasks);
        validators::validate_uniqueness(&tasks)?;
        validators::validate_integration_boundaries(&tasks, &self.config)?;
        validators::validate_spec_conformance(&tasks, &parsed.module_structure_prefixes)?;
        validators::detect_cycles(&tasks)?;
        let tasks = validators::enrich_streaming_tasks(tasks);

        Ok(tasks)
    }

    async fn extract_cycles(&self, tdd_cycles_text: &str, cwd: &str) -> DomainResult<Vec<CycleRecord>> {
        let prompt = format!(
            "Identify the distinct TDD cycles described below. Respond with a JSON array of \
             objects with keys \"id\" and \"summary\", one per cycle, in execution order.\n\n{tdd_cycles_text}"
        );
        let response = self.call_lm(prompt, cwd).await?;
        parse_json_records(&response)
    }

    async fn extract_tasks_for_cycle(
        &self,
        cycle: &CycleRecord,
        module_api_text: Option<&str>,
        cwd: &str,
    ) -> DomainResult<Vec<TaskRecord>> {
        let api_hint = module_api_text.map(|t| format!("\n\nModule API specification:\n{t}")).unwrap_or_default();
        let prompt = format!(
            "Break cycle \"{}\" ({}) into atomic TDD tasks, each a single RED/GREEN unit. Respond \
             with a JSON array of objects with keys \"key\", \"title\", \"goal\", \"test_file\", \
             \"impl_file\", \"complexity\" (low|medium|high), \"task_type\" (implement|verify-only), \
             \"module_exports\" (array of strings), and \"depends_on\" (array of task keys).{api_hint}",
            cycle.id, cycle.summary
        );
        let response = self.call_lm(prompt, cwd).await?;
        parse_json_records(&response)
    }

    async fn generate_acceptance_criteria(&self, task: &Task, cwd: &str) -> DomainResult<Vec<String>> {
        let prompt = format!(
            "List the acceptance criteria for task \"{}\" ({}). Respond with a JSON array of strings.",
            task.key, task.goal
        );
        let response = self.call_lm(prompt, cwd).await?;
        parse_json_records(&response)
    }

    async fn generate_implementation_hints(&self, task: &Task, cwd: &str) -> DomainResult<Option<String>> {
        let prompt = format!(
            "Give one short paragraph of implementation hints for task \"{}\" ({}). Respond with \
             plain text, or the single word NONE if no hint is warranted.",
            task.key, task.goal
        );
        let response = self.call_lm(prompt, cwd).await?;
        let trimmed = response.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            Ok(None)
        } else {
            Ok(Some(trimmed.to_string()))
        }
    }

    async fn call_lm(&self, prompt: String, cwd: &str) -> DomainResult<String> {
        let options = StreamOptions {
            prompt,
            model: DECOMPOSITION_MODEL.to_string(),
            cwd: cwd.to_string(),
            permission_mode: PermissionMode::BypassPermissions,
            max_turns: DECOMPOSITION_MAX_TURNS,
        };

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

        match tokio::time::timeout(Duration::from_secs(DECOMPOSITION_TIMEOUT_SECS), accumulate).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::StageTimeout(DECOMPOSITION_TIMEOUT_SECS)),
        }
    }
}

/// Pulls the first fenced ```json``` (or bare ```) block out of an LM
/// response, falling back to the widest `{...}`/`[...]` span, then to the
/// raw text untouched.
fn extract_json_block(response: &str) -> String {
    let fence_re = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap();
    if let Some(caps) = fence_re.captures(response) {
        return caps.get(1).unwrap().as_str().to_string();
    }
    if let (Some(start), Some(end)) = (response.find(['{', '[']), response.rfind(['}', ']'])) {
        if end > start {
            return response[start..=end].to_string();
        }
    }
    response.to_string()
}

fn parse_json_records<T: DeserializeOwned>(response: &str) -> DomainResult<T> {
    let block = extract_json_block(response);
    serde_json::from_str(&block).map_err(DomainError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::lm_transport::TextChunk;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedTransport {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<&str>) -> Self {
            Self { responses: Mutex::new(responses.into_iter().map(str::to_string).collect()) }
        }
    }

    #[async_trait]
    impl LmTransport for ScriptedTransport {
        async fn stream_completion(&self, _options: StreamOptions) -> BoxStream<'static, TextChunk> {
            let text = self.responses.lock().unwrap().pop_front().unwrap_or_default();
            Box::pin(stream::iter(vec![Ok(text)]))
        }
    }

    const PRD: &str = "\
TDD CYCLES
Cycle 1: health endpoint.
";

    #[tokio::test]
    async fn run_produces_validated_tasks_with_criteria_and_dependencies() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            r#"[{"id":"1","summary":"health endpoint"}]"#,
            r#"[
                {"key":"API-1","title":"t1","goal":"g1","test_file":"tests/test_a.py","impl_file":"pkg/a.py","complexity":"low","task_type":"implement","module_exports":["foo"],"depends_on":[]},
                {"key":"API-2","title":"t2","goal":"g2","test_file":"tests/test_b.py","impl_file":"pkg/b.py","complexity":"medium","task_type":"implement","module_exports":["bar"],"depends_on":["API-1"]}
            ]"#,
            r#"["criterion one"]"#,
            "NONE",
            r#"["criterion two"]"#,
            "NONE",
        ]));

        let pipeline = DecompositionPipeline::new(transport, DecompositionConfig::default());
        let tasks = pipeline.run(PRD, "/tmp").await.unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].phase, 1);
        assert_eq!(tasks[0].acceptance_criteria, vec!["criterion one".to_string()]);
        assert!(tasks[0].implementation_hints.is_none());
        assert!(tasks[1].depends_on.contains(&"API-1".to_string()));
    }

    #[tokio::test]
    async fn empty_cycle_list_produces_no_tasks() {
        let transport = Arc::new(ScriptedTransport::new(vec!["[]"]));
        let pipeline = DecompositionPipeline::new(transport, DecompositionConfig::default());
        let tasks = pipeline.run(PRD, "/tmp").await.unwrap();
        assert!(tasks.is_empty());
    }

    #[test]
    fn extract_json_block_strips_markdown_fence() {
        let response = "here you go:\n```json\n[1, 2, 3]\n```\nthanks";
        assert_eq!(extract_json_block(response), "[1, 2, 3]");
    }

    #[test]
    fn extract_json_block_falls_back_to_bracket_span() {
        let response = "sure, [\"a\", \"b\"] is the list";
        assert_eq!(extract_json_block(response), "[\"a\", \"b\"]");
    }
}
