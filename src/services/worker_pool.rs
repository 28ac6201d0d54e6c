//! Worker Pool (spec §4.6): launches `max_workers` cooperative workers that
//! share one `TaskStore`, each running the TDD pipeline to completion for
//! one task at a time, with a concurrent per-worker heartbeat task and an
//! aggregate invocation budget.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CircuitLevel, Worker};
use crate::domain::ports::task_store::ReleaseOutcome;
use crate::domain::ports::TaskStore;
use crate::infrastructure::config::{HeartbeatConfig, WorkerPoolConfig};
use crate::services::circuit_breaker::CircuitBreakerService;
use crate::services::tdd_pipeline::TddPipeline;

#[derive(Clone)]
pub struct WorkerPool {
    store: Arc<dyn TaskStore>,
    pipeline: Arc<TddPipeline>,
    breakers: Arc<CircuitBreakerService>,
    config: WorkerPoolConfig,
    heartbeat: HeartbeatConfig,
    base_dir: PathBuf,
    invocations_used: Arc<Mutex<u64>>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn TaskStore>,
        pipeline: Arc<TddPipeline>,
        breakers: Arc<CircuitBreakerService>,
        config: WorkerPoolConfig,
        heartbeat: HeartbeatConfig,
        base_dir: PathBuf,
    ) -> Self {
        Self { store, pipeline, breakers, config, heartbeat, base_dir, invocations_used: Arc::new(Mutex::new(0)) }
    }

    /// Run every worker concurrently for `phase` until no task is
    /// claimable, the system breaker opens, or the invocation budget is
    /// exhausted. Returns the number of tasks each worker processed.
    #[tracing::instrument(skip(self), fields(phase))]
    pub async fn run_phase(&self, phase: i64) -> DomainResult<u32> {
        let mut handles = Vec::with_capacity(self.config.max_workers as usize);
        for worker_id in 1..=self.config.max_workers as i64 {
            let pool = self.clone();
            handles.push(tokio::spawn(async move { pool.worker_loop(worker_id, phase).await }));
        }

        let mut total = 0u32;
        for handle in handles {
            match handle.await {
                Ok(Ok(count)) => total += count,
                Ok(Err(err)) => return Err(err),
                Err(join_err) => {
                    tracing::error!(error = %join_err, "worker task panicked");
                }
            }
        }
        Ok(total)
    }

    async fn worker_loop(&self, worker_id: i64, phase: i64) -> DomainResult<u32> {
        let mut worker = Worker::register(worker_id);
        self.store.register_worker(worker.clone()).await?;

        let mut completed = 0u32;
        loop {
            if !self.breakers.allows(CircuitLevel::System, "system").await? {
                tracing::warn!(worker_id, "system breaker open, worker draining");
                break;
            }
            if !self.breakers.allows(CircuitLevel::Worker, &worker_id.to_string()).await? {
                tracing::warn!(worker_id, "worker breaker open, worker draining");
                break;
            }
            if self.budget_exhausted().await {
                tracing::info!(worker_id, "invocation budget exhausted, worker draining");
                break;
            }

            let claimable = self.store.get_claimable_tasks(Some(phase)).await?;
            let Some(task) = claimable.into_iter().next() else {
                break;
            };

            let claim_timeout = ChronoDuration::seconds(self.config.claim_timeout_secs as i64);
            if !self.store.claim_task(task.id, worker_id, claim_timeout).await? {
                continue;
            }
            self.spend_invocation().await;
            worker.begin_claim(task.id);
            self.store.save_worker(worker.clone()).await?;

            let workspace = self.base_dir.join(&task.key);
            let _ = tokio::fs::create_dir_all(&workspace).await;
            let cwd = workspace.to_string_lossy().into_owned();

            let heartbeat = self.spawn_heartbeat(worker_id, task.id);
            let run_result = self.pipeline.run(task.clone(), &cwd).await;
            heartbeat.abort();

            let (release_outcome, succeeded) = match &run_result {
                Ok(outcome) => (outcome.release, outcome.release == ReleaseOutcome::Complete),
                Err(_) => (ReleaseOutcome::Blocked, false),
            };
            self.store.release_task(task.id, release_outcome).await?;
            worker.finish_claim(succeeded);
            self.store.save_worker(worker.clone()).await?;

            match &run_result {
                Ok(_) => {
                    self.breakers.report_success(CircuitLevel::Worker, &worker_id.to_string()).await?;
                }
                Err(err) => {
                    self.breakers.report_failure(CircuitLevel::Worker, &worker_id.to_string(), &err.to_string()).await?;
                    self.breakers.report_failure(CircuitLevel::System, "system", &err.to_string()).await?;
                }
            }
            completed += 1;
        }
        Ok(completed)
    }

    async fn budget_exhausted(&self) -> bool {
        *self.invocations_used.lock().await >= self.config.invocation_budget
    }

    async fn spend_invocation(&self) {
        let mut used = self.invocations_used.lock().await;
        *used += 1;
    }

    fn spawn_heartbeat(&self, worker_id: i64, task_id: i64) -> JoinHandle<()> {
        let store = self.store.clone();
        let interval = Duration::from_secs(self.heartbeat.interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if store.update_task_heartbeat(worker_id, task_id).await.is_err() {
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator, SqliteTaskStore};
    use crate::domain::models::{AstViolation, Task, TaskType};
    use crate::domain::ports::lm_transport::{LmTransport, StreamOptions, TextChunk};
    use crate::domain::ports::verifier_tools::{LintResult, TestRunResult, TypeCheckResult, VerifierTools};
    use crate::infrastructure::config::{CircuitBreakerConfig, LmStageRunnerConfig};
    use crate::services::lm_stage_runner::LmStageRunner;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};

    struct NoopTransport;

    #[async_trait]
    impl LmTransport for NoopTransport {
        async fn stream_completion(&self, _options: StreamOptions) -> BoxStream<'static, TextChunk> {
            Box::pin(stream::iter(vec![Ok("ok".to_string())]))
        }
    }

    struct AlwaysPassTools;

    #[async_trait]
    impl VerifierTools for AlwaysPassTools {
        async fn run_tests(&self, _files: &[String], _cwd: &str, _timeout: Duration) -> DomainResult<TestRunResult> {
            Ok(TestRunResult { exit_code: 0, ..Default::default() })
        }
        async fn run_linter(&self, _file: &str, _cwd: &str) -> DomainResult<LintResult> {
            Ok(LintResult { exit_code: 0, ..Default::default() })
        }
        async fn run_type_checker(&self, _file: &str, _cwd: &str) -> DomainResult<TypeCheckResult> {
            Ok(TypeCheckResult { exit_code: 0, ..Default::default() })
        }
        async fn check_ast(&self, _file: &str) -> DomainResult<Vec<AstViolation>> {
            Ok(vec![])
        }
    }

    async fn pool_fixture(max_workers: u32) -> (WorkerPool, Arc<dyn TaskStore>, tempfile::TempDir) {
        let db_pool = create_test_pool().await.unwrap();
        Migrator::new(db_pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.unwrap();
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(db_pool));
        let lm_runner = Arc::new(LmStageRunner::new(Arc::new(NoopTransport), LmStageRunnerConfig::default()));
        let breakers = Arc::new(CircuitBreakerService::new(
            store.clone(),
            CircuitBreakerConfig { base_open_duration_secs: 0, ..CircuitBreakerConfig::default() },
        ));
        let resolver = crate::adapters::verifier::tool_resolver::ToolResolver::new("/nonexistent/venv");
        let pipeline =
            Arc::new(TddPipeline::new(store.clone(), lm_runner, Arc::new(AlwaysPassTools), breakers.clone(), resolver));
        let dir = tempfile::tempdir().unwrap();
        let worker_pool = WorkerPool::new(
            store.clone(),
            pipeline,
            breakers,
            WorkerPoolConfig { max_workers, invocation_budget: 100, claim_timeout_secs: 300 },
            HeartbeatConfig { interval_secs: 60, timeout_secs: 180 },
            dir.path().to_path_buf(),
        );
        (worker_pool, store, dir)
    }

    #[tokio::test]
    async fn verify_only_task_is_claimed_and_completed() {
        let (pool, store, dir) = pool_fixture(1).await;
        let workspace = dir.path().join("V-1");
        tokio::fs::create_dir_all(&workspace).await.unwrap();
        tokio::fs::write(workspace.join("verify_thing.py"), "x = 1\n").await.unwrap();

        let task = Task::new("V-1", "verify", "goal")
            .with_files("verify_thing.py", "thing.py")
            .with_task_type(TaskType::VerifyOnly);
        store.create_task(task).await.unwrap();

        let processed = pool.run_phase(0).await.unwrap();
        assert_eq!(processed, 1);

        let task = store.get_task_by_key("V-1").await.unwrap();
        assert_eq!(task.status, crate::domain::models::TaskStatus::Complete);
    }

    #[tokio::test]
    async fn empty_phase_processes_nothing() {
        let (pool, _store, _dir) = pool_fixture(2).await;
        let processed = pool.run_phase(0).await.unwrap();
        assert_eq!(processed, 0);
    }
}
