//! Task Store port (spec §4.1): the persistent task/attempt/worker/run/
//! circuit-breaker store. `adapters::sqlite::SqliteTaskStore` is the one
//! in-process implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Attempt, CircuitBreakerRecord, CircuitLevel, ExecutionRun, Stage, Task, Worker,
};

/// Outcome a task is released with, per spec §4.1 `release_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Complete,
    Blocked,
    BlockedStaticReview,
    Pending,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: Task) -> DomainResult<Task>;

    /// Tasks where `status=pending` and all `depends_on` are `complete`,
    /// and either unclaimed or stale-claimed, ordered by `(phase, sequence)`.
    async fn get_claimable_tasks(&self, phase: Option<i64>) -> DomainResult<Vec<Task>>;

    async fn get_task(&self, task_id: i64) -> DomainResult<Task>;
    async fn get_task_by_key(&self, key: &str) -> DomainResult<Task>;

    /// Atomic compare-and-set on `version`. Returns `true` iff the claim
    /// succeeded.
    async fn claim_task(
        &self,
        task_id: i64,
        worker_id: i64,
        timeout: chrono::Duration,
    ) -> DomainResult<bool>;

    async fn release_task(&self, task_id: i64, outcome: ReleaseOutcome) -> DomainResult<()>;

    async fn update_task_fields(&self, task_id: i64, test_file: Option<&str>) -> DomainResult<()>;

    async fn record_stage_attempt(&self, attempt: Attempt) -> DomainResult<Attempt>;

    async fn next_attempt_number(&self, task_id: i64, stage: Stage) -> DomainResult<u32>;

    async fn register_worker(&self, worker: Worker) -> DomainResult<Worker>;
    async fn update_task_heartbeat(&self, worker_id: i64, task_id: i64) -> DomainResult<()>;
    async fn get_stale_workers(&self, timeout: chrono::Duration) -> DomainResult<Vec<Worker>>;
    async fn save_worker(&self, worker: Worker) -> DomainResult<()>;

    async fn start_run(&self, max_workers: u32) -> DomainResult<ExecutionRun>;
    async fn finish_run(&self, run: ExecutionRun) -> DomainResult<()>;

    async fn get_breaker(&self, level: CircuitLevel, identifier: &str) -> DomainResult<CircuitBreakerRecord>;
    async fn save_breaker(&self, record: CircuitBreakerRecord) -> DomainResult<()>;

    async fn tasks_in_phase(&self, phase: i64) -> DomainResult<Vec<Task>>;
    async fn tasks_in_phases_before(&self, phase: i64) -> DomainResult<Vec<Task>>;
    async fn all_tasks(&self) -> DomainResult<Vec<Task>>;

    /// Registers an observer invoked (best-effort, never blocking the core
    /// pipeline) after every `release_task` call.
    fn on_status_change(&self, callback: Box<dyn Fn(&Task) + Send + Sync>);

    async fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
