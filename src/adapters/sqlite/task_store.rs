//! SQLite implementation of the `TaskStore` port (spec §4.1).
//!
//! One concrete store struct backed by a single `SqlitePool`; no mixin
//! inheritance, no per-entity repository trait split.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Attempt, CircuitBreakerRecord, CircuitLevel, CircuitState, Complexity, ExecutionRun, Stage, Task, TaskStatus,
    TaskType, Worker, WorkerStatus,
};
use crate::domain::ports::task_store::{ReleaseOutcome, TaskStore};

/// Emitted when a JSON column grows past this size; signals that
/// `acceptance_criteria`/`module_exports` are growing unexpectedly.
const JSON_SIZE_WARN_BYTES: usize = 64 * 1024;

type StatusChangeCallback = Box<dyn Fn(&Task) + Send + Sync>;

pub struct SqliteTaskStore {
    pool: SqlitePool,
    observers: Mutex<Vec<StatusChangeCallback>>,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, observers: Mutex::new(Vec::new()) }
    }

    async fn load_dependencies(&self, task_id: i64) -> DomainResult<Vec<String>> {
        let rows = sqlx::query("SELECT depends_on_key FROM task_dependencies WHERE task_id = ?")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
    }

    fn notify(&self, task: &Task) {
        let observers = self.observers.lock().unwrap();
        for cb in observers.iter() {
            cb(task);
        }
    }
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow, depends_on: Vec<String>) -> DomainResult<Task> {
    let acceptance_criteria: Vec<String> = serde_json::from_str(row.try_get::<String, _>("acceptance_criteria")?.as_str())?;
    let module_exports: Vec<String> = serde_json::from_str(row.try_get::<String, _>("module_exports")?.as_str())?;

    let status = TaskStatus::from_str(row.try_get::<String, _>("status")?.as_str())
        .ok_or_else(|| DomainError::ValidationFailed("unknown task status in row".to_string()))?;
    let complexity = Complexity::from_str(row.try_get::<String, _>("complexity")?.as_str())
        .ok_or_else(|| DomainError::ValidationFailed("unknown complexity in row".to_string()))?;
    let task_type = TaskType::from_str(row.try_get::<String, _>("task_type")?.as_str())
        .ok_or_else(|| DomainError::ValidationFailed("unknown task_type in row".to_string()))?;

    let claim_expires_at: Option<String> = row.try_get("claim_expires_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Task {
        id: row.try_get("id")?,
        key: row.try_get("key")?,
        title: row.try_get("title")?,
        goal: row.try_get("goal")?,
        phase: row.try_get("phase")?,
        sequence: row.try_get("sequence")?,
        status,
        complexity,
        task_type,
        test_file: row.try_get("test_file")?,
        impl_file: row.try_get("impl_file")?,
        depends_on,
        acceptance_criteria,
        module_exports,
        verify_command: row.try_get("verify_command")?,
        done_criteria: row.try_get("done_criteria")?,
        implementation_hints: row.try_get("implementation_hints")?,
        claimed_by: row.try_get("claimed_by")?,
        claim_expires_at: claim_expires_at.map(|s| DateTime::parse_from_rfc3339(&s).unwrap().with_timezone(&Utc)),
        version: row.try_get("version")?,
        created_at: DateTime::parse_from_rfc3339(&created_at).unwrap().with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at).unwrap().with_timezone(&Utc),
    })
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[tracing::instrument(skip(self, task), err)]
    async fn create_task(&self, task: Task) -> DomainResult<Task> {
        let acceptance_json = serde_json::to_string(&task.acceptance_criteria)?;
        let exports_json = serde_json::to_string(&task.module_exports)?;
        if acceptance_json.len() > JSON_SIZE_WARN_BYTES {
            tracing::warn!(task_key = %task.key, size_bytes = acceptance_json.len(), "acceptance_criteria json exceeds size threshold");
        }

        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM tasks WHERE key = ?")
            .bind(&task.key)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(DomainError::DuplicateKey(task.key));
        }

        let phase_clash: Option<(i64,)> = sqlx::query_as("SELECT id FROM tasks WHERE phase = ? AND sequence = ?")
            .bind(task.phase)
            .bind(task.sequence)
            .fetch_optional(&self.pool)
            .await?;
        if phase_clash.is_some() {
            return Err(DomainError::InvalidPhase { phase: task.phase, sequence: task.sequence });
        }

        let result = sqlx::query(
            r#"INSERT INTO tasks (key, title, goal, phase, sequence, status, complexity, task_type,
               test_file, impl_file, acceptance_criteria, module_exports, verify_command, done_criteria,
               implementation_hints, claimed_by, claim_expires_at, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&task.key)
        .bind(&task.title)
        .bind(&task.goal)
        .bind(task.phase)
        .bind(task.sequence)
        .bind(task.status.as_str())
        .bind(task.complexity.as_str())
        .bind(task.task_type.as_str())
        .bind(&task.test_file)
        .bind(&task.impl_file)
        .bind(&acceptance_json)
        .bind(&exports_json)
        .bind(&task.verify_command)
        .bind(&task.done_criteria)
        .bind(&task.implementation_hints)
        .bind(task.claimed_by)
        .bind(task.claim_expires_at.map(|t| t.to_rfc3339()))
        .bind(task.version)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        for dep in &task.depends_on {
            sqlx::query("INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_key) VALUES (?, ?)")
                .bind(id)
                .bind(dep)
                .execute(&self.pool)
                .await?;
        }

        self.get_task(id).await
    }

    async fn get_claimable_tasks(&self, phase: Option<i64>) -> DomainResult<Vec<Task>> {
        let now = Utc::now().to_rfc3339();
        let rows = if let Some(phase) = phase {
            sqlx::query(
                "SELECT * FROM tasks WHERE phase = ?
                 AND (status = 'pending' OR (status = 'in_progress' AND claim_expires_at < ?))
                 ORDER BY phase, sequence",
            )
            .bind(phase)
            .bind(&now)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT * FROM tasks
                 WHERE status = 'pending' OR (status = 'in_progress' AND claim_expires_at < ?)
                 ORDER BY phase, sequence",
            )
            .bind(&now)
            .fetch_all(&self.pool)
            .await?
        };

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let depends_on = self.load_dependencies(id).await?;
            let task = row_to_task(row, depends_on)?;
            let complete_deps = all_dependencies_complete(&self.pool, &task.depends_on).await?;
            if complete_deps {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    async fn get_task(&self, task_id: i64) -> DomainResult<Task> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DomainError::TaskNotFound(task_id.to_string()))?;
        let depends_on = self.load_dependencies(task_id).await?;
        row_to_task(&row, depends_on)
    }

    async fn get_task_by_key(&self, key: &str) -> DomainResult<Task> {
        let row = sqlx::query("SELECT * FROM tasks WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DomainError::TaskNotFound(key.to_string()))?;
        let id: i64 = row.try_get("id")?;
        let depends_on = self.load_dependencies(id).await?;
        row_to_task(&row, depends_on)
    }

    #[tracing::instrument(skip(self), err)]
    async fn claim_task(&self, task_id: i64, worker_id: i64, timeout: chrono::Duration) -> DomainResult<bool> {
        let task = self.get_task(task_id).await?;
        let now = Utc::now();
        let claimable = match task.status {
            TaskStatus::Pending => task.claimed_by.is_none(),
            TaskStatus::InProgress => task.claim_expires_at.map(|exp| exp < now).unwrap_or(true),
            _ => false,
        };
        if !claimable {
            return Ok(false);
        }

        let expires_at = now + timeout;
        let result = sqlx::query(
            "UPDATE tasks SET status = 'in_progress', claimed_by = ?, claim_expires_at = ?, version = version + 1, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(worker_id)
        .bind(expires_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(task_id)
        .bind(task.version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self), err)]
    async fn release_task(&self, task_id: i64, outcome: ReleaseOutcome) -> DomainResult<()> {
        let status = match outcome {
            ReleaseOutcome::Complete => TaskStatus::Complete,
            ReleaseOutcome::Blocked => TaskStatus::Blocked,
            ReleaseOutcome::BlockedStaticReview => TaskStatus::BlockedStaticReview,
            ReleaseOutcome::Pending => TaskStatus::Pending,
        };
        sqlx::query(
            "UPDATE tasks SET status = ?, claimed_by = NULL, claim_expires_at = NULL, version = version + 1, updated_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        let task = self.get_task(task_id).await?;
        self.notify(&task);
        Ok(())
    }

    async fn update_task_fields(&self, task_id: i64, test_file: Option<&str>) -> DomainResult<()> {
        if let Some(test_file) = test_file {
            sqlx::query("UPDATE tasks SET test_file = ?, version = version + 1, updated_at = ? WHERE id = ?")
                .bind(test_file)
                .bind(Utc::now().to_rfc3339())
                .bind(task_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn record_stage_attempt(&self, attempt: Attempt) -> DomainResult<Attempt> {
        let result = sqlx::query(
            r#"INSERT INTO attempts (task_id, stage, attempt_number, success, error_message, started_at,
               completed_at, test_exit_code, lint_exit_code, type_exit_code)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(attempt.task_id)
        .bind(attempt.stage.as_str())
        .bind(attempt.attempt_number)
        .bind(attempt.success)
        .bind(&attempt.error_message)
        .bind(attempt.started_at.to_rfc3339())
        .bind(attempt.completed_at.map(|t| t.to_rfc3339()))
        .bind(attempt.exit_codes.test_exit_code)
        .bind(attempt.exit_codes.lint_exit_code)
        .bind(attempt.exit_codes.type_exit_code)
        .execute(&self.pool)
        .await?;

        Ok(Attempt { id: result.last_insert_rowid(), ..attempt })
    }

    async fn next_attempt_number(&self, task_id: i64, stage: Stage) -> DomainResult<u32> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(attempt_number) FROM attempts WHERE task_id = ? AND stage = ?")
            .bind(task_id)
            .bind(stage.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.unwrap_or(0) as u32 + 1)
    }

    async fn register_worker(&self, worker: Worker) -> DomainResult<Worker> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO workers (id, status, registered_at, last_heartbeat, current_task_id,
               branch_name, total_claims, completed_claims, failed_claims, total_invocations)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(worker.id)
        .bind(worker.status.as_str())
        .bind(worker.registered_at.to_rfc3339())
        .bind(worker.last_heartbeat.to_rfc3339())
        .bind(worker.current_task_id)
        .bind(&worker.branch_name)
        .bind(worker.total_claims as i64)
        .bind(worker.completed_claims as i64)
        .bind(worker.failed_claims as i64)
        .bind(worker.total_invocations as i64)
        .execute(&self.pool)
        .await?;
        Ok(worker)
    }

    async fn update_task_heartbeat(&self, worker_id: i64, task_id: i64) -> DomainResult<()> {
        let now = Utc::now();
        sqlx::query("UPDATE workers SET last_heartbeat = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE tasks SET claim_expires_at = ? WHERE id = ? AND claimed_by = ?")
            .bind((now + chrono::Duration::seconds(300)).to_rfc3339())
            .bind(task_id)
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_stale_workers(&self, timeout: chrono::Duration) -> DomainResult<Vec<Worker>> {
        let cutoff = (Utc::now() - timeout).to_rfc3339();
        let rows = sqlx::query("SELECT * FROM workers WHERE last_heartbeat < ?")
            .bind(&cutoff)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_worker).collect()
    }

    async fn save_worker(&self, worker: Worker) -> DomainResult<()> {
        self.register_worker(worker).await?;
        Ok(())
    }

    async fn start_run(&self, max_workers: u32) -> DomainResult<ExecutionRun> {
        let run = ExecutionRun::start(max_workers);
        let result = sqlx::query(
            "INSERT INTO execution_runs (started_at, max_workers, status, total_invocations) VALUES (?, ?, ?, ?)",
        )
        .bind(run.started_at.to_rfc3339())
        .bind(run.max_workers)
        .bind(run.status.as_str())
        .bind(run.total_invocations as i64)
        .execute(&self.pool)
        .await?;
        Ok(ExecutionRun { id: result.last_insert_rowid(), ..run })
    }

    async fn finish_run(&self, run: ExecutionRun) -> DomainResult<()> {
        let details_json = run.validation_details.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            "UPDATE execution_runs SET completed_at = ?, status = ?, total_invocations = ?, validation_status = ?, validation_details = ?
             WHERE id = ?",
        )
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .bind(run.status.as_str())
        .bind(run.total_invocations as i64)
        .bind(run.validation_status.map(|s| s.as_str()))
        .bind(details_json)
        .bind(run.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_breaker(&self, level: CircuitLevel, identifier: &str) -> DomainResult<CircuitBreakerRecord> {
        let row = sqlx::query("SELECT * FROM circuit_breakers WHERE level = ? AND identifier = ?")
            .bind(level.as_str())
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_breaker(&row),
            None => {
                let fresh = CircuitBreakerRecord::new(level, identifier);
                self.save_breaker(fresh.clone()).await?;
                Ok(fresh)
            }
        }
    }

    /// Upserts a breaker record. Callers are expected to serialize
    /// `get_breaker`/`save_breaker` pairs per `(level, identifier)`
    /// (`services::circuit_breaker` does this); `version` is bumped by the
    /// caller and stored for observability rather than re-checked here.
    async fn save_breaker(&self, record: CircuitBreakerRecord) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO circuit_breakers (level, identifier, state, failure_count, success_count, extensions_count,
               opened_at, last_failure_at, last_success_at, last_state_change_at, version)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (level, identifier) DO UPDATE SET
                   state = excluded.state, failure_count = excluded.failure_count, success_count = excluded.success_count,
                   extensions_count = excluded.extensions_count, opened_at = excluded.opened_at,
                   last_failure_at = excluded.last_failure_at, last_success_at = excluded.last_success_at,
                   last_state_change_at = excluded.last_state_change_at, version = excluded.version"#,
        )
        .bind(record.level.as_str())
        .bind(&record.identifier)
        .bind(record.state.as_str())
        .bind(record.failure_count)
        .bind(record.success_count)
        .bind(record.extensions_count)
        .bind(record.opened_at.map(|t| t.to_rfc3339()))
        .bind(record.last_failure_at.map(|t| t.to_rfc3339()))
        .bind(record.last_success_at.map(|t| t.to_rfc3339()))
        .bind(record.last_state_change_at.map(|t| t.to_rfc3339()))
        .bind(record.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn tasks_in_phase(&self, phase: i64) -> DomainResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE phase = ? ORDER BY sequence").bind(phase).fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            out.push(row_to_task(row, self.load_dependencies(id).await?)?);
        }
        Ok(out)
    }

    async fn tasks_in_phases_before(&self, phase: i64) -> DomainResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE phase < ? ORDER BY phase, sequence").bind(phase).fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            out.push(row_to_task(row, self.load_dependencies(id).await?)?);
        }
        Ok(out)
    }

    async fn all_tasks(&self) -> DomainResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY phase, sequence").fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            out.push(row_to_task(row, self.load_dependencies(id).await?)?);
        }
        Ok(out)
    }

    fn on_status_change(&self, callback: Box<dyn Fn(&Task) + Send + Sync>) {
        self.observers.lock().unwrap().push(callback);
    }
}

async fn all_dependencies_complete(pool: &SqlitePool, depends_on: &[String]) -> DomainResult<bool> {
    for key in depends_on {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM tasks WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
        match row {
            Some((status,)) if status == "complete" => continue,
            _ => return Ok(false),
        }
    }
    Ok(true)
}

fn row_to_worker(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Worker> {
    let status = WorkerStatus::from_str(row.try_get::<String, _>("status")?.as_str())
        .ok_or_else(|| DomainError::ValidationFailed("unknown worker status".to_string()))?;
    let registered_at: String = row.try_get("registered_at")?;
    let last_heartbeat: String = row.try_get("last_heartbeat")?;
    Ok(Worker {
        id: row.try_get("id")?,
        status,
        registered_at: DateTime::parse_from_rfc3339(&registered_at).unwrap().with_timezone(&Utc),
        last_heartbeat: DateTime::parse_from_rfc3339(&last_heartbeat).unwrap().with_timezone(&Utc),
        current_task_id: row.try_get("current_task_id")?,
        branch_name: row.try_get("branch_name")?,
        total_claims: row.try_get::<i64, _>("total_claims")? as u64,
        completed_claims: row.try_get::<i64, _>("completed_claims")? as u64,
        failed_claims: row.try_get::<i64, _>("failed_claims")? as u64,
        total_invocations: row.try_get::<i64, _>("total_invocations")? as u64,
    })
}

fn row_to_breaker(row: &sqlx::sqlite::SqliteRow) -> DomainResult<CircuitBreakerRecord> {
    let level = CircuitLevel::from_str(row.try_get::<String, _>("level")?.as_str())
        .ok_or_else(|| DomainError::ValidationFailed("unknown breaker level".to_string()))?;
    let state = CircuitState::from_str(row.try_get::<String, _>("state")?.as_str())
        .ok_or_else(|| DomainError::ValidationFailed("unknown breaker state".to_string()))?;
    let parse = |s: Option<String>| s.map(|s| DateTime::parse_from_rfc3339(&s).unwrap().with_timezone(&Utc));
    Ok(CircuitBreakerRecord {
        id: row.try_get("id")?,
        level,
        identifier: row.try_get("identifier")?,
        state,
        failure_count: row.try_get("failure_count")?,
        success_count: row.try_get("success_count")?,
        extensions_count: row.try_get("extensions_count")?,
        opened_at: parse(row.try_get("opened_at")?),
        last_failure_at: parse(row.try_get("last_failure_at")?),
        last_success_at: parse(row.try_get("last_success_at")?),
        last_state_change_at: parse(row.try_get("last_state_change_at")?),
        version: row.try_get("version")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::adapters::sqlite::migrations::{all_embedded_migrations, Migrator};

    async fn fresh_store() -> SqliteTaskStore {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.unwrap();
        SqliteTaskStore::new(pool)
    }

    #[tokio::test]
    async fn create_task_rejects_duplicate_key() {
        let store = fresh_store().await;
        let t1 = Task::new("K-1", "Title", "Goal").with_phase(0, 0);
        store.create_task(t1).await.unwrap();

        let t2 = Task::new("K-1", "Other", "Goal").with_phase(0, 1);
        let err = store.create_task(t2).await.unwrap_err();
        assert!(matches!(err, DomainError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn create_task_rejects_duplicate_phase_sequence() {
        let store = fresh_store().await;
        store.create_task(Task::new("K-1", "Title", "Goal").with_phase(0, 0)).await.unwrap();
        let err = store.create_task(Task::new("K-2", "Title", "Goal").with_phase(0, 0)).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidPhase { .. }));
    }

    #[tokio::test]
    async fn claim_task_is_exclusive() {
        let store = fresh_store().await;
        let created = store.create_task(Task::new("K-1", "Title", "Goal").with_phase(0, 0)).await.unwrap();

        let first = store.claim_task(created.id, 1, chrono::Duration::seconds(60)).await.unwrap();
        let second = store.claim_task(created.id, 2, chrono::Duration::seconds(60)).await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn claimable_tasks_respect_dependencies() {
        let store = fresh_store().await;
        let dep = store.create_task(Task::new("K-1", "Title", "Goal").with_phase(0, 0)).await.unwrap();
        store
            .create_task(Task::new("K-2", "Title", "Goal").with_phase(0, 1).with_dependency("K-1"))
            .await
            .unwrap();

        let claimable = store.get_claimable_tasks(None).await.unwrap();
        assert_eq!(claimable.len(), 1);
        assert_eq!(claimable[0].key, "K-1");

        store.claim_task(dep.id, 1, chrono::Duration::seconds(60)).await.unwrap();
        store.release_task(dep.id, ReleaseOutcome::Complete).await.unwrap();

        let claimable = store.get_claimable_tasks(None).await.unwrap();
        assert_eq!(claimable.len(), 1);
        assert_eq!(claimable[0].key, "K-2");
    }

    #[tokio::test]
    async fn claimable_tasks_include_stale_in_progress_claims() {
        let store = fresh_store().await;
        let created = store.create_task(Task::new("K-1", "Title", "Goal").with_phase(0, 0)).await.unwrap();

        assert!(store.claim_task(created.id, 1, chrono::Duration::seconds(-1)).await.unwrap());

        let claimable = store.get_claimable_tasks(None).await.unwrap();
        assert_eq!(claimable.len(), 1, "a claim with an expired timeout should be reclaimable");
        assert_eq!(claimable[0].key, "K-1");
        assert_eq!(claimable[0].status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn claimable_tasks_exclude_live_in_progress_claims() {
        let store = fresh_store().await;
        let created = store.create_task(Task::new("K-1", "Title", "Goal").with_phase(0, 0)).await.unwrap();

        assert!(store.claim_task(created.id, 1, chrono::Duration::seconds(300)).await.unwrap());

        let claimable = store.get_claimable_tasks(None).await.unwrap();
        assert!(claimable.is_empty(), "a claim still within its timeout must not be reclaimable");
    }

    #[tokio::test]
    async fn release_task_notifies_observers() {
        let store = fresh_store().await;
        let created = store.create_task(Task::new("K-1", "Title", "Goal").with_phase(0, 0)).await.unwrap();

        let observed: std::sync::Arc<std::sync::Mutex<Option<TaskStatus>>> = std::sync::Arc::new(std::sync::Mutex::new(None));
        let observed_clone = observed.clone();
        store.on_status_change(Box::new(move |task| {
            *observed_clone.lock().unwrap() = Some(task.status);
        }));

        store.claim_task(created.id, 1, chrono::Duration::seconds(60)).await.unwrap();
        store.release_task(created.id, ReleaseOutcome::Complete).await.unwrap();

        assert_eq!(*observed.lock().unwrap(), Some(TaskStatus::Complete));
    }

    #[tokio::test]
    async fn circuit_breaker_round_trips_through_store() {
        let store = fresh_store().await;
        let mut breaker = store.get_breaker(CircuitLevel::Stage, "green").await.unwrap();
        breaker.record_failure(1, chrono::Duration::seconds(30), chrono::Duration::seconds(600));
        store.save_breaker(breaker.clone()).await.unwrap();

        let reloaded = store.get_breaker(CircuitLevel::Stage, "green").await.unwrap();
        assert_eq!(reloaded.state, CircuitState::Open);
    }
}
