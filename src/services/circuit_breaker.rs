//! Circuit Breaker service (spec §4.7): wraps the persisted
//! `CircuitBreakerRecord` state machine with store read-through/write-
//! through and a flap-detection ring buffer. The state machine itself
//! lives in `domain::models::circuit_breaker`; this service is what the
//! pipeline and worker pool actually call.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CircuitBreakerRecord, CircuitLevel};
use crate::domain::ports::TaskStore;
use crate::infrastructure::config::CircuitBreakerConfig;

/// Per-level thresholds resolved from `CircuitBreakerConfig`.
struct LevelThresholds {
    failure_threshold: u32,
    success_threshold: u32,
}

/// Report returned by [`CircuitBreakerService::report_failure`]: whether
/// the breaker is now open, and whether it is flapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerReport {
    pub allows: bool,
    pub flapping: bool,
}

/// Read-through/write-through circuit breaker service. A single
/// `report_failure`/`report_success` call is serialized per `(level,
/// identifier)` via a per-key async mutex (spec §4.7 "Ordering guarantee").
pub struct CircuitBreakerService {
    store: Arc<dyn TaskStore>,
    config: CircuitBreakerConfig,
    base_open_duration: Duration,
    max_open_duration: Duration,
    flap_window: Duration,
    /// Recent state-change timestamps per `(level, identifier)`, capped to
    /// the flap window on each access.
    flap_log: Mutex<HashMap<(CircuitLevel, String), Vec<DateTime<Utc>>>>,
    /// Serializes read-modify-write per `(level, identifier)`.
    locks: Mutex<HashMap<(CircuitLevel, String), Arc<Mutex<()>>>>,
}

impl CircuitBreakerService {
    pub fn new(store: Arc<dyn TaskStore>, config: CircuitBreakerConfig) -> Self {
        Self {
            base_open_duration: Duration::seconds(config.base_open_duration_secs as i64),
            max_open_duration: Duration::seconds(config.max_open_duration_secs as i64),
            flap_window: Duration::seconds(config.flap_window_secs as i64),
            store,
            config,
            flap_log: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn thresholds(&self, level: CircuitLevel) -> LevelThresholds {
        match level {
            CircuitLevel::Stage => LevelThresholds {
                failure_threshold: self.config.stage_failure_threshold,
                success_threshold: self.config.stage_success_threshold,
            },
            CircuitLevel::Worker => LevelThresholds {
                failure_threshold: self.config.worker_failure_threshold,
                success_threshold: self.config.worker_success_threshold,
            },
            CircuitLevel::System => LevelThresholds {
                failure_threshold: self.config.system_failure_threshold,
                success_threshold: self.config.system_success_threshold,
            },
        }
    }

    async fn key_lock(&self, level: CircuitLevel, identifier: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((level, identifier.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn record_transition(&self, level: CircuitLevel, identifier: &str) -> bool {
        let mut log = self.flap_log.lock().await;
        let now = Utc::now();
        let entry = log.entry((level, identifier.to_string())).or_default();
        entry.push(now);
        let window_start = now - self.flap_window;
        entry.retain(|ts| *ts >= window_start);
        entry.len() as u32 >= self.config.flap_threshold
    }

    /// Whether calls through this breaker are currently allowed. Auto-
    /// probes `open -> half_open` as a side effect, per the domain model.
    #[tracing::instrument(skip(self), err)]
    pub async fn allows(&self, level: CircuitLevel, identifier: &str) -> DomainResult<bool> {
        let _guard = self.key_lock(level, identifier).await.lock_owned().await;
        let mut record = self.store.get_breaker(level, identifier).await?;
        let was_open = record.state == crate::domain::models::CircuitState::Open;
        let open_duration = record.current_open_duration(self.base_open_duration, self.max_open_duration);
        let allowed = record.allows(open_duration, Utc::now());
        if was_open && record.state != crate::domain::models::CircuitState::Open {
            self.store.save_breaker(record).await?;
        }
        Ok(allowed)
    }

    /// Report a failure for `(level, identifier)`. Returns whether the
    /// breaker now allows calls and whether it is flapping (spec §4.7).
    #[tracing::instrument(skip(self), err)]
    pub async fn report_failure(&self, level: CircuitLevel, identifier: &str, reason: &str) -> DomainResult<BreakerReport> {
        let _guard = self.key_lock(level, identifier).await.lock_owned().await;
        let thresholds = self.thresholds(level);
        let mut record = self.store.get_breaker(level, identifier).await?;
        let was_state = record.state;
        let extended = record.record_failure(thresholds.failure_threshold, self.base_open_duration, self.max_open_duration);
        let transitioned = record.state != was_state;

        tracing::warn!(level = level.as_str(), identifier, reason, transitioned, "breaker recorded failure");

        let flapping = if transitioned { self.record_transition(level, identifier).await } else { false };
        if let Some(duration) = extended {
            tracing::warn!(level = level.as_str(), identifier, open_duration_secs = duration.num_seconds(), "breaker opened");
        }

        self.store.save_breaker(record.clone()).await?;
        Ok(BreakerReport { allows: record.state != crate::domain::models::CircuitState::Open, flapping })
    }

    /// Report a success for `(level, identifier)`.
    #[tracing::instrument(skip(self), err)]
    pub async fn report_success(&self, level: CircuitLevel, identifier: &str) -> DomainResult<()> {
        let _guard = self.key_lock(level, identifier).await.lock_owned().await;
        let thresholds = self.thresholds(level);
        let mut record = self.store.get_breaker(level, identifier).await?;
        let was_state = record.state;
        record.record_success(thresholds.success_threshold);
        if record.state != was_state {
            self.record_transition(level, identifier).await;
            tracing::info!(level = level.as_str(), identifier, "breaker closed");
        }
        self.store.save_breaker(record).await?;
        Ok(())
    }

    /// Force a breaker closed, clearing counters (externally-exposed
    /// manual reset operation, spec §4.7).
    #[tracing::instrument(skip(self), err)]
    pub async fn reset(&self, level: CircuitLevel, identifier: &str) -> DomainResult<()> {
        let _guard = self.key_lock(level, identifier).await.lock_owned().await;
        let mut record: CircuitBreakerRecord = self.store.get_breaker(level, identifier).await?;
        record.reset();
        self.store.save_breaker(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator, SqliteTaskStore};
    use crate::domain::models::CircuitLevel;

    async fn test_service() -> CircuitBreakerService {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.unwrap();
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(pool));
        CircuitBreakerService::new(
            store,
            CircuitBreakerConfig {
                stage_failure_threshold: 2,
                stage_success_threshold: 1,
                base_open_duration_secs: 0,
                max_open_duration_secs: 60,
                flap_window_secs: 300,
                flap_threshold: 2,
                ..CircuitBreakerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn opens_after_failure_threshold_and_blocks_calls() {
        let svc = test_service().await;
        svc.report_failure(CircuitLevel::Stage, "green", "timeout").await.unwrap();
        let report = svc.report_failure(CircuitLevel::Stage, "green", "timeout").await.unwrap();
        assert!(!report.allows);
        assert!(!svc.allows(CircuitLevel::Stage, "green").await.unwrap());
    }

    #[tokio::test]
    async fn flags_flapping_after_repeated_transitions() {
        let svc = test_service().await;
        for _ in 0..2 {
            svc.report_failure(CircuitLevel::Stage, "verify", "x").await.unwrap();
            svc.report_failure(CircuitLevel::Stage, "verify", "x").await.unwrap();
            svc.report_success(CircuitLevel::Stage, "verify").await.unwrap();
        }
        let last = svc.report_failure(CircuitLevel::Stage, "verify", "x").await.unwrap();
        let last = svc.report_failure(CircuitLevel::Stage, "verify", "x").await.unwrap().flapping || last.flapping;
        assert!(last);
    }

    #[tokio::test]
    async fn reopen_after_half_open_failure_waits_out_extended_duration() {
        let svc = test_service().await;
        svc.report_failure(CircuitLevel::Stage, "flaky", "x").await.unwrap();
        svc.report_failure(CircuitLevel::Stage, "flaky", "x").await.unwrap();
        assert!(svc.allows(CircuitLevel::Stage, "flaky").await.unwrap(), "base_open_duration_secs=0 should probe immediately");
        svc.report_failure(CircuitLevel::Stage, "flaky", "x").await.unwrap();

        let record = svc.store.get_breaker(CircuitLevel::Stage, "flaky").await.unwrap();
        assert_eq!(record.extensions_count, 1);
        assert_eq!(record.state, crate::domain::models::CircuitState::Open);
        // extensions_count=1 must double a nonzero base, proving `allows()` would
        // wait out the extended duration rather than always the un-extended base.
        let base = Duration::seconds(30);
        assert_eq!(record.current_open_duration(base, Duration::seconds(600)), Duration::seconds(60));
    }

    #[tokio::test]
    async fn reset_forces_closed() {
        let svc = test_service().await;
        svc.report_failure(CircuitLevel::System, "system", "x").await.unwrap();
        svc.report_failure(CircuitLevel::System, "system", "x").await.unwrap();
        svc.reset(CircuitLevel::System, "system").await.unwrap();
        assert!(svc.allows(CircuitLevel::System, "system").await.unwrap());
    }
}
