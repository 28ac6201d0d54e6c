//! Worker domain model: one orchestrator-owned concurrency slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Active,
    Idle,
    Dead,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Dead => "dead",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "idle" => Some(Self::Idle),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: i64,
    pub status: WorkerStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub current_task_id: Option<i64>,
    pub branch_name: Option<String>,
    pub total_claims: u64,
    pub completed_claims: u64,
    pub failed_claims: u64,
    pub total_invocations: u64,
}

impl Worker {
    pub fn register(id: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: WorkerStatus::Idle,
            registered_at: now,
            last_heartbeat: now,
            current_task_id: None,
            branch_name: None,
            total_claims: 0,
            completed_claims: 0,
            failed_claims: 0,
            total_invocations: 0,
        }
    }

    pub fn begin_claim(&mut self, task_id: i64) {
        self.status = WorkerStatus::Active;
        self.current_task_id = Some(task_id);
        self.total_claims += 1;
        self.last_heartbeat = Utc::now();
    }

    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    pub fn finish_claim(&mut self, succeeded: bool) {
        if succeeded {
            self.completed_claims += 1;
        } else {
            self.failed_claims += 1;
        }
        self.current_task_id = None;
        self.status = WorkerStatus::Idle;
    }

    pub fn is_stale(&self, timeout: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.last_heartbeat > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn registered_worker_is_idle() {
        let w = Worker::register(1);
        assert_eq!(w.status, WorkerStatus::Idle);
        assert!(w.current_task_id.is_none());
    }

    #[test]
    fn claim_lifecycle_updates_status_and_counters() {
        let mut w = Worker::register(1);
        w.begin_claim(42);
        assert_eq!(w.status, WorkerStatus::Active);
        assert_eq!(w.current_task_id, Some(42));
        assert_eq!(w.total_claims, 1);

        w.finish_claim(true);
        assert_eq!(w.status, WorkerStatus::Idle);
        assert_eq!(w.completed_claims, 1);
        assert!(w.current_task_id.is_none());
    }

    #[test]
    fn stale_detection_uses_heartbeat_timeout() {
        let mut w = Worker::register(1);
        w.last_heartbeat = Utc::now() - Duration::seconds(120);
        assert!(w.is_stale(Duration::seconds(60), Utc::now()));
        assert!(!w.is_stale(Duration::seconds(600), Utc::now()));
    }
}
