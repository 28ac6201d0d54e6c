//! ExecutionRun domain model: one invocation of the worker pool, and the
//! validation output the end-of-run validator persists onto it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Passed,
    Failed,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Status written to `ExecutionRun.validation_status` by the end-of-run
/// validator (spec §4.9 step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed,
    Failed,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Counts of satisfied/verifiable/total for a heuristic category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeuristicCounts {
    pub satisfied: u32,
    pub verifiable: u32,
    pub total: u32,
}

/// Per-task acceptance-criteria heuristic result (spec §4.9.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcTaskResult {
    pub task_key: String,
    pub counts: HeuristicCounts,
    pub unverifiable_criteria: Vec<String>,
}

/// `{status, regressions, done, ac, unimportable_exports, validation_wall_clock_s}`,
/// the JSON-serializable shape persisted to `ExecutionRun.validation_details`
/// (spec §6 "Run-validator output").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetails {
    pub status: ValidationStatus,
    pub regressions: Vec<String>,
    pub done: HeuristicCounts,
    pub ac: AcSummary,
    pub unimportable_exports: Vec<String>,
    pub validation_wall_clock_s: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcSummary {
    pub counts: HeuristicCounts,
    pub per_task: Vec<AcTaskResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub max_workers: u32,
    pub status: RunStatus,
    pub total_invocations: u64,
    pub validation_status: Option<ValidationStatus>,
    pub validation_details: Option<ValidationDetails>,
}

impl ExecutionRun {
    pub fn start(max_workers: u32) -> Self {
        Self {
            id: 0,
            started_at: Utc::now(),
            completed_at: None,
            max_workers,
            status: RunStatus::Running,
            total_invocations: 0,
            validation_status: None,
            validation_details: None,
        }
    }

    pub fn finish(mut self, status: RunStatus) -> Self {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn with_validation(mut self, details: ValidationDetails) -> Self {
        self.validation_status = Some(details.status);
        self.validation_details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_run_is_running_with_no_validation() {
        let r = ExecutionRun::start(4);
        assert_eq!(r.status, RunStatus::Running);
        assert!(r.validation_status.is_none());
    }

    #[test]
    fn finished_run_sets_completed_at() {
        let r = ExecutionRun::start(4).finish(RunStatus::Passed);
        assert_eq!(r.status, RunStatus::Passed);
        assert!(r.completed_at.is_some());
    }

    #[test]
    fn validation_details_round_trip_through_json() {
        let details = ValidationDetails {
            status: ValidationStatus::Failed,
            regressions: vec!["tests/test_foo.py".to_string()],
            done: HeuristicCounts { satisfied: 2, verifiable: 3, total: 3 },
            ac: AcSummary::default(),
            unimportable_exports: vec!["pkg.mod.Thing".to_string()],
            validation_wall_clock_s: 1.25,
        };
        let json = serde_json::to_string(&details).unwrap();
        let back: ValidationDetails = serde_json::from_str(&json).unwrap();
        assert_eq!(details, back);
    }
}
