//! Task domain model.
//!
//! A task is an atomic unit of TDD work produced by the decomposition
//! pipeline. Tasks form a DAG keyed by `key` (not `id`): `depends_on` holds
//! the string keys of prerequisite tasks, which must all be `Complete`
//! before this task becomes claimable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Status of a task in the TDD execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on dependencies, or freshly decomposed.
    Pending,
    /// Claimed by a worker and actively moving through pipeline stages.
    InProgress,
    /// All stages passed; commit recorded.
    Complete,
    /// A fatal-to-task error released the task without completion.
    Blocked,
    /// Static review (lint/AST on the test file) rejected the task and the
    /// static-review circuit breaker was open.
    BlockedStaticReview,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Blocked => "blocked",
            Self::BlockedStaticReview => "blocked-static-review",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "complete" => Some(Self::Complete),
            "blocked" => Some(Self::Blocked),
            "blocked-static-review" => Some(Self::BlockedStaticReview),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Blocked | Self::BlockedStaticReview)
    }
}

/// Complexity classification; selects the LM model class for a task's
/// stages (escalated on GREEN retry, see `services::tdd_pipeline`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Escalate to the next-strongest model class, saturating at `High`.
    pub fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }
}

impl Default for Complexity {
    fn default() -> Self {
        Self::Medium
    }
}

/// What kind of TDD work this task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Full RED -> GREEN -> VERIFY cycle.
    Implement,
    /// Skips RED/GREEN; runs VERIFY -> (FIX -> RE_VERIFY) only. Produced
    /// either by the decomposition pipeline's overlap detector, or chosen
    /// directly for tasks whose implementation is expected to pre-exist.
    VerifyOnly,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implement => "implement",
            Self::VerifyOnly => "verify-only",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "implement" => Some(Self::Implement),
            "verify-only" => Some(Self::VerifyOnly),
            _ => None,
        }
    }
}

impl Default for TaskType {
    fn default() -> Self {
        Self::Implement
    }
}

/// A discrete unit of TDD work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Surrogate id, assigned by the store on insert. `0` before insert.
    pub id: i64,
    /// Globally unique stable identifier, e.g. `API-TDD-07-03`.
    pub key: String,
    pub title: String,
    pub goal: String,
    pub phase: i64,
    pub sequence: i64,
    pub status: TaskStatus,
    pub complexity: Complexity,
    pub task_type: TaskType,
    pub test_file: String,
    pub impl_file: String,
    /// Task keys that must be `Complete` before this task is claimable.
    pub depends_on: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub module_exports: Vec<String>,
    pub verify_command: Option<String>,
    pub done_criteria: Option<String>,
    pub implementation_hints: Option<String>,
    pub claimed_by: Option<i64>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new, unsubmitted task (`id = 0`, `version = 1`).
    pub fn new(key: impl Into<String>, title: impl Into<String>, goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            key: key.into(),
            title: title.into(),
            goal: goal.into(),
            phase: 0,
            sequence: 0,
            status: TaskStatus::Pending,
            complexity: Complexity::default(),
            task_type: TaskType::default(),
            test_file: String::new(),
            impl_file: String::new(),
            depends_on: Vec::new(),
            acceptance_criteria: Vec::new(),
            module_exports: Vec::new(),
            verify_command: None,
            done_criteria: None,
            implementation_hints: None,
            claimed_by: None,
            claim_expires_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_phase(mut self, phase: i64, sequence: i64) -> Self {
        self.phase = phase;
        self.sequence = sequence;
        self
    }

    pub fn with_files(mut self, test_file: impl Into<String>, impl_file: impl Into<String>) -> Self {
        self.test_file = test_file.into();
        self.impl_file = impl_file.into();
        self
    }

    pub fn with_dependency(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.depends_on.contains(&key) && key != self.key {
            self.depends_on.push(key);
        }
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    /// Whether this task is claimable given the set of currently-complete
    /// task keys and the current time (used to detect stale claims).
    pub fn is_claimable(&self, complete_keys: &HashSet<String>, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Pending && self.status != TaskStatus::InProgress {
            return false;
        }
        let deps_satisfied = self.depends_on.iter().all(|d| complete_keys.contains(d));
        if !deps_satisfied {
            return false;
        }
        match self.status {
            TaskStatus::Pending => self.claimed_by.is_none(),
            TaskStatus::InProgress => self
                .claim_expires_at
                .map(|exp| exp < now)
                .unwrap_or(true),
            _ => false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.key.trim().is_empty() {
            return Err("task key cannot be empty".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("task title cannot be empty".to_string());
        }
        if self.depends_on.contains(&self.key) {
            return Err("task cannot depend on itself".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_task_is_pending_and_unclaimed() {
        let t = Task::new("API-01", "Title", "Goal");
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.claimed_by.is_none());
        assert_eq!(t.version, 1);
    }

    #[test]
    fn claimable_requires_dependencies_complete() {
        let t = Task::new("API-02", "Title", "Goal").with_dependency("API-01");
        let now = Utc::now();
        assert!(!t.is_claimable(&HashSet::new(), now));

        let mut complete = HashSet::new();
        complete.insert("API-01".to_string());
        assert!(t.is_claimable(&complete, now));
    }

    #[test]
    fn stale_in_progress_is_reclaimable() {
        let mut t = Task::new("API-03", "Title", "Goal");
        t.status = TaskStatus::InProgress;
        t.claimed_by = Some(1);
        t.claim_expires_at = Some(Utc::now() - Duration::seconds(5));
        assert!(t.is_claimable(&HashSet::new(), Utc::now()));

        t.claim_expires_at = Some(Utc::now() + Duration::seconds(60));
        assert!(!t.is_claimable(&HashSet::new(), Utc::now()));
    }

    #[test]
    fn self_dependency_is_invalid() {
        let t = Task::new("API-04", "Title", "Goal").with_dependency("API-04");
        assert!(t.validate().is_err());
    }

    #[test]
    fn complexity_escalates_and_saturates() {
        assert_eq!(Complexity::Low.escalate(), Complexity::Medium);
        assert_eq!(Complexity::Medium.escalate(), Complexity::High);
        assert_eq!(Complexity::High.escalate(), Complexity::High);
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Complete,
            TaskStatus::Blocked,
            TaskStatus::BlockedStaticReview,
        ] {
            assert_eq!(TaskStatus::from_str(s.as_str()), Some(s));
        }
    }
}
