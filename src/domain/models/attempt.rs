//! Attempt domain model: the append-only record of one stage execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stage an attempt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Red,
    RedFix,
    Green,
    Review,
    Fix,
    Verify,
    ReVerify,
    Refactor,
    Commit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::RedFix => "red_fix",
            Self::Green => "green",
            Self::Review => "review",
            Self::Fix => "fix",
            Self::Verify => "verify",
            Self::ReVerify => "re_verify",
            Self::Refactor => "refactor",
            Self::Commit => "commit",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "red" => Some(Self::Red),
            "red_fix" => Some(Self::RedFix),
            "green" => Some(Self::Green),
            "review" => Some(Self::Review),
            "fix" => Some(Self::Fix),
            "verify" => Some(Self::Verify),
            "re_verify" => Some(Self::ReVerify),
            "refactor" => Some(Self::Refactor),
            "commit" => Some(Self::Commit),
            _ => None,
        }
    }

    /// Stage breaker key this attempt's failures should be reported under.
    /// `commit` never fails a stage breaker; `red_fix`/`re_verify` share
    /// their parent's breaker identifier.
    pub fn breaker_identifier(&self) -> &'static str {
        match self {
            Self::Red | Self::RedFix => "red",
            Self::Green => "green",
            Self::Review => "static-review",
            Self::Fix => "fix",
            Self::Verify | Self::ReVerify => "verify",
            Self::Refactor => "refactor",
            Self::Commit => "commit",
        }
    }
}

/// Per-tool exit codes recorded alongside a VERIFY/RE_VERIFY attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExitCodes {
    pub test_exit_code: Option<i32>,
    pub lint_exit_code: Option<i32>,
    pub type_exit_code: Option<i32>,
}

/// Record of one stage execution attempt. Append-only; never updated after
/// `completed_at` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub task_id: i64,
    pub stage: Stage,
    /// 1-based, monotone per `(task_id, stage)`.
    pub attempt_number: u32,
    pub success: bool,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_codes: ToolExitCodes,
}

impl Attempt {
    pub fn start(task_id: i64, stage: Stage, attempt_number: u32) -> Self {
        Self {
            id: 0,
            task_id,
            stage,
            attempt_number,
            success: false,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            exit_codes: ToolExitCodes::default(),
        }
    }

    pub fn complete(mut self, success: bool, error_message: Option<String>) -> Self {
        self.success = success;
        self.error_message = error_message;
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn with_exit_codes(mut self, exit_codes: ToolExitCodes) -> Self {
        self.exit_codes = exit_codes;
        self
    }
}
