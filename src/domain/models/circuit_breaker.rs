//! Circuit breaker domain model: persisted breaker record and its state
//! machine. Transition logic lives here; persistence and the flap-detection
//! ring buffer live in `services::circuit_breaker`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which of the three independent breaker scopes a record belongs to
/// (spec §4.7): stage breakers key on stage name, worker breakers on
/// worker id, the system breaker is the single identifier `"system"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitLevel {
    Stage,
    Worker,
    System,
}

impl CircuitLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stage => "stage",
            Self::Worker => "worker",
            Self::System => "system",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stage" => Some(Self::Stage),
            "worker" => Some(Self::Worker),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "closed" => Some(Self::Closed),
            "open" => Some(Self::Open),
            "half_open" => Some(Self::HalfOpen),
            _ => None,
        }
    }
}

/// A persisted breaker record. One row per `(level, identifier)` pair, e.g.
/// `(Stage, "green")`, `(Worker, "3")`, `(System, "system")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerRecord {
    pub id: i64,
    pub level: CircuitLevel,
    pub identifier: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub extensions_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_state_change_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl CircuitBreakerRecord {
    pub fn new(level: CircuitLevel, identifier: impl Into<String>) -> Self {
        Self {
            id: 0,
            level,
            identifier: identifier.into(),
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            extensions_count: 0,
            opened_at: None,
            last_failure_at: None,
            last_success_at: None,
            last_state_change_at: None,
            version: 1,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.last_state_change_at = Some(Utc::now());
    }

    /// Apply a failure observation. `failure_threshold` gates closed->open;
    /// any half-open failure reopens and extends `open_duration` (returned,
    /// doubled up to `max_open_duration`, tracked via `extensions_count`).
    pub fn record_failure(
        &mut self,
        failure_threshold: u32,
        base_open_duration: chrono::Duration,
        max_open_duration: chrono::Duration,
    ) -> Option<chrono::Duration> {
        let now = Utc::now();
        self.last_failure_at = Some(now);
        self.failure_count += 1;
        self.success_count = 0;

        match self.state {
            CircuitState::Closed if self.failure_count >= failure_threshold => {
                self.transition(CircuitState::Open);
                self.opened_at = Some(now);
                Some(base_open_duration)
            }
            CircuitState::HalfOpen => {
                self.extensions_count += 1;
                let extended = extend_duration(base_open_duration, self.extensions_count, max_open_duration);
                self.transition(CircuitState::Open);
                self.opened_at = Some(now);
                Some(extended)
            }
            _ => None,
        }
    }

    /// Apply a success observation. `success_threshold` consecutive
    /// half-open successes close the breaker and reset counters.
    pub fn record_success(&mut self, success_threshold: u32) {
        let now = Utc::now();
        self.last_success_at = Some(now);
        self.success_count += 1;
        self.failure_count = 0;

        if self.state == CircuitState::HalfOpen && self.success_count >= success_threshold {
            self.transition(CircuitState::Closed);
            self.opened_at = None;
            self.extensions_count = 0;
            self.success_count = 0;
        }
    }

    /// The open duration currently in effect for this record: `base`,
    /// doubled per `extensions_count` and capped at `cap`. Mirrors the
    /// extension computed by `record_failure` so a breaker reopened after
    /// repeated half-open failures waits out its own extended duration
    /// rather than the un-extended base.
    pub fn current_open_duration(&self, base: chrono::Duration, cap: chrono::Duration) -> chrono::Duration {
        extend_duration(base, self.extensions_count, cap)
    }

    /// Whether calls through this breaker are currently allowed. Side
    /// effect: auto-probes open -> half_open once `open_duration` elapses.
    pub fn allows(&mut self, open_duration: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self.opened_at.map(|at| now - at).unwrap_or_default();
                if elapsed >= open_duration {
                    self.transition(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Externally-exposed manual reset: forces `closed`, clears counters.
    pub fn reset(&mut self) {
        self.transition(CircuitState::Closed);
        self.failure_count = 0;
        self.success_count = 0;
        self.extensions_count = 0;
        self.opened_at = None;
    }
}

fn extend_duration(
    base: chrono::Duration,
    extensions_count: u32,
    cap: chrono::Duration,
) -> chrono::Duration {
    let multiplier = 2i64.saturating_pow(extensions_count.min(32));
    let extended = base.checked_mul(multiplier as i32).unwrap_or(cap);
    extended.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn closed_opens_at_failure_threshold() {
        let mut b = CircuitBreakerRecord::new(CircuitLevel::Stage, "green");
        assert!(b.record_failure(3, Duration::seconds(30), Duration::seconds(600)).is_none());
        assert!(b.record_failure(3, Duration::seconds(30), Duration::seconds(600)).is_none());
        assert!(b.record_failure(3, Duration::seconds(30), Duration::seconds(600)).is_some());
        assert_eq!(b.state, CircuitState::Open);
    }

    #[test]
    fn open_probes_to_half_open_after_duration_elapses() {
        let mut b = CircuitBreakerRecord::new(CircuitLevel::Worker, "3");
        b.record_failure(1, Duration::seconds(30), Duration::seconds(600));
        assert!(!b.allows(Duration::seconds(30), Utc::now()));
        assert!(b.allows(Duration::seconds(30), Utc::now() + Duration::seconds(60)));
        assert_eq!(b.state, CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let mut b = CircuitBreakerRecord::new(CircuitLevel::System, "system");
        b.record_failure(1, Duration::seconds(30), Duration::seconds(600));
        b.allows(Duration::seconds(0), Utc::now());
        b.record_success(2);
        assert_eq!(b.state, CircuitState::HalfOpen);
        b.record_success(2);
        assert_eq!(b.state, CircuitState::Closed);
        assert_eq!(b.extensions_count, 0);
    }

    #[test]
    fn half_open_failure_reopens_and_extends_duration_exponentially() {
        let mut b = CircuitBreakerRecord::new(CircuitLevel::Stage, "verify");
        b.record_failure(1, Duration::seconds(30), Duration::seconds(600));
        b.allows(Duration::seconds(0), Utc::now());
        let ext1 = b.record_failure(1, Duration::seconds(30), Duration::seconds(600)).unwrap();
        assert_eq!(ext1, Duration::seconds(60));
        assert_eq!(b.extensions_count, 1);

        b.allows(Duration::seconds(0), Utc::now());
        let ext2 = b.record_failure(1, Duration::seconds(30), Duration::seconds(600)).unwrap();
        assert_eq!(ext2, Duration::seconds(120));
    }

    #[test]
    fn extension_caps_at_max_open_duration() {
        let mut b = CircuitBreakerRecord::new(CircuitLevel::Stage, "verify");
        b.extensions_count = 10;
        b.state = CircuitState::HalfOpen;
        let ext = b.record_failure(1, Duration::seconds(30), Duration::seconds(600)).unwrap();
        assert_eq!(ext, Duration::seconds(600));
    }

    #[test]
    fn manual_reset_clears_everything() {
        let mut b = CircuitBreakerRecord::new(CircuitLevel::Stage, "red");
        b.record_failure(1, Duration::seconds(30), Duration::seconds(600));
        b.reset();
        assert_eq!(b.state, CircuitState::Closed);
        assert_eq!(b.failure_count, 0);
        assert!(b.opened_at.is_none());
    }
}
