//! Domain-level error taxonomy.
//!
//! Mirrors the error kinds named in the engine's error-handling design:
//! fatal-to-task, fatal-to-pool, transient, and decomposition-validation
//! errors. Stage-local failures are converted into `StageResult` before
//! they ever reach this layer; only errors that must be observed by the
//! pipeline, the pool driver, or the store cross this boundary.

use thiserror::Error;

/// Domain-level errors that can occur in the task execution engine.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("duplicate task key: {0}")]
    DuplicateKey(String),

    #[error("phase/sequence already in use: phase={phase} sequence={sequence}")]
    InvalidPhase { phase: i64, sequence: i64 },

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("concurrency conflict updating {entity} {id}: version mismatch")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("required workspace file missing: {0}")]
    FileMissing(String),

    #[error("stage timed out after {0}s")]
    StageTimeout(u64),

    #[error("green attempts exhausted after {0} tries")]
    GreenRetriesExhausted(u32),

    #[error("static review circuit open; task blocked for static review")]
    StaticReviewBlocked,

    #[error("post-refactor fix failed to restore a passing verify")]
    PostRefactorFixFailed,

    #[error("circuit breaker open for {level}:{identifier}")]
    CircuitOpen { level: String, identifier: String },

    #[error("aggregate invocation budget exhausted")]
    BudgetExhausted,

    #[error("LM transport error: {0}")]
    LmTransportError(String),

    #[error("verifier tool unavailable: {0}")]
    VerifierToolMissing(String),

    #[error("cyclic dependencies detected among: {0:?}")]
    CyclicDependencies(Vec<String>),

    #[error("integration boundary violation: impl_file={impl_file} test_file={test_file}")]
    BoundaryViolation { impl_file: String, test_file: String },

    #[error("spec conformance violation: {0}")]
    SpecConformance(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
