//! Domain models: the record types persisted by the task store and passed
//! between pipeline stages.

pub mod attempt;
pub mod circuit_breaker;
pub mod dag;
pub mod execution_run;
pub mod task;
pub mod violation;
pub mod worker;

pub use attempt::{Attempt, Stage, ToolExitCodes};
pub use circuit_breaker::{CircuitBreakerRecord, CircuitLevel, CircuitState};
pub use execution_run::{
    AcSummary, AcTaskResult, ExecutionRun, HeuristicCounts, RunStatus, ValidationDetails, ValidationStatus,
};
pub use task::{Complexity, Task, TaskStatus, TaskType};
pub use violation::{AstViolation, Severity};
pub use worker::{Worker, WorkerStatus};
