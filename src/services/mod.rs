//! Services: the core pipeline that drives tasks through the TDD state
//! machine, plus the supporting building blocks (prompt assembly, circuit
//! breakers, phase gating, decomposition) it is built from.

pub mod circuit_breaker;
pub mod decomposition;
pub mod lm_stage_runner;
pub mod phase_gate;
pub mod prompt_builder;
pub mod run_validator;
pub mod stage_verifier;
pub mod tdd_pipeline;
pub mod verify_command;
pub mod worker_pool;

pub use circuit_breaker::CircuitBreakerService;
pub use decomposition::DecompositionPipeline;
pub use lm_stage_runner::LmStageRunner;
pub use phase_gate::PhaseGate;
pub use prompt_builder::build_prompt;
pub use run_validator::RunValidator;
pub use stage_verifier::{StageOutcome, StageVerifier};
pub use tdd_pipeline::TddPipeline;
pub use verify_command::run_verify_command;
pub use worker_pool::WorkerPool;
