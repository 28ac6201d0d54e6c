//! redgreen: a parallel, multi-stage TDD task-execution engine.
//!
//! Layered as `domain` (records and ports) -> `adapters` (the one
//! in-process implementation of each port) -> `services` (the pipeline
//! state machine, worker pool, decomposition, and supporting building
//! blocks) -> `infrastructure` (config, logging).

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::{DomainError, DomainResult};
