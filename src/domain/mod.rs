//! Domain layer: task/attempt/worker/run/circuit-breaker records and the
//! ports (traits) external collaborators must implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
