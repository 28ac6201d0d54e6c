//! Ports: trait abstractions at the boundary between the core pipeline and
//! external collaborators (the store, verifier tools, the LM transport).

pub mod lm_transport;
pub mod task_store;
pub mod verifier_tools;

pub use lm_transport::{LmTransport, StreamOptions};
pub use task_store::TaskStore;
pub use verifier_tools::{LintResult, TestRunResult, TypeCheckResult, VerifierTools};
