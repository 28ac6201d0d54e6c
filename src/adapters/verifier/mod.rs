//! Verifier Tools adapter: the one in-process implementation of
//! `domain::ports::VerifierTools`, shelling out to pytest/ruff/mypy and
//! running the AST-quality heuristics directly against source text.

pub mod ast_heuristics;
pub mod process_tools;
pub mod tool_resolver;

pub use ast_heuristics::{check_ast, check_needs_refactor};
pub use process_tools::ProcessVerifierTools;
pub use tool_resolver::ToolResolver;
