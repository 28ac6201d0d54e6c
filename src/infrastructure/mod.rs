//! Infrastructure layer: cross-cutting concerns that sit below the domain
//! and services layers but aren't themselves a domain port/adapter pair.
//!
//! - `config`: hierarchical configuration loading (figment).
//! - `logging`: tracing subscriber setup, file rotation.

pub mod config;
pub mod logging;
