//! Adapters: the one in-process implementation of each domain port.

pub mod lm;
pub mod sqlite;
pub mod verifier;
