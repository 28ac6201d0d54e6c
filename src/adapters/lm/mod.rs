//! LM Transport adapter: the one in-process implementation of
//! `domain::ports::LmTransport`, streaming from a subprocess.

pub mod subprocess_transport;

pub use subprocess_transport::{RetryPolicy, SubprocessLmTransport};
