//! Logging setup for Fleet services.
//!
//! Every binary calls [`init_tracing`] once at startup. Output is either
//! human-readable text or one JSON object per line, filtered by `RUST_LOG`.

pub mod spans;
pub mod tracer;

pub use spans::{TaskAttributes, agent_span, request_span, task_span};
pub use tracer::{LogConfig, LogFormat, TracerError, init_test_logging, init_tracing};
