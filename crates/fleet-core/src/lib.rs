//! Fleet Core
//!
//! Domain types, traits, and error handling shared by the agent, the
//! manager and the provisioning engine. This crate has minimal dependencies
//! and defines the vocabulary used across all other crates.

pub mod agent;
pub mod api;
pub mod error;
pub mod ids;
pub mod machine;
pub mod ports;
pub mod server;
pub mod task;

pub use error::{Error, ErrorKind, Result};
pub use ids::*;
