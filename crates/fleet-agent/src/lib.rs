//! Machine agent for Fleet.
//!
//! Registers with the manager, reports resource usage on a timer, and polls
//! for tasks which it runs through the provisioning engine on a bounded
//! worker pool.

pub mod agent;
pub mod client;
pub mod config;
pub mod executor;
pub mod heartbeat;
pub mod sampler;

pub use agent::FleetAgent;
pub use client::ManagerClient;
pub use config::AgentConfig;
pub use executor::{TaskExecutor, completion};
pub use heartbeat::HeartbeatService;
pub use sampler::ResourceSampler;
