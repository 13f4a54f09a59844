//! Fleet manager.
//!
//! Tracks machines and agents, queues tasks for agents and serves the HTTP
//! API both sides talk to. State lives in memory behind the repository
//! ports from `fleet-core`.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod queue;
pub mod registry;
pub mod routes;
pub mod state;
pub mod store;

pub use config::ManagerConfig;
pub use queue::{CompletionError, TaskQueue};
pub use registry::AgentRegistry;
pub use routes::create_router;
pub use state::AppState;
pub use store::MemoryStore;
