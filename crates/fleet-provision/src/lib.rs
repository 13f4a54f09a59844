//! Provisioning for containerized game servers.
//!
//! The [`ProvisioningEngine`] turns task payloads into runtime calls:
//! resolve the server configuration, render the compose descriptor, create
//! and start the container, then wait a bounded time for the game process.
//! Teardown steps are idempotent. ARK servers share a per-tenant cluster
//! directory managed by [`ClusterSyncManager`].

pub mod archive;
pub mod cluster;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod games;
pub mod readiness;

pub use cluster::{ClusterLease, ClusterSyncManager};
pub use config::{ProvisionRequest, ServerConfig};
pub use descriptor::Descriptor;
pub use engine::{
    BackupOutcome, BackupRequest, DeleteOutcome, DeleteRequest, EngineSettings, LifecycleOutcome,
    ProvisionOutcome, ProvisioningEngine, ServerCommand, StepOutcome, UpdateOutcome, UpdateRequest,
};
pub use games::GameProfile;
pub use readiness::ReadinessProbe;
