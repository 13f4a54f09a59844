//! Runtime adapters for Fleet agents.
//!
//! A host runs game servers either as containers (Docker over its local
//! socket) or as systemd units. Both sit behind [`ServiceRuntime`]; the agent
//! negotiates which one to use once at startup and injects the result.

pub mod docker;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod negotiate;
pub mod runtime;
pub mod systemd;

pub use docker::DockerRuntime;
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryRuntime;
pub use negotiate::{RuntimeConfig, RuntimeSelection, negotiate};
pub use runtime::{
    ContainerSpec, ContainerState, ExecOutput, HealthCheck, PortMapping, Protocol, RuntimeKind,
    ServiceRuntime, VolumeMount,
};
pub use systemd::SystemdRuntime;
