//! Core runtime trait and types.

use async_trait::async_trait;
use fleet_core::Result;
use fleet_core::agent::Capabilities;
use fleet_core::ids::ServerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Docker,
    Systemd,
    Memory,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Systemd => "systemd",
            RuntimeKind::Memory => "memory",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
    pub protocol: Protocol,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.container, self.protocol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeMount {
    /// Engine-managed named volume.
    Named { name: String, target: String },
    /// Host directory bind mount.
    Bind { source: String, target: String },
}

impl VolumeMount {
    /// `source:target` as understood by the engine.
    pub fn to_bind_string(&self) -> String {
        match self {
            VolumeMount::Named { name, target } => format!("{}:{}", name, target),
            VolumeMount::Bind { source, target } => format!("{}:{}", source, target),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub test: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub start_period: Duration,
}

/// Everything needed to create one game-server container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub healthcheck: Option<HealthCheck>,
    pub labels: BTreeMap<String, String>,
}

/// Observed state of a container or unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub name: String,
    pub running: bool,
    pub status: String,
    pub health: Option<String>,
    pub exit_code: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Uniform lifecycle contract over a container engine or a service manager.
///
/// `stop` on an instance that is already stopped succeeds. Operations on an
/// instance that does not exist fail with `Error::ContainerNotFound`; callers
/// that only care about the end state treat that as success.
#[async_trait]
pub trait ServiceRuntime: Send + Sync {
    fn kind(&self) -> RuntimeKind;

    /// Name of the container or unit that hosts `server_id`.
    fn instance_name(&self, server_id: &ServerId) -> String;

    fn capabilities(&self) -> Capabilities;

    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) an instance. Returns the engine's id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str) -> Result<()>;

    async fn restart(&self, name: &str) -> Result<()>;

    async fn remove(&self, name: &str) -> Result<()>;

    async fn remove_volume(&self, name: &str) -> Result<()>;

    async fn exec(&self, name: &str, cmd: &[&str]) -> Result<ExecOutput>;

    /// `None` when the instance does not exist.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>>;
}
