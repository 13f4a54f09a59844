//! Startup runtime negotiation.

use crate::docker::DockerRuntime;
use crate::runtime::ServiceRuntime;
use crate::systemd::SystemdRuntime;
use fleet_core::agent::Capabilities;
use fleet_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Docker socket. Defaults to the engine's local default.
    pub docker_socket: Option<PathBuf>,
    pub docker_timeout_secs: u64,
    pub container_prefix: String,
    pub unit_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_socket: None,
            docker_timeout_secs: 120,
            container_prefix: "gs-".to_string(),
            unit_prefix: "gameserver-".to_string(),
        }
    }
}

/// The runtime chosen for this process, plus what the host offers.
pub struct RuntimeSelection {
    pub runtime: Arc<dyn ServiceRuntime>,
    pub capabilities: Capabilities,
}

/// Probe the host once. Docker wins when both are present.
pub async fn negotiate(config: &RuntimeConfig) -> Result<RuntimeSelection> {
    let docker = match DockerRuntime::connect(
        config.docker_socket.as_deref(),
        config.docker_timeout_secs,
        config.container_prefix.clone(),
    )
    .await
    {
        Ok(docker) => Some(docker),
        Err(e) => {
            warn!(error = %e, "Docker not available");
            None
        }
    };
    let systemd = SystemdRuntime::available().await;

    let capabilities = Capabilities {
        container_runtime: docker.is_some(),
        service_manager: systemd,
    };

    let runtime: Arc<dyn ServiceRuntime> = match docker {
        Some(docker) => Arc::new(docker),
        None if systemd => Arc::new(SystemdRuntime::new(config.unit_prefix.clone())),
        None => {
            return Err(Error::RuntimeUnavailable(
                "neither Docker nor systemctl responded".to_string(),
            ));
        }
    };

    info!(
        runtime = %runtime.kind(),
        container_runtime = capabilities.container_runtime,
        service_manager = capabilities.service_manager,
        "Runtime negotiated"
    );

    Ok(RuntimeSelection {
        runtime,
        capabilities,
    })
}
