//! Agent types.

use crate::ids::{AgentId, MachineId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: AgentId,
    pub machine_id: Option<MachineId>,
    pub hostname: Option<String>,
    pub agent_ip: String,
    pub version: String,
    pub capabilities: Capabilities,
    pub status: AgentStatus,
    /// SHA-256 digest of the current API key. The key itself is only ever
    /// returned once, when it is issued.
    #[serde(skip_serializing)]
    pub api_key_hash: String,
    pub resources: Option<ResourceSample>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

/// What the agent's host can run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub container_runtime: bool,
    pub service_manager: bool,
}

impl Capabilities {
    pub fn any(&self) -> bool {
        self.container_runtime || self.service_manager
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Online,
    Offline,
    Error,
    Updating,
}

impl Agent {
    /// Status as observed at `now`, with staleness folded in.
    pub fn effective_status(&self, now: DateTime<Utc>, timeout: Duration) -> AgentStatus {
        let fresh = self
            .last_heartbeat_at
            .is_some_and(|at| now - at <= timeout);
        match (self.status, fresh) {
            (AgentStatus::Error, _) => AgentStatus::Error,
            (_, false) => AgentStatus::Offline,
            (AgentStatus::Offline, true) => AgentStatus::Online,
            (status, true) => status,
        }
    }
}

/// Utilisation snapshot sent with every heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub ram_total_bytes: u64,
    pub ram_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub load_average: [f64; 3],
}
