//! Machine types.

use crate::ids::MachineId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: MachineId,
    pub name: String,
    pub address: String,
    /// Reference into the credential store. Never the credential itself.
    pub ssh_credentials_ref: Option<String>,
    pub status: MachineStatus,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineStatus {
    Online,
    Offline,
    Error,
    Maintenance,
}

impl Machine {
    /// Status as observed at `now`. A machine whose last heartbeat is older
    /// than `timeout` reads as offline; operator-set states are kept.
    pub fn effective_status(&self, now: DateTime<Utc>, timeout: Duration) -> MachineStatus {
        match self.status {
            MachineStatus::Maintenance | MachineStatus::Error => self.status,
            MachineStatus::Online | MachineStatus::Offline => {
                match self.last_heartbeat_at {
                    Some(at) if now - at <= timeout => MachineStatus::Online,
                    _ => MachineStatus::Offline,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMachine {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub ssh_credentials_ref: Option<String>,
}
