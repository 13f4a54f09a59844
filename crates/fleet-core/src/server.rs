//! Game server instance types.

use crate::error::{Error, Result};
use crate::ids::{AgentId, ServerId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameType {
    ArkAscended,
    ArkEvolved,
    Minecraft,
    Valheim,
    Rust,
}

impl GameType {
    /// ARK titles share a cluster directory across the tenant's servers.
    pub fn supports_clustering(&self) -> bool {
        matches!(self, GameType::ArkAscended | GameType::ArkEvolved)
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GameType::ArkAscended => "ARK_ASCENDED",
            GameType::ArkEvolved => "ARK_EVOLVED",
            GameType::Minecraft => "MINECRAFT",
            GameType::Valheim => "VALHEIM",
            GameType::Rust => "RUST",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopped => "stopped",
            ServerStatus::Error => "error",
        };
        f.write_str(s)
    }
}

impl ServerStatus {
    pub fn can_transition_to(&self, next: ServerStatus) -> bool {
        use ServerStatus::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Error)
                | (Starting, Stopped)
                | (Running, Stopped)
                | (Running, Error)
                | (Running, Starting)
                | (Stopped, Starting)
                | (Stopped, Running)
                | (Error, Stopped)
                | (Error, Starting)
        ) || *self == next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPorts {
    pub game: u16,
    pub query: u16,
    pub rcon: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameServerInstance {
    pub server_id: ServerId,
    pub user_id: Option<UserId>,
    pub agent_id: AgentId,
    pub game_type: GameType,
    pub container_name: String,
    pub ports: ServerPorts,
    pub work_dir: PathBuf,
    pub cluster_dir: Option<PathBuf>,
    pub status: ServerStatus,
}

impl GameServerInstance {
    pub fn transition(&mut self, next: ServerStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_status_lifecycle() {
        assert!(ServerStatus::Starting.can_transition_to(ServerStatus::Running));
        assert!(ServerStatus::Running.can_transition_to(ServerStatus::Stopped));
        assert!(ServerStatus::Stopped.can_transition_to(ServerStatus::Running));
        assert!(!ServerStatus::Stopped.can_transition_to(ServerStatus::Error));
    }

    #[test]
    fn test_game_type_wire_names() {
        let json = serde_json::to_string(&GameType::ArkAscended).unwrap();
        assert_eq!(json, "\"ARK_ASCENDED\"");
        assert!(GameType::ArkAscended.supports_clustering());
        assert!(!GameType::Minecraft.supports_clustering());
    }
}
