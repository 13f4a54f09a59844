//! Server configuration: task payload in, validated settings out.

use crate::games::GameProfile;
use fleet_core::ids::{ServerId, TenantId, UserId};
use fleet_core::server::{GameType, ServerPorts};
use fleet_core::{Error, Result};
use fleet_mods::ModCatalog;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const MIN_PORT: u16 = 1024;
const DEFAULT_DIFFICULTY: f64 = 1.0;
const MAX_DIFFICULTY: f64 = 10.0;

/// Payload of a PROVISION task. Everything but the id and game is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub server_id: ServerId,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub game_type: GameType,
    #[serde(default, alias = "port")]
    pub server_port: Option<u16>,
    #[serde(default)]
    pub query_port: Option<u16>,
    #[serde(default)]
    pub rcon_port: Option<u16>,
    #[serde(default)]
    pub map_name: Option<String>,
    #[serde(default)]
    pub max_players: Option<u32>,
    #[serde(default)]
    pub difficulty: Option<f64>,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub server_password: Option<String>,
    #[serde(default)]
    pub admin_password: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    /// Tenant whose cluster directory the server joins. Falls back to the
    /// owning user for clustered games.
    #[serde(default)]
    pub cluster_id: Option<TenantId>,
    #[serde(default)]
    pub mods: Vec<String>,
    #[serde(default)]
    pub mod_catalog: Option<ModCatalog>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ProvisionRequest {
    pub fn new(server_id: impl Into<String>, game_type: GameType) -> Self {
        Self {
            server_id: ServerId::new(server_id),
            user_id: None,
            game_type,
            server_port: None,
            query_port: None,
            rcon_port: None,
            map_name: None,
            max_players: None,
            difficulty: None,
            server_name: None,
            server_password: None,
            admin_password: None,
            image: None,
            cluster_id: None,
            mods: Vec::new(),
            mod_catalog: None,
            env: BTreeMap::new(),
        }
    }

    /// Fill the fields this request leaves unset from `base`. Extra
    /// variables are merged with ours taking precedence.
    pub fn overlay(&self, base: ProvisionRequest) -> ProvisionRequest {
        let mut env = base.env;
        env.extend(self.env.clone());
        ProvisionRequest {
            server_id: self.server_id.clone(),
            user_id: self.user_id.clone().or(base.user_id),
            game_type: self.game_type,
            server_port: self.server_port.or(base.server_port),
            query_port: self.query_port.or(base.query_port),
            rcon_port: self.rcon_port.or(base.rcon_port),
            map_name: self.map_name.clone().or(base.map_name),
            max_players: self.max_players.or(base.max_players),
            difficulty: self.difficulty.or(base.difficulty),
            server_name: self.server_name.clone().or(base.server_name),
            server_password: self.server_password.clone().or(base.server_password),
            admin_password: self.admin_password.clone().or(base.admin_password),
            image: self.image.clone().or(base.image),
            cluster_id: self.cluster_id.clone().or(base.cluster_id),
            mods: if self.mods.is_empty() {
                base.mods
            } else {
                self.mods.clone()
            },
            mod_catalog: self.mod_catalog.clone().or(base.mod_catalog),
            env,
        }
    }
}

/// Fully resolved server settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub server_id: ServerId,
    pub user_id: Option<UserId>,
    pub game_type: GameType,
    pub container_name: String,
    pub image: String,
    pub ports: ServerPorts,
    pub map_name: String,
    pub max_players: u32,
    pub difficulty: f64,
    pub server_name: String,
    #[serde(skip_serializing)]
    pub server_password: String,
    #[serde(skip_serializing)]
    pub admin_password: String,
    pub cluster_tenant: Option<TenantId>,
    pub mods: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl ServerConfig {
    /// Apply game defaults to `request` and validate the result.
    pub fn build(request: &ProvisionRequest, container_name: impl Into<String>) -> Result<Self> {
        validate_server_id(&request.server_id)?;

        let profile = GameProfile::for_game(request.game_type);
        let game = request.server_port.unwrap_or(profile.default_port);
        let query = request.query_port.unwrap_or_else(|| game.saturating_add(1));
        let rcon = request
            .rcon_port
            .unwrap_or_else(|| profile.rcon_port_for(game));
        let ports = ServerPorts { game, query, rcon };
        validate_ports(&ports)?;

        let max_players = request.max_players.unwrap_or(profile.default_max_players);
        if max_players == 0 || max_players > profile.max_players_cap {
            return Err(Error::InvalidConfig(format!(
                "maxPlayers {} outside 1..={} for {}",
                max_players, profile.max_players_cap, request.game_type
            )));
        }

        let difficulty = request.difficulty.unwrap_or(DEFAULT_DIFFICULTY);
        if !(0.0..=MAX_DIFFICULTY).contains(&difficulty) {
            return Err(Error::InvalidConfig(format!(
                "difficulty {} outside 0..={}",
                difficulty, MAX_DIFFICULTY
            )));
        }

        let cluster_tenant = if request.game_type.supports_clustering() {
            request
                .cluster_id
                .clone()
                .or_else(|| request.user_id.as_ref().map(|u| TenantId::new(u.as_str())))
        } else {
            None
        };

        Ok(Self {
            server_id: request.server_id.clone(),
            user_id: request.user_id.clone(),
            game_type: request.game_type,
            container_name: container_name.into(),
            image: request
                .image
                .clone()
                .unwrap_or_else(|| profile.image.to_string()),
            ports,
            map_name: request
                .map_name
                .clone()
                .unwrap_or_else(|| profile.default_map.to_string()),
            max_players,
            difficulty,
            server_name: request
                .server_name
                .clone()
                .unwrap_or_else(|| format!("Fleet {}", request.server_id)),
            server_password: request.server_password.clone().unwrap_or_default(),
            admin_password: request
                .admin_password
                .clone()
                .unwrap_or_else(|| format!("admin_{}", request.server_id.short(8))),
            cluster_tenant,
            mods: request.mods.clone(),
            env: request.env.clone(),
        })
    }

    pub fn profile(&self) -> &'static GameProfile {
        GameProfile::for_game(self.game_type)
    }

    /// Named volume holding the server's game data.
    pub fn data_volume(&self) -> String {
        format!("{}-data", self.container_name)
    }
}

pub fn validate_server_id(id: &ServerId) -> Result<()> {
    let s = id.as_str();
    if s.is_empty() {
        return Err(Error::InvalidConfig("serverId must not be empty".to_string()));
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::InvalidConfig(format!(
            "serverId {} may only contain letters, digits, '-' and '_'",
            s
        )));
    }
    Ok(())
}

fn validate_ports(ports: &ServerPorts) -> Result<()> {
    let all = [ports.game, ports.query, ports.rcon];
    if let Some(bad) = all.iter().find(|p| **p < MIN_PORT) {
        return Err(Error::InvalidConfig(format!(
            "port {} outside {}..=65535",
            bad, MIN_PORT
        )));
    }
    if all.iter().collect::<BTreeSet<_>>().len() != all.len() {
        return Err(Error::InvalidConfig(format!(
            "ports must be distinct: game {}, query {}, rcon {}",
            ports.game, ports.query, ports.rcon
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ark_ascended_defaults_from_port_alias() {
        let request: ProvisionRequest = serde_json::from_value(json!({
            "serverId": "a1b2c3d4e5f6",
            "gameType": "ARK_ASCENDED",
            "port": 27015
        }))
        .unwrap();

        let config = ServerConfig::build(&request, "gs-a1b2c3d4e5f6").unwrap();

        assert_eq!(config.ports.game, 27015);
        assert_eq!(config.ports.query, 27016);
        assert_eq!(config.ports.rcon, 27020);
        assert_eq!(config.map_name, "TheIsland_WP");
        assert_eq!(config.max_players, 70);
        assert_eq!(config.difficulty, 1.0);
        assert_eq!(config.admin_password, "admin_a1b2c3d4");
        assert_eq!(config.server_password, "");
    }

    #[test]
    fn test_explicit_query_port_wins() {
        let mut request = ProvisionRequest::new("s1", GameType::Minecraft);
        request.server_port = Some(30000);
        request.query_port = Some(30010);
        let config = ServerConfig::build(&request, "gs-s1").unwrap();
        assert_eq!(config.ports.query, 30010);
    }

    #[test]
    fn test_rejects_duplicate_and_privileged_ports() {
        let mut request = ProvisionRequest::new("s1", GameType::ArkAscended);
        request.server_port = Some(27019);
        assert!(ServerConfig::build(&request, "gs-s1").is_err());

        request.server_port = Some(80);
        assert!(ServerConfig::build(&request, "gs-s1").is_err());
    }

    #[test]
    fn test_rejects_bad_server_id() {
        let request = ProvisionRequest::new("../etc", GameType::Valheim);
        let err = ServerConfig::build(&request, "gs-x").unwrap_err();
        assert_eq!(err.kind(), fleet_core::ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_cluster_tenant_only_for_ark() {
        let mut request = ProvisionRequest::new("s1", GameType::ArkAscended);
        request.user_id = Some(UserId::new("user-9"));
        let config = ServerConfig::build(&request, "gs-s1").unwrap();
        assert_eq!(config.cluster_tenant, Some(TenantId::new("user-9")));

        request.game_type = GameType::Minecraft;
        let config = ServerConfig::build(&request, "gs-s1").unwrap();
        assert_eq!(config.cluster_tenant, None);
    }

    #[test]
    fn test_overlay_keeps_base_where_unset() {
        let mut base = ProvisionRequest::new("s1", GameType::ArkEvolved);
        base.server_port = Some(27015);
        base.admin_password = Some("admin_stored".to_string());
        base.mods = vec!["base".to_string()];
        base.env = BTreeMap::from([
            ("TZ".to_string(), "UTC".to_string()),
            ("EXTRA".to_string(), "old".to_string()),
        ]);

        let mut update = ProvisionRequest::new("s1", GameType::ArkEvolved);
        update.max_players = Some(40);
        update.env = BTreeMap::from([("EXTRA".to_string(), "new".to_string())]);

        let merged = update.overlay(base);
        assert_eq!(merged.server_port, Some(27015));
        assert_eq!(merged.max_players, Some(40));
        assert_eq!(merged.admin_password.as_deref(), Some("admin_stored"));
        assert_eq!(merged.mods, vec!["base".to_string()]);
        assert_eq!(merged.env["TZ"], "UTC");
        assert_eq!(merged.env["EXTRA"], "new");
    }
}
