//! Per-game defaults.

use fleet_core::server::GameType;

/// Static defaults for one game title.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameProfile {
    pub game_type: GameType,
    pub image: &'static str,
    pub default_port: u16,
    /// `None` means `port + 2`.
    pub default_rcon_port: Option<u16>,
    pub default_map: &'static str,
    pub default_max_players: u32,
    pub max_players_cap: u32,
    /// Matched with `pgrep -f` to decide readiness.
    pub process_name: &'static str,
    pub data_path: &'static str,
    pub cluster_path: &'static str,
}

const ARK_ASCENDED: GameProfile = GameProfile {
    game_type: GameType::ArkAscended,
    image: "mschnitzer/asa-linux-server:latest",
    default_port: 7777,
    default_rcon_port: Some(27020),
    default_map: "TheIsland_WP",
    default_max_players: 70,
    max_players_cap: 255,
    process_name: "ArkAscendedServer",
    data_path: "/home/gameserver/server-files",
    cluster_path: "/home/gameserver/cluster-shared",
};

const ARK_EVOLVED: GameProfile = GameProfile {
    game_type: GameType::ArkEvolved,
    image: "hermsi/ark-server:latest",
    default_port: 7777,
    default_rcon_port: Some(27020),
    default_map: "TheIsland",
    default_max_players: 70,
    max_players_cap: 255,
    process_name: "ShooterGameServer",
    data_path: "/app",
    cluster_path: "/cluster",
};

const MINECRAFT: GameProfile = GameProfile {
    game_type: GameType::Minecraft,
    image: "itzg/minecraft-server:latest",
    default_port: 25565,
    default_rcon_port: Some(25575),
    default_map: "world",
    default_max_players: 20,
    max_players_cap: 1000,
    process_name: "java",
    data_path: "/data",
    cluster_path: "/cluster",
};

const VALHEIM: GameProfile = GameProfile {
    game_type: GameType::Valheim,
    image: "lloesche/valheim-server:latest",
    default_port: 2456,
    default_rcon_port: None,
    default_map: "Dedicated",
    default_max_players: 10,
    max_players_cap: 64,
    process_name: "valheim_server",
    data_path: "/config",
    cluster_path: "/cluster",
};

const RUST: GameProfile = GameProfile {
    game_type: GameType::Rust,
    image: "didstopia/rust-server:latest",
    default_port: 28015,
    default_rcon_port: None,
    default_map: "Procedural Map",
    default_max_players: 100,
    max_players_cap: 500,
    process_name: "RustDedicated",
    data_path: "/steamcmd/rust",
    cluster_path: "/cluster",
};

impl GameProfile {
    pub fn for_game(game_type: GameType) -> &'static GameProfile {
        match game_type {
            GameType::ArkAscended => &ARK_ASCENDED,
            GameType::ArkEvolved => &ARK_EVOLVED,
            GameType::Minecraft => &MINECRAFT,
            GameType::Valheim => &VALHEIM,
            GameType::Rust => &RUST,
        }
    }

    pub fn rcon_port_for(&self, game_port: u16) -> u16 {
        self.default_rcon_port
            .unwrap_or_else(|| game_port.saturating_add(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ark_defaults() {
        let profile = GameProfile::for_game(GameType::ArkAscended);
        assert_eq!(profile.default_map, "TheIsland_WP");
        assert_eq!(profile.default_max_players, 70);
        assert_eq!(profile.rcon_port_for(7777), 27020);
    }

    #[test]
    fn test_rcon_falls_back_past_query_port() {
        assert_eq!(GameProfile::for_game(GameType::Rust).rcon_port_for(28015), 28017);
    }
}
