//! Compose descriptor rendering.
//!
//! The descriptor written next to the server's files mirrors exactly what
//! the agent asks the runtime to create, so operators can inspect or
//! reproduce a deployment by hand.

use crate::config::{ProvisionRequest, ServerConfig};
use fleet_core::Result;
use fleet_core::ids::{ServerId, TenantId};
use fleet_core::server::GameType;
use fleet_runtime::{ContainerSpec, HealthCheck, PortMapping, Protocol, VolumeMount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DESCRIPTOR_FILE: &str = "docker-compose.yml";
pub const GAME_TYPE_LABEL: &str = "fleet.game-type";

/// Variables derived from the server settings rather than supplied by the
/// operator.
const GENERATED_ENV: [&str; 11] = [
    "SERVER_NAME",
    "SERVER_PORT",
    "QUERY_PORT",
    "RCON_PORT",
    "MAP_NAME",
    "MAX_PLAYERS",
    "DIFFICULTY",
    "SERVER_PASSWORD",
    "ADMIN_PASSWORD",
    "CLUSTER_ID",
    "MODS",
];

const HEALTH_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_RETRIES: u32 = 5;
const HEALTH_START_PERIOD: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    pub services: BTreeMap<String, ComposeService>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeService {
    pub image: String,
    pub container_name: String,
    pub restart: String,
    pub ports: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub healthcheck: ComposeHealthcheck,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeHealthcheck {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
    pub start_period: String,
}

/// One server's deployment, in both compose and runtime form.
#[derive(Debug, Clone)]
pub struct Descriptor {
    spec: ContainerSpec,
}

impl Descriptor {
    /// `mods` must already be in load order.
    pub fn render(config: &ServerConfig, cluster_dir: Option<&Path>, mods: &[String]) -> Self {
        let profile = config.profile();
        let ports = config.ports;

        let port_list = vec![
            PortMapping {
                host: ports.game,
                container: ports.game,
                protocol: Protocol::Udp,
            },
            PortMapping {
                host: ports.game,
                container: ports.game,
                protocol: Protocol::Tcp,
            },
            PortMapping {
                host: ports.query,
                container: ports.query,
                protocol: Protocol::Udp,
            },
            PortMapping {
                host: ports.query,
                container: ports.query,
                protocol: Protocol::Tcp,
            },
            PortMapping {
                host: ports.rcon,
                container: ports.rcon,
                protocol: Protocol::Tcp,
            },
        ];

        let mut env = BTreeMap::from([
            ("SERVER_NAME".to_string(), config.server_name.clone()),
            ("SERVER_PORT".to_string(), ports.game.to_string()),
            ("QUERY_PORT".to_string(), ports.query.to_string()),
            ("RCON_PORT".to_string(), ports.rcon.to_string()),
            ("MAP_NAME".to_string(), config.map_name.clone()),
            ("MAX_PLAYERS".to_string(), config.max_players.to_string()),
            ("DIFFICULTY".to_string(), config.difficulty.to_string()),
            ("SERVER_PASSWORD".to_string(), config.server_password.clone()),
            ("ADMIN_PASSWORD".to_string(), config.admin_password.clone()),
        ]);
        if let Some(tenant) = &config.cluster_tenant {
            env.insert("CLUSTER_ID".to_string(), tenant.to_string());
        }
        if !mods.is_empty() {
            env.insert("MODS".to_string(), mods.join(","));
        }
        // Operator-supplied variables override the generated ones.
        env.extend(config.env.clone());

        let mut volumes = vec![VolumeMount::Named {
            name: config.data_volume(),
            target: profile.data_path.to_string(),
        }];
        if let (Some(_), Some(dir)) = (&config.cluster_tenant, cluster_dir) {
            volumes.push(VolumeMount::Bind {
                source: dir.display().to_string(),
                target: profile.cluster_path.to_string(),
            });
        }

        let labels = BTreeMap::from([
            ("fleet.server-id".to_string(), config.server_id.to_string()),
            (GAME_TYPE_LABEL.to_string(), config.game_type.to_string()),
        ]);

        Self {
            spec: ContainerSpec {
                name: config.container_name.clone(),
                image: config.image.clone(),
                env,
                ports: port_list,
                volumes,
                healthcheck: Some(HealthCheck {
                    test: vec![
                        "CMD-SHELL".to_string(),
                        format!("pgrep -f {} || exit 1", profile.process_name),
                    ],
                    interval: HEALTH_INTERVAL,
                    timeout: HEALTH_TIMEOUT,
                    retries: HEALTH_RETRIES,
                    start_period: HEALTH_START_PERIOD,
                }),
                labels,
            },
        }
    }

    pub fn container_spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn compose(&self) -> ComposeFile {
        let spec = &self.spec;
        let mut named = BTreeMap::new();
        for volume in &spec.volumes {
            if let VolumeMount::Named { name, .. } = volume {
                named.insert(name.clone(), BTreeMap::new());
            }
        }

        let healthcheck = spec
            .healthcheck
            .as_ref()
            .map(|hc| ComposeHealthcheck {
                test: hc.test.clone(),
                interval: compose_duration(hc.interval),
                timeout: compose_duration(hc.timeout),
                retries: hc.retries,
                start_period: compose_duration(hc.start_period),
            })
            .unwrap_or_else(|| ComposeHealthcheck {
                test: vec!["NONE".to_string()],
                interval: compose_duration(HEALTH_INTERVAL),
                timeout: compose_duration(HEALTH_TIMEOUT),
                retries: HEALTH_RETRIES,
                start_period: compose_duration(HEALTH_START_PERIOD),
            });

        let service = ComposeService {
            image: spec.image.clone(),
            container_name: spec.name.clone(),
            restart: "unless-stopped".to_string(),
            ports: spec.ports.iter().map(|p| p.to_string()).collect(),
            environment: spec.env.clone(),
            volumes: spec.volumes.iter().map(|v| v.to_bind_string()).collect(),
            healthcheck,
            labels: spec.labels.clone(),
        };

        ComposeFile {
            services: BTreeMap::from([(spec.name.clone(), service)]),
            volumes: named,
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.compose())
            .map_err(|e| fleet_core::Error::Serialization(e.to_string()))
    }

    /// Write the descriptor into `work_dir` and return its path.
    pub async fn write(&self, work_dir: &Path) -> Result<PathBuf> {
        let path = work_dir.join(DESCRIPTOR_FILE);
        tokio::fs::write(&path, self.to_yaml()?).await?;
        Ok(path)
    }
}

impl ComposeFile {
    /// Read a previously written descriptor. `None` when there is none.
    pub async fn load(work_dir: &Path) -> Result<Option<ComposeFile>> {
        let path = work_dir.join(DESCRIPTOR_FILE);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_yaml::from_str(&text)
            .map(Some)
            .map_err(|e| fleet_core::Error::Serialization(e.to_string()))
    }

    /// The settings this descriptor was rendered from, as a request for
    /// `server_id`. Values that fail to parse are left unset.
    pub fn provision_request(
        &self,
        server_id: &ServerId,
        game_type: GameType,
    ) -> Option<ProvisionRequest> {
        let service = self.services.values().next()?;
        let env = &service.environment;
        let get = |key: &str| env.get(key).cloned();
        fn parse_from<T: std::str::FromStr>(
            env: &std::collections::BTreeMap<String, String>,
            key: &str,
        ) -> Option<T> {
            env.get(key).and_then(|v| v.parse().ok())
        }

        let mut request = ProvisionRequest::new(server_id.as_str(), game_type);
        request.server_port = parse_from(env, "SERVER_PORT");
        request.query_port = parse_from(env, "QUERY_PORT");
        request.rcon_port = parse_from(env, "RCON_PORT");
        request.map_name = get("MAP_NAME");
        request.max_players = parse_from(env, "MAX_PLAYERS");
        request.difficulty = parse_from(env, "DIFFICULTY");
        request.server_name = get("SERVER_NAME");
        request.server_password = get("SERVER_PASSWORD");
        request.admin_password = get("ADMIN_PASSWORD");
        request.image = Some(service.image.clone());
        request.cluster_id = get("CLUSTER_ID").map(TenantId::new);
        request.mods = env
            .get("MODS")
            .map(|mods| {
                mods.split(',')
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        request.env = env
            .iter()
            .filter(|(key, _)| !GENERATED_ENV.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Some(request)
    }

    /// Game type recorded in the service labels.
    pub fn game_type(&self) -> Option<GameType> {
        self.services
            .values()
            .filter_map(|s| s.labels.get(GAME_TYPE_LABEL))
            .find_map(|label| {
                serde_json::from_value(serde_json::Value::String(label.clone())).ok()
            })
    }
}

fn compose_duration(d: Duration) -> String {
    format!("{}s", d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisionRequest;
    use fleet_core::ids::TenantId;

    fn ark_config() -> ServerConfig {
        let mut request = ProvisionRequest::new("abc123", GameType::ArkAscended);
        request.server_port = Some(7777);
        request.cluster_id = Some(TenantId::new("tenant-1"));
        ServerConfig::build(&request, "gs-abc123").unwrap()
    }

    #[test]
    fn test_compose_document_shape() {
        let descriptor = Descriptor::render(
            &ark_config(),
            Some(Path::new("/srv/fleet/cluster/tenant-1")),
            &["base".to_string(), "addon".to_string()],
        );
        let compose = descriptor.compose();
        let service = &compose.services["gs-abc123"];

        assert_eq!(service.restart, "unless-stopped");
        assert!(service.ports.contains(&"7777:7777/udp".to_string()));
        assert!(service.ports.contains(&"7778:7778/udp".to_string()));
        assert!(service.ports.contains(&"27020:27020/tcp".to_string()));
        assert_eq!(service.environment["MODS"], "base,addon");
        assert_eq!(service.environment["CLUSTER_ID"], "tenant-1");
        assert_eq!(service.healthcheck.interval, "30s");
        assert_eq!(service.healthcheck.start_period, "120s");
        assert_eq!(service.healthcheck.retries, 5);
        assert!(
            service
                .volumes
                .contains(&"/srv/fleet/cluster/tenant-1:/home/gameserver/cluster-shared".to_string())
        );
        assert!(compose.volumes.contains_key("gs-abc123-data"));
    }

    #[test]
    fn test_yaml_round_trips() {
        let descriptor = Descriptor::render(&ark_config(), None, &[]);
        let yaml = descriptor.to_yaml().unwrap();
        let parsed: ComposeFile = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, descriptor.compose());
        assert!(!parsed.services["gs-abc123"].environment.contains_key("MODS"));
        assert_eq!(parsed.game_type(), Some(GameType::ArkAscended));
    }

    #[test]
    fn test_stored_descriptor_rebuilds_same_settings() {
        let mut config = ark_config();
        config.env.insert("TZ".to_string(), "Europe/Berlin".to_string());
        config.mods = vec!["base".to_string()];
        let compose = Descriptor::render(&config, None, &config.mods).compose();

        let request = compose
            .provision_request(&config.server_id, config.game_type)
            .unwrap();
        assert_eq!(request.mods, vec!["base".to_string()]);
        assert_eq!(request.env, BTreeMap::from([("TZ".to_string(), "Europe/Berlin".to_string())]));

        let mut rebuilt = ServerConfig::build(&request, "gs-abc123").unwrap();
        rebuilt.user_id = config.user_id.clone();
        assert_eq!(rebuilt, config);
    }
}
