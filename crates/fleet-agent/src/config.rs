//! Agent configuration.

use fleet_core::ids::AgentId;
use fleet_core::{Error, Result};
use fleet_provision::{EngineSettings, ReadinessProbe};
use fleet_runtime::RuntimeConfig;
use fleet_trace::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the manager, without the `/api/v1` suffix.
    #[serde(default = "default_manager_url")]
    pub manager_url: String,
    /// Stable agent id. Generated and persisted on first start when unset.
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    /// Machine enrollment key. Used until the manager issues this agent its
    /// own key, which is persisted and preferred from then on.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,
    #[serde(default = "default_cluster_root")]
    pub cluster_root: PathBuf,
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Registration retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 2,
            max_delay_secs: 60,
        }
    }
}

impl RegistrationConfig {
    /// Delay before retry number `attempt` (1-based): doubles from the base
    /// delay up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(32);
        Duration::from_secs(
            self.base_delay_secs
                .saturating_mul(factor)
                .min(self.max_delay_secs),
        )
    }
}

fn default_manager_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_work_root() -> PathBuf {
    PathBuf::from("/var/lib/fleet/servers")
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("/var/lib/fleet/backups")
}

fn default_cluster_root() -> PathBuf {
    PathBuf::from("/var/lib/fleet/cluster")
}

fn default_backup_retention() -> usize {
    5
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    10
}

fn default_max_concurrent() -> u32 {
    1
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            manager_url: default_manager_url(),
            agent_id: None,
            api_key: None,
            work_root: default_work_root(),
            backup_root: default_backup_root(),
            cluster_root: default_cluster_root(),
            backup_retention: default_backup_retention(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            poll_interval_secs: default_poll_interval(),
            max_concurrent_tasks: default_max_concurrent(),
            request_timeout_secs: default_request_timeout(),
            registration: RegistrationConfig::default(),
            runtime: RuntimeConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// File (if any), then `FLEET_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("FLEET_MANAGER_URL") {
            self.manager_url = v;
        }
        if let Some(v) = lookup("FLEET_AGENT_ID") {
            self.agent_id = Some(
                v.parse()
                    .map_err(|e| Error::InvalidConfig(format!("FLEET_AGENT_ID: {}", e)))?,
            );
        }
        if let Some(v) = lookup("FLEET_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = lookup("FLEET_WORK_ROOT") {
            self.work_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("FLEET_BACKUP_ROOT") {
            self.backup_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("FLEET_CLUSTER_ROOT") {
            self.cluster_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("FLEET_DOCKER_SOCKET") {
            self.runtime.docker_socket = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FLEET_UNIT_PREFIX") {
            self.runtime.unit_prefix = v;
        }
        if let Some(v) = lookup("FLEET_HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat_interval_secs = parse_env("FLEET_HEARTBEAT_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("FLEET_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse_env("FLEET_POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("FLEET_MAX_CONCURRENT_TASKS") {
            self.max_concurrent_tasks = parse_env("FLEET_MAX_CONCURRENT_TASKS", &v)?;
        }
        if let Some(v) = lookup("FLEET_LOG_FORMAT") {
            self.log.format = v
                .parse()
                .map_err(|e| Error::InvalidConfig(format!("FLEET_LOG_FORMAT: {}", e)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.manager_url.is_empty() {
            return Err(Error::InvalidConfig("manager_url must be set".to_string()));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval_secs == 0 || self.poll_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat and poll intervals must be positive".to_string(),
            ));
        }
        if self.registration.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "registration.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            work_root: self.work_root.clone(),
            backup_root: self.backup_root.clone(),
            backup_retention: self.backup_retention,
            provision_probe: ReadinessProbe::PROVISION,
            start_probe: ReadinessProbe::START,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// File holding the generated agent id between restarts.
    pub fn agent_id_file(&self) -> PathBuf {
        self.work_root.join(".agent-id")
    }

    /// File holding the key issued at first registration.
    pub fn api_key_file(&self) -> PathBuf {
        self.work_root.join(".api-key")
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("{}: {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.max_concurrent_tasks, 1);
        assert_eq!(config.registration.max_attempts, 5);
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_partial_file() {
        let config: AgentConfig = serde_yaml::from_str(
            "manager_url: https://fleet.example.com\nruntime:\n  unit_prefix: ark-\n",
        )
        .unwrap();
        assert_eq!(config.manager_url, "https://fleet.example.com");
        assert_eq!(config.runtime.unit_prefix, "ark-");
        assert_eq!(config.runtime.container_prefix, "gs-");
        assert_eq!(config.poll_interval_secs, 10);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("FLEET_MANAGER_URL", "http://manager:9000"),
            ("FLEET_MAX_CONCURRENT_TASKS", "3"),
            ("FLEET_LOG_FORMAT", "json"),
            ("FLEET_DOCKER_SOCKET", "/run/docker.sock"),
        ]);
        let mut config = AgentConfig::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.manager_url, "http://manager:9000");
        assert_eq!(config.max_concurrent_tasks, 3);
        assert_eq!(config.log.format, fleet_trace::LogFormat::Json);
        assert_eq!(
            config.runtime.docker_socket,
            Some(PathBuf::from("/run/docker.sock"))
        );
    }

    #[test]
    fn test_bad_env_value_is_invalid_config() {
        let mut config = AgentConfig::default();
        let err = config
            .apply_env(|k| (k == "FLEET_POLL_INTERVAL_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), fleet_core::ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let policy = RegistrationConfig::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(5), Duration::from_secs(32));
        assert_eq!(policy.backoff(6), Duration::from_secs(60));
        assert_eq!(policy.backoff(40), Duration::from_secs(60));
    }
}
