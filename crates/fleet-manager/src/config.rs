//! Manager configuration.

use fleet_core::{Error, Result};
use fleet_trace::LogConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Key accepted on first registration of a new agent and on the admin
    /// routes.
    #[serde(default)]
    pub enrollment_key: Option<String>,
    /// Agents silent for longer than this read as offline.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    /// Upper bound on tasks handed out per poll.
    #[serde(default = "default_claim_limit")]
    pub claim_limit: usize,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_heartbeat_timeout() -> u64 {
    90
}

fn default_claim_limit() -> usize {
    10
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            enrollment_key: None,
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            claim_limit: default_claim_limit(),
            log: LogConfig::default(),
        }
    }
}

impl ManagerConfig {
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
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("FLEET_BIND_ADDR") {
            self.bind_addr = v
                .trim()
                .parse()
                .map_err(|e| Error::InvalidConfig(format!("FLEET_BIND_ADDR: {}", e)))?;
        }
        if let Some(v) = lookup("FLEET_ENROLLMENT_KEY") {
            self.enrollment_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = lookup("FLEET_HEARTBEAT_TIMEOUT_SECS") {
            self.heartbeat_timeout_secs = v.trim().parse().map_err(|e| {
                Error::InvalidConfig(format!("FLEET_HEARTBEAT_TIMEOUT_SECS: {}", e))
            })?;
        }
        if let Some(v) = lookup("FLEET_LOG_FORMAT") {
            self.log.format = v
                .parse()
                .map_err(|e| Error::InvalidConfig(format!("FLEET_LOG_FORMAT: {}", e)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        match &self.enrollment_key {
            Some(key) if key.len() >= 16 => {}
            Some(_) => {
                return Err(Error::InvalidConfig(
                    "enrollment_key must be at least 16 characters".to_string(),
                ));
            }
            None => {
                return Err(Error::InvalidConfig(
                    "enrollment_key must be set".to_string(),
                ));
            }
        }
        if self.heartbeat_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat_timeout_secs must be positive".to_string(),
            ));
        }
        if self.claim_limit == 0 {
            return Err(Error::InvalidConfig(
                "claim_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_secs.min(i64::MAX as u64) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_enrollment_key_rejected() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ManagerConfig::default();
        config
            .apply_env(|k| match k {
                "FLEET_BIND_ADDR" => Some("127.0.0.1:9100".to_string()),
                "FLEET_ENROLLMENT_KEY" => Some("enroll-0123456789abcdef".to_string()),
                "FLEET_HEARTBEAT_TIMEOUT_SECS" => Some("120".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.bind_addr.port(), 9100);
        assert_eq!(config.heartbeat_timeout(), chrono::Duration::seconds(120));
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_defaults() {
        let config: ManagerConfig = serde_yaml::from_str("enrollment_key: abc\n").unwrap();
        assert_eq!(config.heartbeat_timeout_secs, 90);
        assert_eq!(config.claim_limit, 10);
        assert_eq!(config.bind_addr.port(), 8080);
    }
}
