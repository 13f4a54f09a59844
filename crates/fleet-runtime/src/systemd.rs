//! systemd service-manager adapter.
//!
//! Game servers run as pre-installed units named `<prefix><serverId>`. The
//! adapter drives them with `systemctl`; it cannot create units, pull images
//! or manage volumes.

use crate::runtime::{ContainerSpec, ContainerState, ExecOutput, RuntimeKind, ServiceRuntime};
use async_trait::async_trait;
use fleet_core::agent::Capabilities;
use fleet_core::ids::ServerId;
use fleet_core::{Error, Result};
use std::collections::HashMap;
use tokio::process::Command;
use tracing::{debug, info};

pub struct SystemdRuntime {
    unit_prefix: String,
}

impl SystemdRuntime {
    pub fn new(unit_prefix: impl Into<String>) -> Self {
        Self {
            unit_prefix: unit_prefix.into(),
        }
    }

    /// Whether `systemctl` is present and answers.
    pub async fn available() -> bool {
        matches!(
            Command::new("systemctl").arg("--version").output().await,
            Ok(output) if output.status.success()
        )
    }

    async fn systemctl(&self, verb: &str, unit: &str) -> Result<ExecOutput> {
        debug!(verb = %verb, unit = %unit, "systemctl");
        let output = Command::new("systemctl").arg(verb).arg(unit).output().await?;
        Ok(ExecOutput {
            exit_code: i64::from(output.status.code().unwrap_or(-1)),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn control(&self, verb: &str, unit: &str) -> Result<()> {
        let output = self.systemctl(verb, unit).await?;
        if output.success() {
            info!(verb = %verb, unit = %unit, "Unit command succeeded");
            return Ok(());
        }
        Err(map_systemctl_failure(unit, verb, &output.stderr))
    }

    fn unsupported(operation: &str) -> Error {
        Error::Unsupported {
            runtime: RuntimeKind::Systemd.to_string(),
            operation: operation.to_string(),
        }
    }
}

fn map_systemctl_failure(unit: &str, verb: &str, stderr: &str) -> Error {
    if stderr.contains("not loaded") || stderr.contains("not found") {
        Error::ContainerNotFound(unit.to_string())
    } else {
        Error::Internal(format!("systemctl {} {}: {}", verb, unit, stderr.trim()))
    }
}

/// Parse `systemctl show --property=...` output into a state. `None` when the
/// unit is not installed.
pub(crate) fn parse_show_output(unit: &str, stdout: &str) -> Option<ContainerState> {
    let props: HashMap<&str, &str> = stdout
        .lines()
        .filter_map(|line| line.split_once('='))
        .collect();

    if props.get("LoadState").copied() == Some("not-found") {
        return None;
    }

    let active = props.get("ActiveState").copied().unwrap_or("unknown");
    let exit_code = props
        .get("ExecMainStatus")
        .and_then(|s| s.parse::<i64>().ok());

    Some(ContainerState {
        name: unit.to_string(),
        running: active == "active",
        status: props
            .get("SubState")
            .copied()
            .unwrap_or(active)
            .to_string(),
        health: None,
        exit_code,
    })
}

#[async_trait]
impl ServiceRuntime for SystemdRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Systemd
    }

    fn instance_name(&self, server_id: &ServerId) -> String {
        format!("{}{}", self.unit_prefix, server_id)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            container_runtime: false,
            service_manager: true,
        }
    }

    async fn pull_image(&self, _image: &str) -> Result<()> {
        Err(Self::unsupported("pull_image"))
    }

    async fn create(&self, _spec: &ContainerSpec) -> Result<String> {
        Err(Self::unsupported("create"))
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.control("start", name).await
    }

    async fn stop(&self, name: &str) -> Result<()> {
        // systemctl exits 0 when stopping an inactive unit
        self.control("stop", name).await
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.control("restart", name).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.control("disable", name).await
    }

    async fn remove_volume(&self, _name: &str) -> Result<()> {
        Err(Self::unsupported("remove_volume"))
    }

    /// Runs on the host. Units share the host's process table, so probes such
    /// as `pgrep` behave as they would inside a container.
    async fn exec(&self, _name: &str, cmd: &[&str]) -> Result<ExecOutput> {
        let Some((program, args)) = cmd.split_first() else {
            return Err(Error::InvalidConfig("empty command".to_string()));
        };
        let output = Command::new(program).args(args).output().await?;
        Ok(ExecOutput {
            exit_code: i64::from(output.status.code().unwrap_or(-1)),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>> {
        let output = Command::new("systemctl")
            .arg("show")
            .arg(name)
            .arg("--property=LoadState,ActiveState,SubState,ExecMainStatus")
            .output()
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_show_output(name, &stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_name_uses_prefix() {
        let runtime = SystemdRuntime::new("gameserver-");
        assert_eq!(
            runtime.instance_name(&ServerId::new("abc")),
            "gameserver-abc"
        );
    }

    #[test]
    fn test_parse_show_active() {
        let out = "LoadState=loaded\nActiveState=active\nSubState=running\nExecMainStatus=0\n";
        let state = parse_show_output("gameserver-abc", out).unwrap();
        assert!(state.running);
        assert_eq!(state.status, "running");
        assert_eq!(state.exit_code, Some(0));
    }

    #[test]
    fn test_parse_show_missing_unit() {
        let out = "LoadState=not-found\nActiveState=inactive\nSubState=dead\n";
        assert!(parse_show_output("gameserver-missing", out).is_none());
    }

    #[test]
    fn test_failure_mapping() {
        let err = map_systemctl_failure("u", "start", "Unit u.service not found.");
        assert!(err.is_not_found());
        let err = map_systemctl_failure("u", "start", "Job failed");
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_is_unsupported() {
        let runtime = SystemdRuntime::new("gameserver-");
        let err = runtime.pull_image("x").await.unwrap_err();
        assert_eq!(err.kind(), fleet_core::ErrorKind::Unsupported);
    }
}
