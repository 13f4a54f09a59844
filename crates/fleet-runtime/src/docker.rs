//! Docker engine adapter.

use crate::runtime::{ContainerSpec, ContainerState, ExecOutput, RuntimeKind, ServiceRuntime};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HealthConfig, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::volume::RemoveVolumeOptions;
use fleet_core::agent::Capabilities;
use fleet_core::ids::ServerId;
use fleet_core::{Error, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Seconds the engine waits for a graceful stop before killing.
const STOP_GRACE_SECS: i64 = 30;

pub struct DockerRuntime {
    docker: Docker,
    container_prefix: String,
}

impl DockerRuntime {
    /// Connect over the engine's local socket and verify it answers.
    pub async fn connect(
        socket: Option<&Path>,
        timeout_secs: u64,
        container_prefix: impl Into<String>,
    ) -> Result<Self> {
        let docker = match socket {
            Some(path) => Docker::connect_with_socket(
                &path.to_string_lossy(),
                timeout_secs,
                bollard::API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| Error::RuntimeUnavailable(format!("Failed to connect to Docker: {}", e)))?;

        docker
            .ping()
            .await
            .map_err(|e| Error::RuntimeUnavailable(format!("Docker did not answer ping: {}", e)))?;

        Ok(Self::with_docker(docker, container_prefix))
    }

    /// Wrap an existing client.
    pub fn with_docker(docker: Docker, container_prefix: impl Into<String>) -> Self {
        Self {
            docker,
            container_prefix: container_prefix.into(),
        }
    }

    fn container_config(spec: &ContainerSpec) -> Config<String> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &spec.ports {
            let key = format!("{}/{}", port.container, port.protocol);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(port.host.to_string()),
                }]),
            );
        }

        let binds = spec.volumes.iter().map(|v| v.to_bind_string()).collect();

        let healthcheck = spec.healthcheck.as_ref().map(|hc| HealthConfig {
            test: Some(hc.test.clone()),
            interval: Some(hc.interval.as_nanos() as i64),
            timeout: Some(hc.timeout.as_nanos() as i64),
            retries: Some(i64::from(hc.retries)),
            start_period: Some(hc.start_period.as_nanos() as i64),
            ..Default::default()
        });

        Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            labels: Some(spec.labels.clone().into_iter().collect()),
            healthcheck,
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                binds: Some(binds),
                restart_policy: Some(RestartPolicy {
                    name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                    maximum_retry_count: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Map an engine error onto the shared taxonomy.
fn map_docker_error(name: &str, operation: &str, err: DockerError) -> Error {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => Error::ContainerNotFound(name.to_string()),
        DockerError::DockerResponseServerError { message, .. }
            if message.contains("port is already allocated")
                || message.contains("address already in use") =>
        {
            match parse_conflicting_port(&message) {
                Some(port) => Error::PortConflict { port },
                None => Error::Internal(format!("{} {}: {}", operation, name, message)),
            }
        }
        other => Error::Internal(format!("{} {}: {}", operation, name, other)),
    }
}

/// Engine says "not modified" for stop on a stopped container and start on a
/// running one.
fn is_not_modified(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

/// Extract the host port from messages such as
/// `Bind for 0.0.0.0:7777 failed: port is already allocated`.
pub(crate) fn parse_conflicting_port(message: &str) -> Option<u16> {
    let head = message
        .split(" failed")
        .next()
        .unwrap_or(message);
    head.rsplit(':')
        .next()
        .map(|s| s.trim_matches(|c: char| !c.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
}

#[async_trait]
impl ServiceRuntime for DockerRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Docker
    }

    fn instance_name(&self, server_id: &ServerId) -> String {
        format!("{}{}", self.container_prefix, server_id)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            container_runtime: true,
            service_manager: false,
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(image = %image, "Pulling image");

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image = %image, status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    return Err(Error::ImagePull {
                        image: image.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        info!(container = %spec.name, image = %spec.image, "Creating container");

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), Self::container_config(spec))
            .await
            .map_err(|e| map_docker_error(&spec.name, "create", e))?;

        for warning in &response.warnings {
            warn!(container = %spec.name, warning = %warning, "Engine warning on create");
        }

        Ok(response.id)
    }

    async fn start(&self, name: &str) -> Result<()> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(map_docker_error(name, "start", e)),
        }
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let options = StopContainerOptions { t: STOP_GRACE_SECS };
        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => {
                debug!(container = %name, "Container already stopped");
                Ok(())
            }
            Err(e) => Err(map_docker_error(name, "stop", e)),
        }
    }

    async fn restart(&self, name: &str) -> Result<()> {
        let options = RestartContainerOptions {
            t: STOP_GRACE_SECS as isize,
        };
        self.docker
            .restart_container(name, Some(options))
            .await
            .map_err(|e| map_docker_error(name, "restart", e))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| map_docker_error(name, "remove", e))
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
            .map_err(|e| map_docker_error(name, "remove volume", e))
    }

    async fn exec(&self, name: &str, cmd: &[&str]) -> Result<ExecOutput> {
        let options = CreateExecOptions {
            cmd: Some(cmd.iter().map(|s| s.to_string()).collect()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(name, options)
            .await
            .map_err(|e| map_docker_error(name, "exec", e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_docker_error(name, "exec", e))?
        {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(container = %name, error = %e, "Error reading exec output");
                        break;
                    }
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| map_docker_error(name, "exec", e))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>> {
        let response = match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(r) => r,
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(None),
            Err(e) => return Err(map_docker_error(name, "inspect", e)),
        };

        let state = response.state.unwrap_or_default();
        Ok(Some(ContainerState {
            name: name.to_string(),
            running: state.running.unwrap_or(false),
            status: state
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            health: state
                .health
                .and_then(|h| h.status)
                .map(|s| s.to_string()),
            exit_code: state.exit_code,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{HealthCheck, PortMapping, Protocol, VolumeMount};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "gs-abc".to_string(),
            image: "example/ark:latest".to_string(),
            env: BTreeMap::from([("MAP".to_string(), "TheIsland_WP".to_string())]),
            ports: vec![
                PortMapping {
                    host: 7777,
                    container: 7777,
                    protocol: Protocol::Udp,
                },
                PortMapping {
                    host: 27020,
                    container: 27020,
                    protocol: Protocol::Tcp,
                },
            ],
            volumes: vec![
                VolumeMount::Named {
                    name: "gs-abc-data".to_string(),
                    target: "/data".to_string(),
                },
                VolumeMount::Bind {
                    source: "/srv/cluster/t1".to_string(),
                    target: "/cluster".to_string(),
                },
            ],
            healthcheck: Some(HealthCheck {
                test: vec!["CMD-SHELL".to_string(), "pgrep -f Server".to_string()],
                interval: Duration::from_secs(30),
                timeout: Duration::from_secs(10),
                retries: 5,
                start_period: Duration::from_secs(120),
            }),
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn test_container_config_ports_and_binds() {
        let config = DockerRuntime::container_config(&spec());

        let exposed = config.exposed_ports.unwrap();
        assert!(exposed.contains_key("7777/udp"));
        assert!(exposed.contains_key("27020/tcp"));

        let host = config.host_config.unwrap();
        let binding = host.port_bindings.unwrap()["27020/tcp"].clone().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("27020"));
        assert_eq!(
            host.binds.unwrap(),
            vec!["gs-abc-data:/data", "/srv/cluster/t1:/cluster"]
        );
        assert_eq!(
            host.restart_policy.unwrap().name,
            Some(RestartPolicyNameEnum::UNLESS_STOPPED)
        );
    }

    #[test]
    fn test_healthcheck_durations_are_nanoseconds() {
        let config = DockerRuntime::container_config(&spec());
        let hc = config.healthcheck.unwrap();
        assert_eq!(hc.interval, Some(30_000_000_000));
        assert_eq!(hc.start_period, Some(120_000_000_000));
        assert_eq!(hc.retries, Some(5));
    }

    #[test]
    fn test_parse_conflicting_port() {
        assert_eq!(
            parse_conflicting_port("Bind for 0.0.0.0:7777 failed: port is already allocated"),
            Some(7777)
        );
        assert_eq!(parse_conflicting_port("something else"), None);
    }

    #[test]
    fn test_not_found_maps_to_container_not_found() {
        let err = map_docker_error(
            "gs-x",
            "stop",
            DockerError::DockerResponseServerError {
                status_code: 404,
                message: "No such container".to_string(),
            },
        );
        assert!(err.is_not_found());
    }
}
