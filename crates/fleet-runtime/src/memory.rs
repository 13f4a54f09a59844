//! In-memory runtime for tests.

use crate::runtime::{ContainerSpec, ContainerState, ExecOutput, RuntimeKind, ServiceRuntime};
use async_trait::async_trait;
use fleet_core::agent::Capabilities;
use fleet_core::ids::ServerId;
use fleet_core::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct MemoryContainer {
    pub spec: ContainerSpec,
    pub running: bool,
    pub probes: u32,
}

#[derive(Default)]
struct Inner {
    containers: BTreeMap<String, MemoryContainer>,
    volumes: BTreeSet<String>,
    pulled: Vec<String>,
    calls: Vec<String>,
}

/// Records every call and simulates a container engine.
///
/// `pgrep` probes succeed once a running container has been probed
/// `ready_after` times. `ss`/`netstat` report every mapped port as listening.
pub struct MemoryRuntime {
    inner: Mutex<Inner>,
    ready_after: Option<u32>,
    fail_pull: bool,
    occupied_ports: HashSet<u16>,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ready_after: Some(0),
            fail_pull: false,
            occupied_ports: HashSet::new(),
        }
    }

    /// Process appears after `probes` failed probes.
    pub fn with_ready_after(mut self, probes: u32) -> Self {
        self.ready_after = Some(probes);
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.ready_after = None;
        self
    }

    pub fn with_pull_failure(mut self) -> Self {
        self.fail_pull = true;
        self
    }

    pub fn with_occupied_port(mut self, port: u16) -> Self {
        self.occupied_ports.insert(port);
        self
    }

    /// Seed a container as if it had been created earlier.
    pub fn insert(&self, spec: ContainerSpec, running: bool) {
        let mut inner = self.lock();
        if let Some(volume) = spec.volumes.iter().find_map(named_volume) {
            inner.volumes.insert(volume);
        }
        inner.containers.insert(
            spec.name.clone(),
            MemoryContainer {
                spec,
                running,
                probes: 0,
            },
        );
    }

    pub fn container(&self, name: &str) -> Option<MemoryContainer> {
        self.lock().containers.get(name).cloned()
    }

    pub fn volumes(&self) -> Vec<String> {
        self.lock().volumes.iter().cloned().collect()
    }

    pub fn pulled(&self) -> Vec<String> {
        self.lock().pulled.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: String) {
        self.lock().calls.push(call);
    }
}

fn named_volume(mount: &crate::runtime::VolumeMount) -> Option<String> {
    match mount {
        crate::runtime::VolumeMount::Named { name, .. } => Some(name.clone()),
        crate::runtime::VolumeMount::Bind { .. } => None,
    }
}

#[async_trait]
impl ServiceRuntime for MemoryRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Memory
    }

    fn instance_name(&self, server_id: &ServerId) -> String {
        format!("gs-{}", server_id)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            container_runtime: true,
            service_manager: false,
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.record(format!("pull {}", image));
        if self.fail_pull {
            return Err(Error::ImagePull {
                image: image.to_string(),
                message: "manifest unknown".to_string(),
            });
        }
        self.lock().pulled.push(image.to_string());
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        self.record(format!("create {}", spec.name));
        if let Some(port) = spec
            .ports
            .iter()
            .map(|p| p.host)
            .find(|p| self.occupied_ports.contains(p))
        {
            return Err(Error::PortConflict { port });
        }
        let mut inner = self.lock();
        if inner.containers.contains_key(&spec.name) {
            return Err(Error::Internal(format!(
                "container name {} already in use",
                spec.name
            )));
        }
        for volume in spec.volumes.iter().filter_map(named_volume) {
            inner.volumes.insert(volume);
        }
        inner.containers.insert(
            spec.name.clone(),
            MemoryContainer {
                spec: spec.clone(),
                running: false,
                probes: 0,
            },
        );
        Ok(format!("mem-{}", spec.name))
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.record(format!("start {}", name));
        let mut inner = self.lock();
        let container = inner
            .containers
            .get_mut(name)
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.record(format!("stop {}", name));
        let mut inner = self.lock();
        let container = inner
            .containers
            .get_mut(name)
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))?;
        container.running = false;
        container.probes = 0;
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.record(format!("restart {}", name));
        let mut inner = self.lock();
        let container = inner
            .containers
            .get_mut(name)
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))?;
        container.running = true;
        container.probes = 0;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.record(format!("remove {}", name));
        self.lock()
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.record(format!("remove-volume {}", name));
        if self.lock().volumes.remove(name) {
            Ok(())
        } else {
            Err(Error::ContainerNotFound(name.to_string()))
        }
    }

    async fn exec(&self, name: &str, cmd: &[&str]) -> Result<ExecOutput> {
        self.record(format!("exec {} {}", name, cmd.join(" ")));
        let mut inner = self.lock();
        let container = inner
            .containers
            .get_mut(name)
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))?;

        match cmd.first().copied() {
            Some("pgrep") => {
                let ready = container.running
                    && self
                        .ready_after
                        .is_some_and(|after| container.probes >= after);
                container.probes += 1;
                Ok(if ready {
                    ExecOutput {
                        exit_code: 0,
                        stdout: "4242\n".to_string(),
                        stderr: String::new(),
                    }
                } else {
                    ExecOutput {
                        exit_code: 1,
                        ..Default::default()
                    }
                })
            }
            _ if cmd.iter().any(|c| c.contains("ss ") || c.contains("netstat")) => {
                let stdout = container
                    .spec
                    .ports
                    .iter()
                    .map(|p| format!("LISTEN 0 128 0.0.0.0:{} 0.0.0.0:*\n", p.container))
                    .collect();
                Ok(ExecOutput {
                    exit_code: 0,
                    stdout,
                    stderr: String::new(),
                })
            }
            _ => Ok(ExecOutput::default()),
        }
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>> {
        Ok(self.lock().containers.get(name).map(|c| ContainerState {
            name: name.to_string(),
            running: c.running,
            status: if c.running { "running" } else { "exited" }.to_string(),
            health: None,
            exit_code: None,
        }))
    }
}
