//! The provisioning engine.

use crate::archive::{self, ArchiveInfo, ArchiveSource};
use crate::cluster::ClusterSyncManager;
use crate::config::{ProvisionRequest, ServerConfig, validate_server_id};
use crate::descriptor::{ComposeFile, Descriptor};
use crate::readiness::ReadinessProbe;
use chrono::Utc;
use fleet_core::ids::{ServerId, TenantId};
use fleet_core::server::{GameType, ServerStatus};
use fleet_core::{Error, Result};
use fleet_mods::{
    AutoUpdater, KnownConflicts, ModCatalog, ModConflict, ModResolver, SkipReason, UpdateReport,
};
use fleet_runtime::ServiceRuntime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PORT_CHECK: &str = "ss -tuln 2>/dev/null || netstat -tuln 2>/dev/null";
const BACKUP_LEASE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub work_root: PathBuf,
    pub backup_root: PathBuf,
    pub backup_retention: usize,
    pub provision_probe: ReadinessProbe,
    pub start_probe: ReadinessProbe,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("/var/lib/fleet/servers"),
            backup_root: PathBuf::from("/var/lib/fleet/backups"),
            backup_retention: 5,
            provision_probe: ReadinessProbe::PROVISION,
            start_probe: ReadinessProbe::START,
        }
    }
}

/// Payload of START, STOP and RESTART tasks and their DOCKER_* aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCommand {
    pub server_id: ServerId,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub game_type: Option<GameType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub server_id: ServerId,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default = "default_true")]
    pub remove_volume: bool,
    #[serde(default = "default_true")]
    pub remove_work_dir: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequest {
    pub server_id: ServerId,
    #[serde(default)]
    pub include_cluster: bool,
    #[serde(default)]
    pub cluster_id: Option<TenantId>,
    #[serde(default)]
    pub retention: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    #[serde(flatten)]
    pub server: ProvisionRequest,
    #[serde(default)]
    pub installed_mods: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub test_before_apply: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionOutcome {
    pub server_id: ServerId,
    pub game_type: GameType,
    pub container_name: String,
    pub work_dir: PathBuf,
    pub cluster_dir: Option<PathBuf>,
    pub server_port: u16,
    pub query_port: u16,
    pub rcon_port: u16,
    pub map_name: String,
    pub max_players: u32,
    pub status: ServerStatus,
    pub load_order: Vec<String>,
    pub conflicts: Vec<ModConflict>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleOutcome {
    pub server_id: ServerId,
    pub container_name: String,
    pub action: String,
    pub status: ServerStatus,
    /// The instance was already in the requested state or gone.
    pub noop: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step: String,
    pub ok: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub server_id: ServerId,
    pub container_name: String,
    pub steps: Vec<StepOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOutcome {
    pub server_id: ServerId,
    pub archive: ArchiveInfo,
    pub cluster_included: bool,
    pub pruned: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub server_id: ServerId,
    pub container_name: String,
    pub image: String,
    pub status: ServerStatus,
    pub load_order: Vec<String>,
    pub mod_report: Option<UpdateReport>,
    pub warnings: Vec<String>,
}

/// Executes provisioning and lifecycle operations against one runtime.
pub struct ProvisioningEngine {
    runtime: Arc<dyn ServiceRuntime>,
    cluster: ClusterSyncManager,
    settings: EngineSettings,
    known_conflicts: KnownConflicts,
}

impl ProvisioningEngine {
    pub fn new(
        runtime: Arc<dyn ServiceRuntime>,
        cluster: ClusterSyncManager,
        settings: EngineSettings,
    ) -> Self {
        Self {
            runtime,
            cluster,
            settings,
            known_conflicts: KnownConflicts::builtin(),
        }
    }

    pub fn with_known_conflicts(mut self, known: KnownConflicts) -> Self {
        self.known_conflicts = known;
        self
    }

    pub fn runtime(&self) -> &Arc<dyn ServiceRuntime> {
        &self.runtime
    }

    pub fn cluster(&self) -> &ClusterSyncManager {
        &self.cluster
    }

    pub fn work_dir(&self, server_id: &ServerId) -> PathBuf {
        self.settings.work_root.join(server_id.as_str())
    }

    fn instance(&self, server_id: &ServerId, override_name: Option<&str>) -> String {
        override_name
            .map(str::to_string)
            .unwrap_or_else(|| self.runtime.instance_name(server_id))
    }

    /// Create and start a new server, then wait for its process.
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionOutcome> {
        let config = ServerConfig::build(request, self.runtime.instance_name(&request.server_id))?;
        info!(
            server_id = %config.server_id,
            game_type = %config.game_type,
            container = %config.container_name,
            "Provisioning server"
        );

        let mut warnings = Vec::new();
        let work_dir = self.work_dir(&config.server_id);
        tokio::fs::create_dir_all(&work_dir).await?;
        ensure_active(cancel)?;

        if let Err(e) = self.runtime.pull_image(&config.image).await {
            warn!(image = %config.image, error = %e, "Image pull failed, using local copy");
            warnings.push(format!("image pull failed: {}", e));
        }
        ensure_active(cancel)?;

        let (load_order, conflicts) =
            self.resolve_mods(&config, request.mod_catalog.as_ref(), &mut warnings);

        let cluster_dir = match &config.cluster_tenant {
            Some(tenant) => Some(self.cluster.ensure_cluster_dir(tenant).await?),
            None => None,
        };

        let descriptor = Descriptor::render(&config, cluster_dir.as_deref(), &load_order);
        let descriptor_path = descriptor.write(&work_dir).await?;
        debug!(path = %descriptor_path.display(), "Descriptor written");

        self.remove_existing(&config.container_name).await?;
        ensure_active(cancel)?;

        self.runtime.create(descriptor.container_spec()).await?;
        self.runtime.start(&config.container_name).await?;

        let ready = self
            .settings
            .provision_probe
            .wait(
                self.runtime.as_ref(),
                &config.container_name,
                config.profile().process_name,
                cancel,
            )
            .await?;
        let status = if ready {
            ServerStatus::Running
        } else {
            warnings.push(format!(
                "game process not detected after {} probes; server may still be starting",
                self.settings.provision_probe.attempts
            ));
            ServerStatus::Starting
        };

        self.verify_ports(&config, &mut warnings).await;

        info!(server_id = %config.server_id, status = %status, "Server provisioned");

        Ok(ProvisionOutcome {
            server_id: config.server_id.clone(),
            game_type: config.game_type,
            container_name: config.container_name.clone(),
            work_dir,
            cluster_dir,
            server_port: config.ports.game,
            query_port: config.ports.query,
            rcon_port: config.ports.rcon,
            map_name: config.map_name.clone(),
            max_players: config.max_players,
            status,
            load_order,
            conflicts,
            warnings,
        })
    }

    pub async fn start(
        &self,
        command: &ServerCommand,
        cancel: &CancellationToken,
    ) -> Result<LifecycleOutcome> {
        let name = self.instance(&command.server_id, command.container_name.as_deref());
        info!(server_id = %command.server_id, container = %name, "Starting server");
        self.runtime.start(&name).await?;
        self.await_ready(command, name, "start", cancel).await
    }

    pub async fn restart(
        &self,
        command: &ServerCommand,
        cancel: &CancellationToken,
    ) -> Result<LifecycleOutcome> {
        let name = self.instance(&command.server_id, command.container_name.as_deref());
        info!(server_id = %command.server_id, container = %name, "Restarting server");
        self.runtime.restart(&name).await?;
        self.await_ready(command, name, "restart", cancel).await
    }

    /// Stop a server. A missing instance counts as stopped.
    pub async fn stop(&self, command: &ServerCommand) -> Result<LifecycleOutcome> {
        let name = self.instance(&command.server_id, command.container_name.as_deref());
        info!(server_id = %command.server_id, container = %name, "Stopping server");

        let noop = match self.runtime.stop(&name).await {
            Ok(()) => false,
            Err(e) if e.is_not_found() => {
                info!(container = %name, "Container not found, treating as stopped");
                true
            }
            Err(e) => return Err(e),
        };

        Ok(LifecycleOutcome {
            server_id: command.server_id.clone(),
            container_name: name,
            action: "stop".to_string(),
            status: ServerStatus::Stopped,
            noop,
            warnings: Vec::new(),
        })
    }

    /// Tear a server down. Every step runs even if an earlier one failed.
    pub async fn delete(&self, request: &DeleteRequest) -> Result<DeleteOutcome> {
        validate_server_id(&request.server_id)?;
        let name = self.instance(&request.server_id, request.container_name.as_deref());
        info!(server_id = %request.server_id, container = %name, "Deleting server");

        let mut steps = vec![
            step("stop", self.runtime.stop(&name).await),
            step("remove-container", self.runtime.remove(&name).await),
        ];

        if request.remove_volume {
            let volume = format!("{}-data", name);
            steps.push(step("remove-volume", self.runtime.remove_volume(&volume).await));
        }

        if request.remove_work_dir {
            let work_dir = self.work_dir(&request.server_id);
            let removed = match tokio::fs::remove_dir_all(&work_dir).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other.map_err(Error::from),
            };
            steps.push(step("remove-work-dir", removed));
        }

        for s in steps.iter().filter(|s| !s.ok) {
            warn!(
                server_id = %request.server_id,
                step = %s.step,
                detail = ?s.detail,
                "Delete step failed"
            );
        }

        Ok(DeleteOutcome {
            server_id: request.server_id.clone(),
            container_name: name,
            steps,
        })
    }

    /// Archive the working directory, and optionally the cluster directory.
    pub async fn backup(
        &self,
        request: &BackupRequest,
        cancel: &CancellationToken,
    ) -> Result<BackupOutcome> {
        validate_server_id(&request.server_id)?;
        let work_dir = self.work_dir(&request.server_id);
        if !tokio::fs::try_exists(&work_dir).await? {
            return Err(Error::InvalidConfig(format!(
                "no working directory for server {}",
                request.server_id
            )));
        }
        ensure_active(cancel)?;

        let mut sources = vec![ArchiveSource {
            name: "server".to_string(),
            path: work_dir,
        }];

        let holder = format!("backup:{}", request.server_id);
        let lease = match (&request.cluster_id, request.include_cluster) {
            (Some(tenant), true) => {
                let lease = self.cluster.acquire(tenant, &holder, BACKUP_LEASE_TTL).await?;
                sources.push(ArchiveSource {
                    name: "cluster".to_string(),
                    path: self.cluster.cluster_dir(tenant)?,
                });
                Some(lease)
            }
            (None, true) => {
                return Err(Error::InvalidConfig(
                    "includeCluster requires clusterId".to_string(),
                ));
            }
            _ => None,
        };
        let cluster_included = lease.is_some();

        let dir = self.settings.backup_root.join(request.server_id.as_str());
        let dest = dir.join(archive::archive_name(request.server_id.as_str(), Utc::now()));
        let prefix = format!("{}-", request.server_id);
        let keep = request
            .retention
            .unwrap_or(self.settings.backup_retention)
            .max(1);

        let result = tokio::task::spawn_blocking(move || {
            let info = archive::create_archive(&dest, &sources, &[crate::cluster::LEASE_FILE])?;
            let pruned = archive::prune_archives(&dir, &prefix, keep)?;
            Ok::<_, Error>((info, pruned))
        })
        .await
        .map_err(|e| Error::Internal(format!("backup task failed: {}", e)))
        .and_then(|r| r);

        if let Some(lease) = lease {
            self.cluster.release(&lease).await?;
        }
        let (archive, pruned) = result?;

        info!(
            server_id = %request.server_id,
            path = %archive.path.display(),
            size_bytes = archive.size_bytes,
            pruned = pruned.len(),
            "Backup written"
        );

        Ok(BackupOutcome {
            server_id: request.server_id.clone(),
            archive,
            cluster_included,
            pruned,
        })
    }

    /// Pull the image, run the mod update pass and recreate the container.
    ///
    /// The container is rebuilt from the stored descriptor. Fields set in
    /// the payload replace the stored ones.
    pub async fn update(
        &self,
        request: &UpdateRequest,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome> {
        validate_server_id(&request.server.server_id)?;
        let mut warnings = Vec::new();
        let work_dir = self.work_dir(&request.server.server_id);
        let stored = ComposeFile::load(&work_dir).await?.and_then(|compose| {
            compose.provision_request(&request.server.server_id, request.server.game_type)
        });
        let server = match stored {
            Some(stored) => request.server.overlay(stored),
            None => {
                warn!(server_id = %request.server.server_id, "No stored descriptor, updating from payload");
                warnings.push("no stored descriptor; settings taken from the payload".to_string());
                request.server.clone()
            }
        };
        let server = &server;
        let config = ServerConfig::build(server, self.runtime.instance_name(&server.server_id))?;
        info!(server_id = %config.server_id, image = %config.image, "Updating server");

        self.runtime.pull_image(&config.image).await?;
        ensure_active(cancel)?;

        let mod_report = server.mod_catalog.as_ref().map(|catalog| {
            let resolver = ModResolver::new(catalog, &self.known_conflicts);
            AutoUpdater::new(&resolver, request.test_before_apply).run(
                config.game_type,
                &config.mods,
                &request.installed_mods,
            )
        });
        let (load_order, _) = self.resolve_mods(&config, server.mod_catalog.as_ref(), &mut warnings);

        let cluster_dir = match &config.cluster_tenant {
            Some(tenant) => Some(self.cluster.ensure_cluster_dir(tenant).await?),
            None => None,
        };
        tokio::fs::create_dir_all(&work_dir).await?;
        let descriptor = Descriptor::render(&config, cluster_dir.as_deref(), &load_order);
        descriptor.write(&work_dir).await?;

        self.remove_existing(&config.container_name).await?;
        ensure_active(cancel)?;
        self.runtime.create(descriptor.container_spec()).await?;
        self.runtime.start(&config.container_name).await?;

        let ready = self
            .settings
            .start_probe
            .wait(
                self.runtime.as_ref(),
                &config.container_name,
                config.profile().process_name,
                cancel,
            )
            .await?;
        if !ready {
            warnings.push("game process not detected after update".to_string());
        }

        Ok(UpdateOutcome {
            server_id: config.server_id.clone(),
            container_name: config.container_name.clone(),
            image: config.image.clone(),
            status: if ready {
                ServerStatus::Running
            } else {
                ServerStatus::Starting
            },
            load_order,
            mod_report,
            warnings,
        })
    }

    async fn await_ready(
        &self,
        command: &ServerCommand,
        name: String,
        action: &str,
        cancel: &CancellationToken,
    ) -> Result<LifecycleOutcome> {
        let mut warnings = Vec::new();
        let game_type = match command.game_type {
            Some(game_type) => Some(game_type),
            None => ComposeFile::load(&self.work_dir(&command.server_id))
                .await
                .ok()
                .flatten()
                .and_then(|compose| compose.game_type()),
        };

        let status = match game_type {
            Some(game_type) => {
                let process = crate::games::GameProfile::for_game(game_type).process_name;
                if self
                    .settings
                    .start_probe
                    .wait(self.runtime.as_ref(), &name, process, cancel)
                    .await?
                {
                    ServerStatus::Running
                } else {
                    warnings.push("game process not detected yet".to_string());
                    ServerStatus::Starting
                }
            }
            None => {
                warnings.push("game type unknown, readiness not checked".to_string());
                ServerStatus::Starting
            }
        };

        Ok(LifecycleOutcome {
            server_id: command.server_id.clone(),
            container_name: name,
            action: action.to_string(),
            status,
            noop: false,
            warnings,
        })
    }

    /// Load order for the configured mods. Without a catalog the requested
    /// order is kept as is.
    fn resolve_mods(
        &self,
        config: &ServerConfig,
        catalog: Option<&ModCatalog>,
        warnings: &mut Vec<String>,
    ) -> (Vec<String>, Vec<ModConflict>) {
        let Some(catalog) = catalog else {
            let mut seen = BTreeSet::new();
            let order = config
                .mods
                .iter()
                .filter(|m| seen.insert(m.as_str()))
                .cloned()
                .collect();
            return (order, Vec::new());
        };

        let resolver = ModResolver::new(catalog, &self.known_conflicts);
        let order = resolver.optimize_load_order(&config.mods);
        for skipped in &order.skipped {
            let reason = match &skipped.reason {
                SkipReason::NotInCatalog => "not in catalog".to_string(),
                SkipReason::CircularDependency { via } => format!("circular dependency via {}", via),
            };
            warnings.push(format!("mod {} skipped: {}", skipped.mod_id, reason));
        }
        let conflicts = resolver.detect_conflicts(&config.mods);
        for conflict in &conflicts {
            warn!(
                mod_id = %conflict.mod_id,
                conflicting_mod_id = %conflict.conflicting_mod_id,
                severity = %conflict.severity,
                "Mod conflict in active set"
            );
            warnings.push(format!(
                "mods {} and {} conflict ({})",
                conflict.mod_id, conflict.conflicting_mod_id, conflict.severity
            ));
        }

        let ids = order.entries.into_iter().map(|e| e.mod_id).collect();
        (ids, conflicts)
    }

    async fn remove_existing(&self, name: &str) -> Result<()> {
        if self.runtime.inspect(name).await?.is_none() {
            return Ok(());
        }
        warn!(container = %name, "Replacing existing container");
        for result in [self.runtime.stop(name).await, self.runtime.remove(name).await] {
            match result {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn verify_ports(&self, config: &ServerConfig, warnings: &mut Vec<String>) {
        let output = match self
            .runtime
            .exec(&config.container_name, &["sh", "-c", PORT_CHECK])
            .await
        {
            Ok(output) if output.success() => output,
            Ok(output) => {
                debug!(exit_code = output.exit_code, "Port listing unavailable");
                warnings.push("port verification unavailable".to_string());
                return;
            }
            Err(e) => {
                debug!(error = %e, "Port verification failed");
                warnings.push("port verification unavailable".to_string());
                return;
            }
        };

        for port in [config.ports.game, config.ports.query, config.ports.rcon] {
            if !output.stdout.contains(&format!(":{} ", port)) {
                warnings.push(format!("port {} not listening yet", port));
            }
        }
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Best-effort step result. A missing target counts as done.
fn step(name: &str, result: Result<()>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome {
            step: name.to_string(),
            ok: true,
            detail: None,
        },
        Err(e) if e.is_not_found() => StepOutcome {
            step: name.to_string(),
            ok: true,
            detail: Some("already gone".to_string()),
        },
        Err(e) => StepOutcome {
            step: name.to_string(),
            ok: false,
            detail: Some(e.to_string()),
        },
    }
}
