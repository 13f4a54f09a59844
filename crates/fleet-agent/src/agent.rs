//! Main agent implementation.

use crate::client::ManagerClient;
use crate::config::AgentConfig;
use crate::executor::{TaskExecutor, completion};
use crate::heartbeat::HeartbeatService;
use crate::sampler::detect_ipv4;
use fleet_core::agent::Capabilities;
use fleet_core::api::{RegisterRequest, RegisterResponse};
use fleet_core::ids::{AgentId, TaskId};
use fleet_core::ports::ManagerApi;
use fleet_core::task::Task;
use fleet_core::{Error, Result};
use fleet_provision::{ClusterSyncManager, ProvisioningEngine};
use fleet_runtime::RuntimeSelection;
use fleet_trace::TaskAttributes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

type InFlight = Arc<Mutex<HashMap<TaskId, CancellationToken>>>;

/// The machine agent.
pub struct FleetAgent {
    config: AgentConfig,
    agent_id: AgentId,
    capabilities: Capabilities,
    manager: Arc<dyn ManagerApi>,
    executor: TaskExecutor,
    task_semaphore: Arc<Semaphore>,
    in_flight: InFlight,
}

impl FleetAgent {
    pub fn new(
        config: AgentConfig,
        agent_id: AgentId,
        manager: Arc<dyn ManagerApi>,
        selection: RuntimeSelection,
    ) -> Self {
        let engine = ProvisioningEngine::new(
            selection.runtime,
            ClusterSyncManager::new(config.cluster_root.clone()),
            config.engine_settings(),
        );
        let task_semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks as usize));

        Self {
            config,
            agent_id,
            capabilities: selection.capabilities,
            manager,
            executor: TaskExecutor::new(Arc::new(engine)),
            task_semaphore,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn id(&self) -> AgentId {
        self.agent_id
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Register with the manager, retrying with exponential backoff.
    /// Exhausting the attempts is fatal.
    pub async fn register(&self) -> Result<RegisterResponse> {
        let request = RegisterRequest {
            agent_id: self.agent_id,
            agent_ip: detect_ipv4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: self.capabilities,
            hostname: hostname::get().ok().and_then(|h| h.into_string().ok()),
            machine_id: None,
        };
        let policy = &self.config.registration;

        let mut attempt = 1;
        loop {
            match self.manager.register(&request).await {
                Ok(response) => {
                    info!(
                        agent_id = %self.agent_id,
                        agent_ip = %request.agent_ip,
                        attempt,
                        "Agent registered"
                    );
                    return Ok(response);
                }
                Err(e) if attempt >= policy.max_attempts => {
                    error!(agent_id = %self.agent_id, error = %e, "Registration failed, giving up");
                    return Err(Error::RegistrationFailed {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        agent_id = %self.agent_id,
                        attempt,
                        retry_in_secs = delay.as_secs(),
                        error = %e,
                        "Registration failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run heartbeat and task polling until `shutdown` fires, then cancel
    /// in-flight tasks and wait for their workers.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let heartbeat = HeartbeatService::new(
            self.agent_id,
            Arc::clone(&self.manager),
            self.config.heartbeat_interval(),
        );
        let heartbeat_handle = tokio::spawn(heartbeat.run(shutdown.child_token()));

        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut workers = JoinSet::new();

        info!(
            agent_id = %self.agent_id,
            poll_interval_secs = self.config.poll_interval_secs,
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            "Agent started and polling for tasks"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    while workers.try_join_next().is_some() {}
                    let span = fleet_trace::agent_span(&self.agent_id.to_string(), "poll");
                    self.poll_once(&mut workers, &shutdown).instrument(span).await;
                }
            }
        }

        info!(in_flight = workers.len(), "Initiating graceful shutdown");
        self.cancel_all();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Task worker panicked");
            }
        }
        if let Err(e) = heartbeat_handle.await {
            error!(error = %e, "Heartbeat service panicked");
        }

        info!(agent_id = %self.agent_id, "Agent shutdown complete");
        Ok(())
    }

    /// Fetch pending tasks and hand them to the worker pool in the order
    /// the manager returned them.
    pub async fn poll_once(&self, workers: &mut JoinSet<()>, shutdown: &CancellationToken) {
        let tasks = match self.manager.pending_tasks(self.agent_id).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(agent_id = %self.agent_id, error = %e, "Failed to fetch tasks");
                return;
            }
        };
        if tasks.is_empty() {
            debug!(agent_id = %self.agent_id, "No pending tasks");
            return;
        }
        info!(agent_id = %self.agent_id, count = tasks.len(), "Received tasks");

        for task in tasks {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => {
                    // Claimed but never started. Report it so it does not sit in RUNNING.
                    self.report(completion(task.id, Err(Error::Cancelled))).await;
                    continue;
                }
                permit = Arc::clone(&self.task_semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        error!("Task semaphore closed");
                        return;
                    }
                },
            };

            let token = shutdown.child_token();
            self.lock_in_flight().insert(task.id, token.clone());

            let executor = self.executor.clone();
            let manager = Arc::clone(&self.manager);
            let in_flight = Arc::clone(&self.in_flight);
            let span = fleet_trace::task_span(&task_attributes(self.agent_id, &task));

            workers.spawn(
                async move {
                    let result = executor.execute(&task, &token).await;
                    let report = completion(task.id, result);
                    if let Err(e) = manager.complete_task(&report).await {
                        error!(task_id = %task.id, error = %e, "Failed to report task result");
                    }
                    in_flight
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&task.id);
                    drop(permit);
                }
                .instrument(span),
            );
        }
    }

    /// Cancel one in-flight task. Returns whether it was running here.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        match self.lock_in_flight().get(&id) {
            Some(token) => {
                info!(task_id = %id, "Cancelling task");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> Vec<TaskId> {
        self.lock_in_flight().keys().copied().collect()
    }

    fn cancel_all(&self) {
        for token in self.lock_in_flight().values() {
            token.cancel();
        }
    }

    async fn report(&self, report: fleet_core::api::CompleteTaskRequest) {
        if let Err(e) = self.manager.complete_task(&report).await {
            error!(task_id = %report.task_id, error = %e, "Failed to report task result");
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn task_attributes(agent_id: AgentId, task: &Task) -> TaskAttributes {
    let attrs = TaskAttributes::new()
        .task(task.id.to_string(), format!("{:?}", task.task_type))
        .agent(agent_id.to_string());
    match &task.server_id {
        Some(server_id) => attrs.server(server_id.to_string()),
        None => attrs,
    }
}

/// The configured agent id, else the one persisted at `path`, else a new
/// id which is then persisted.
pub fn load_or_create_agent_id(configured: Option<AgentId>, path: &Path) -> Result<AgentId> {
    if let Some(id) = configured {
        return Ok(id);
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => contents.trim().parse().map_err(|e| {
            Error::InvalidConfig(format!("agent id file {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = AgentId::new();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, id.to_string())?;
            info!(agent_id = %id, path = %path.display(), "Generated agent id");
            Ok(id)
        }
        Err(e) => Err(e.into()),
    }
}

/// The key issued to this agent and persisted at `path`, else the
/// configured enrollment key.
pub fn load_api_key(configured: Option<String>, path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let issued = contents.trim();
            if issued.is_empty() {
                Ok(configured)
            } else {
                Ok(Some(issued.to_string()))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(configured),
        Err(e) => Err(e.into()),
    }
}

/// Register, then persist a newly issued key and switch `client` to it.
pub async fn register_and_store_key(
    agent: &FleetAgent,
    client: &ManagerClient,
    key_file: &Path,
) -> Result<RegisterResponse> {
    let response = agent.register().await?;
    if let Some(key) = &response.api_key {
        store_api_key(key_file, key)?;
        client.set_api_key(key.clone());
        info!(path = %key_file.display(), "Stored newly issued API key");
    }
    Ok(response)
}

/// Persist an issued key readable by the owner only.
pub fn store_api_key(path: &Path, key: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, key)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
