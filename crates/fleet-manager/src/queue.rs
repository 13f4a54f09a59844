//! Task queue: enqueue, claim, completion and cancellation, plus the server
//! records that completions keep current.

use fleet_core::api::{CompleteTaskRequest, EnqueueTaskRequest};
use fleet_core::ids::{AgentId, ServerId, TaskId, UserId};
use fleet_core::ports::{AgentRepository, ServerRepository, TaskRepository};
use fleet_core::server::{GameServerInstance, GameType, ServerPorts, ServerStatus};
use fleet_core::task::{Task, TaskStatus, TaskType};
use fleet_core::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Why a completion report was refused.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Task {task} belongs to another agent")]
    ForeignAgent { task: TaskId },

    #[error("Task {task} is already {status}")]
    AlreadyTerminal { task: TaskId, status: TaskStatus },

    #[error("Completion status must be terminal, got {0}")]
    NotTerminal(TaskStatus),

    #[error(transparent)]
    Core(#[from] Error),
}

pub struct TaskQueue {
    tasks: Arc<dyn TaskRepository>,
    agents: Arc<dyn AgentRepository>,
    servers: Arc<dyn ServerRepository>,
    claim_limit: usize,
}

impl TaskQueue {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        agents: Arc<dyn AgentRepository>,
        servers: Arc<dyn ServerRepository>,
        claim_limit: usize,
    ) -> Self {
        Self {
            tasks,
            agents,
            servers,
            claim_limit,
        }
    }

    /// Queue a task for an existing agent.
    pub async fn enqueue(&self, request: EnqueueTaskRequest) -> Result<Task> {
        self.agents
            .get(request.agent_id)
            .await?
            .ok_or_else(|| Error::AgentNotFound(request.agent_id.to_string()))?;

        let server_id = request.server_id.or_else(|| command_server_id(&request.command));
        let task = Task::new(request.agent_id, request.task_type, request.command, server_id);
        self.tasks.create(&task).await?;

        info!(
            task_id = %task.id,
            agent_id = %task.agent_id,
            task_type = ?task.task_type,
            "Task enqueued"
        );
        Ok(task)
    }

    pub async fn get(&self, id: TaskId) -> Result<Task> {
        self.tasks
            .get(id)
            .await?
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    /// Hand the agent its pending tasks, oldest first. Each is moved to
    /// RUNNING in the same step so no task is delivered twice.
    pub async fn claim(&self, agent_id: AgentId) -> Result<Vec<Task>> {
        let claimed = self.tasks.claim_pending(agent_id, self.claim_limit).await?;
        if !claimed.is_empty() {
            info!(agent_id = %agent_id, count = claimed.len(), "Tasks claimed");
        }
        Ok(claimed)
    }

    pub async fn list(&self, agent_id: AgentId, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.tasks.list_for_agent(agent_id, status).await
    }

    /// Record the agent's report and update the server record.
    pub async fn complete(
        &self,
        agent_id: AgentId,
        task_id: TaskId,
        report: CompleteTaskRequest,
    ) -> std::result::Result<Task, CompletionError> {
        if !report.status.is_terminal() {
            return Err(CompletionError::NotTerminal(report.status));
        }
        let mut task = self.get(task_id).await?;
        if task.agent_id != agent_id {
            return Err(CompletionError::ForeignAgent { task: task_id });
        }
        if task.status.is_terminal() {
            return Err(CompletionError::AlreadyTerminal {
                task: task_id,
                status: task.status,
            });
        }
        // A report may arrive for a task that was never observed as running.
        if task.status == TaskStatus::Pending && report.status != TaskStatus::Cancelled {
            task.transition(TaskStatus::Running)?;
        }
        task.transition(report.status)?;
        task.result = report.result;
        task.error = report.error;
        task.error_kind = report.error_kind;
        self.tasks.update(&task).await?;

        info!(
            task_id = %task.id,
            agent_id = %agent_id,
            status = %task.status,
            error_kind = ?task.error_kind,
            "Task completed"
        );

        if let Err(e) = self.apply_to_server(&task).await {
            warn!(task_id = %task.id, error = %e, "Failed to update server record");
        }
        Ok(task)
    }

    /// Cancel a task that has not finished. A running task's agent learns of
    /// it when its own report is refused.
    pub async fn cancel(&self, id: TaskId) -> std::result::Result<Task, CompletionError> {
        let mut task = self.get(id).await?;
        if task.status.is_terminal() {
            return Err(CompletionError::AlreadyTerminal {
                task: id,
                status: task.status,
            });
        }
        task.transition(TaskStatus::Cancelled)?;
        self.tasks.update(&task).await?;
        info!(task_id = %id, "Task cancelled");
        Ok(task)
    }

    pub async fn server(&self, id: &ServerId) -> Result<Option<GameServerInstance>> {
        self.servers.get(id).await
    }

    pub async fn servers_for_agent(&self, agent_id: AgentId) -> Result<Vec<GameServerInstance>> {
        self.servers.list_for_agent(agent_id).await
    }

    async fn apply_to_server(&self, task: &Task) -> Result<()> {
        let Some(server_id) = &task.server_id else {
            return Ok(());
        };
        let existing = self.servers.get(server_id).await?;

        match task.status {
            TaskStatus::Completed => match task.task_type {
                TaskType::Provision | TaskType::Update => {
                    let provisioned = ProvisionedServer::from_task(task)?;
                    let record = provisioned.into_instance(server_id, task, existing.as_ref());
                    self.servers.upsert(&record).await
                }
                TaskType::Delete | TaskType::DockerDelete => self.servers.delete(server_id).await,
                TaskType::Start | TaskType::DockerStart | TaskType::Restart => {
                    let status = reported_status(task).unwrap_or(ServerStatus::Running);
                    self.transition_server(existing, status).await
                }
                TaskType::Stop | TaskType::DockerStop => {
                    self.transition_server(existing, ServerStatus::Stopped).await
                }
                TaskType::Backup => Ok(()),
            },
            TaskStatus::Failed if task.task_type != TaskType::Backup => {
                self.transition_server(existing, ServerStatus::Error).await
            }
            _ => Ok(()),
        }
    }

    async fn transition_server(
        &self,
        existing: Option<GameServerInstance>,
        next: ServerStatus,
    ) -> Result<()> {
        let Some(mut server) = existing else {
            return Ok(());
        };
        if let Err(e) = server.transition(next) {
            warn!(server_id = %server.server_id, error = %e, "Server status not updated");
            return Ok(());
        }
        self.servers.upsert(&server).await
    }
}

fn command_server_id(command: &serde_json::Value) -> Option<ServerId> {
    command
        .get("serverId")
        .and_then(|v| v.as_str())
        .map(ServerId::new)
}

fn reported_status(task: &Task) -> Option<ServerStatus> {
    let status = task.result.as_ref()?.get("status")?.clone();
    serde_json::from_value(status).ok()
}

/// The fields of a provisioning result the manager keeps.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionedServer {
    game_type: GameType,
    container_name: String,
    #[serde(default)]
    work_dir: PathBuf,
    #[serde(default)]
    cluster_dir: Option<PathBuf>,
    #[serde(default)]
    server_port: Option<u16>,
    #[serde(default)]
    query_port: Option<u16>,
    #[serde(default)]
    rcon_port: Option<u16>,
    #[serde(default)]
    status: Option<ServerStatus>,
}

impl ProvisionedServer {
    fn from_task(task: &Task) -> Result<Self> {
        let mut result = task.result.clone().unwrap_or_default();
        // Update results carry no game type; fall back to the command.
        if let (Some(map), Some(game_type)) = (result.as_object_mut(), task.command.get("gameType"))
        {
            map.entry("gameType").or_insert_with(|| game_type.clone());
        }
        Ok(serde_json::from_value(result)?)
    }

    fn into_instance(
        self,
        server_id: &ServerId,
        task: &Task,
        existing: Option<&GameServerInstance>,
    ) -> GameServerInstance {
        let user_id = task
            .command
            .get("userId")
            .and_then(|v| v.as_str())
            .map(UserId::new)
            .or_else(|| existing.and_then(|e| e.user_id.clone()));
        let previous = existing.map(|e| e.ports);
        let game = self
            .server_port
            .or(previous.map(|p| p.game))
            .unwrap_or_default();

        GameServerInstance {
            server_id: server_id.clone(),
            user_id,
            agent_id: task.agent_id,
            game_type: self.game_type,
            container_name: self.container_name,
            ports: ServerPorts {
                game,
                query: self
                    .query_port
                    .or(previous.map(|p| p.query))
                    .unwrap_or(game.saturating_add(1)),
                rcon: self
                    .rcon_port
                    .or(previous.map(|p| p.rcon))
                    .unwrap_or_default(),
            },
            work_dir: if self.work_dir.as_os_str().is_empty() {
                existing.map(|e| e.work_dir.clone()).unwrap_or_default()
            } else {
                self.work_dir
            },
            cluster_dir: self
                .cluster_dir
                .or_else(|| existing.and_then(|e| e.cluster_dir.clone())),
            status: self.status.unwrap_or(ServerStatus::Starting),
        }
    }
}
