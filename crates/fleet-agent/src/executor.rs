//! Task execution logic.

use fleet_core::api::CompleteTaskRequest;
use fleet_core::ids::TaskId;
use fleet_core::task::{Task, TaskOutcome, TaskStatus, TaskType};
use fleet_core::{Error, Result};
use fleet_provision::{
    BackupRequest, DeleteRequest, ProvisionRequest, ProvisioningEngine, ServerCommand,
    UpdateRequest,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Dispatches tasks to the provisioning engine.
#[derive(Clone)]
pub struct TaskExecutor {
    engine: Arc<ProvisioningEngine>,
}

impl TaskExecutor {
    pub fn new(engine: Arc<ProvisioningEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &ProvisioningEngine {
        &self.engine
    }

    /// Execute one task.
    pub async fn execute(&self, task: &Task, cancel: &CancellationToken) -> Result<TaskOutcome> {
        info!(task_id = %task.id, task_type = ?task.task_type, "Executing task");
        let engine = &self.engine;

        match task.task_type {
            TaskType::Provision => {
                let request: ProvisionRequest = payload(task)?;
                outcome(engine.provision(&request, cancel).await?)
            }
            TaskType::Start | TaskType::DockerStart => {
                let command: ServerCommand = payload(task)?;
                outcome(engine.start(&command, cancel).await?)
            }
            TaskType::Stop | TaskType::DockerStop => {
                let command: ServerCommand = payload(task)?;
                outcome(engine.stop(&command).await?)
            }
            TaskType::Restart => {
                let command: ServerCommand = payload(task)?;
                outcome(engine.restart(&command, cancel).await?)
            }
            TaskType::Delete | TaskType::DockerDelete => {
                let request: DeleteRequest = payload(task)?;
                outcome(engine.delete(&request).await?)
            }
            TaskType::Backup => {
                let request: BackupRequest = payload(task)?;
                outcome(engine.backup(&request, cancel).await?)
            }
            TaskType::Update => {
                let request: UpdateRequest = payload(task)?;
                outcome(engine.update(&request, cancel).await?)
            }
        }
    }
}

/// Decode the task command. A `serverId` missing from the command is taken
/// from the task's server reference.
fn payload<T: DeserializeOwned>(task: &Task) -> Result<T> {
    let mut command = match &task.command {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other.clone(),
    };
    if let (Some(map), Some(server_id)) = (command.as_object_mut(), &task.server_id) {
        map.entry("serverId")
            .or_insert_with(|| serde_json::Value::String(server_id.to_string()));
    }
    serde_json::from_value(command).map_err(|e| {
        Error::InvalidConfig(format!("invalid {:?} command: {}", task.task_type, e))
    })
}

fn outcome<T: Serialize>(value: T) -> Result<TaskOutcome> {
    Ok(TaskOutcome::success(serde_json::to_value(value)?))
}

/// Map a handler result to the completion report sent to the manager.
pub fn completion(task_id: TaskId, result: Result<TaskOutcome>) -> CompleteTaskRequest {
    match result {
        Ok(outcome) if outcome.success => {
            info!(task_id = %task_id, "Task completed");
            CompleteTaskRequest {
                task_id,
                status: TaskStatus::Completed,
                result: Some(outcome.to_value()),
                error: None,
                error_kind: None,
            }
        }
        Ok(outcome) => {
            warn!(task_id = %task_id, error = ?outcome.error, "Task reported failure");
            CompleteTaskRequest {
                task_id,
                status: TaskStatus::Failed,
                error: outcome.error.clone(),
                error_kind: outcome.error_kind,
                result: Some(outcome.to_value()),
            }
        }
        Err(Error::Cancelled) => {
            warn!(task_id = %task_id, "Task cancelled");
            CompleteTaskRequest {
                task_id,
                status: TaskStatus::Cancelled,
                result: Some(TaskOutcome::from_error(&Error::Cancelled).to_value()),
                error: Some(Error::Cancelled.to_string()),
                error_kind: Some(Error::Cancelled.kind()),
            }
        }
        Err(e) => {
            error!(task_id = %task_id, error = %e, kind = %e.kind(), "Task failed");
            CompleteTaskRequest {
                task_id,
                status: TaskStatus::Failed,
                result: Some(TaskOutcome::from_error(&e).to_value()),
                error: Some(e.to_string()),
                error_kind: Some(e.kind()),
            }
        }
    }
}
