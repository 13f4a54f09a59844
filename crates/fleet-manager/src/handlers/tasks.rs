//! Agent-facing task handlers.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use fleet_core::api::{Ack, CompleteTaskRequest, TaskList};
use fleet_core::ids::{AgentId, TaskId};
use fleet_core::task::TaskStatus;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult, parse_id};
use crate::middleware::AuthenticatedAgent;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksParams {
    pub agent_id: String,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

/// Pending tasks are claimed as they are returned. Any other status is a
/// plain listing.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAgent(agent)): Extension<AuthenticatedAgent>,
    Query(params): Query<ListTasksParams>,
) -> ApiResult<Json<TaskList>> {
    let agent_id: AgentId = parse_id(&params.agent_id, "agent")?;
    if agent_id != agent.id {
        return Err(ApiError::Forbidden(
            "Tasks of another agent".to_string(),
        ));
    }

    let tasks = match params.status {
        None | Some(TaskStatus::Pending) => state.queue.claim(agent_id).await?,
        Some(status) => state.queue.list(agent_id, Some(status)).await?,
    };
    Ok(Json(TaskList { tasks }))
}

pub async fn complete_task(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAgent(agent)): Extension<AuthenticatedAgent>,
    Path(id): Path<String>,
    Json(report): Json<CompleteTaskRequest>,
) -> ApiResult<Json<Ack>> {
    let task_id: TaskId = parse_id(&id, "task")?;
    if report.task_id != task_id {
        return Err(ApiError::BadRequest(
            "Task ID in body does not match path".to_string(),
        ));
    }
    state.queue.complete(agent.id, task_id, report).await?;
    Ok(Json(Ack::ok()))
}
