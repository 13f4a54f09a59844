//! Operator handlers: machines, agents and task control.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use fleet_core::agent::Agent;
use fleet_core::api::{ApiKeyResponse, EnqueueTaskRequest};
use fleet_core::ids::{AgentId, MachineId, TaskId};
use fleet_core::machine::{Machine, MachineStatus, NewMachine};
use fleet_core::server::GameServerInstance;
use fleet_core::task::Task;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::{ApiError, ApiResult, parse_id};
use crate::state::AppState;

#[derive(Serialize)]
pub struct ListMachinesResponse {
    pub machines: Vec<Machine>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct ListAgentsResponse {
    pub agents: Vec<Agent>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct ListServersResponse {
    pub servers: Vec<GameServerInstance>,
    pub total: usize,
}

pub async fn create_machine(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewMachine>,
) -> ApiResult<(StatusCode, Json<Machine>)> {
    if request.name.trim().is_empty() || request.address.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Machine name and address are required".to_string(),
        ));
    }
    let machine = Machine {
        id: MachineId::new(),
        name: request.name,
        address: request.address,
        ssh_credentials_ref: request.ssh_credentials_ref,
        status: MachineStatus::Offline,
        created_at: Utc::now(),
        last_heartbeat_at: None,
    };
    state.machines.create(&machine).await?;
    info!(machine_id = %machine.id, name = %machine.name, "Machine created");
    Ok((StatusCode::CREATED, Json(machine)))
}

pub async fn list_machines(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ListMachinesResponse>> {
    let machines = state.registry.machines(Utc::now()).await?;
    Ok(Json(ListMachinesResponse {
        total: machines.len(),
        machines,
    }))
}

pub async fn delete_machine(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let machine_id: MachineId = parse_id(&id, "machine")?;
    state.machines.delete(machine_id).await?;
    info!(machine_id = %machine_id, "Machine deregistered");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_agents(State(state): State<Arc<AppState>>) -> ApiResult<Json<ListAgentsResponse>> {
    let agents = state.registry.list(Utc::now()).await?;
    Ok(Json(ListAgentsResponse {
        total: agents.len(),
        agents,
    }))
}

pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Agent>> {
    let agent_id: AgentId = parse_id(&id, "agent")?;
    Ok(Json(state.registry.get(agent_id).await?))
}

pub async fn regenerate_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiKeyResponse>> {
    let agent_id: AgentId = parse_id(&id, "agent")?;
    let api_key = state.registry.regenerate_key(agent_id).await?;
    Ok(Json(ApiKeyResponse { agent_id, api_key }))
}

pub async fn list_servers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ListServersResponse>> {
    let agent_id: AgentId = parse_id(&id, "agent")?;
    let servers = state.queue.servers_for_agent(agent_id).await?;
    Ok(Json(ListServersResponse {
        total: servers.len(),
        servers,
    }))
}

pub async fn enqueue_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnqueueTaskRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = state.queue.enqueue(request).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    let task_id: TaskId = parse_id(&id, "task")?;
    Ok(Json(state.queue.get(task_id).await?))
}

pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    let task_id: TaskId = parse_id(&id, "task")?;
    Ok(Json(state.queue.cancel(task_id).await?))
}
