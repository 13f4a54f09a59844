//! Agent-facing handlers: registration and heartbeat.

use axum::{
    Extension, Json,
    extract::State,
    http::HeaderMap,
};
use fleet_core::api::{Ack, HeartbeatRequest, RegisterRequest, RegisterResponse};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{AuthenticatedAgent, presented_key};
use crate::state::AppState;

pub async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Json<RegisterResponse>> {
    let response = state
        .registry
        .register(&request, presented_key(&headers))
        .await?;
    Ok(Json(response))
}

pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAgent(agent)): Extension<AuthenticatedAgent>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<Json<Ack>> {
    if request.agent_id != agent.id {
        return Err(ApiError::Forbidden(
            "Heartbeat for another agent".to_string(),
        ));
    }
    state.registry.heartbeat(&request).await?;
    Ok(Json(Ack::ok()))
}
