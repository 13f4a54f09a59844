//! API route definitions.

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};
use std::sync::Arc;

use crate::handlers::{admin, agents, health, tasks};
use crate::middleware::{cors_layer, request_id, require_admin, require_agent};
use crate::state::AppState;

/// Create the main API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/v1", api_routes(Arc::clone(&state)))
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .layer(axum_middleware::from_fn(request_id))
        .layer(cors_layer())
        .with_state(state)
}

fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents/register", post(agents::register))
        .merge(agent_routes(Arc::clone(&state)))
        .nest("/admin", admin_routes(state))
}

fn agent_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents/heartbeat", post(agents::heartbeat))
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/{id}/complete", post(tasks::complete_task))
        .route_layer(axum_middleware::from_fn_with_state(state, require_agent))
}

fn admin_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/machines",
            get(admin::list_machines).post(admin::create_machine),
        )
        .route("/machines/{id}", delete(admin::delete_machine))
        .route("/agents", get(admin::list_agents))
        .route("/agents/{id}", get(admin::get_agent))
        .route("/agents/{id}/regenerate-key", post(admin::regenerate_key))
        .route("/agents/{id}/servers", get(admin::list_servers))
        .route("/tasks", post(admin::enqueue_task))
        .route("/tasks/{id}", get(admin::get_task))
        .route("/tasks/{id}/cancel", post(admin::cancel_task))
        .route_layer(axum_middleware::from_fn_with_state(state, require_admin))
}
