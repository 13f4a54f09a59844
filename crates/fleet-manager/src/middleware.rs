//! HTTP middleware for the API server.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use fleet_core::Error;
use fleet_core::agent::Agent;
use fleet_core::api::API_KEY_HEADER;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{Instrument, debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// The agent that owns the presented key.
#[derive(Clone)]
pub struct AuthenticatedAgent(pub Agent);

/// Create CORS middleware layer.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static(API_KEY_HEADER),
        ])
        .allow_origin(Any)
}

/// Tag each request with an id and run it inside a request span.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header_value {
        request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    let span = fleet_trace::request_span(&request_id, request.method().as_str(), request.uri().path());
    let mut response = next.run(request).instrument(span).await;
    if let Some(value) = header_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

pub fn presented_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
}

/// Reject requests that do not carry a current agent key.
pub async fn require_agent(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(key) = presented_key(request.headers()) else {
        return ApiError::from(Error::Unauthorized).into_response();
    };
    match state.registry.authenticate(key).await {
        Ok(Some(agent)) => {
            debug!(agent_id = %agent.id, "Agent authenticated");
            request.extensions_mut().insert(AuthenticatedAgent(agent));
            next.run(request).await
        }
        Ok(None) => {
            warn!(path = %request.uri().path(), "Rejected unknown API key");
            ApiError::from(Error::Unauthorized).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Reject requests that do not carry the enrollment key.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match presented_key(request.headers()) {
        Some(key) if state.registry.is_enrollment_key(key) => next.run(request).await,
        _ => {
            warn!(path = %request.uri().path(), "Rejected admin request");
            ApiError::from(Error::Unauthorized).into_response()
        }
    }
}
