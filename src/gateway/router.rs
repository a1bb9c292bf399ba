//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use super::auth::{BearerAuth, bearer_auth_middleware};
use super::streaming::{SESSION_ID_HEADER, SessionRegistry, create_sse_response};
use crate::Error;
use crate::config::StreamingConfig;
use crate::oauth::TokenClaims;

/// Shared application state
pub struct AppState {
    /// Live sessions
    pub registry: SessionRegistry,
    /// Streaming configuration
    pub streaming_config: StreamingConfig,
}

/// Create the router
///
/// `/sse` and the relay path sit behind bearer authentication; `/health` and
/// everything in `oauth_routes` are public.
pub fn create_router(
    state: Arc<AppState>,
    auth: BearerAuth,
    oauth_routes: Router,
    max_body_size: usize,
) -> Router {
    let relay_path = state.streaming_config.relay_path.clone();

    let protected = Router::new()
        .route("/sse", get(sse_handler))
        .route(&relay_path, post(relay_handler))
        .route_layer(middleware::from_fn_with_state(auth, bearer_auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .with_state(state)
        .merge(oauth_routes)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = if state.registry.is_shutting_down() {
        "shutting_down"
    } else {
        "healthy"
    };
    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.registry.session_count()
    }))
}

/// GET /sse - open a session and stream its events
async fn sse_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<TokenClaims>,
) -> Response {
    match create_sse_response(
        &state.registry,
        Some(claims.client_id.clone()),
        state.streaming_config.keep_alive_interval,
    ) {
        Ok((session_id, sse)) => {
            info!(session_id = %session_id, client_id = %claims.client_id, "Client connected to SSE stream");
            let mut response = sse.into_response();
            if let Ok(value) = HeaderValue::from_str(&session_id) {
                response.headers_mut().insert(SESSION_ID_HEADER, value);
            }
            response
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct RelayQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// POST relay handler - route a message into its session
async fn relay_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<TokenClaims>,
    Query(query): Query<RelayQuery>,
    body: Bytes,
) -> Response {
    let Some(session_id) = query.session_id.as_deref().filter(|s| !s.is_empty()) else {
        return error_response(&Error::MissingSessionId);
    };

    // Session lookup comes before the body is parsed
    let Some(session) = state.registry.session_info(session_id) else {
        return error_response(&Error::SessionNotFound(session_id.to_string()));
    };

    // A session only accepts relays from the client that opened it
    if session
        .client_id
        .is_some_and(|owner| owner != claims.client_id)
    {
        warn!(
            session_id = %session_id,
            client_id = %claims.client_id,
            "Relay for a session owned by another client"
        );
        return error_response(&Error::SessionNotFound(session_id.to_string()));
    }

    let message: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Relay body is not JSON");
            return error_response(&Error::Json(e));
        }
    };

    match state.registry.route_message(Some(session_id), message).await {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(err: &Error) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    } else {
        debug!(error = %err, "Request rejected");
    }

    (
        status,
        Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32000,
                "message": err.public_message()
            },
            "id": null
        })),
    )
        .into_response()
}
