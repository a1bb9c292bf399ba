//! Authorization routes mounted next to the MCP endpoints
//!
//! - `GET /.well-known/oauth-authorization-server` and
//!   `GET /.well-known/oauth-protected-resource` serve metadata
//! - `GET /authorize` checks the client and redirect URI against the live
//!   client list, then redirects to the authority
//! - `POST /token`, `/revoke`, `/register` are forwarded to the authority and
//!   its answer relayed verbatim

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{RawQuery, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tracing::{debug, error, warn};
use url::Url;

use super::authority::AuthorityClient;
use super::metadata::{AuthorizationServerMetadata, ProtectedResourceMetadata};
use super::provider::OAuthServerProvider;
use crate::Error;

/// State shared by the authorization routes
#[derive(Clone)]
pub struct AuthRouterState {
    /// Provider answering discovery and client lookup
    pub provider: Arc<dyn OAuthServerProvider>,
    /// Client used to forward token, revocation and registration requests
    pub authority: Arc<AuthorityClient>,
    /// Served at `/.well-known/oauth-authorization-server`
    pub authorization_server: Arc<AuthorizationServerMetadata>,
    /// Served at `/.well-known/oauth-protected-resource`
    pub protected_resource: Arc<ProtectedResourceMetadata>,
}

/// Build the authorization router
pub fn auth_router(state: AuthRouterState) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(authorization_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(protected_resource_metadata),
        )
        .route("/authorize", get(authorize_handler))
        .route("/token", post(token_handler))
        .route("/revoke", post(revoke_handler))
        .route("/register", post(register_handler))
        .with_state(state)
}

async fn authorization_server_metadata(State(state): State<AuthRouterState>) -> impl IntoResponse {
    Json(state.authorization_server.as_ref().clone())
}

async fn protected_resource_metadata(State(state): State<AuthRouterState>) -> impl IntoResponse {
    Json(state.protected_resource.as_ref().clone())
}

/// GET /authorize - validate the client, then hand off to the authority
async fn authorize_handler(
    State(state): State<AuthRouterState>,
    RawQuery(query): RawQuery,
) -> Response {
    let params: Vec<(String, String)> =
        url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
            .into_owned()
            .collect();
    let param = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };

    let Some(client_id) = param("client_id") else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "client_id is required");
    };

    let client = match state.provider.get_client(client_id).await {
        Ok(client) => client,
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "Authorization request for unusable client");
            return oauth_error_response(&e);
        }
    };

    match param("redirect_uri") {
        Some(uri) if !client.allows_redirect(uri) => {
            warn!(client_id = %client_id, redirect_uri = %uri, "Unregistered redirect_uri");
            return oauth_error(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "Unregistered redirect_uri",
            );
        }
        None if client.redirect_uris.len() != 1 => {
            return oauth_error(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "redirect_uri must be specified when client has multiple registered URIs",
            );
        }
        _ => {}
    }

    let mut target = match Url::parse(state.provider.authorization_url()) {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, "Authority authorization URL is invalid");
            return oauth_error_response(&Error::Internal(e.to_string()));
        }
    };
    target.query_pairs_mut().extend_pairs(params.iter());

    debug!(client_id = %client_id, "Redirecting authorization request to authority");
    match HeaderValue::from_str(target.as_str()) {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(e) => oauth_error_response(&Error::Internal(e.to_string())),
    }
}

async fn token_handler(
    State(state): State<AuthRouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let url = state.provider.token_url().to_string();
    forward(&state, &url, &headers, body).await
}

async fn revoke_handler(
    State(state): State<AuthRouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let url = state.provider.revocation_url().to_string();
    forward(&state, &url, &headers, body).await
}

async fn register_handler(
    State(state): State<AuthRouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let url = state.provider.registration_url().to_string();
    forward(&state, &url, &headers, body).await
}

async fn forward(state: &AuthRouterState, url: &str, headers: &HeaderMap, body: Bytes) -> Response {
    match state
        .authority
        .forward(
            Method::POST,
            url,
            header_str(headers, &header::CONTENT_TYPE),
            header_str(headers, &header::AUTHORIZATION),
            body,
        )
        .await
    {
        Ok(upstream) => {
            let mut response = (upstream.status, upstream.body).into_response();
            if let Some(ct) = upstream
                .content_type
                .and_then(|c| HeaderValue::from_str(&c).ok())
            {
                response.headers_mut().insert(header::CONTENT_TYPE, ct);
            }
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Err(e) => oauth_error_response(&e),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// OAuth-style JSON error for `err`, without upstream detail
pub fn oauth_error_response(err: &Error) -> Response {
    if err.is_upstream() || matches!(err, Error::Internal(_)) {
        error!(error = %err, "OAuth request failed");
    }
    oauth_error(err.status_code(), err.oauth_code(), &err.public_message())
}

fn oauth_error(status: StatusCode, code: &str, description: &str) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "error_description": description
        })),
    )
        .into_response()
}
