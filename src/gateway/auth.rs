//! Bearer authentication middleware
//!
//! Every protected request must carry `Authorization: Bearer <token>`. The
//! token is verified live through the [`OAuthServerProvider`]; the resulting
//! [`TokenClaims`] must include every required scope. On success the claims
//! are attached to the request extensions for downstream handlers.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::Error;
use crate::oauth::{OAuthServerProvider, TokenClaims};

/// State for [`bearer_auth_middleware`]
#[derive(Clone)]
pub struct BearerAuth {
    provider: Arc<dyn OAuthServerProvider>,
    required_scopes: Arc<[String]>,
    resource_metadata_url: Option<String>,
}

impl BearerAuth {
    /// Require `required_scopes` on every request, verified through `provider`
    pub fn new(provider: Arc<dyn OAuthServerProvider>, required_scopes: Vec<String>) -> Self {
        Self {
            provider,
            required_scopes: required_scopes.into(),
            resource_metadata_url: None,
        }
    }

    /// Advertise protected resource metadata in `WWW-Authenticate` challenges
    #[must_use]
    pub fn with_resource_metadata(mut self, url: impl Into<String>) -> Self {
        self.resource_metadata_url = Some(url.into());
        self
    }

    /// Verify a raw bearer token and enforce scopes
    ///
    /// # Errors
    ///
    /// [`Error::InvalidToken`], [`Error::InsufficientScope`], or the
    /// provider's upstream failure.
    pub async fn authorize(&self, token: &str) -> crate::Result<TokenClaims> {
        let claims = self.provider.verify_access_token(token).await?;
        let missing = claims.missing_scopes(&self.required_scopes);
        if !missing.is_empty() {
            return Err(Error::InsufficientScope(missing.join(" ")));
        }
        Ok(claims)
    }

    fn challenge(&self, err: &Error) -> String {
        let mut value = format!(
            "Bearer error=\"{}\", error_description=\"{}\"",
            err.oauth_code(),
            err.public_message().replace('"', "'")
        );
        if matches!(err, Error::InsufficientScope(_)) {
            let _ = write!(value, ", scope=\"{}\"", self.required_scopes.join(" "));
        }
        if let Some(url) = &self.resource_metadata_url {
            let _ = write!(value, ", resource_metadata=\"{url}\"");
        }
        value
    }

    fn reject(&self, err: &Error) -> Response {
        let status = err.status_code();
        let mut response = (
            status,
            Json(json!({
                "error": err.oauth_code(),
                "error_description": err.public_message()
            })),
        )
            .into_response();

        if (status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN)
            && let Ok(value) = HeaderValue::from_str(&self.challenge(err))
        {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}

/// Extract the token from an `Authorization: Bearer` header value
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Bearer authentication middleware
pub async fn bearer_auth_middleware(
    State(auth): State<BearerAuth>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(String::from);

    let Some(token) = token else {
        warn!(path = %path, "Missing bearer token");
        return auth.reject(&Error::InvalidToken("missing bearer token".to_string()));
    };

    match auth.authorize(&token).await {
        Ok(claims) => {
            debug!(client_id = %claims.client_id, path = %path, "Authenticated request");
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            if e.is_upstream() {
                error!(path = %path, error = %e, "Token verification failed upstream");
            } else {
                warn!(path = %path, error = %e, "Rejected request");
            }
            auth.reject(&e)
        }
    }
}
