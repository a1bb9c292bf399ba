//! OAuth metadata documents served by the bridge
//!
//! Implements RFC 8414 (OAuth Authorization Server Metadata) and
//! RFC 9728 (OAuth Protected Resource Metadata). The bridge advertises
//! itself as the authorization server; its endpoints proxy to the authority.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// OAuth Authorization Server Metadata (RFC 8414)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Authorization server issuer URL
    pub issuer: String,

    /// Service documentation URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_documentation: Option<String>,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Supported response types
    pub response_types_supported: Vec<String>,

    /// Supported PKCE code challenge methods
    pub code_challenge_methods_supported: Vec<String>,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// Supported token endpoint auth methods
    pub token_endpoint_auth_methods_supported: Vec<String>,

    /// Supported grant types
    pub grant_types_supported: Vec<String>,

    /// Token revocation endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,

    /// Dynamic client registration endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// Scopes clients may request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
}

/// OAuth Protected Resource Metadata (RFC 9728)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// Protected resource identifier
    pub resource: String,

    /// Authorization servers that can issue tokens for this resource
    pub authorization_servers: Vec<String>,

    /// Scopes this resource understands
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,

    /// Human-readable documentation for the resource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_documentation: Option<String>,
}

impl AuthorizationServerMetadata {
    /// Metadata advertising this bridge's proxy endpoints under `base_url`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `base_url` is not a valid URL.
    pub fn for_proxy(
        base_url: &str,
        documentation_url: Option<&str>,
        scopes: &[String],
    ) -> Result<Self> {
        let issuer = issuer_url(base_url)?;
        Ok(Self {
            authorization_endpoint: format!("{issuer}/authorize"),
            token_endpoint: format!("{issuer}/token"),
            revocation_endpoint: Some(format!("{issuer}/revoke")),
            registration_endpoint: Some(format!("{issuer}/register")),
            issuer,
            service_documentation: documentation_url.map(String::from),
            response_types_supported: vec!["code".to_string()],
            code_challenge_methods_supported: vec!["S256".to_string()],
            token_endpoint_auth_methods_supported: vec![
                "client_secret_post".to_string(),
                "client_secret_basic".to_string(),
                "none".to_string(),
            ],
            grant_types_supported: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            scopes_supported: scopes.to_vec(),
        })
    }
}

impl ProtectedResourceMetadata {
    /// Metadata describing the resource at `base_url`, protected by the bridge itself
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `base_url` is not a valid URL.
    pub fn for_resource(
        base_url: &str,
        documentation_url: Option<&str>,
        scopes: &[String],
    ) -> Result<Self> {
        let issuer = issuer_url(base_url)?;
        Ok(Self {
            resource: issuer.clone(),
            authorization_servers: vec![issuer],
            scopes_supported: scopes.to_vec(),
            resource_documentation: documentation_url.map(String::from),
        })
    }
}

/// Normalize a base URL into an issuer identifier (no trailing slash)
pub fn issuer_url(base_url: &str) -> Result<String> {
    let parsed = Url::parse(base_url).map_err(|e| Error::Config(format!("Invalid URL: {e}")))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// Well-known URL of the protected resource metadata for `base_url`
pub fn resource_metadata_url(base_url: &str) -> Result<String> {
    Ok(format!(
        "{}/.well-known/oauth-protected-resource",
        issuer_url(base_url)?
    ))
}
