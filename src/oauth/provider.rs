//! OAuth proxy provider
//!
//! [`OAuthServerProvider`] is the capability set the authorization router and
//! the bearer-auth middleware consume. [`ProxyProvider`] satisfies it without
//! any state of its own: endpoint discovery comes from [`ProxyEndpoints`],
//! verification from [`TokenVerifier`], client lookup from [`ClientRegistry`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::authority::AuthorityClient;
use super::clients::{ClientRegistry, OAuthClient};
use super::verifier::{TokenClaims, TokenVerifier};
use crate::Result;

/// The authority's OAuth endpoints, fixed for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoints {
    /// Authorization endpoint
    pub authorization_url: String,
    /// Token endpoint
    pub token_url: String,
    /// Revocation endpoint
    pub revocation_url: String,
    /// Dynamic client registration endpoint
    pub registration_url: String,
}

impl ProxyEndpoints {
    /// Derive the Ory Network OAuth2 endpoints hosted under the project URL
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the project URL is invalid.
    pub fn for_authority(authority: &AuthorityClient) -> Result<Self> {
        Ok(Self {
            authorization_url: authority.endpoint("oauth2/auth")?.to_string(),
            token_url: authority.endpoint("oauth2/token")?.to_string(),
            revocation_url: authority.endpoint("oauth2/revoke")?.to_string(),
            registration_url: authority.endpoint("oauth2/register")?.to_string(),
        })
    }
}

/// Capabilities an OAuth proxy must expose
#[async_trait]
pub trait OAuthServerProvider: Send + Sync {
    /// Where authorization requests are redirected
    fn authorization_url(&self) -> &str;

    /// Where token requests are forwarded
    fn token_url(&self) -> &str;

    /// Where revocation requests are forwarded
    fn revocation_url(&self) -> &str;

    /// Where dynamic client registration requests are forwarded
    fn registration_url(&self) -> &str;

    /// Verify a bearer token
    async fn verify_access_token(&self, token: &str) -> Result<TokenClaims>;

    /// Look up a registered client
    async fn get_client(&self, client_id: &str) -> Result<OAuthClient>;
}

/// Provider that proxies everything to the authority
#[derive(Debug, Clone)]
pub struct ProxyProvider {
    endpoints: ProxyEndpoints,
    verifier: TokenVerifier,
    clients: ClientRegistry,
}

impl ProxyProvider {
    /// Assemble a provider from its parts
    #[must_use]
    pub fn new(endpoints: ProxyEndpoints, verifier: TokenVerifier, clients: ClientRegistry) -> Self {
        Self {
            endpoints,
            verifier,
            clients,
        }
    }

    /// Wire a provider, verifier and client registry over one authority client
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the authority configuration is invalid.
    pub fn from_authority(authority: Arc<AuthorityClient>) -> Result<Self> {
        let endpoints = ProxyEndpoints::for_authority(&authority)?;
        let clients = ClientRegistry::new(Arc::clone(&authority));
        let verifier = TokenVerifier::new(authority, clients.clone());
        Ok(Self::new(endpoints, verifier, clients))
    }
}

#[async_trait]
impl OAuthServerProvider for ProxyProvider {
    fn authorization_url(&self) -> &str {
        &self.endpoints.authorization_url
    }

    fn token_url(&self) -> &str {
        &self.endpoints.token_url
    }

    fn revocation_url(&self) -> &str {
        &self.endpoints.revocation_url
    }

    fn registration_url(&self) -> &str {
        &self.endpoints.registration_url
    }

    async fn verify_access_token(&self, token: &str) -> Result<TokenClaims> {
        self.verifier.verify(token).await
    }

    async fn get_client(&self, client_id: &str) -> Result<OAuthClient> {
        self.clients.get_client(client_id).await
    }
}
