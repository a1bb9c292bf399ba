//! Bearer token verification against the authority.
//!
//! # Verification flow
//!
//! 1. Introspect the token (live round trip, no cache).
//! 2. Reject inactive tokens.
//! 3. Resolve the token's `client_id` through [`ClientRegistry`]; tokens
//!    issued to clients this proxy no longer knows are rejected even when
//!    introspection still reports them active.
//! 4. Split the space-delimited `scope` claim into a set.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::authority::AuthorityClient;
use super::clients::ClientRegistry;
use crate::{Error, Result};

/// Claims of a verified access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenClaims {
    /// The bearer token itself
    #[serde(skip_serializing)]
    pub token: String,
    /// Client the token was issued to
    pub client_id: String,
    /// Granted scopes
    pub scopes: BTreeSet<String>,
    /// Expiry (unix seconds) as reported by introspection
    pub expires_at: u64,
}

impl TokenClaims {
    /// Scopes from `required` that this token does not carry
    #[must_use]
    pub fn missing_scopes<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|s| !self.scopes.contains(s.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// Split a space-delimited scope claim
#[must_use]
pub fn parse_scopes(scope: Option<&str>) -> BTreeSet<String> {
    scope
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

/// Verifies bearer tokens through introspection plus client cross-check
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    authority: Arc<AuthorityClient>,
    clients: ClientRegistry,
}

impl TokenVerifier {
    /// Create a verifier
    #[must_use]
    pub fn new(authority: Arc<AuthorityClient>, clients: ClientRegistry) -> Self {
        Self { authority, clients }
    }

    /// Verify `token` and return its claims
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] if the token is inactive, carries no
    /// client or expiry, or belongs to an unknown client; [`Error::Upstream`]
    /// if the authority cannot be queried.
    pub async fn verify(&self, token: &str) -> Result<TokenClaims> {
        let introspection = self.authority.introspect(token).await?;

        if !introspection.active {
            debug!("Token reported inactive by authority");
            return Err(Error::InvalidToken("token is not active".to_string()));
        }

        let client_id = introspection
            .client_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::InvalidToken("token has no client_id".to_string()))?;

        match self.clients.get_client(&client_id).await {
            Ok(_) => {}
            Err(Error::UnknownClient(id)) => {
                warn!(client_id = %id, "Active token issued to an unregistered client");
                return Err(Error::InvalidToken(format!(
                    "client {id} is not registered"
                )));
            }
            Err(e) => return Err(e),
        }

        let expires_at = introspection
            .exp
            .ok_or_else(|| Error::InvalidToken("token has no expiry".to_string()))?;

        debug!(client_id = %client_id, subject = ?introspection.sub, "Token verified");
        Ok(TokenClaims {
            token: token.to_string(),
            client_id,
            scopes: parse_scopes(introspection.scope.as_deref()),
            expires_at,
        })
    }
}
