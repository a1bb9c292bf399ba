//! Registered OAuth client lookup
//!
//! The authority is the only source of truth for registered clients: every
//! lookup re-fetches the complete list, so a client removed upstream stops
//! resolving on the very next request.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::authority::AuthorityClient;
use crate::{Error, Result};

/// A registered OAuth client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClient {
    /// OAuth2 client id
    pub client_id: String,
    /// Registered redirect URIs, in registration order
    pub redirect_uris: Vec<String>,
}

impl OAuthClient {
    /// Whether `uri` is one of this client's registered redirect URIs
    #[must_use]
    pub fn allows_redirect(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }
}

/// Resolves client ids against the authority's live client list
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    authority: Arc<AuthorityClient>,
}

impl ClientRegistry {
    /// Create a registry backed by `authority`
    #[must_use]
    pub fn new(authority: Arc<AuthorityClient>) -> Self {
        Self { authority }
    }

    /// Fetch every registered client, keyed by client id
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] if the authority cannot be queried.
    pub async fn list_clients(&self) -> Result<HashMap<String, Vec<String>>> {
        let records = self.authority.list_clients().await?;
        debug!(count = records.len(), "Fetched registered clients");

        Ok(records
            .into_iter()
            .map(|r| (r.client_id, r.redirect_uris.unwrap_or_default()))
            .collect())
    }

    /// Look up a single client
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownClient`] if the id is not registered, or
    /// [`Error::Upstream`] if the authority cannot be queried.
    pub async fn get_client(&self, client_id: &str) -> Result<OAuthClient> {
        let mut clients = self.list_clients().await?;
        clients
            .remove(client_id)
            .map(|redirect_uris| OAuthClient {
                client_id: client_id.to_string(),
                redirect_uris,
            })
            .ok_or_else(|| Error::UnknownClient(client_id.to_string()))
    }
}
