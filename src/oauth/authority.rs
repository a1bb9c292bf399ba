//! Ory Network admin API client
//!
//! Thin typed wrapper over the two admin capabilities the bridge relies on:
//!
//! - `POST /admin/oauth2/introspect` (RFC 7662 token introspection)
//! - `GET /admin/clients` (registered OAuth2 client listing)
//!
//! Both calls authenticate with the project-scoped API key. Every call is a
//! live round trip bounded by the configured request timeout; nothing is
//! cached here.

use axum::body::Bytes;
use reqwest::{Client, Method, StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::config::AuthorityConfig;
use crate::{Error, Result};

/// Introspection endpoint, relative to the project URL
const INTROSPECT_PATH: &str = "admin/oauth2/introspect";
/// Client listing endpoint, relative to the project URL
const CLIENTS_PATH: &str = "admin/clients";

/// RFC 7662 introspection response (fields the bridge reads)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    /// Whether the token is currently valid
    pub active: bool,
    /// Client the token was issued to
    #[serde(default)]
    pub client_id: Option<String>,
    /// Space-delimited scopes
    #[serde(default)]
    pub scope: Option<String>,
    /// Expiry (unix seconds)
    #[serde(default)]
    pub exp: Option<u64>,
    /// Subject the token was issued for
    #[serde(default)]
    pub sub: Option<String>,
}

/// Registered client as listed by the admin API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    /// OAuth2 client id
    pub client_id: String,
    /// Registered redirect URIs (the API may send `null`)
    #[serde(default)]
    pub redirect_uris: Option<Vec<String>>,
}

/// Response relayed back from a forwarded OAuth request
#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    /// Upstream status
    pub status: StatusCode,
    /// Upstream content type, if any
    pub content_type: Option<String>,
    /// Upstream body
    pub body: Bytes,
}

/// HTTP client for the external authority
#[derive(Debug, Clone)]
pub struct AuthorityClient {
    http: Client,
    project_url: Url,
    api_key: String,
}

impl AuthorityClient {
    /// Build a client from the authority configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the project URL is invalid or the HTTP
    /// client cannot be constructed.
    pub fn new(config: &AuthorityConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Self::with_http_client(http, &config.project_url, &config.project_api_key)
    }

    /// Build a client around an existing reqwest client
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `project_url` is not a valid URL.
    pub fn with_http_client(http: Client, project_url: &str, api_key: &str) -> Result<Self> {
        // A trailing slash keeps Url::join from dropping the last path segment
        let normalized = format!("{}/", project_url.trim_end_matches('/'));
        let project_url = Url::parse(&normalized)
            .map_err(|e| Error::Config(format!("Invalid authority project URL: {e}")))?;

        Ok(Self {
            http,
            project_url,
            api_key: api_key.to_string(),
        })
    }

    /// Project URL (always ends with `/`)
    #[must_use]
    pub fn project_url(&self) -> &Url {
        &self.project_url
    }

    /// Resolve a path relative to the project URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the joined URL is invalid.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.project_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("Invalid authority endpoint {path}: {e}")))
    }

    /// Introspect an access token
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] if the authority is unreachable, answers with
    /// a non-success status, or returns an unparseable body.
    pub async fn introspect(&self, token: &str) -> Result<IntrospectionResponse> {
        let url = self.endpoint(INTROSPECT_PATH)?;
        debug!(url = %url, "Introspecting access token");

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .form(&[("token", token), ("token_type_hint", "access_token")])
            .send()
            .await
            .map_err(|e| upstream("introspection request failed", &e))?;

        let status = response.status();
        if !status.is_success() {
            error!(status = %status, "Token introspection rejected by authority");
            return Err(Error::Upstream(format!(
                "introspection returned HTTP {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| upstream("introspection response unparseable", &e))
    }

    /// Fetch the full list of registered OAuth2 clients
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] on transport failure, non-success status,
    /// or an unparseable body.
    pub async fn list_clients(&self) -> Result<Vec<ClientRecord>> {
        let url = self.endpoint(CLIENTS_PATH)?;
        debug!(url = %url, "Listing OAuth2 clients");

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| upstream("client listing request failed", &e))?;

        let status = response.status();
        if !status.is_success() {
            error!(status = %status, "Client listing rejected by authority");
            return Err(Error::Upstream(format!(
                "client listing returned HTTP {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| upstream("client listing response unparseable", &e))
    }

    /// Forward an OAuth request to an authority endpoint and return its answer verbatim.
    ///
    /// The caller's `Authorization` header is passed through so client
    /// authentication (e.g. `client_secret_basic`) reaches the authority
    /// unchanged. The admin credential is never attached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] if the authority cannot be reached.
    pub async fn forward(
        &self,
        method: Method,
        url: &str,
        content_type: Option<&str>,
        authorization: Option<&str>,
        body: Bytes,
    ) -> Result<ForwardedResponse> {
        debug!(url = %url, method = %method, "Forwarding OAuth request to authority");

        let mut request = self.http.request(method, url).body(body);
        if let Some(ct) = content_type {
            request = request.header(header::CONTENT_TYPE, ct);
        }
        if let Some(auth) = authorization {
            request = request.header(header::AUTHORIZATION, auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| upstream("forwarded OAuth request failed", &e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response
            .bytes()
            .await
            .map_err(|e| upstream("forwarded OAuth response unreadable", &e))?;

        Ok(ForwardedResponse {
            status,
            content_type,
            body,
        })
    }
}

fn upstream(context: &str, err: &reqwest::Error) -> Error {
    error!(error = %err, timeout = err.is_timeout(), "{context}");
    Error::Upstream(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AuthorityClient {
        AuthorityClient::with_http_client(Client::new(), &server.uri(), "ory_pat_test").unwrap()
    }

    #[test]
    fn endpoint_keeps_project_path() {
        let client = AuthorityClient::with_http_client(
            Client::new(),
            "https://proj.projects.oryapis.com/tenant",
            "k",
        )
        .unwrap();
        assert_eq!(
            client.endpoint(INTROSPECT_PATH).unwrap().as_str(),
            "https://proj.projects.oryapis.com/tenant/admin/oauth2/introspect"
        );
        assert_eq!(
            client.endpoint("/oauth2/auth").unwrap().as_str(),
            "https://proj.projects.oryapis.com/tenant/oauth2/auth"
        );
    }

    #[test]
    fn invalid_project_url_is_config_error() {
        let err = AuthorityClient::with_http_client(Client::new(), "::nope::", "k").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn introspect_sends_form_with_type_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/oauth2/introspect"))
            .and(header_eq("authorization", "Bearer ory_pat_test"))
            .and(body_string_contains("token=abc"))
            .and(body_string_contains("token_type_hint=access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": true,
                "client_id": "c1",
                "scope": "ory.admin offline",
                "exp": 1_900_000_000u64
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server).introspect("abc").await.unwrap();
        assert!(result.active);
        assert_eq!(result.client_id.as_deref(), Some("c1"));
        assert_eq!(result.exp, Some(1_900_000_000));
    }

    #[tokio::test]
    async fn introspect_non_success_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/oauth2/introspect"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).introspect("abc").await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }

    #[tokio::test]
    async fn list_clients_tolerates_null_redirect_uris() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin/clients"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"client_id": "c1", "redirect_uris": ["https://app/cb"]},
                {"client_id": "c2", "redirect_uris": null},
                {"client_id": "c3"}
            ])))
            .mount(&server)
            .await;

        let clients = client_for(&server).list_clients().await.unwrap();
        assert_eq!(clients.len(), 3);
        assert_eq!(clients[0].redirect_uris.as_deref(), Some(&["https://app/cb".to_string()][..]));
        assert!(clients[1].redirect_uris.is_none());
        assert!(clients[2].redirect_uris.is_none());
    }

    #[tokio::test]
    async fn unreachable_authority_is_upstream_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let client =
            AuthorityClient::with_http_client(Client::new(), "http://127.0.0.1:9", "k").unwrap();
        let err = client.list_clients().await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }
}
