//! Shared fixtures: a mocked Ory project and a bridge pointed at it

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ory_mcp_bridge::config::Config;
use ory_mcp_bridge::gateway::Bridge;

/// Token carrying the admin scope, issued to `admin-client`
pub const ADMIN_TOKEN: &str = "admin-token";
/// Token without the admin scope, issued to `admin-client`
pub const READER_TOKEN: &str = "reader-token";
/// Admin-scoped token issued to `other-client`
pub const OTHER_ADMIN_TOKEN: &str = "other-admin-token";
/// Token the authority reports inactive
pub const DEAD_TOKEN: &str = "dead-token";
/// Active token issued to a client that is no longer registered
pub const ORPHAN_TOKEN: &str = "orphan-token";

/// Start a mock authority with the standard tokens and clients
pub async fn authority() -> MockServer {
    let server = MockServer::start().await;

    let tokens = [
        (
            ADMIN_TOKEN,
            json!({"active": true, "client_id": "admin-client", "scope": "ory.admin offline", "exp": 1_900_000_000u64}),
        ),
        (
            READER_TOKEN,
            json!({"active": true, "client_id": "admin-client", "scope": "openid", "exp": 1_900_000_000u64}),
        ),
        (
            OTHER_ADMIN_TOKEN,
            json!({"active": true, "client_id": "other-client", "scope": "ory.admin", "exp": 1_900_000_000u64}),
        ),
        (DEAD_TOKEN, json!({"active": false})),
        (
            ORPHAN_TOKEN,
            json!({"active": true, "client_id": "deleted-client", "scope": "ory.admin", "exp": 1_900_000_000u64}),
        ),
    ];
    for (token, body) in tokens {
        Mock::given(method("POST"))
            .and(path("/admin/oauth2/introspect"))
            .and(body_string_contains(format!("token={token}&")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/admin/clients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"client_id": "admin-client", "redirect_uris": ["https://app.example.com/callback"]},
            {"client_id": "other-client", "redirect_uris": [
                "https://other.example.com/a",
                "https://other.example.com/b"
            ]}
        ])))
        .mount(&server)
        .await;

    server
}

/// Complete configuration pointing at `authority`
pub fn config_for(authority: &MockServer) -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = Some(0);
    config.server.base_url = "https://mcp.example.com".to_string();
    config.server.documentation_url = "https://docs.example.com/mcp".to_string();
    config.authority.api_url = "https://api.console.ory.sh".to_string();
    config.authority.project_url = authority.uri();
    config.authority.project_api_key = "ory_pat_project".to_string();
    config.authority.workspace_api_key = "ory_wak_workspace".to_string();
    config
}

/// Bridge wired to `authority`
pub fn bridge_for(authority: &MockServer) -> Bridge {
    Bridge::new(config_for(authority)).expect("bridge")
}

/// Request with an optional bearer token
pub fn request(method: &str, uri: &str, token: Option<&str>, body: Body) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(body).expect("request")
}

/// Collect a (finite) response body as JSON
pub async fn json_body(body: Body) -> Value {
    let bytes = body.collect().await.expect("body").to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

/// Read the next SSE frame from a streaming body as text
pub async fn next_frame(body: &mut Body) -> String {
    loop {
        let frame = body
            .frame()
            .await
            .expect("stream ended")
            .expect("frame error");
        if let Ok(data) = frame.into_data() {
            let text = String::from_utf8(data.to_vec()).expect("utf-8");
            // Skip keep-alive comments
            if !text.starts_with(':') {
                return text;
            }
        }
    }
}
