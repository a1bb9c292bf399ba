//! Handling of relayed MCP messages
//!
//! The bridge answers the session-level methods itself (`initialize`,
//! `ping`, `tools/list`). Anything else is rejected with `Method not found`.
//! Notifications and responses produce no reply.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{
    INVALID_PARAMS, INVALID_REQUEST, Info, InitializeParams, InitializeResult, JsonRpcMessage,
    JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND, ServerCapabilities, ToolsCapability,
    ToolsListResult, negotiate_version,
};

/// Produces the reply (if any) to a message relayed into a session
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle `message` received on `session_id`
    async fn handle(&self, session_id: &str, message: Value) -> Option<Value>;
}

/// Default handler for bridge sessions
#[derive(Debug, Clone, Default)]
pub struct BridgeHandler {
    instructions: Option<String>,
}

impl BridgeHandler {
    /// Create a handler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach instructions returned from `initialize`
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id;
        match request.method.as_str() {
            "initialize" => {
                let params = match request
                    .params
                    .map(serde_json::from_value::<InitializeParams>)
                    .transpose()
                {
                    Ok(params) => params,
                    Err(e) => {
                        return JsonRpcResponse::error(
                            Some(id),
                            INVALID_PARAMS,
                            format!("Invalid initialize params: {e}"),
                        );
                    }
                };
                let client_version = params.as_ref().map(|p| p.protocol_version.as_str());
                let negotiated = negotiate_version(client_version);
                debug!(
                    client = client_version,
                    negotiated = negotiated,
                    "Protocol version negotiation"
                );

                let result = InitializeResult {
                    protocol_version: negotiated.to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability {
                            list_changed: false,
                        }),
                        ..Default::default()
                    },
                    server_info: Info::bridge(),
                    instructions: self.instructions.clone(),
                };
                to_response(id, &result)
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => to_response(
                id,
                &ToolsListResult {
                    tools: Vec::new(),
                    next_cursor: None,
                },
            ),
            other => JsonRpcResponse::error(
                Some(id),
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        }
    }
}

#[async_trait]
impl MessageHandler for BridgeHandler {
    async fn handle(&self, session_id: &str, message: Value) -> Option<Value> {
        let message = match serde_json::from_value::<JsonRpcMessage>(message) {
            Ok(m) => m,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Unreadable JSON-RPC message");
                let resp = JsonRpcResponse::error(None, INVALID_REQUEST, "Invalid Request");
                return serde_json::to_value(resp).ok();
            }
        };

        match message {
            JsonRpcMessage::Request(request) => {
                debug!(session_id = %session_id, method = %request.method, id = %request.id, "Request");
                serde_json::to_value(self.handle_request(request)).ok()
            }
            JsonRpcMessage::Notification(note) => {
                debug!(session_id = %session_id, method = %note.method, "Notification");
                None
            }
            JsonRpcMessage::Response(_) => None,
        }
    }
}

fn to_response<T: serde::Serialize>(id: super::RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(Some(id), -32603, format!("Internal error: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initialize_negotiates_version() {
        let handler = BridgeHandler::new().with_instructions("hello");
        let reply = handler
            .handle(
                "s1",
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "initialize",
                    "params": {
                        "protocolVersion": "2024-11-05",
                        "capabilities": {},
                        "clientInfo": {"name": "test", "version": "1.0"}
                    }
                }),
            )
            .await
            .unwrap();

        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(reply["result"]["serverInfo"]["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(reply["result"]["instructions"], "hello");
    }

    #[tokio::test]
    async fn ping_and_tools_list() {
        let handler = BridgeHandler::new();
        let pong = handler
            .handle("s1", json!({"jsonrpc": "2.0", "id": "a", "method": "ping"}))
            .await
            .unwrap();
        assert_eq!(pong["result"], json!({}));

        let tools = handler
            .handle("s1", json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .await
            .unwrap();
        assert_eq!(tools["result"]["tools"], json!([]));
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let reply = BridgeHandler::new()
            .handle("s1", json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"}))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn notifications_have_no_reply() {
        let reply = BridgeHandler::new()
            .handle(
                "s1",
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            )
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn garbage_yields_invalid_request() {
        let reply = BridgeHandler::new()
            .handle("s1", json!({"hello": "world"}))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], INVALID_REQUEST);
        assert_eq!(reply["id"], Value::Null);
    }
}
