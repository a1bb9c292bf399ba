//! Ory MCP Bridge Library
//!
//! Model Context Protocol (MCP) server over the HTTP+SSE transport, guarded
//! by an OAuth 2.1 proxy that delegates token issuance to Ory Network.
//!
//! # Features
//!
//! - **Sessions**: `GET /sse` opens a session, `POST /messages?sessionId=` relays into it
//! - **OAuth proxy**: authorize, token, revoke and register forwarded to the authority
//! - **Token verification**: live introspection plus client cross-check, scope enforcement
//! - **Lifecycle**: ordered shutdown with a bounded timeout; panics are fatal
//!
//! # Protocol Version
//!
//! Implements MCP protocol versions 2024-11-05 and 2025-03-26.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod protocol;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// MCP Protocol version of the HTTP+SSE transport
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`.
///
/// # Errors
///
/// Returns [`Error::Internal`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
