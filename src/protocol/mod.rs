//! MCP Protocol types and the bridge's message handler

mod handler;
mod messages;
mod types;

pub use handler::*;
pub use messages::*;
pub use types::*;

/// Protocol versions the bridge can speak, newest first
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-03-26", crate::MCP_PROTOCOL_VERSION];

/// Pick the protocol version to answer an `initialize` with.
///
/// Echoes the client's version when supported, otherwise falls back to the
/// newest version the bridge knows.
#[must_use]
pub fn negotiate_version(client_version: Option<&str>) -> &'static str {
    client_version
        .and_then(|v| SUPPORTED_VERSIONS.iter().find(|s| **s == v))
        .copied()
        .unwrap_or(SUPPORTED_VERSIONS[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_echoes_supported_version() {
        assert_eq!(negotiate_version(Some("2024-11-05")), "2024-11-05");
        assert_eq!(negotiate_version(Some("2025-03-26")), "2025-03-26");
    }

    #[test]
    fn negotiate_falls_back_to_newest() {
        assert_eq!(negotiate_version(Some("1999-01-01")), "2025-03-26");
        assert_eq!(negotiate_version(None), "2025-03-26");
    }
}
