//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "ORY_MCP_";

/// Scope a token must carry to open or feed a session
pub const DEFAULT_REQUIRED_SCOPE: &str = "ory.admin";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before the configuration is extracted.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// External authority (Ory Network) configuration
    pub authority: AuthorityConfig,
    /// Bearer authentication configuration
    pub auth: AuthConfig,
    /// Streaming session configuration
    pub streaming: StreamingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (required)
    pub port: Option<u16>,
    /// Externally visible base URL of this server (required)
    pub base_url: String,
    /// Human-readable documentation for this resource server (required)
    pub documentation_url: String,
    /// Bound on listener teardown once sessions are closed
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum relay request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: None,
            base_url: String::new(),
            documentation_url: String::new(),
            shutdown_timeout: Duration::from_millis(5000),
            max_body_size: 4 * 1024 * 1024,
        }
    }
}

/// External authority configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Console API base URL (e.g. `https://api.console.ory.sh`)
    pub api_url: String,
    /// Project URL hosting the OAuth2 and admin APIs
    pub project_url: String,
    /// Project-scoped admin credential, used for introspection and client listing
    pub project_api_key: String,
    /// Workspace-scoped admin credential, used by the console API
    pub workspace_api_key: String,
    /// Timeout applied to every outbound authority call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            project_url: String::new(),
            project_api_key: String::new(),
            workspace_api_key: String::new(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Bearer authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Scopes required on the streaming and relay endpoints
    pub required_scopes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required_scopes: vec![DEFAULT_REQUIRED_SCOPE.to_string()],
        }
    }
}

/// Streaming session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Path clients POST relayed messages to
    pub relay_path: String,
    /// Outbound event buffer per session
    pub buffer_size: usize,
    /// Keep-alive interval for SSE streams
    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            relay_path: "/messages".to_string(),
            buffer_size: 64,
            keep_alive_interval: Duration::from_secs(15),
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file and `ORY_MCP_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path
            && !p.exists()
        {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                p.display()
            )));
        }

        // Env files can carry ORY_MCP_* values, so they are loaded before the final extraction
        let first_pass: Self = Self::figment(path)
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        first_pass.load_env_files();

        Self::figment(path)
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new();
        if let Some(p) = path {
            figment = figment.merge(Yaml::file(p));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Fail fast when any required run-time value is absent
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming every missing or malformed value.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();

        let required = [
            ("authority.project_api_key", &self.authority.project_api_key),
            ("authority.workspace_api_key", &self.authority.workspace_api_key),
            ("authority.api_url", &self.authority.api_url),
            ("authority.project_url", &self.authority.project_url),
            ("server.base_url", &self.server.base_url),
            ("server.documentation_url", &self.server.documentation_url),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                missing.push(name);
            }
        }
        if self.server.port.is_none() {
            missing.push("server.port");
        }

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "Missing required configuration: {}",
                missing.join(", ")
            )));
        }

        for (name, value) in [
            ("authority.api_url", &self.authority.api_url),
            ("authority.project_url", &self.authority.project_url),
            ("server.base_url", &self.server.base_url),
            ("server.documentation_url", &self.server.documentation_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| Error::Config(format!("{name} is not a valid URL: {e}")))?;
        }

        if !self.streaming.relay_path.starts_with('/') {
            return Err(Error::Config(format!(
                "streaming.relay_path must start with '/': {}",
                self.streaming.relay_path
            )));
        }

        Ok(())
    }

    /// Port to listen on; only meaningful after [`Config::validate`]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.server.port.unwrap_or_default()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "5000ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn complete() -> Config {
        let mut config = Config::default();
        config.server.port = Some(4000);
        config.server.base_url = "https://mcp.example.com".to_string();
        config.server.documentation_url = "https://docs.example.com/mcp".to_string();
        config.authority.api_url = "https://api.console.ory.sh".to_string();
        config.authority.project_url = "https://proj.projects.oryapis.com".to_string();
        config.authority.project_api_key = "ory_pat_project".to_string();
        config.authority.workspace_api_key = "ory_wak_workspace".to_string();
        config
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.shutdown_timeout, Duration::from_millis(5000));
        assert_eq!(config.authority.request_timeout, Duration::from_secs(10));
        assert_eq!(config.auth.required_scopes, vec!["ory.admin"]);
        assert_eq!(config.streaming.relay_path, "/messages");
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn validate_lists_every_missing_value() {
        let err = Config::default().validate().unwrap_err().to_string();
        assert!(err.contains("authority.project_api_key"));
        assert!(err.contains("authority.workspace_api_key"));
        assert!(err.contains("server.base_url"));
        assert!(err.contains("server.port"));
    }

    #[test]
    fn validate_rejects_malformed_url() {
        let mut config = complete();
        config.authority.project_url = "not a url".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("authority.project_url"));
    }

    #[test]
    fn validate_rejects_relative_relay_path() {
        let mut config = complete();
        config.streaming.relay_path = "messages".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/bridge.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn load_merges_yaml_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "bridge.yaml",
                r#"
server:
  port: 4100
  base_url: "https://mcp.example.com"
  shutdown_timeout: "250ms"
authority:
  project_url: "https://proj.projects.oryapis.com"
"#,
            )?;
            jail.set_env("ORY_MCP_AUTHORITY__PROJECT_API_KEY", "from-env");
            jail.set_env("ORY_MCP_SERVER__PORT", "4200");

            let config = Config::load(Some(Path::new("bridge.yaml"))).expect("load");
            assert_eq!(config.server.port, Some(4200));
            assert_eq!(config.server.base_url, "https://mcp.example.com");
            assert_eq!(config.server.shutdown_timeout, Duration::from_millis(250));
            assert_eq!(config.authority.project_api_key, "from-env");
            assert_eq!(config.auth.required_scopes, vec!["ory.admin"]);
            Ok(())
        });
    }

    #[test]
    fn env_files_are_loaded_before_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("bridge.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "ORY_MCP_SERVER__DOCUMENTATION_URL=https://docs.example.com/from-file").unwrap();
        drop(f);

        let yaml_path = dir.path().join("bridge.yaml");
        std::fs::write(
            &yaml_path,
            format!("env_files:\n  - {}\n", env_path.to_string_lossy()),
        )
        .unwrap();

        let config = Config::load(Some(&yaml_path)).unwrap();
        assert_eq!(
            config.server.documentation_url,
            "https://docs.example.com/from-file"
        );
    }

    #[test]
    fn humantime_parses_units() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(with = "humantime_serde")]
            d: Duration,
        }
        let parse = |s: &str| serde_yaml::from_str::<Wrapper>(&format!("d: \"{s}\"")).unwrap().d;
        assert_eq!(parse("5000ms"), Duration::from_millis(5000));
        assert_eq!(parse("10s"), Duration::from_secs(10));
        assert_eq!(parse("2m"), Duration::from_secs(120));
        assert_eq!(parse("7"), Duration::from_secs(7));
    }
}
