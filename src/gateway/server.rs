//! Bridge server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tracing::{error, info};

use super::auth::BearerAuth;
use super::lifecycle::{LifecycleController, ShutdownReason, ShutdownReport};
use super::router::{AppState, create_router};
use super::streaming::SessionRegistry;
use crate::config::Config;
use crate::oauth::metadata::resource_metadata_url;
use crate::oauth::{
    AuthRouterState, AuthorityClient, AuthorizationServerMetadata, ClientRegistry,
    OAuthServerProvider, ProtectedResourceMetadata, ProxyProvider, auth_router,
};
use crate::protocol::BridgeHandler;
use crate::{Error, Result};

/// MCP bridge server
pub struct Bridge {
    /// Configuration
    config: Config,
    /// Admin API client for the authority
    authority: Arc<AuthorityClient>,
    /// OAuth proxy provider
    provider: Arc<dyn OAuthServerProvider>,
    /// Live sessions
    registry: SessionRegistry,
    /// Shutdown coordination
    lifecycle: LifecycleController,
}

impl Bridge {
    /// Create a new bridge
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the authority settings are unusable.
    pub fn new(config: Config) -> Result<Self> {
        let authority = Arc::new(AuthorityClient::new(&config.authority)?);
        let provider: Arc<dyn OAuthServerProvider> =
            Arc::new(ProxyProvider::from_authority(Arc::clone(&authority))?);
        let registry = SessionRegistry::new(&config.streaming, Arc::new(BridgeHandler::new()));
        let lifecycle = LifecycleController::new(registry.clone(), config.server.shutdown_timeout);

        Ok(Self {
            config,
            authority,
            provider,
            registry,
            lifecycle,
        })
    }

    /// Live sessions
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Shutdown coordination
    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    /// Build the full HTTP application
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the base URL is invalid.
    pub fn router(&self) -> Result<Router> {
        let base_url = &self.config.server.base_url;
        let documentation_url = Some(self.config.server.documentation_url.as_str())
            .filter(|u| !u.is_empty());
        let scopes = &self.config.auth.required_scopes;

        let oauth_routes = auth_router(AuthRouterState {
            provider: Arc::clone(&self.provider),
            authority: Arc::clone(&self.authority),
            authorization_server: Arc::new(AuthorizationServerMetadata::for_proxy(
                base_url,
                documentation_url,
                scopes,
            )?),
            protected_resource: Arc::new(ProtectedResourceMetadata::for_resource(
                base_url,
                documentation_url,
                scopes,
            )?),
        });

        let auth = BearerAuth::new(Arc::clone(&self.provider), scopes.clone())
            .with_resource_metadata(resource_metadata_url(base_url)?);

        let state = Arc::new(AppState {
            registry: self.registry.clone(),
            streaming_config: self.config.streaming.clone(),
        });

        Ok(create_router(
            state,
            auth,
            oauth_routes,
            self.config.server.max_body_size,
        ))
    }

    /// Run until a shutdown signal, then tear down
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound. Teardown problems are
    /// reported through the returned [`ShutdownReport`].
    pub async fn run(self) -> Result<ShutdownReport> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.port(),
        );

        let app = self.router()?;
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("ORY MCP BRIDGE v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = self.config.port(), "Listening");
        info!(base_url = %self.config.server.base_url, "Public base URL");
        info!(project_url = %self.authority.project_url(), "Authority");
        info!(scopes = ?self.config.auth.required_scopes, "Required scopes");
        info!("  GET  {}/sse", self.config.server.base_url.trim_end_matches('/'));
        info!(
            "  POST {}{}?sessionId=<id>",
            self.config.server.base_url.trim_end_matches('/'),
            self.config.streaming.relay_path
        );
        info!("============================================================");

        self.lifecycle.install_panic_hook();

        let clients = ClientRegistry::new(Arc::clone(&self.authority));
        self.lifecycle.spawn_detached("authority-check", async move {
            let count = clients.list_clients().await?.len();
            info!(clients = count, "Authority reachable");
            Ok(())
        });

        let stop = self.lifecycle.stop_token();
        let mut server = tokio::spawn(
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .into_future(),
        );

        let reason = tokio::select! {
            reason = self.lifecycle.wait_for_signal() => reason,
            joined = &mut server => {
                let result = server_result(joined);
                error!("Server stopped unexpectedly");
                return Ok(self.lifecycle.shutdown(ShutdownReason::Fatal, async { result }).await);
            }
        };

        Ok(self
            .lifecycle
            .shutdown(reason, async move { server_result(server.await) })
            .await)
    }
}

fn server_result(joined: std::result::Result<std::io::Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::Io(e)),
        Err(e) => Err(Error::Internal(format!("server task failed: {e}"))),
    }
}
