//! Ory MCP Bridge - MCP over SSE behind an Ory-backed OAuth 2.1 proxy

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use ory_mcp_bridge::{
    cli::{Cli, Command, OutputFormat},
    config::Config,
    gateway::Bridge,
    oauth::{AuthorityClient, ClientRegistry},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Clients { format }) => run_clients(&cli, format).await,
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

/// Load configuration, apply CLI overrides and validate
fn load_config(cli: &Cli) -> Option<Config> {
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return None;
        }
    };

    if let Some(port) = cli.port {
        config.server.port = Some(port);
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }

    if let Err(e) = config.validate() {
        error!("{e}");
        return None;
    }
    Some(config)
}

/// List registered OAuth clients
async fn run_clients(cli: &Cli, format: OutputFormat) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    let authority = match AuthorityClient::new(&config.authority) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            error!("Failed to create authority client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let clients = match ClientRegistry::new(authority).list_clients().await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ Failed to list clients: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut sorted: Vec<_> = clients.into_iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    match format {
        OutputFormat::Json => {
            let value: serde_json::Map<String, serde_json::Value> = sorted
                .into_iter()
                .map(|(id, uris)| (id, serde_json::json!(uris)))
                .collect();
            match serde_json::to_string_pretty(&value) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("❌ Failed to serialize to JSON: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        OutputFormat::Text => {
            if sorted.is_empty() {
                println!("No OAuth clients registered.");
                return ExitCode::SUCCESS;
            }
            println!("Found {} OAuth client(s):\n", sorted.len());
            for (id, uris) in &sorted {
                println!("  {id}");
                for uri in uris {
                    println!("    → {uri}");
                }
            }
        }
    }

    ExitCode::SUCCESS
}

/// Run the bridge server
async fn run_server(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port(),
        "Starting Ory MCP Bridge"
    );

    let bridge = match Bridge::new(config) {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to create bridge: {e}");
            return ExitCode::FAILURE;
        }
    };

    let report = match bridge.run().await {
        Ok(report) => report,
        Err(e) => {
            error!("Bridge error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = report.exit_code();
    if report.requires_forced_exit() {
        warn!(reason = ?report.reason, "Shutdown timed out; forcing exit");
        std::process::exit(i32::from(code));
    }

    info!(
        reason = ?report.reason,
        outcome = ?report.outcome,
        sessions_closed = report.sessions.closed,
        sessions_failed = report.sessions.failed,
        "Bridge shutdown complete"
    );
    ExitCode::from(code)
}
