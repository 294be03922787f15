//! split-proxy
//!
//! ```text
//!   browser ──▶ ┌────────────┐   one upstream link   ┌────────────┐ ──▶ target
//!   browser ──▶ │   client   │ ═════════════════════▶│   server   │ ──▶ target
//!   browser ──▶ │ multiplexer│◀═════════════════════ │ dispatcher │ ──▶ target
//!               └────────────┘                       └────────────┘
//! ```
//!
//! `split-proxy server` runs the half with outbound access, `split-proxy
//! client --server HOST:PORT` runs the browser-facing half.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use split_proxy::config::validation::validate_config;
use split_proxy::config::{load_config, ConfigError, ProxyConfig};
use split_proxy::lifecycle::{signals::spawn_ctrl_c_handler, Shutdown};
use split_proxy::net::Listener;
use split_proxy::observability::{logging::init_logging, metrics::init_metrics};
use split_proxy::{ClientMultiplexer, ServerDispatcher};

#[derive(Parser)]
#[command(name = "split-proxy")]
#[command(about = "Forward HTTP/HTTPS proxy split into a client and a server half", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept browsers and multiplex them onto one upstream link
    Client {
        /// Proxy server endpoint (host:port)
        #[arg(short, long)]
        server: Option<String>,

        /// Browser-facing bind address
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Accept upstream links and perform the outbound connections
    Server {
        /// Link-facing bind address
        #[arg(short, long)]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    init_logging(&config.observability.log_level);
    tracing::info!("split-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    spawn_ctrl_c_handler(shutdown.clone());

    match cli.command {
        Commands::Client { server, listen } => {
            if let Some(server) = server {
                config.client.server_address = Some(server);
            }
            if let Some(listen) = listen {
                config.client.bind_address = listen;
            }
            validate_config(&config).map_err(ConfigError::Validation)?;
            let server_address = config
                .client
                .server_address
                .clone()
                .ok_or("client mode needs a server address (--server or client.server_address)")?;

            tracing::info!(
                bind_address = %config.client.bind_address,
                server_address = %server_address,
                max_connections = config.client.max_connections,
                "Configuration loaded"
            );

            let multiplexer = ClientMultiplexer::connect(&server_address, &config).await?;
            let listener =
                Listener::bind(&config.client.bind_address, config.client.max_connections).await?;
            multiplexer.serve(listener, shutdown.subscribe()).await?;
        }
        Commands::Server { listen } => {
            if let Some(listen) = listen {
                config.server.bind_address = listen;
            }
            validate_config(&config).map_err(ConfigError::Validation)?;

            tracing::info!(
                bind_address = %config.server.bind_address,
                max_links = config.server.max_links,
                connect_tls = config.server.connect_tls,
                connect_failure = ?config.server.connect_failure,
                "Configuration loaded"
            );

            let dispatcher = ServerDispatcher::from_config(&config)?;
            let listener =
                Listener::bind(&config.server.bind_address, config.server.max_links).await?;
            dispatcher.serve(listener, shutdown.subscribe()).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
