//! DocGate - document database protocol gateway
//!
//! Single binary that serves:
//! - The binary wire protocol for database drivers
//! - A JSON-over-HTTP Data API
//!
//! Both front the same command engine and storage backend.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

mod config;
mod server;

use config::Overrides;
use server::DocGateServer;

#[derive(Parser)]
#[command(name = "docgate")]
#[command(author, version, about = "DocGate - document database protocol gateway", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Serve {
        /// Configuration file path (TOML, YAML or JSON)
        #[arg(short, long, env = "DOCGATE_CONFIG")]
        config: Option<PathBuf>,

        /// Wire protocol listen address, host:port
        #[arg(long, env = "DOCGATE_WIRE_ADDR")]
        wire_addr: Option<String>,

        /// Data API listen address, host:port
        #[arg(long, env = "DOCGATE_HTTP_ADDR")]
        http_addr: Option<String>,

        /// Log filter directive, e.g. "info" or "docgate_compat=debug"
        #[arg(long, env = "DOCGATE_LOG_LEVEL")]
        log_level: Option<String>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            wire_addr,
            http_addr,
            log_level,
        } => {
            let overrides = Overrides {
                wire_addr,
                http_addr,
                log_level,
            };
            let config = config::load(config.as_deref(), &overrides).await?;

            docgate_common::logging::init(&config.logging)?;
            if config.metrics.enabled {
                docgate_common::metrics::install_recorder()?;
            }

            info!("Starting DocGate {}", env!("CARGO_PKG_VERSION"));
            let server = DocGateServer::new(config);

            let shutdown = server.shutdown_token();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutdown signal received");
                shutdown.cancel();
            });

            server.run().await?;
            info!("DocGate stopped");
        }

        Commands::Version => {
            println!("DocGate version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
