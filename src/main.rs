//! Main entry point for the skypatrol-downloader CLI

use clap::Parser;
use skypatrol_downloader::cli::{Cli, Commands};
use skypatrol_downloader::metrics::init_metrics;
use skypatrol_downloader::shutdown::ShutdownCoordinator;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("skypatrol_downloader=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr {
        match init_metrics(addr).await {
            Ok(()) => info!(%addr, "Prometheus exporter listening"),
            Err(e) => error!("Failed to start metrics exporter: {}", e),
        }
    }

    // Ctrl+C cancels in-flight blocks; nothing partial is returned
    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - cancelling retrieval...");
                shutdown.request_shutdown();
            }
        }
    });

    let result = match cli.command {
        Commands::Fetch(ref args) => args
            .execute(&cli, shutdown.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Load(ref args) => args
            .execute(cli.output_format)
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Servers(ref args) => args.execute(&cli).await.map_err(|e| anyhow::anyhow!(e)),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
