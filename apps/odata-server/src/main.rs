mod config;
mod logging;
mod schema_config;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use odata_core::ODataService;

use crate::config::AppConfig;

/// `OData` server: typed collections over an `OData`-style REST protocol
#[derive(Parser)]
#[command(name = "odata-server")]
#[command(about = "OData Server - typed collections over an OData-style REST protocol")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and schema, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1) defaults -> 2) YAML (if provided) -> 3) env (ODATA__*) -> 4) CLI overrides
    let mut config = AppConfig::load_layered(cli.config.as_deref())?;
    config.apply_cli_overrides(cli.port, cli.verbose);

    logging::init_logging(&config.logging);

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(&config),
    }
}

fn check_config(config: &AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");
    let registry = config.schema.build_registry()?;
    println!(
        "Configuration is valid ({} entities, {} collections)",
        registry.entities().len(),
        registry.collections().len()
    );
    Ok(())
}

async fn run_server(config: AppConfig) -> Result<()> {
    let registry = Arc::new(config.schema.build_registry()?);
    if registry.collections().is_empty() {
        tracing::warn!("schema declares no collections; only the service and metadata documents are served");
    }

    let service = Arc::new(ODataService::new(registry, config.service_config()));
    let app = odata_http::router(service, &config.server.cors_origins);

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    tracing::info!(
        addr = %config.server.bind_addr,
        service_root = %format!("{}{}", config.server.base_url, config.server.route_prefix),
        "OData Server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(signals::shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("OData Server stopped");
    Ok(())
}
