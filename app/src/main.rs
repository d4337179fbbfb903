// In app/src/main.rs

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use config_client::ConfigurationServiceClient;
use discovery::ServiceDiscovery;
use grpc_clients::{ChannelPool, InterServiceClientManager};

// --- Command-Line Interface Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "Risk monitor service mesh node.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Registers in the service mesh and serves until interrupted.
    Run {
        /// Skip registry lookups and use the static fallback endpoints.
        #[arg(long)]
        use_fallback: bool,
    },

    /// Prints the mesh state as seen from here: registry records and
    /// downstream client statistics.
    Status,
}

// --- Main Application Entry Point ---

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from a .env file, if it exists.
    dotenvy::dotenv().ok();

    let settings = Arc::new(app_config::load_settings()?);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.app.log_level.clone().into()),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!(
        service = %settings.service.name,
        environment = %settings.app.environment,
        "Starting risk monitor"
    );

    match cli.command {
        Commands::Run { use_fallback } => {
            run_app(settings, use_fallback).await?;
        }
        Commands::Status => {
            print_status(settings).await?;
        }
    }

    tracing::info!("Risk monitor has finished successfully.");

    Ok(())
}

// --- "Run" Subcommand Logic ---

/// The primary logic for the `run` command.
///
/// Registers this instance in the registry, keeps its heartbeat alive, and
/// eagerly connects the downstream clients so failures surface at startup
/// rather than on the first call. Runs until Ctrl-C, then tears down in
/// reverse order.
async fn run_app(settings: Arc<app_config::Settings>, use_fallback: bool) -> Result<()> {
    // --- 1. Service Registration ---
    let discovery = Arc::new(ServiceDiscovery::new(Arc::clone(&settings)));
    discovery.connect().await?;
    discovery.register_service(None).await?;
    discovery.start_heartbeat();
    tracing::info!(key = %discovery.registry_key(), "Registered in the service mesh");

    // --- 2. Downstream Clients ---
    let resolver: Option<Arc<dyn discovery::ServiceResolver>> =
        Some(Arc::clone(&discovery) as Arc<dyn discovery::ServiceResolver>);

    let pool = Arc::new(ChannelPool::new(&settings.grpc));
    let manager = InterServiceClientManager::new(
        Arc::clone(&settings),
        resolver.clone(),
        Arc::clone(&pool),
    );
    manager.initialize();

    if let Err(e) = manager.get_trading_engine_client(use_fallback).await {
        tracing::warn!(error = %e, "Trading engine is not reachable yet; will retry on demand");
    }
    if let Err(e) = manager.get_test_coordinator_client(use_fallback).await {
        tracing::warn!(error = %e, "Test coordinator is not reachable yet; will retry on demand");
    }

    let config_client = ConfigurationServiceClient::new(
        Arc::clone(&settings),
        if use_fallback { None } else { resolver },
    );
    if let Err(e) = config_client.connect().await {
        tracing::warn!(error = %e, "Configuration service is not reachable; using local settings");
    }

    // --- 3. Serve Until Interrupted ---
    tracing::info!("Risk monitor is up");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    // --- 4. Ordered Teardown ---
    config_client.disconnect();
    manager.cleanup().await;
    discovery.disconnect().await;

    Ok(())
}

// --- "Status" Subcommand Logic ---

/// One-shot snapshot: every live registry record plus the local client
/// manager's statistics.
async fn print_status(settings: Arc<app_config::Settings>) -> Result<()> {
    let discovery = Arc::new(ServiceDiscovery::new(Arc::clone(&settings)));
    discovery.connect().await?;

    let services = discovery.discover_services(None).await?;
    println!("{}", serde_json::to_string_pretty(&services)?);

    let pool = Arc::new(ChannelPool::new(&settings.grpc));
    let manager = InterServiceClientManager::new(Arc::clone(&settings), None, pool);
    manager.initialize();
    let stats = manager.manager_stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    discovery.disconnect().await;
    Ok(())
}
