use std::path::PathBuf;

use cachesync::config::loader::load_config;
use cachesync::observability::init_tracing;
use cachesync::{User, demo, wiring};
use cachesync_core::events::BusRegistry;
use cachesync_storage::MemoryStore;
use clap::Parser;

/// Run the cache invalidation walkthrough against an in-memory store.
#[derive(Debug, Parser)]
#[command(name = "cachesync", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults to ./cachesync.toml if present)
    #[arg(long, env = "CACHESYNC_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    // Initialize tracing early with the default level
    let log_handle = init_tracing("info");

    let cli = Cli::parse();
    let config_path = cli.config.as_ref().map(|p| p.to_string_lossy().to_string());

    let cfg = match load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    if let Some(handle) = &log_handle {
        match handle.apply_configured(&cfg.logging.level) {
            Ok(true) => {}
            Ok(false) => tracing::debug!("RUST_LOG is set, ignoring configured log level"),
            Err(e) => tracing::warn!(error = %e, "Keeping default log level"),
        }
    }
    tracing::info!(
        path = config_path.as_deref().unwrap_or("<default>"),
        "Configuration loaded"
    );

    let registry = BusRegistry::new();
    let system = match wiring::build(&cfg, MemoryStore::<u64, User>::new(), &registry).await {
        Ok(system) => system,
        Err(e) => {
            eprintln!("Wiring failed: {e}");
            std::process::exit(2);
        }
    };

    let outcome = demo::run(&system).await;
    system.shutdown().await;
    registry.shutdown_all().await;

    if let Err(e) = outcome {
        tracing::error!(error = %format!("{e:#}"), "Demo failed");
        std::process::exit(1);
    }
}
