//! Dynamic HTTP Router
//!
//! Routes requests by `Host` to backends that announce themselves over a
//! message bus or are listed by an external routing source.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────────┐
//!                         │                    DYNAMIC ROUTER                     │
//!                         │                                                      │
//!    Client Request       │  ┌─────────┐    ┌─────────┐    ┌────────────────┐    │
//!    ─────────────────────┼─▶│   net   │───▶│  http   │───▶│  route table   │    │
//!                         │  │listener │    │ server  │    │ (host → pool)  │    │
//!                         │  └─────────┘    └────┬────┘    └───────▲────────┘    │
//!                         │                      │                 │             │
//!    Client Response      │                      ▼                 │             │
//!    ◀────────────────────┼───────────────── forward ──────────────┼─────────────┼──▶ Backend
//!                         │                                        │             │
//!                         │  ┌──────────┐   ┌──────────┐   ┌───────┴────────┐    │
//!     NATS ───────────────┼─▶│   mbus   │──▶│ updater  │◀──│  routing_api   │◀───┼─── GET /v1/routes
//!                         │  └──────────┘   └──────────┘   │    poller      │    │
//!                         │                                └────────────────┘    │
//!                         │  ┌────────────────────────────────────────────────┐  │
//!                         │  │ pruner │ status (/routes, /healthz) │ drain    │  │
//!                         │  └────────────────────────────────────────────────┘  │
//!                         └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use dynamic_router::config::loader::load_config;
use dynamic_router::config::ObservabilityConfig;
use dynamic_router::lifecycle::{self, signals};
use dynamic_router::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "dynamic-router")]
#[command(about = "Host-based HTTP router with dynamic route registration", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "router.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging(&ObservabilityConfig::default());
            tracing::error!(path = %args.config.display(), error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };
    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "dynamic-router starting"
    );

    let metrics_addr = config.observability.metrics_address.parse()?;
    metrics::init_metrics(metrics_addr).map_err(|e| {
        tracing::error!(address = %metrics_addr, error = %e, "Failed to start metrics exporter");
        e
    })?;

    let router = lifecycle::start(&config).await.map_err(|e| {
        tracing::error!(error = %e, "Startup failed");
        e
    })?;
    let _signals = signals::listen(router.lifecycle_events())?;

    let outcome = router.wait().await;
    tracing::info!(outcome = ?outcome, "Shutdown complete");
    Ok(())
}
