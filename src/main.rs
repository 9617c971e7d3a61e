//! Auditing reverse proxy.
//!
//! Forwards every request to a single upstream and, optionally, publishes a
//! JSON record of matched request/response pairs to Kafka.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌───────────────────────────────────────────────┐
//!                       │                 AUDIT PROXY                   │
//!                       │                                               │
//!   Client Request      │  ┌──────┐   ┌─────────┐   ┌───────┐           │
//!   ────────────────────┼─▶│ CORS │──▶│ session │──▶│ audit │──┐        │
//!                       │  └──────┘   └─────────┘   └───┬───┘  │        │
//!                       │                               │      ▼        │
//!                       │                               │ ┌─────────┐   │
//!   Client Response     │                               │ │forwarder│◀──┼──▶ Upstream
//!   ◀───────────────────┼───────────────────────────────┘ └─────────┘   │
//!                       │                               │               │
//!                       │                      ┌────────▼────────┐      │
//!                       │                      │ bounded queue + │──────┼──▶ Kafka
//!                       │                      │  worker pool    │      │
//!                       │                      └─────────────────┘      │
//!                       │                                               │
//!                       │  health listener (200, empty body)            │
//!                       └───────────────────────────────────────────────┘
//! ```

use clap::Parser;

use audit_proxy::config::Cli;
use audit_proxy::lifecycle;
use audit_proxy::observability::init_logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("audit-proxy: {e}");
            std::process::exit(2);
        }
    };

    init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        health_address = %config.listener.health_address,
        target = %config.target.url,
        cors = config.cors.enabled,
        session = config.session.enabled,
        audit = config.audit.enabled,
        "Configuration loaded"
    );

    lifecycle::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
