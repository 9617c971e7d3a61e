//! Startup and orderly shutdown.
//!
//! # Design Decisions
//! - Metrics and the audit publisher come up before any listener binds
//! - Both listeners bind before either serves, so a bad address aborts early
//! - Audit workers are drained only after the proxy stops accepting requests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::audit::publisher::{AuditPublisher, PublisherWorkers};
use crate::audit::sink::KafkaSink;
use crate::config::ProxyConfig;
use crate::health::serve_health;
use crate::http::{ForwardError, HttpServer};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::wait_for_signal;
use crate::observability::init_metrics;

const SERVER_DRAIN_GRACE: Duration = Duration::from_secs(15);
const HEALTH_DRAIN_GRACE: Duration = Duration::from_secs(5);
const AUDIT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid {field} address {value:?}")]
    Address { field: &'static str, value: String },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error(transparent)]
    Forwarder(#[from] ForwardError),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Start the audit publisher if the bus is configured.
pub fn start_publisher(config: &ProxyConfig) -> Option<(AuditPublisher, PublisherWorkers)> {
    let audit = &config.audit;
    if !audit.enabled {
        return None;
    }
    if !audit.is_active() {
        tracing::warn!(
            brokers = %audit.brokers,
            topic = %audit.topic,
            "Audit enabled without brokers or topic, auditing disabled"
        );
        return None;
    }

    let sink = KafkaSink::new(audit.broker_list(), audit.topic.clone());
    tracing::info!(brokers = %audit.brokers, topic = %audit.topic, "Audit publishing enabled");
    Some(AuditPublisher::start(
        Arc::new(sink),
        audit.queue_capacity,
        audit.workers,
    ))
}

async fn bind(field: &'static str, address: &str) -> Result<TcpListener, StartupError> {
    let addr: SocketAddr = address.parse().map_err(|_| StartupError::Address {
        field,
        value: address.to_string(),
    })?;
    TcpListener::bind(addr).await.map_err(|source| StartupError::Bind {
        address: address.to_string(),
        source,
    })
}

/// Run the proxy until SIGINT/SIGTERM, then shut down in order.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    let config = Arc::new(config);

    if let Some(address) = &config.observability.metrics_address {
        let addr: SocketAddr = address.parse().map_err(|_| StartupError::Address {
            field: "metrics",
            value: address.clone(),
        })?;
        init_metrics(addr)?;
    }

    let (publisher, workers) = match start_publisher(&config) {
        Some((publisher, workers)) => (Some(publisher), Some(workers)),
        None => (None, None),
    };

    let server = HttpServer::new(config.clone(), publisher)?;

    let listener = bind("listener", &config.listener.bind_address).await?;
    let health_listener = bind("health", &config.listener.health_address).await?;

    let shutdown = Shutdown::new();
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));
    let mut health_task = tokio::spawn(serve_health(health_listener, shutdown.subscribe()));

    let mut early_exit = None;
    tokio::select! {
        _ = wait_for_signal() => {}
        result = &mut server_task => {
            tracing::error!("HTTP server exited unexpectedly");
            early_exit = Some(result);
        }
        result = &mut health_task => {
            tracing::error!("Health server exited unexpectedly");
            if let Ok(Err(e)) = result {
                tracing::error!(error = %e, "Health server failed");
            }
        }
    }

    shutdown.trigger();

    let server_result = match early_exit {
        Some(result) => result,
        None => match tokio::time::timeout(SERVER_DRAIN_GRACE, &mut server_task).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(grace = ?SERVER_DRAIN_GRACE, "HTTP server did not drain in time");
                server_task.abort();
                Ok(Ok(()))
            }
        },
    };

    if !health_task.is_finished() && tokio::time::timeout(HEALTH_DRAIN_GRACE, &mut health_task).await.is_err() {
        tracing::warn!(grace = ?HEALTH_DRAIN_GRACE, "Health server did not drain in time");
        health_task.abort();
    }

    if let Some(workers) = workers {
        workers.shutdown(AUDIT_DRAIN_GRACE).await;
    }

    match server_result {
        Ok(result) => result.map_err(StartupError::Serve),
        Err(e) => {
            tracing::error!(error = %e, "HTTP server task panicked");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publisher_requires_bus_settings() {
        let mut config = ProxyConfig::default();
        assert!(start_publisher(&config).is_none());

        config.audit.enabled = true;
        config.audit.topic = "audit".into();
        assert!(start_publisher(&config).is_none());

        config.audit.brokers = "127.0.0.1:9092".into();
        assert!(start_publisher(&config).is_some());
    }

    #[tokio::test]
    async fn bad_address_is_rejected() {
        let err = bind("listener", "not-an-address").await.unwrap_err();
        assert!(matches!(err, StartupError::Address { field: "listener", .. }));
    }
}
