//! Service lifecycle infrastructure (spec §4.M backend lifecycle)

#![allow(dead_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use crate::config::CourierConfig;
use crate::error::Result;

/// Health status for liveness probes. `diagnostic` is empty on success,
/// matching spec §4.M/§6: "Health endpoint returns empty string for
/// healthy, otherwise a diagnostic string."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub service_id: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub diagnostic: String,
}

/// Readiness status for readiness probes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    pub dependencies: Vec<DependencyStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub available: bool,
    pub latency_ms: Option<u64>,
}

/// Standard trait the courier binary implements to plug into
/// [`ServiceRuntime`].
#[async_trait]
pub trait CourierService: Send + Sync + 'static {
    fn service_id(&self) -> &'static str;

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Liveness: is the process alive?
    async fn health(&self) -> HealthStatus;

    /// Readiness: are the database, KV store, and spool directories reachable?
    async fn ready(&self) -> ReadinessStatus;

    /// Close the stop channel, wait on the shutdown barrier, close connections.
    async fn shutdown(&self) -> Result<()>;

    /// Start HTTP/gRPC servers and background workers.
    async fn start(&self) -> Result<()>;
}

/// Standard runtime bootstrap: start the service, wait for SIGINT/SIGTERM,
/// then run graceful shutdown.
pub struct ServiceRuntime {
    config: CourierConfig,
    start_time: std::time::Instant,
}

impl ServiceRuntime {
    pub fn new() -> Result<Self> {
        let config = CourierConfig::load()?;
        Ok(Self {
            config,
            start_time: std::time::Instant::now(),
        })
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub async fn run<S: CourierService>(service: Arc<S>) -> Result<()> {
        let runtime = Self::new()?;

        info!(
            service_id = service.service_id(),
            version = service.version(),
            "starting courier service"
        );

        let service_clone = service.clone();
        let service_handle = tokio::spawn(async move {
            if let Err(e) = service_clone.start().await {
                tracing::error!("service error: {}", e);
            }
        });

        Self::wait_for_shutdown().await;
        info!("shutdown signal received, gracefully stopping");

        if let Err(e) = service.shutdown().await {
            warn!("error during shutdown: {}", e);
        }

        service_handle.abort();

        info!(
            uptime_seconds = runtime.start_time.elapsed().as_secs(),
            "courier service stopped"
        );

        Ok(())
    }

    async fn wait_for_shutdown() {
        let ctrl_c = async {
            signal::ctrl_c().await.expect("failed to listen for ctrl-c");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to listen for sigterm")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }
}
