//! `RelayServer`: axum HTTP server hosting the conversation registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::relay::ConversationRegistry;
use crate::routes;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live conversations.
    pub registry: Arc<ConversationRegistry>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConversationRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a new server with an empty registry.
    pub fn new(config: ServerConfig) -> Self {
        let shutdown = ShutdownCoordinator::new();
        let registry = ConversationRegistry::new(config.relay(), shutdown.token().child_token());
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            shutdown: Arc::new(shutdown),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        routes::router(AppState {
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        })
    }

    /// Bind the configured address and serve in a background task.
    ///
    /// The task stops accepting once shutdown begins and returns after the
    /// open streams have ended.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            links = self.config.links().base(),
            "relay listening"
        );

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Stop the listener and every conversation, bounded by the configured
    /// shutdown timeout.
    pub async fn shutdown_gracefully(&self, server: Option<JoinHandle<()>>) {
        self.shutdown
            .graceful_shutdown(
                Arc::clone(&self.registry),
                server,
                Some(self.config.shutdown_timeout()),
            )
            .await;
    }

    /// Get the conversation registry.
    pub fn registry(&self) -> &Arc<ConversationRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
