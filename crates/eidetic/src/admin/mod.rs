//! Admin HTTP server
//!
//! Exposes the cache operations as JSON endpoints for operators and
//! dashboards:
//! - `GET /health`
//! - `GET /stats`
//! - `GET /memories`, `POST /memories`, `GET /memories/{id}`
//! - `POST /recall`
//! - `POST /consolidate/{cycle}?force=true`

pub mod handlers;

use axum::{
    Router,
    body::Body,
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::AdminConfig;
use crate::engine::EideticCache;
use crate::error::{EideticError, Result};

/// Shared application state for all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub cache: Arc<EideticCache>,
}

/// The admin server
pub struct AdminServer {
    config: AdminConfig,
    cache: Arc<EideticCache>,
}

impl AdminServer {
    pub fn new(config: AdminConfig, cache: Arc<EideticCache>) -> Self {
        Self { config, cache }
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves
    pub async fn serve_with_shutdown(
        &self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let state = Arc::new(AppState {
            cache: self.cache.clone(),
        });
        let app = create_router(state)
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeout_secs)));

        let addr: SocketAddr = self
            .config
            .listen_addr
            .parse()
            .map_err(|e| EideticError::Config(format!("Invalid listen address: {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| EideticError::Io(format!("Failed to bind to {addr}: {e}")))?;
        tracing::info!("Admin server listening on {addr}");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| EideticError::Io(format!("Server error: {e}")))?;

        tracing::info!("Admin server shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/stats", get(handlers::stats_handler))
        .route(
            "/memories",
            get(handlers::list_memories_handler).post(handlers::store_handler),
        )
        .route("/memories/{id}", get(handlers::get_memory_handler))
        .route("/recall", post(handlers::recall_handler))
        .route("/consolidate/{cycle}", post(handlers::consolidate_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Create a JSON error response
pub(crate) fn create_error_response(status: StatusCode, error_type: &str, message: &str) -> Response<Body> {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
        }
    });

    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json"),
    );
    response
}

/// Map a cache error onto a status code and error type
pub(crate) fn error_response(error: &EideticError) -> Response<Body> {
    let (status, error_type) = match error {
        EideticError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
        EideticError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        EideticError::AllTiersFailed(_) => (StatusCode::SERVICE_UNAVAILABLE, "all_tiers_failed"),
        EideticError::TierUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "tier_unavailable"),
        EideticError::DeadlineExceeded(_) => (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    create_error_response(status, error_type, &error.to_string())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
