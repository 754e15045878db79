//! Thin HTTP surface over the core: request decoding and status mapping
//! only, no caching or invalidation logic.

pub mod availability;
pub mod events;
pub mod routes;
pub mod status;

pub use routes::create_router;

use anyhow::Context;
use tracing::info;

use crate::state::AppState;

/// The HTTP service. Serves until SIGINT/SIGTERM.
pub struct WebService {
    port: u16,
    state: AppState,
}

impl WebService {
    pub fn new(port: u16, state: AppState) -> Self {
        Self { port, state }
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.port))
            .await
            .with_context(|| format!("failed to bind port {}", self.port))?;
        info!(port = self.port, "web service listening");

        axum::serve(listener, create_router(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("web server error")
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
