//! REST and WebSocket surface.
//!
//! The server is thin: request validation, delegation to the engine and
//! stores, response shaping. State mutation and ordering guarantees live in
//! the layers below.

mod handlers;
mod routes;
mod state;
mod types;
mod ws;

use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{config::SiteflowConfig, SiteflowError, SiteflowResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use handlers::*;
pub use routes::*;
pub use state::*;
pub use types::*;
pub use ws::*;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Grace given to in-flight requests after shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Runs the daemon until SIGINT/SIGTERM.
///
/// Shutdown drains in order: the monitor loop stops first, the hub refuses
/// new connections and closes existing ones, in-flight requests get a grace
/// period.
pub async fn serve(config: SiteflowConfig) -> SiteflowResult<()> {
    let cancel = CancellationToken::new();
    let state = ServerState::from_config(config, cancel.clone()).await?;

    let monitor_task = state.monitor.spawn();

    let bind_addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| SiteflowError::Transport(format!("failed to bind {bind_addr}: {e}")))?;
    tracing::info!(addr = %bind_addr, "siteflow listening");

    let hub = state.hub.clone();
    let shutdown_cancel = cancel.clone();
    let router = create_router(state);

    let shutdown = async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received, draining");
        // Monitor first, then the hub; request handlers finish within the
        // listener's grace.
        shutdown_cancel.cancel();
        hub.shutdown();
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, monitor_task).await;
    tracing::info!("siteflow stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Result::Ok(mut signal) => {
                signal.recv().await;
            }
            Result::Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
