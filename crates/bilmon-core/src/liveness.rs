//! Process-health endpoint.
//!
//! A single static route for external liveness probes; no other surface.

use axum::{routing::get, Router};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{errors::Error, Result};

pub fn router() -> Router {
    Router::new().route("/", get(alive))
}

/// Serve the liveness route until the process cancellation token fires.
pub async fn serve(port: u16, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(Error::Io)?;
    info!(port, "liveness endpoint listening");

    axum::serve(listener, router())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(Error::Io)?;

    Ok(())
}

async fn alive() -> &'static str {
    "Bot is alive!"
}
