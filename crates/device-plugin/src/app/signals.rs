use anyhow::Context;
use anyhow::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;

/// Wait for SIGTERM, SIGINT or cancellation of `cancellation_token`.
pub async fn wait_for_shutdown_signal(cancellation_token: &CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
        _ = cancellation_token.cancelled() => {
            tracing::info!("Shutdown requested");
        }
    }
    Ok(())
}
