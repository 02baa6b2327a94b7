//! Graceful shutdown and signal handling.
//!
//! After startup the main task parks in [`run`] until SIGINT or SIGTERM
//! arrives, then drains the server:
//! 1. Stop accepting new connections
//! 2. Wait for in-flight requests, up to the configured deadline
//! 3. Abort whatever is still running
//!
//! The signal handlers stay installed for the rest of the process, so a
//! second signal during the drain is absorbed rather than killing the process.

use std::future::Future;
use std::time::Duration;

use super::server::{DrainOutcome, ServerError, ServerHandle};

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
pub async fn termination_signal() -> Result<(), ServerError> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(ServerError::Signal)?;

    #[cfg(unix)]
    let terminate = async {
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(ServerError::Signal)?;
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
    Ok(())
}

/// Block until a termination signal, then drain `handle` within `deadline`.
pub async fn run(handle: ServerHandle, deadline: Duration) -> Result<DrainOutcome, ServerError> {
    run_until(handle, deadline, termination_signal()).await
}

/// Like [`run`], with the termination event supplied by the caller.
///
/// Returns an error without draining if the accept loop dies before the
/// signal arrives.
pub async fn run_until<F>(
    mut handle: ServerHandle,
    deadline: Duration,
    signal: F,
) -> Result<DrainOutcome, ServerError>
where
    F: Future<Output = Result<(), ServerError>>,
{
    tokio::select! {
        received = signal => received?,
        err = handle.closed() => {
            tracing::error!(error = %err, "Server stopped unexpectedly");
            return Err(err);
        }
    }

    tracing::info!(
        deadline_secs = deadline.as_secs(),
        "Shutting down server, waiting for in-flight requests"
    );

    let outcome = handle.drain(deadline).await.inspect_err(|e| {
        tracing::error!(error = %e, "Server forced to shutdown");
    })?;

    match outcome {
        DrainOutcome::Completed => tracing::info!("All connections closed"),
        DrainOutcome::DeadlineElapsed => {
            tracing::warn!("Shutdown deadline reached, remaining requests were aborted")
        }
    }
    tracing::info!("Server exited");
    Ok(outcome)
}
