//! Process signals to cancellation.
//!
//! A single [`CancellationToken`] carries shutdown to every part of the
//! pipeline. [`cancel_on_signal`] cancels it on SIGINT (Ctrl+C) or SIGTERM;
//! callers can also cancel it directly.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
///
/// If a signal handler cannot be installed the error is logged and that
/// signal is never observed.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

/// Cancel `token` when a shutdown signal arrives.
///
/// The task also ends, without cancelling, if the token is cancelled by
/// someone else first.
#[must_use]
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown_signal() => {
                info!("Shutdown signal received, cancelling pipeline");
                token.cancel();
            }
            () = token.cancelled() => {}
        }
    })
}
