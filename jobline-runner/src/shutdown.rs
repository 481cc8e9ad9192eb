//! Shutdown signal handling
//!
//! Turns SIGTERM and SIGINT into cancellation of the run.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Installs a handler for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` cancelled on the first signal. The jobs
/// client watches it so a pending exchange ends instead of waiting out its
/// deadline.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, abandoning pending exchange");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, abandoning pending exchange");
            }
        }

        token_clone.cancel();
    });

    token
}
