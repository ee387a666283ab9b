//! Process signal handling.
//!
//! The first SIGINT/SIGTERM cancels the returned token so workers and
//! watchers can wind down; a second one exits the process immediately.

use crate::error::ControllerError;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Exit status used when a second signal forces the process down
const FORCED_EXIT_CODE: i32 = 1;

/// Installs the process-wide shutdown signal handler.
///
/// May be called once per process; later calls fail with
/// `SignalHandlerInstalled`. Must be called from within a Tokio runtime.
pub fn install_signal_handler() -> Result<CancellationToken, ControllerError> {
    if INSTALLED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(ControllerError::SignalHandlerInstalled);
    }

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            error!("Failed to listen for shutdown signals: {}", e);
            return;
        }
        warn!("Shutdown signal received, finishing in-flight work (signal again to force exit)");
        cancel.cancel();

        if wait_for_signal().await.is_ok() {
            error!("Second shutdown signal received, exiting immediately");
            std::process::exit(FORCED_EXIT_CODE);
        }
    });
    Ok(token)
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
