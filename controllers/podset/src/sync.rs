//! Startup barrier: no worker runs until every cache holds a full snapshot.

use crate::cache::{Cache, ResourceKind};
use crate::error::ControllerError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How often the barrier re-checks the caches
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Waits, with a bound, for the caches to finish their initial list.
#[derive(Debug, Clone, Copy)]
pub struct CacheSyncBarrier {
    timeout: Duration,
    poll_interval: Duration,
}

impl CacheSyncBarrier {
    /// Creates a barrier giving up after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Blocks until every kind in `kinds` has synced.
    ///
    /// Fails with `CacheSyncTimeout` naming the kinds still unsynced when
    /// the timeout elapses, or with `ShutdownBeforeSync` if `shutdown`
    /// fires first.
    pub async fn wait(
        &self,
        cache: &Cache,
        kinds: &[ResourceKind],
        shutdown: &CancellationToken,
    ) -> Result<(), ControllerError> {
        info!("Waiting for caches to sync: {:?}", kinds);
        let unsynced = || -> Vec<ResourceKind> {
            kinds
                .iter()
                .copied()
                .filter(|kind| !cache.has_synced(*kind))
                .collect()
        };

        let poll = async {
            let mut ticker = tokio::time::interval(self.poll_interval);
            loop {
                ticker.tick().await;
                let pending = unsynced();
                if pending.is_empty() {
                    return;
                }
                debug!("Caches not synced yet: {:?}", pending);
            }
        };

        tokio::select! {
            () = shutdown.cancelled() => Err(ControllerError::ShutdownBeforeSync),
            result = tokio::time::timeout(self.timeout, poll) => match result {
                Ok(()) => {
                    info!("Caches synced");
                    Ok(())
                }
                Err(_elapsed) => {
                    let pending: Vec<String> = unsynced().iter().map(ToString::to_string).collect();
                    Err(ControllerError::CacheSyncTimeout(pending.join(", ")))
                }
            },
        }
    }
}
