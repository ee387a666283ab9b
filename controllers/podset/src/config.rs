//! Controller configuration, read from environment variables.
//!
//! | Variable                  | Default          |
//! |---------------------------|------------------|
//! | `WATCH_NAMESPACE`         | all namespaces   |
//! | `WORKERS`                 | 1                |
//! | `CACHE_SYNC_TIMEOUT_SECS` | 120              |
//! | `BACKOFF_BASE_MS`         | 5                |
//! | `BACKOFF_MAX_SECS`        | 1000             |

use crate::backoff::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, ExponentialBackoff};
use crate::error::ControllerError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_WORKERS: usize = 1;
const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(120);

/// Runtime settings of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Number of concurrent reconcile workers (always positive)
    pub workers: usize,
    /// Upper bound on the startup cache sync
    pub cache_sync_timeout: Duration,
    /// Requeue backoff for failing keys
    pub backoff: ExponentialBackoff,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: DEFAULT_WORKERS,
            cache_sync_timeout: DEFAULT_CACHE_SYNC_TIMEOUT,
            backoff: ExponentialBackoff::default(),
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ControllerError> {
    lookup(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| {
                ControllerError::InvalidConfig(format!("{name} must be a number, got {raw:?}"))
            })
        })
        .transpose()
}

impl ControllerConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());

        let workers = parse_var::<usize>(&lookup, "WORKERS")?.unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKERS must be a positive integer".to_string(),
            ));
        }

        let cache_sync_timeout = parse_var::<u64>(&lookup, "CACHE_SYNC_TIMEOUT_SECS")?
            .map_or(DEFAULT_CACHE_SYNC_TIMEOUT, Duration::from_secs);
        let base = parse_var::<u64>(&lookup, "BACKOFF_BASE_MS")?
            .map_or(DEFAULT_BASE_DELAY, Duration::from_millis);
        let max = parse_var::<u64>(&lookup, "BACKOFF_MAX_SECS")?
            .map_or(DEFAULT_MAX_DELAY, Duration::from_secs);
        if base > max {
            return Err(ControllerError::InvalidConfig(format!(
                "BACKOFF_BASE_MS ({base:?}) exceeds BACKOFF_MAX_SECS ({max:?})"
            )));
        }

        Ok(Self {
            namespace,
            workers,
            cache_sync_timeout,
            backoff: ExponentialBackoff::new(base, max),
        })
    }
}
