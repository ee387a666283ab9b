//! Controller-specific error types.
//!
//! This module defines error types specific to the PodSet Controller
//! that are not covered by upstream library errors.

use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the PodSet Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// PodSet spec that no retry can fix (missing or negative replicas)
    #[error("Invalid PodSet spec: {0}")]
    InvalidSpec(String),

    /// Object is missing a field the controller relies on (name, namespace, uid)
    #[error("Malformed object: {0}")]
    MalformedObject(String),

    /// Caches did not finish their initial sync in time
    #[error("Timed out waiting for caches to sync: {0}")]
    CacheSyncTimeout(String),

    /// Shutdown was requested before the caches finished syncing
    #[error("Shutdown requested before caches synced")]
    ShutdownBeforeSync,

    /// The process signal handler was already installed
    #[error("Signal handler already installed")]
    SignalHandlerInstalled,

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether requeueing the key with backoff can make progress.
    ///
    /// Structural problems are dropped instead of retried; everything
    /// coming back from the API server is treated as transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidSpec(_) | Self::MalformedObject(_) | Self::InvalidConfig(_)
        )
    }
}
