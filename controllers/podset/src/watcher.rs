//! Kubernetes resource watchers.
//!
//! This module turns the PodSet and Pod watch streams into work queue keys.
//! Every event is first applied to the local cache through its
//! [`Informer`], then translated:
//! - PodSet added/updated: enqueue its own key,
//! - Pod added/updated/deleted: enqueue the owning PodSet's key. This
//!   includes Pods a relist no longer returns, which were deleted while
//!   the watch was disconnected.
//!
//! Watchers never call the reconciler directly; the queue collapses bursts
//! of events into a single level-triggered reconcile.

use crate::cache::{Cache, Change, Informer};
use crate::key::ResourceKey;
use crate::ownership::resolve_owner;
use crate::queue::WorkQueue;
use crds::{POD_SET_LABEL, PodSet};
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube_runtime::watcher;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Translates observed changes into queue keys.
#[derive(Debug, Clone)]
pub struct EventBridge {
    cache: Cache,
    queue: Arc<WorkQueue>,
}

impl EventBridge {
    /// Creates a bridge feeding `queue`, resolving owners against `cache`.
    #[must_use]
    pub fn new(cache: Cache, queue: Arc<WorkQueue>) -> Self {
        Self { cache, queue }
    }

    fn enqueue_pod_set(&self, pod_set: &PodSet) {
        match ResourceKey::for_object(pod_set) {
            Ok(key) => self.queue.add(key),
            Err(e) => warn!("Dropping PodSet event: {}", e),
        }
    }

    fn enqueue_owner(&self, pod: &Pod) {
        if let Some(key) = resolve_owner(pod, &self.cache) {
            debug!("Pod {} changed, enqueueing owner {}", pod.name_any(), key);
            self.queue.add(key);
        }
    }

    /// Handles a change to a PodSet.
    pub fn on_pod_set(&self, change: Change<PodSet>) {
        match change {
            Change::Added(pod_set) | Change::Updated { new: pod_set, .. } => {
                self.enqueue_pod_set(&pod_set);
            }
            // Nothing left to converge; owned Pods are garbage collected by the cluster
            Change::Deleted(pod_set) => {
                debug!("PodSet deleted: {}", pod_set.name_any());
            }
            Change::Synced => info!("PodSet cache synced"),
        }
    }

    /// Handles a change to a Pod.
    pub fn on_pod(&self, change: Change<Pod>) {
        match change {
            Change::Added(pod) => self.enqueue_owner(&pod),
            Change::Updated { old, new } => {
                if is_same_version(&old, &new) {
                    // Periodic resync or relist replay: nothing actually changed
                    return;
                }
                self.enqueue_owner(&new);
            }
            Change::Deleted(pod) => self.enqueue_owner(&pod),
            Change::Synced => info!("Pod cache synced"),
        }
    }
}

/// Whether two versions of an object are the same revision.
fn is_same_version(old: &Pod, new: &Pod) -> bool {
    match (&old.metadata.resource_version, &new.metadata.resource_version) {
        (Some(old_version), Some(new_version)) => old_version == new_version,
        _ => old == new,
    }
}

/// Watch settings for Pods: only Pods carrying the PodSet label are
/// listed and cached.
#[must_use]
pub fn pod_watch_config() -> watcher::Config {
    watcher::Config::default().labels(POD_SET_LABEL)
}

/// Drives one watch stream into its informer until the stream ends or
/// `shutdown` fires.
///
/// Stream errors are logged and skipped; reconnecting is the stream's job
/// (see `WatchStreamExt::default_backoff`).
pub async fn run_informer<K, S, F>(
    resource_name: &str,
    stream: S,
    mut informer: Informer<K>,
    shutdown: CancellationToken,
    mut on_change: F,
) where
    K: kube::Resource<DynamicType = ()> + Clone + 'static,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
    F: FnMut(Change<K>),
{
    info!("Starting {} watcher", resource_name);
    let mut stream = std::pin::pin!(stream);

    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                for change in informer.observe(event) {
                    on_change(change);
                }
            }
            Some(Err(e)) => warn!("{} watch error: {}", resource_name, e),
            None => {
                warn!("{} watch stream ended", resource_name);
                break;
            }
        }
    }

    info!("{} watcher stopped", resource_name);
}
