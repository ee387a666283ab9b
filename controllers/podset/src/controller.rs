//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the watch
//! streams, the caches, the work queue and the worker pool together:
//!
//! 1. Two watcher tasks feed the PodSet and Pod caches and enqueue keys
//! 2. Workers are held back until both caches have synced
//! 3. N workers pull keys and reconcile them, requeueing failures with backoff
//! 4. On shutdown, workers finish their current key and the queue is drained

use crate::cache::{Cache, Informer, ResourceKind};
use crate::client::ClusterClient;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::key::ResourceKey;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::sync::CacheSyncBarrier;
use crate::watcher::{EventBridge, run_informer};
use crds::PodSet;
use futures::Stream;
use k8s_openapi::api::core::v1::Pod;
use kube_runtime::watcher;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Main controller for PodSet resources.
pub struct Controller<C: ClusterClient + 'static> {
    config: ControllerConfig,
    cache: Cache,
    pod_set_informer: Informer<PodSet>,
    pod_informer: Informer<Pod>,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler<C>>,
}

impl<C: ClusterClient + 'static> std::fmt::Debug for Controller<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl<C: ClusterClient + 'static> Controller<C> {
    /// Creates a new controller instance writing through `client`.
    pub fn new(config: ControllerConfig, client: C) -> Self {
        let (cache, pod_set_informer, pod_informer) = Cache::new();
        let queue = Arc::new(WorkQueue::new(config.backoff));
        let reconciler = Arc::new(Reconciler::new(cache.clone(), client));
        Self {
            config,
            cache,
            pod_set_informer,
            pod_informer,
            queue,
            reconciler,
        }
    }

    /// Runs the controller until `shutdown` fires.
    ///
    /// Fails without starting any worker when the caches do not sync in
    /// time, and fails if a watch stream ends while the controller is
    /// still running.
    pub async fn run<PS, PO>(
        self,
        pod_sets: PS,
        pods: PO,
        shutdown: CancellationToken,
    ) -> Result<(), ControllerError>
    where
        PS: Stream<Item = Result<watcher::Event<PodSet>, watcher::Error>> + Send + 'static,
        PO: Stream<Item = Result<watcher::Event<Pod>, watcher::Error>> + Send + 'static,
    {
        let Self {
            config,
            cache,
            pod_set_informer,
            pod_informer,
            queue,
            reconciler,
        } = self;
        info!("Starting PodSet Controller with {} worker(s)", config.workers);

        // Watchers outlive the workers so late events still land in the queue
        let watch_shutdown = CancellationToken::new();
        let bridge = EventBridge::new(cache.clone(), Arc::clone(&queue));

        let mut pod_set_watcher = {
            let bridge = bridge.clone();
            let token = watch_shutdown.clone();
            tokio::spawn(async move {
                run_informer("PodSet", pod_sets, pod_set_informer, token, move |change| {
                    bridge.on_pod_set(change);
                })
                .await;
            })
        };
        let mut pod_watcher = {
            let token = watch_shutdown.clone();
            tokio::spawn(async move {
                run_informer("Pod", pods, pod_informer, token, move |change| {
                    bridge.on_pod(change);
                })
                .await;
            })
        };

        let barrier = CacheSyncBarrier::new(config.cache_sync_timeout);
        if let Err(e) = barrier.wait(&cache, &ResourceKind::ALL, &shutdown).await {
            error!("Not starting workers: {}", e);
            queue.shut_down();
            stop_watchers(&watch_shutdown, pod_set_watcher, pod_watcher).await;
            return Err(e);
        }

        let workers: Vec<JoinHandle<()>> = (0..config.workers)
            .map(|id| {
                let queue = Arc::clone(&queue);
                let reconciler = Arc::clone(&reconciler);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { run_worker(id, queue, reconciler, shutdown).await })
            })
            .collect();
        info!("Started {} worker(s)", workers.len());

        // Watchers run until told to stop; one exiting on its own is fatal
        let result = tokio::select! {
            () = shutdown.cancelled() => {
                info!("Shutdown requested, draining in-flight work");
                Ok(())
            }
            result = &mut pod_set_watcher => Err(watcher_exited("PodSet", result)),
            result = &mut pod_watcher => Err(watcher_exited("Pod", result)),
        };

        queue.shut_down_with_drain().await;
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Worker panicked: {}", e);
            }
        }
        if !queue.is_empty() {
            warn!("{} queued key(s) left unprocessed at shutdown", queue.len());
        }
        stop_watchers(&watch_shutdown, pod_set_watcher, pod_watcher).await;

        info!("PodSet Controller stopped");
        result
    }
}

fn watcher_exited(resource_name: &str, result: Result<(), tokio::task::JoinError>) -> ControllerError {
    match result {
        Ok(()) => ControllerError::Watch(format!("{resource_name} watch stream ended")),
        Err(e) => ControllerError::Watch(format!("{resource_name} watcher panicked: {e}")),
    }
}

async fn stop_watchers(token: &CancellationToken, pod_sets: JoinHandle<()>, pods: JoinHandle<()>) {
    token.cancel();
    // A handle that already completed in `run` must not be polled again
    for (resource_name, handle) in [("PodSet", pod_sets), ("Pod", pods)] {
        if handle.is_finished() {
            continue;
        }
        if let Err(e) = handle.await {
            error!("{} watcher panicked: {}", resource_name, e);
        }
    }
}

/// Pulls keys off the queue until shutdown or until the queue is closed.
async fn run_worker<C: ClusterClient>(
    id: usize,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler<C>>,
    shutdown: CancellationToken,
) {
    debug!("Worker {} started", id);
    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => None,
            key = queue.get() => key,
        };
        let Some(key) = next else { break };
        process_item(&queue, &reconciler, key).await;
    }
    debug!("Worker {} stopped (queue shutting down: {})", id, queue.shutting_down());
}

/// Reconciles one key and settles it with the queue.
async fn process_item<C: ClusterClient>(queue: &Arc<WorkQueue>, reconciler: &Reconciler<C>, key: ResourceKey) {
    match reconciler.reconcile(&key).await {
        Ok(()) => queue.forget(&key),
        Err(e) if e.is_retryable() => {
            warn!(
                "Reconcile of {} failed (attempt {}), requeueing: {}",
                key,
                queue.num_requeues(&key) + 1,
                e
            );
            queue.add_rate_limited(key.clone());
        }
        Err(e) => {
            error!("Reconcile of {} failed permanently, dropping: {}", key, e);
            queue.forget(&key);
        }
    }
    queue.done(&key);
}
