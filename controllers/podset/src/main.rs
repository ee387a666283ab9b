//! PodSet Controller
//!
//! Keeps the number of live Pods labelled `app=<name>` equal to
//! `spec.replicas` for every PodSet, one create or delete per pass, and
//! reports the observed count in `status.availableReplicas`.
//!
//! Events from the PodSet and Pod watches are reduced to keys on a
//! deduplicating, rate-limited work queue; workers reconcile keys against
//! the local caches once both have synced.

mod backoff;
mod cache;
mod client;
mod config;
mod controller;
mod error;
mod key;
mod ownership;
mod queue;
mod reconciler;
mod shutdown;
mod sync;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::client::KubeClusterClient;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use crds::PodSet;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use kube_runtime::WatchStreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting PodSet Controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers: {}", config.workers);
    info!("  Cache sync timeout: {:?}", config.cache_sync_timeout);

    let kube_client = Client::try_default().await?;
    let (pod_set_api, pod_api): (Api<PodSet>, Api<Pod>) = match config.namespace.as_deref() {
        Some(ns) => (
            Api::namespaced(kube_client.clone(), ns),
            Api::namespaced(kube_client.clone(), ns),
        ),
        None => (Api::all(kube_client.clone()), Api::all(kube_client.clone())),
    };

    let pod_sets = kube_runtime::watcher(pod_set_api, kube_runtime::watcher::Config::default()).default_backoff();
    let pods = kube_runtime::watcher(pod_api, watcher::pod_watch_config()).default_backoff();

    let shutdown = shutdown::install_signal_handler()?;
    let controller = Controller::new(config, KubeClusterClient::new(kube_client));
    controller.run(pod_sets, pods, shutdown).await?;

    Ok(())
}
