//! Reconciliation logic for PodSet CRDs.
//!
//! Converges the number of live Pods of a PodSet towards `spec.replicas`,
//! one Pod per pass, and records the observed count in
//! `status.availableReplicas`.
//!
//! Each pass is a pure function of the key and the cache contents. The
//! Pod add/delete event caused by a pass triggers the next one, so a
//! PodSet scaled from 0 to 3 converges over three reconciles.

use crate::cache::Cache;
use crate::client::ClusterClient;
use crate::error::ControllerError;
use crate::key::ResourceKey;
use crds::{POD_SET_LABEL, PodSet, PodSetStatus};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Image run by every managed Pod
const POD_IMAGE: &str = "busybox";

/// Container name inside every managed Pod
const POD_CONTAINER_NAME: &str = "busybox";

/// Pod phases that count towards the desired replicas.
const LIVE_PHASES: [&str; 2] = ["Pending", "Running"];

/// Whether `pod` is Pending or Running.
///
/// A Pod the API server has not stamped with a phase yet was just created
/// and is treated as Pending.
fn is_live(pod: &Pod) -> bool {
    match pod.status.as_ref().and_then(|status| status.phase.as_deref()) {
        Some(phase) => LIVE_PHASES.contains(&phase),
        None => true,
    }
}

/// Builds the Pod template for a new replica of `pod_set`.
pub fn new_pod_for(pod_set: &PodSet) -> Result<Pod, ControllerError> {
    let name = pod_set.name_any();
    let owner = pod_set.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::MalformedObject(format!("PodSet {name} has no uid"))
    })?;

    Ok(Pod {
        metadata: ObjectMeta {
            generate_name: Some(format!("{name}-pod-")),
            namespace: pod_set.namespace(),
            labels: Some(BTreeMap::from([(POD_SET_LABEL.to_string(), name)])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: POD_CONTAINER_NAME.to_string(),
                image: Some(POD_IMAGE.to_string()),
                command: Some(vec!["sleep".to_string(), "3600".to_string()]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: None,
    })
}

/// Reconciles PodSet resources.
pub struct Reconciler<C: ClusterClient> {
    cache: Cache,
    client: C,
}

impl<C: ClusterClient> std::fmt::Debug for Reconciler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl<C: ClusterClient> Reconciler<C> {
    /// Creates a new reconciler instance.
    pub fn new(cache: Cache, client: C) -> Self {
        Self { cache, client }
    }

    /// Reconciles the PodSet identified by `key`.
    ///
    /// This method:
    /// 1. Looks the PodSet up in the cache (gone means nothing to do)
    /// 2. Counts its live Pods
    /// 3. Creates or deletes at most one Pod to move towards `spec.replicas`
    /// 4. Writes `status.availableReplicas` if it changed
    ///
    /// API failures are returned as-is; retrying is the caller's job.
    pub async fn reconcile(&self, key: &ResourceKey) -> Result<(), ControllerError> {
        let Some(pod_set) = self.cache.get_pod_set(key) else {
            debug!("PodSet {} no longer exists, skipping", key);
            return Ok(());
        };

        let desired = desired_replicas(&pod_set, key)?;
        let mut live: Vec<Arc<Pod>> = self
            .cache
            .list_pods(&key.namespace, &pod_set.pod_selector())
            .into_iter()
            .filter(|pod| is_live(pod))
            .collect();

        debug!(
            "Reconciling PodSet {}: {} live, {} desired",
            key,
            live.len(),
            desired
        );

        if live.len() < desired {
            let pod = new_pod_for(&pod_set)?;
            self.client.create_pod(&pod).await?;
            info!("Created Pod for PodSet {} ({} of {})", key, live.len() + 1, desired);
        } else if live.len() > desired {
            // Oldest first; the name makes the choice stable within a second
            live.sort_by_key(|pod| (pod.creation_timestamp().map(|ts| ts.0), pod.name_any()));
            let victim = live.remove(0);
            let victim_name = victim.name_any();
            self.client.delete_pod(&key.namespace, &victim_name).await?;
            info!("Deleted Pod {}/{} for PodSet {}", key.namespace, victim_name, key);
        }

        // A Pod created this pass is not observed yet; a deleted one is gone
        let available = i32::try_from(live.len()).map_err(|_| {
            ControllerError::InvalidSpec(format!("PodSet {key} has too many Pods to count"))
        })?;
        let status = PodSetStatus {
            available_replicas: available,
        };
        if status == pod_set.current_status() {
            return Ok(());
        }

        let mut updated = PodSet::clone(&pod_set);
        updated.status = Some(status);
        self.client.update_pod_set_status(&updated).await?;
        info!("Updated PodSet {} status: {} available", key, available);
        Ok(())
    }
}

/// Reads `spec.replicas`, rejecting values no retry can fix.
fn desired_replicas(pod_set: &PodSet, key: &ResourceKey) -> Result<usize, ControllerError> {
    let replicas = pod_set
        .spec
        .replicas
        .ok_or_else(|| ControllerError::InvalidSpec(format!("PodSet {key} has no replicas set")))?;
    usize::try_from(replicas).map_err(|_| {
        ControllerError::InvalidSpec(format!("PodSet {key} has negative replicas: {replicas}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        ClusterCall, RecordingClient, create_owned_test_pod, create_test_cache, create_test_pod_set,
        create_test_pod_set_with_status,
    };

    fn key() -> ResourceKey {
        ResourceKey::new("pods", "web")
    }

    fn pods(phases: &[&str]) -> Vec<Pod> {
        phases
            .iter()
            .enumerate()
            .map(|(i, phase)| create_owned_test_pod("pods", &format!("web-pod-{i}"), "web", Some(*phase)))
            .collect()
    }

    fn setup(pod_sets: Vec<PodSet>, pods: Vec<Pod>) -> (Reconciler<RecordingClient>, RecordingClient) {
        let client = RecordingClient::new();
        (Reconciler::new(create_test_cache(pod_sets, pods), client.clone()), client)
    }

    fn status_call(available_replicas: i32) -> ClusterCall {
        ClusterCall::UpdateStatus {
            name: "web".to_string(),
            status: PodSetStatus { available_replicas },
        }
    }

    #[tokio::test]
    async fn test_creates_one_pod_per_pass() {
        let (reconciler, client) = setup(
            vec![create_test_pod_set("pods", "web", Some(3))],
            pods(&["Running"]),
        );

        reconciler.reconcile(&key()).await.unwrap();

        // One create, and status reflects what was observed (1), not the target (3)
        assert_eq!(
            client.calls(),
            vec![
                ClusterCall::CreatePod {
                    namespace: "pods".to_string(),
                    generate_name: "web-pod-".to_string(),
                },
                status_call(1),
            ]
        );
    }

    #[tokio::test]
    async fn test_deletes_one_pod_on_overshoot() {
        let (reconciler, client) = setup(
            vec![create_test_pod_set_with_status("pods", "web", 1, 3)],
            pods(&["Running", "Running", "Pending"]),
        );

        reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(
            client.calls(),
            vec![
                ClusterCall::DeletePod {
                    namespace: "pods".to_string(),
                    name: "web-pod-0".to_string(),
                },
                status_call(2),
            ]
        );
    }

    #[tokio::test]
    async fn test_terminal_pods_are_not_counted_or_deleted() {
        let (reconciler, client) = setup(
            vec![create_test_pod_set("pods", "web", Some(0))],
            pods(&["Succeeded", "Failed", "Running", "Unknown"]),
        );

        reconciler.reconcile(&key()).await.unwrap();

        // Only the Running Pod is a deletion candidate
        assert_eq!(
            client.calls(),
            vec![ClusterCall::DeletePod {
                namespace: "pods".to_string(),
                name: "web-pod-2".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_terminal_pods_do_not_satisfy_desired_count() {
        let (reconciler, client) = setup(
            vec![create_test_pod_set("pods", "web", Some(1))],
            pods(&["Succeeded", "Failed"]),
        );

        reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(client.created_pods().len(), 1);
        assert_eq!(client.calls().len(), 1, "status stays at 0, no update expected");
    }

    #[tokio::test]
    async fn test_converged_pod_set_is_idempotent() {
        let (reconciler, client) = setup(
            vec![create_test_pod_set_with_status("pods", "web", 2, 2)],
            pods(&["Running", "Pending"]),
        );

        reconciler.reconcile(&key()).await.unwrap();
        reconciler.reconcile(&key()).await.unwrap();

        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_status_written_once() {
        let pod_set = create_test_pod_set_with_status("pods", "web", 2, 0);
        let (reconciler, client) = setup(vec![pod_set], pods(&["Running", "Running"]));

        reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(client.calls(), vec![status_call(2)]);

        // Once the cache reflects the written status, a second pass is a no-op
        let (reconciler, client) = setup(
            vec![create_test_pod_set_with_status("pods", "web", 2, 2)],
            pods(&["Running", "Running"]),
        );
        reconciler.reconcile(&key()).await.unwrap();
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_pod_set_is_success() {
        let (reconciler, client) = setup(vec![], pods(&["Running"]));

        reconciler.reconcile(&key()).await.unwrap();
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_replicas_is_not_retryable() {
        let (reconciler, client) = setup(vec![create_test_pod_set("pods", "web", None)], vec![]);

        let err = reconciler.reconcile(&key()).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidSpec(_)));
        assert!(!err.is_retryable());
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_negative_replicas_is_invalid() {
        let (reconciler, _client) = setup(vec![create_test_pod_set("pods", "web", Some(-1))], vec![]);

        let err = reconciler.reconcile(&key()).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidSpec(_)));
    }

    #[tokio::test]
    async fn test_api_failure_is_returned_without_status_update() {
        let (reconciler, client) = setup(vec![create_test_pod_set("pods", "web", Some(1))], vec![]);
        client.fail_with(503, "ServiceUnavailable");

        let err = reconciler.reconcile(&key()).await.unwrap_err();
        assert!(matches!(&err, ControllerError::Kube(kube::Error::Api(response)) if response.code == 503));
        assert!(err.is_retryable());
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unlabelled_pods_are_not_counted() {
        let mut stray = create_owned_test_pod("pods", "stray", "web", Some("Running"));
        stray.metadata.labels = None;
        let (reconciler, client) = setup(
            vec![create_test_pod_set_with_status("pods", "web", 1, 1)],
            vec![stray, create_owned_test_pod("pods", "web-pod-a", "web", Some("Running"))],
        );

        reconciler.reconcile(&key()).await.unwrap();
        assert!(client.calls().is_empty());
    }

    #[test]
    fn test_new_pod_for_sets_owner_and_labels() {
        let pod_set = create_test_pod_set("pods", "web", Some(1));
        let pod = new_pod_for(&pod_set).unwrap();

        assert_eq!(pod.metadata.generate_name.as_deref(), Some("web-pod-"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("pods"));
        assert_eq!(pod.labels().get("app").map(String::as_str), Some("web"));

        let owners = pod.owner_references();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "PodSet");
        assert_eq!(owners[0].name, "web");
        assert_eq!(owners[0].uid, "uid-web");
        assert_eq!(owners[0].controller, Some(true));

        let containers = &pod.spec.as_ref().unwrap().containers;
        assert_eq!(containers[0].image.as_deref(), Some("busybox"));
        assert_eq!(
            containers[0].command,
            Some(vec!["sleep".to_string(), "3600".to_string()])
        );
    }

    #[test]
    fn test_new_pod_for_requires_uid() {
        let mut pod_set = create_test_pod_set("pods", "web", Some(1));
        pod_set.metadata.uid = None;

        assert!(matches!(
            new_pod_for(&pod_set),
            Err(ControllerError::MalformedObject(_))
        ));
    }
}
