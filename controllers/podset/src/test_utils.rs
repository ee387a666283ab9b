//! Test utilities for unit testing the controller
//!
//! This module provides helpers for creating test data, a pre-populated
//! cache, and a recording `ClusterClient` mock.

use crate::cache::{Cache, Informer};
use crate::client::ClusterClient;
use crate::error::ControllerError;
use crds::{POD_SET_GROUP, PodSet, PodSetSpec, PodSetStatus};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use kube::core::ErrorResponse;
use kube_runtime::watcher;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Helper to create test PodSet CRD
pub fn create_test_pod_set(namespace: &str, name: &str, replicas: Option<i32>) -> PodSet {
    PodSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: PodSetSpec { replicas },
        status: None,
    }
}

/// Helper to create test PodSet CRD with a stored status
pub fn create_test_pod_set_with_status(
    namespace: &str,
    name: &str,
    replicas: i32,
    available_replicas: i32,
) -> PodSet {
    let mut pod_set = create_test_pod_set(namespace, name, Some(replicas));
    pod_set.status = Some(PodSetStatus { available_replicas });
    pod_set
}

/// Helper to create a test Pod labelled for `app` (if any) in the given phase
pub fn create_test_pod(namespace: &str, name: &str, app: Option<&str>, phase: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: app.map(|app| BTreeMap::from([("app".to_string(), app.to_string())])),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            phase: phase.map(str::to_string),
            ..Default::default()
        }),
    }
}

/// Helper to create a test Pod owned by the PodSet `owner`
pub fn create_owned_test_pod(namespace: &str, name: &str, owner: &str, phase: Option<&str>) -> Pod {
    let mut pod = create_test_pod(namespace, name, Some(owner), phase);
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: format!("{POD_SET_GROUP}/v1alpha1"),
        kind: "PodSet".to_string(),
        name: owner.to_string(),
        uid: format!("uid-{owner}"),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]);
    pod
}

/// Replays a complete initial list through an informer
pub fn sync_informer<K>(informer: &mut Informer<K>, objects: Vec<K>)
where
    K: kube::Resource<DynamicType = ()> + Clone + 'static,
{
    informer.observe(watcher::Event::Init);
    for obj in objects {
        informer.observe(watcher::Event::InitApply(obj));
    }
    informer.observe(watcher::Event::InitDone);
}

/// Helper to create a synced cache holding the given objects
pub fn create_test_cache(pod_sets: Vec<PodSet>, pods: Vec<Pod>) -> Cache {
    let (cache, mut pod_set_informer, mut pod_informer) = Cache::new();
    sync_informer(&mut pod_set_informer, pod_sets);
    sync_informer(&mut pod_informer, pods);
    cache
}

/// An error as `kube::Api` reports a failed request
pub fn api_error(code: u16, reason: &str) -> ControllerError {
    ControllerError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected {reason}"),
        reason: reason.to_string(),
        code,
    }))
}

/// A call made against the mock cluster
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterCall {
    /// Pod created from the given template
    CreatePod {
        /// Namespace of the new Pod
        namespace: String,
        /// `generateName` of the new Pod
        generate_name: String,
    },
    /// Pod deleted by name
    DeletePod {
        /// Namespace of the deleted Pod
        namespace: String,
        /// Name of the deleted Pod
        name: String,
    },
    /// PodSet status written
    UpdateStatus {
        /// Name of the PodSet
        name: String,
        /// Status that was written
        status: PodSetStatus,
    },
}

/// Mock ClusterClient that records every call
///
/// Optionally fails every call, to exercise the error paths.
#[derive(Debug, Clone, Default)]
pub struct RecordingClient {
    calls: Arc<Mutex<Vec<ClusterCall>>>,
    created: Arc<Mutex<Vec<Pod>>>,
    fail_with: Arc<Mutex<Option<(u16, String)>>>,
}

impl RecordingClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail the way the API server does, with
    /// HTTP status `code` and `reason`
    pub fn fail_with(&self, code: u16, reason: &str) {
        *self.fail_with.lock().unwrap() = Some((code, reason.to_string()));
    }

    /// Calls recorded so far
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Pods passed to `create_pod`
    pub fn created_pods(&self) -> Vec<Pod> {
        self.created.lock().unwrap().clone()
    }

    fn record(&self, call: ClusterCall) -> Result<(), ControllerError> {
        if let Some((code, reason)) = self.fail_with.lock().unwrap().clone() {
            return Err(api_error(code, &reason));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterClient for RecordingClient {
    async fn create_pod(&self, pod: &Pod) -> Result<(), ControllerError> {
        self.record(ClusterCall::CreatePod {
            namespace: pod.namespace().unwrap_or_default(),
            generate_name: pod.metadata.generate_name.clone().unwrap_or_default(),
        })?;
        self.created.lock().unwrap().push(pod.clone());
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        self.record(ClusterCall::DeletePod {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    async fn update_pod_set_status(&self, pod_set: &PodSet) -> Result<(), ControllerError> {
        self.record(ClusterCall::UpdateStatus {
            name: pod_set.name_any(),
            status: pod_set.current_status(),
        })
    }
}
