//! Write side of the cluster API.
//!
//! The reconciler reads from the local [`crate::cache::Cache`] and only
//! talks to the API server through this trait, so tests can swap in a
//! recording mock.

use crate::error::ControllerError;
use crds::PodSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::debug;

/// Trait for the mutating cluster operations the reconciler issues
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// Creates a Pod in the namespace set on `pod`.
    async fn create_pod(&self, pod: &Pod) -> Result<(), ControllerError>;

    /// Deletes the named Pod. A Pod that is already gone is not an error.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    /// Writes `pod_set.status` through the status subresource.
    ///
    /// A PodSet deleted in the meantime is not an error.
    async fn update_pod_set_status(&self, pod_set: &PodSet) -> Result<(), ControllerError>;
}

/// `ClusterClient` backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    /// Creates a new client wrapping an existing Kubernetes client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

fn namespace_of<K: ResourceExt>(obj: &K) -> Result<String, ControllerError> {
    obj.namespace().ok_or_else(|| {
        ControllerError::MalformedObject(format!("{} has no namespace", obj.name_any()))
    })
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_pod(&self, pod: &Pod) -> Result<(), ControllerError> {
        let namespace = namespace_of(pod)?;
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let created = api.create(&PostParams::default(), pod).await?;
        debug!("Created Pod {}/{}", namespace, created.name_any());
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!("Deleted Pod {}/{}", namespace, name);
                Ok(())
            }
            // Already gone: the delete event will trigger the next pass
            Err(e) if is_not_found(&e) => {
                debug!("Pod {}/{} already deleted", namespace, name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_pod_set_status(&self, pod_set: &PodSet) -> Result<(), ControllerError> {
        let namespace = namespace_of(pod_set)?;
        let name = pod_set.name_any();
        let api: Api<PodSet> = Api::namespaced(self.client.clone(), &namespace);

        // Patch the status using kube-rs status subresource API
        let status_patch = json!({
            "status": pod_set.current_status()
        });
        match api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&status_patch))
            .await
        {
            Ok(_) => {
                debug!("Updated PodSet {}/{} status", namespace, name);
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                debug!("PodSet {}/{} deleted before its status was written", namespace, name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
