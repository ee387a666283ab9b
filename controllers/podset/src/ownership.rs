//! Maps Pods back to the PodSet that owns them.

use crate::cache::Cache;
use crate::key::ResourceKey;
use crds::{POD_SET_GROUP, PodSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::debug;

/// Whether `owner` points at a PodSet, in any served version.
fn is_pod_set_ref(owner: &OwnerReference) -> bool {
    let group = owner
        .api_version
        .split_once('/')
        .map_or("", |(group, _version)| group);
    owner.kind == PodSet::kind(&()) && group == POD_SET_GROUP
}

/// Resolves the PodSet owning `pod`.
///
/// `pod` may be a live object or the last known state of a deleted one.
/// Returns `None` for Pods this controller does not manage and for Pods
/// whose owner is no longer in the cache; neither is an error.
#[must_use]
pub fn resolve_owner(pod: &Pod, cache: &Cache) -> Option<ResourceKey> {
    let owner = pod.owner_references().iter().find(|owner| is_pod_set_ref(owner))?;
    let namespace = pod.namespace()?;
    let key = ResourceKey::new(namespace, owner.name.clone());

    if cache.get_pod_set(&key).is_none() {
        debug!(
            "Ignoring Pod {}: owner PodSet {} not found",
            pod.name_any(),
            key
        );
        return None;
    }
    Some(key)
}
