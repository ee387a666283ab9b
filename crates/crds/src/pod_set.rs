//! PodSet CRD
//!
//! Declares a desired number of worker Pods that the controller keeps alive.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group served by the PodSet CRD.
pub const POD_SET_GROUP: &str = "demo.podset.io";

/// Label carried by every Pod the controller creates, set to the PodSet name.
pub const POD_SET_LABEL: &str = "app";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "demo.podset.io",
    version = "v1alpha1",
    kind = "PodSet",
    namespaced,
    status = "PodSetStatus",
    shortname = "ps",
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Available","type":"integer","jsonPath":".status.availableReplicas"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PodSetSpec {
    /// Desired number of Pending or Running Pods.
    ///
    /// Left optional so an unset value can be told apart from zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// Observed state, recomputed by the controller on every reconcile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodSetStatus {
    /// Number of live Pods seen during the last reconcile
    #[serde(default)]
    pub available_replicas: i32,
}

impl PodSet {
    /// Label selector matching the Pods that belong to this PodSet.
    #[must_use]
    pub fn pod_selector(&self) -> std::collections::BTreeMap<String, String> {
        let name = self.metadata.name.clone().unwrap_or_default();
        std::collections::BTreeMap::from([(POD_SET_LABEL.to_string(), name)])
    }

    /// Stored status, with an absent status read as the zero value.
    #[must_use]
    pub fn current_status(&self) -> PodSetStatus {
        self.status.unwrap_or_default()
    }
}
