//! Canonical `namespace/name` key identifying a PodSet.
//!
//! Keys are only ever built from cached objects, never parsed back from
//! strings.

use crate::error::ControllerError;
use kube::ResourceExt;
use std::fmt;

/// Unit of deduplication in the work queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    /// Namespace of the PodSet
    pub namespace: String,
    /// Name of the PodSet
    pub name: String,
}

impl ResourceKey {
    /// Creates a key from its two parts.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Builds the key of a namespaced object.
    ///
    /// Fails for objects without a name or namespace, which cannot be
    /// looked up again from the cache.
    pub fn for_object<K: ResourceExt>(obj: &K) -> Result<Self, ControllerError> {
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or_else(|| ControllerError::MalformedObject("object missing name".to_string()))?;
        let namespace = obj.namespace().ok_or_else(|| {
            ControllerError::MalformedObject(format!("object {name} missing namespace"))
        })?;
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
