//! Local read-only snapshot of PodSets and Pods.
//!
//! Each watched kind has an [`Informer`] that owns the store writer and is
//! driven by that kind's watch stream. The [`Cache`] handed to the
//! reconciler only holds the readers, so reconciles never hit the API
//! server for reads.

use crate::key::ResourceKey;
use crds::PodSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube_runtime::reflector::store::Writer;
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::watcher;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The resource kinds the controller watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// The primary resource
    PodSet,
    /// The secondary resource
    Pod,
}

impl ResourceKind {
    /// Every watched kind, in startup order.
    pub const ALL: [Self; 2] = [Self::PodSet, Self::Pod];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PodSet => f.write_str("PodSet"),
            Self::Pod => f.write_str("Pod"),
        }
    }
}

/// A change observed by an informer, after applying it to the store.
#[derive(Debug)]
pub enum Change<K> {
    /// Object seen for the first time
    Added(K),
    /// Object seen before; `old` is the previously cached version
    Updated {
        /// Cached version before this event
        old: Arc<K>,
        /// Version carried by this event
        new: K,
    },
    /// Object deleted; carries its last known state
    Deleted(K),
    /// Initial list finished, the store is now complete
    Synced,
}

/// Feeds one kind's watch events into its store and tracks its initial sync.
pub struct Informer<K>
where
    K: kube::Resource<DynamicType = ()> + Clone + 'static,
{
    writer: Writer<K>,
    synced: Arc<AtomicBool>,
    /// Objects cached before the running (re)list that it has not replayed yet
    unseen: Option<HashMap<ObjectRef<K>, Arc<K>>>,
}

impl<K> fmt::Debug for Informer<K>
where
    K: kube::Resource<DynamicType = ()> + Clone + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Informer")
            .field("kind", &K::kind(&()))
            .field("synced", &self.synced.load(Ordering::Acquire))
            .field("listing", &self.unseen.is_some())
            .finish_non_exhaustive()
    }
}

impl<K> Informer<K>
where
    K: kube::Resource<DynamicType = ()> + Clone + 'static,
{
    fn new(writer: Writer<K>, synced: Arc<AtomicBool>) -> Self {
        Self {
            writer,
            synced,
            unseen: None,
        }
    }

    /// Applies a watch event to the store and reports what changed.
    ///
    /// During a (re)list the store only swaps in the new snapshot at
    /// `InitDone`, so objects replayed by the list are compared against the
    /// previous snapshot and show up as updates. Objects the relist no
    /// longer returns were deleted while the watch was down; they are
    /// reported as `Deleted` with their last cached state, ahead of
    /// `Synced`.
    pub fn observe(&mut self, event: watcher::Event<K>) -> Vec<Change<K>> {
        let reader = self.writer.as_reader();
        let changes = match &event {
            watcher::Event::Init => {
                let snapshot = reader
                    .state()
                    .into_iter()
                    .map(|obj| (ObjectRef::from_obj(&*obj), obj))
                    .collect();
                self.unseen = Some(snapshot);
                Vec::new()
            }
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                let obj_ref = ObjectRef::from_obj(obj);
                if let Some(unseen) = self.unseen.as_mut() {
                    unseen.remove(&obj_ref);
                }
                vec![match reader.get(&obj_ref) {
                    Some(old) => Change::Updated {
                        old,
                        new: obj.clone(),
                    },
                    None => Change::Added(obj.clone()),
                }]
            }
            watcher::Event::Delete(obj) => vec![Change::Deleted(obj.clone())],
            watcher::Event::InitDone => {
                let mut changes: Vec<Change<K>> = self
                    .unseen
                    .take()
                    .unwrap_or_default()
                    .into_values()
                    .map(|last_known| Change::Deleted(K::clone(&last_known)))
                    .collect();
                changes.push(Change::Synced);
                changes
            }
        };
        self.writer.apply_watcher_event(&event);
        if matches!(event, watcher::Event::InitDone) {
            // Stays true across later relists: the cache is never emptied again
            self.synced.store(true, Ordering::Release);
        }
        changes
    }
}

/// Read side of both stores, cheap to clone.
#[derive(Clone)]
pub struct Cache {
    pod_sets: Store<PodSet>,
    pods: Store<Pod>,
    pod_sets_synced: Arc<AtomicBool>,
    pods_synced: Arc<AtomicBool>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("pod_sets_synced", &self.has_synced(ResourceKind::PodSet))
            .field("pods_synced", &self.has_synced(ResourceKind::Pod))
            .finish_non_exhaustive()
    }
}

impl Cache {
    /// Creates empty stores and the informers that fill them.
    #[must_use]
    pub fn new() -> (Self, Informer<PodSet>, Informer<Pod>) {
        let pod_set_writer = Writer::<PodSet>::default();
        let pod_writer = Writer::<Pod>::default();
        let pod_sets_synced = Arc::new(AtomicBool::new(false));
        let pods_synced = Arc::new(AtomicBool::new(false));

        let cache = Self {
            pod_sets: pod_set_writer.as_reader(),
            pods: pod_writer.as_reader(),
            pod_sets_synced: Arc::clone(&pod_sets_synced),
            pods_synced: Arc::clone(&pods_synced),
        };
        (
            cache,
            Informer::new(pod_set_writer, pod_sets_synced),
            Informer::new(pod_writer, pods_synced),
        )
    }

    /// Whether the store for `kind` has completed its initial list.
    #[must_use]
    pub fn has_synced(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::PodSet => self.pod_sets_synced.load(Ordering::Acquire),
            ResourceKind::Pod => self.pods_synced.load(Ordering::Acquire),
        }
    }

    /// Looks up a PodSet by key.
    #[must_use]
    pub fn get_pod_set(&self, key: &ResourceKey) -> Option<Arc<PodSet>> {
        self.pod_sets
            .get(&ObjectRef::new(&key.name).within(&key.namespace))
    }

    /// Pods in `namespace` whose labels contain every pair of `selector`.
    ///
    /// Sorted by name so callers see a stable order.
    #[must_use]
    pub fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Vec<Arc<Pod>> {
        let mut pods: Vec<Arc<Pod>> = self
            .pods
            .state()
            .into_iter()
            .filter(|pod| pod.namespace().as_deref() == Some(namespace))
            .filter(|pod| {
                let labels = pod.labels();
                selector
                    .iter()
                    .all(|(key, value)| labels.get(key) == Some(value))
            })
            .collect();
        pods.sort_by(|a, b| a.name_any().cmp(&b.name_any()));
        pods
    }
}
