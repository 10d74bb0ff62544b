//! Node-scoped snapshot cache
//!
//! The cache holds, per node id, the last committed set of built resources
//! for every resource kind. Updates go through a publish transaction: staged
//! resources are invisible to readers until `commit`, which swaps them in
//! under a single write lock and bumps the version, so a stream serving the
//! node never observes a half-applied snapshot. Dropping an uncommitted
//! transaction discards the staging and releases the node for the next
//! publisher.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use envoy_types::pb::google::protobuf::Any;
use tokio::sync::broadcast;
use tracing::info;

use crate::errors::{Error, Result};
use crate::xds::resources::{BuiltResource, ResourceKind};

/// Cached Envoy resource along with the version it was committed at.
#[derive(Clone, Debug)]
pub struct CachedResource {
    pub name: String,
    pub type_url: String,
    pub version: u64,
    pub body: Any,
}

impl CachedResource {
    pub fn new(name: String, type_url: String, version: u64, body: Any) -> Self {
        Self { name, type_url, version, body }
    }
}

/// Broadcast payload describing a committed snapshot.
#[derive(Clone, Debug)]
pub struct SnapshotUpdate {
    pub node_id: String,
    pub version: u64,
    pub kinds: Vec<ResourceKind>,
}

#[derive(Debug, Default)]
struct NodeEntry {
    version: u64,
    resources: BTreeMap<ResourceKind, Vec<CachedResource>>,
}

/// Versioned per-node store of built resources.
#[derive(Debug)]
pub struct SnapshotCache {
    version: AtomicU64,
    nodes: RwLock<HashMap<String, NodeEntry>>,
    publish_flags: RwLock<HashMap<String, Arc<AtomicBool>>>,
    update_tx: broadcast::Sender<Arc<SnapshotUpdate>>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(128);
        Self {
            version: AtomicU64::new(1),
            nodes: RwLock::new(HashMap::new()),
            publish_flags: RwLock::new(HashMap::new()),
            update_tx,
        }
    }

    /// Open a publish transaction for `node_id`.
    ///
    /// Only one transaction per node may be open at a time; a second caller
    /// is turned away instead of queued so it can rebuild against the state
    /// the winner leaves behind.
    pub fn begin_publish(&self, node_id: &str) -> Result<PublishTransaction<'_>> {
        let flag = {
            let mut flags = self.publish_flags.write().expect("publish flag lock poisoned");
            flags.entry(node_id.to_string()).or_default().clone()
        };

        if flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(Error::publish(format!(
                "another publish for node '{}' is already in flight",
                node_id
            )));
        }

        Ok(PublishTransaction {
            cache: self,
            node_id: node_id.to_string(),
            staged: BTreeMap::new(),
            flag,
        })
    }

    /// Latest committed version for `node_id`, if it has a snapshot.
    pub fn node_version(&self, node_id: &str) -> Option<u64> {
        let nodes = self.nodes.read().expect("snapshot cache lock poisoned");
        nodes.get(node_id).map(|entry| entry.version)
    }

    /// Clone of the committed resources of one kind for `node_id`.
    pub fn resources(&self, node_id: &str, kind: ResourceKind) -> Vec<CachedResource> {
        let nodes = self.nodes.read().expect("snapshot cache lock poisoned");
        nodes
            .get(node_id)
            .and_then(|entry| entry.resources.get(&kind))
            .cloned()
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SnapshotUpdate>> {
        self.update_tx.subscribe()
    }

    /// Last version handed out, across all nodes.
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }
}

/// In-flight publish for one node. Staged kinds replace the committed ones
/// atomically at `commit`; kinds never staged carry over unchanged.
#[derive(Debug)]
pub struct PublishTransaction<'a> {
    cache: &'a SnapshotCache,
    node_id: String,
    staged: BTreeMap<ResourceKind, Vec<BuiltResource>>,
    flag: Arc<AtomicBool>,
}

impl PublishTransaction<'_> {
    /// Stage the full resource set of one kind. Staging the same kind again
    /// replaces the earlier staging.
    pub fn update(&mut self, kind: ResourceKind, resources: Vec<BuiltResource>) -> Result<()> {
        let mut names = HashSet::new();
        for resource in &resources {
            if resource.type_url() != kind.type_url() {
                return Err(Error::publish(format!(
                    "resource '{}' has type URL {} but was staged as {}",
                    resource.name,
                    resource.type_url(),
                    kind
                )));
            }
            if !names.insert(resource.name.as_str()) {
                return Err(Error::publish(format!(
                    "resource '{}' staged twice for kind {}",
                    resource.name, kind
                )));
            }
        }

        self.staged.insert(kind, resources);
        Ok(())
    }

    /// Commit the staged kinds and return the new node version.
    pub fn commit(mut self) -> u64 {
        let staged = std::mem::take(&mut self.staged);
        let kinds: Vec<ResourceKind> = staged.keys().copied().collect();
        let new_version = self.cache.version.fetch_add(1, Ordering::Relaxed) + 1;

        {
            let mut nodes = self.cache.nodes.write().expect("snapshot cache lock poisoned");
            let entry = nodes.entry(self.node_id.clone()).or_default();

            for (kind, built) in staged {
                let cached = built
                    .into_iter()
                    .map(|resource| {
                        CachedResource::new(
                            resource.name.clone(),
                            kind.type_url().to_string(),
                            new_version,
                            resource.resource,
                        )
                    })
                    .collect();
                entry.resources.insert(kind, cached);
            }

            entry.version = new_version;
        }

        info!(
            node_id = %self.node_id,
            version = new_version,
            kinds = kinds.len(),
            "Committed snapshot"
        );

        let _ = self.cache.update_tx.send(Arc::new(SnapshotUpdate {
            node_id: self.node_id.clone(),
            version: new_version,
            kinds,
        }));

        new_version
    }
}

impl Drop for PublishTransaction<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
