//! Snapshot assembly and publication
//!
//! A gateway spec is turned into a snapshot in two steps. `assemble` builds
//! every resource kind and cross-checks the references between them, so a
//! snapshot that names a missing cluster or route table never reaches the
//! cache. `publish` hands a validated snapshot to the cache in one
//! transaction; a proxy watching the node sees either the previous snapshot
//! or the new one, never a mixture.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{Error, Result};
use crate::xds::cache::SnapshotCache;
use crate::xds::cluster::ClusterConfig;
use crate::xds::filters::http::{HttpFilterConfigEntry, HttpFilterKind};
use crate::xds::filters::http::basic_auth::BasicAuthConfig;
use crate::xds::filters::http::oauth2::OAuth2Config;
use crate::xds::listener::{FilterChainConfig, ListenerConfig};
use crate::xds::resources::{
    build_clusters, build_listeners, build_route_configs, BuiltResource, ResourceKind,
};
use crate::xds::route::{PathMatch, RouteActionConfig, RouteConfig, RouteRule, VirtualHostConfig};

/// Authentication filters applied to the synthesized filter chain
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthSpec {
    #[serde(default)]
    pub basic_auth: Option<BasicAuthConfig>,
    #[serde(default)]
    pub oauth2: Option<OAuth2Config>,
}

/// Declarative description of the gateway, usually loaded from a TOML file.
///
/// The simple form declares a listener without filter chains and lets the
/// assembler derive one chain from `route_config_name` and `auth`. Listeners
/// that declare their own chains are taken as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySpec {
    /// Name the route table is served under via RDS
    pub route_config_name: String,
    pub listener: ListenerConfig,
    pub virtual_hosts: Vec<VirtualHostConfig>,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
    #[serde(default)]
    pub auth: AuthSpec,
}

impl Default for GatewaySpec {
    /// A gateway that answers every request with 200 "OK". Useful as a
    /// smoke-test target when no gateway file is configured.
    fn default() -> Self {
        GatewaySpec {
            route_config_name: "test-route".to_string(),
            listener: ListenerConfig {
                name: "test".to_string(),
                address: "0.0.0.0".to_string(),
                port: 8080,
                filter_chains: Vec::new(),
            },
            virtual_hosts: vec![VirtualHostConfig {
                name: "test-route".to_string(),
                domains: vec!["*".to_string()],
                routes: vec![RouteRule {
                    name: None,
                    r#match: PathMatch::Prefix("/".to_string()),
                    action: RouteActionConfig::DirectResponse {
                        status: 200,
                        body: Some("OK".to_string()),
                    },
                    typed_per_filter_config: Default::default(),
                }],
            }],
            clusters: Vec::new(),
            auth: AuthSpec::default(),
        }
    }
}

impl GatewaySpec {
    /// The route configurations this spec produces
    pub fn effective_route_configs(&self) -> Vec<RouteConfig> {
        vec![RouteConfig {
            name: self.route_config_name.clone(),
            virtual_hosts: self.virtual_hosts.clone(),
        }]
    }

    /// The listener this spec produces, with a chain synthesized from the
    /// auth filters when none is declared
    pub fn effective_listener(&self) -> ListenerConfig {
        let mut listener = self.listener.clone();
        if listener.filter_chains.is_empty() {
            listener.filter_chains.push(FilterChainConfig {
                name: None,
                route_config_name: self.route_config_name.clone(),
                http_filters: self.auth_filter_entries(),
            });
        }
        listener
    }

    fn auth_filter_entries(&self) -> Vec<HttpFilterConfigEntry> {
        let mut entries = Vec::new();
        if let Some(basic_auth) = &self.auth.basic_auth {
            entries.push(HttpFilterConfigEntry {
                name: None,
                is_optional: false,
                filter: HttpFilterKind::BasicAuth(basic_auth.clone()),
            });
        }
        if let Some(oauth2) = &self.auth.oauth2 {
            entries.push(HttpFilterConfigEntry {
                name: None,
                is_optional: false,
                filter: HttpFilterKind::OAuth2(oauth2.clone()),
            });
        }
        entries
    }

    /// Check that every name reference points at a resource in this spec.
    ///
    /// Nothing here touches wire bytes; these are exactly the dangling
    /// references the proxy would otherwise reject (or worse, blackhole
    /// traffic on) after the snapshot ships.
    pub fn check_references(&self) -> Result<()> {
        let cluster_names: HashSet<&str> =
            self.clusters.iter().map(|c| c.name.as_str()).collect();

        let route_configs = self.effective_route_configs();
        for route_config in &route_configs {
            for (cluster, route) in route_config.referenced_clusters() {
                if !cluster_names.contains(cluster.as_str()) {
                    return Err(Error::reference_in(
                        "cluster",
                        cluster,
                        format!("route {} in '{}'", route, route_config.name),
                    ));
                }
            }
        }

        if let Some(oauth2) = &self.auth.oauth2 {
            let cluster = oauth2.referenced_cluster();
            if !cluster_names.contains(cluster) {
                return Err(Error::reference_in(
                    "cluster",
                    cluster.to_string(),
                    "oauth2 token endpoint",
                ));
            }
        }

        let route_config_names: HashSet<&str> =
            route_configs.iter().map(|rc| rc.name.as_str()).collect();
        let listener = self.effective_listener();
        let chain_refs = listener.referenced_route_configs();
        for (route_name, chain) in &chain_refs {
            if !route_config_names.contains(route_name.as_str()) {
                return Err(Error::reference_in(
                    "route configuration",
                    route_name.clone(),
                    format!("filter chain {}", chain),
                ));
            }
        }

        // A route configuration is served through exactly one chain; two
        // chains sharing a table would make RDS updates ambiguous
        for route_config in &route_configs {
            let chains = chain_refs.iter().filter(|(name, _)| *name == route_config.name).count();
            if chains == 0 {
                return Err(Error::structural_for(
                    route_config.name.clone(),
                    "route configuration is not referenced by any filter chain",
                ));
            }
            if chains > 1 {
                return Err(Error::structural_for(
                    route_config.name.clone(),
                    "route configuration is referenced by more than one filter chain",
                ));
            }
        }

        let filter_names = listener.http_filter_names();
        for route_config in &route_configs {
            for (key, route) in route_config.override_keys() {
                if !filter_names.contains(&key) {
                    return Err(Error::reference_in(
                        "filter",
                        key,
                        format!("override on route {}", route),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Lifecycle of a snapshot between assembly and the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPhase {
    Built,
    Validated,
    Published,
    Rejected,
}

/// A complete, node-scoped set of built resources
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    node_id: String,
    resources: BTreeMap<ResourceKind, Vec<BuiltResource>>,
    phase: SnapshotPhase,
}

impl Snapshot {
    fn new(node_id: String, resources: BTreeMap<ResourceKind, Vec<BuiltResource>>) -> Self {
        Self { node_id, resources, phase: SnapshotPhase::Built }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn phase(&self) -> SnapshotPhase {
        self.phase
    }

    pub fn resources(&self, kind: ResourceKind) -> &[BuiltResource] {
        self.resources.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn resource_names(&self, kind: ResourceKind) -> Vec<&str> {
        self.resources(kind).iter().map(|r| r.name.as_str()).collect()
    }

    pub fn total_resources(&self) -> usize {
        self.resources.values().map(Vec::len).sum()
    }

    fn mark_validated(&mut self) {
        self.phase = SnapshotPhase::Validated;
    }

    fn mark_rejected(&mut self) {
        self.phase = SnapshotPhase::Rejected;
    }

    fn mark_published(&mut self) {
        self.phase = SnapshotPhase::Published;
    }
}

/// Outcome of a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub node_id: String,
    pub version: u64,
}

/// Builds snapshots from a gateway spec and hands them to the cache
pub struct SnapshotAssembler {
    spec: GatewaySpec,
    cache: Arc<SnapshotCache>,
}

impl SnapshotAssembler {
    pub fn new(spec: GatewaySpec, cache: Arc<SnapshotCache>) -> Self {
        Self { spec, cache }
    }

    pub fn spec(&self) -> &GatewaySpec {
        &self.spec
    }

    /// Build and validate a snapshot for `node_id`.
    ///
    /// Identical specs assemble to byte-identical resources; the version is
    /// assigned later, by the cache at commit.
    pub fn assemble(&self, node_id: &str) -> Result<Snapshot> {
        let span = crate::xds_span!("assemble", node_id);
        let _guard = span.enter();

        let clusters = build_clusters(&self.spec.clusters)?;
        let route_configs = build_route_configs(&self.spec.effective_route_configs())?;
        let listeners = build_listeners(&[self.spec.effective_listener()])?;

        let mut resources = BTreeMap::new();
        resources.insert(ResourceKind::Cluster, clusters);
        resources.insert(ResourceKind::RouteConfiguration, route_configs);
        resources.insert(ResourceKind::Listener, listeners);

        let mut snapshot = Snapshot::new(node_id.to_string(), resources);

        if let Err(err) = self.spec.check_references() {
            snapshot.mark_rejected();
            warn!(node_id = %node_id, error = %err, "Snapshot rejected");
            return Err(err);
        }
        snapshot.mark_validated();

        info!(
            node_id = %node_id,
            clusters = snapshot.resources(ResourceKind::Cluster).len(),
            route_configs = snapshot.resources(ResourceKind::RouteConfiguration).len(),
            listeners = snapshot.resources(ResourceKind::Listener).len(),
            "Assembled snapshot"
        );

        Ok(snapshot)
    }

    /// Commit a validated snapshot to the cache.
    pub fn publish(&self, mut snapshot: Snapshot) -> Result<PublishReceipt> {
        let span = crate::xds_span!("publish", snapshot.node_id());
        let _guard = span.enter();

        if snapshot.phase() != SnapshotPhase::Validated {
            return Err(Error::publish(format!(
                "snapshot for node '{}' is {:?}, only validated snapshots can be published",
                snapshot.node_id(),
                snapshot.phase()
            )));
        }

        let node_id = snapshot.node_id.clone();
        let mut txn = self.cache.begin_publish(&node_id)?;
        for kind in ResourceKind::all() {
            txn.update(kind, snapshot.resources(kind).to_vec())?;
        }
        let version = txn.commit();
        snapshot.mark_published();

        info!(
            node_id = %node_id,
            version,
            resources = snapshot.total_resources(),
            "Published snapshot"
        );

        Ok(PublishReceipt { node_id, version })
    }

    /// Assemble and publish in one step. Used at startup, where a bad spec
    /// must stop the process before the server starts.
    pub fn assemble_and_publish(&self, node_id: &str) -> Result<PublishReceipt> {
        let snapshot = self.assemble(node_id)?;
        self.publish(snapshot)
    }
}
