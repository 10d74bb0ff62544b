//! Built xDS resources and their type URLs
//!
//! A built resource is a named, protobuf-encoded Envoy resource ready to be
//! placed in a snapshot. Building is where typed gateway configuration turns
//! into wire bytes; everything after this point works on `Any` payloads.

use std::collections::HashSet;

use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use tracing::info;

use crate::errors::{Error, Result};
use crate::xds::cluster::ClusterConfig;
use crate::xds::listener::ListenerConfig;
use crate::xds::route::RouteConfig;

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";

/// The xDS resource kinds this control plane serves.
///
/// Ordering follows the update sequence the proxy expects: clusters become
/// known before the route tables that reference them, and listeners come last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Cluster,
    RouteConfiguration,
    Listener,
}

impl ResourceKind {
    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => CLUSTER_TYPE_URL,
            ResourceKind::RouteConfiguration => ROUTE_TYPE_URL,
            ResourceKind::Listener => LISTENER_TYPE_URL,
        }
    }

    pub fn from_type_url(type_url: &str) -> Option<Self> {
        match type_url {
            CLUSTER_TYPE_URL => Some(ResourceKind::Cluster),
            ROUTE_TYPE_URL => Some(ResourceKind::RouteConfiguration),
            LISTENER_TYPE_URL => Some(ResourceKind::Listener),
            _ => None,
        }
    }

    pub fn all() -> [ResourceKind; 3] {
        [ResourceKind::Cluster, ResourceKind::RouteConfiguration, ResourceKind::Listener]
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ResourceKind::Cluster => "cluster",
            ResourceKind::RouteConfiguration => "route configuration",
            ResourceKind::Listener => "listener",
        };
        f.write_str(label)
    }
}

/// Wrapper for a built Envoy resource along with its name.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltResource {
    pub name: String,
    pub resource: Any,
}

impl BuiltResource {
    pub fn into_any(self) -> Any {
        self.resource
    }

    pub fn type_url(&self) -> &str {
        &self.resource.type_url
    }
}

/// Build cluster resources from gateway spec cluster configs
pub fn build_clusters(configs: &[ClusterConfig]) -> Result<Vec<BuiltResource>> {
    check_unique_names(ResourceKind::Cluster, configs.iter().map(|c| c.name.as_str()))?;

    let mut built = Vec::with_capacity(configs.len());
    for config in configs {
        let cluster = config.to_envoy_cluster()?;
        let encoded = cluster.encode_to_vec();
        info!(resource = %cluster.name, bytes = encoded.len(), "Built cluster resource");

        built.push(BuiltResource {
            name: cluster.name,
            resource: Any { type_url: CLUSTER_TYPE_URL.to_string(), value: encoded },
        });
    }

    Ok(built)
}

/// Build route configuration resources from gateway spec route configs
pub fn build_route_configs(configs: &[RouteConfig]) -> Result<Vec<BuiltResource>> {
    check_unique_names(
        ResourceKind::RouteConfiguration,
        configs.iter().map(|c| c.name.as_str()),
    )?;

    let mut built = Vec::with_capacity(configs.len());
    for config in configs {
        let route_config = config.to_envoy_route_configuration()?;
        let encoded = route_config.encode_to_vec();
        info!(resource = %route_config.name, bytes = encoded.len(), "Built route resource");

        built.push(BuiltResource {
            name: route_config.name,
            resource: Any { type_url: ROUTE_TYPE_URL.to_string(), value: encoded },
        });
    }

    Ok(built)
}

/// Build listener resources from gateway spec listener configs
pub fn build_listeners(configs: &[ListenerConfig]) -> Result<Vec<BuiltResource>> {
    check_unique_names(ResourceKind::Listener, configs.iter().map(|c| c.name.as_str()))?;

    let mut bound = HashSet::new();
    for config in configs {
        if !bound.insert((config.address.as_str(), config.port)) {
            return Err(Error::structural_for(
                config.name.clone(),
                format!(
                    "duplicate listener bind address {}:{} in snapshot",
                    config.address, config.port
                ),
            ));
        }
    }

    let mut built = Vec::with_capacity(configs.len());
    for config in configs {
        let listener = config.to_envoy_listener()?;
        let encoded = listener.encode_to_vec();
        info!(resource = %listener.name, bytes = encoded.len(), "Built listener resource");

        built.push(BuiltResource {
            name: listener.name,
            resource: Any { type_url: LISTENER_TYPE_URL.to_string(), value: encoded },
        });
    }

    Ok(built)
}

fn check_unique_names<'a>(
    kind: ResourceKind,
    names: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(Error::structural_for(
                name.to_string(),
                format!("duplicate {} name in snapshot", kind),
            ));
        }
    }
    Ok(())
}
