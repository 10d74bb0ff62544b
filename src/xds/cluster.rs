//! Cluster construction using envoy-types
//!
//! Typed cluster configuration and its conversion to the envoy-types protobuf
//! definitions. Validation here is purely structural; whether anything in the
//! snapshot actually references a cluster is checked by the assembler.

use envoy_types::pb::envoy::config::{
    cluster::v3::{
        cluster::{ClusterDiscoveryType, DiscoveryType, LbPolicy},
        Cluster,
    },
    core::v3::{address::Address as AddressType, Address, SocketAddress},
    endpoint::v3::{ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{Error, Result};

/// Gateway spec representation of a backend cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ClusterConfig {
    #[validate(length(min = 1, message = "Cluster name cannot be empty"))]
    #[validate(regex(
        path = *crate::utils::VALID_NAME_REGEX,
        message = "Cluster name must be a valid identifier"
    ))]
    pub name: String,

    /// How the proxy resolves the endpoint addresses
    #[serde(default)]
    pub discovery: DiscoveryMode,

    #[serde(default)]
    pub lb_policy: LoadBalancingPolicy,

    #[validate(length(min = 1, message = "At least one endpoint is required"))]
    #[validate(nested)]
    pub endpoints: Vec<EndpointConfig>,

    /// Upstream connect timeout in seconds
    #[serde(default)]
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connect timeout must be between 1 and 300 seconds"
    ))]
    pub connect_timeout: Option<u64>,
}

/// Gateway spec representation of one endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EndpointConfig {
    #[validate(length(min = 1, message = "Endpoint address cannot be empty"))]
    pub address: String,

    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u32,
}

/// How cluster membership is discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Endpoints are literal IP addresses
    #[default]
    Static,
    /// Endpoint addresses are hostnames re-resolved via DNS
    StrictDns,
}

/// Load balancing policies supported by the gateway spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingPolicy {
    #[default]
    RoundRobin,
    LeastRequest,
    Random,
}

impl ClusterConfig {
    /// Validate the cluster configuration
    pub fn validate_config(&self) -> Result<()> {
        self.validate().map_err(|e| {
            Error::structural_for(self.name.clone(), format!("cluster validation failed: {}", e))
        })
    }

    /// Convert the gateway spec ClusterConfig to an envoy-types Cluster
    pub fn to_envoy_cluster(&self) -> Result<Cluster> {
        self.validate_config()?;

        let cluster = Cluster {
            name: self.name.clone(),
            cluster_discovery_type: Some(ClusterDiscoveryType::Type(
                self.discovery.to_envoy_discovery_type() as i32,
            )),
            lb_policy: self.lb_policy.to_envoy_lb_policy() as i32,
            load_assignment: Some(self.create_cluster_load_assignment()),
            connect_timeout: self.connect_timeout.map(|t| {
                envoy_types::pb::google::protobuf::Duration { seconds: t as i64, nanos: 0 }
            }),
            ..Default::default()
        };

        Ok(cluster)
    }

    /// Create cluster load assignment from endpoints
    fn create_cluster_load_assignment(&self) -> ClusterLoadAssignment {
        let lb_endpoints: Vec<LbEndpoint> =
            self.endpoints.iter().map(EndpointConfig::to_envoy_lb_endpoint).collect();

        let locality_lb_endpoints = LocalityLbEndpoints { lb_endpoints, ..Default::default() };

        ClusterLoadAssignment {
            // Always the owning cluster's name; a mismatch makes the proxy
            // drop the assignment on the floor.
            cluster_name: self.name.clone(),
            endpoints: vec![locality_lb_endpoints],
            ..Default::default()
        }
    }
}

impl EndpointConfig {
    /// Convert the gateway spec EndpointConfig to an envoy-types LbEndpoint
    fn to_envoy_lb_endpoint(&self) -> LbEndpoint {
        let socket_address = SocketAddress {
            address: self.address.clone(),
            port_specifier: Some(
                envoy_types::pb::envoy::config::core::v3::socket_address::PortSpecifier::PortValue(
                    self.port,
                ),
            ),
            ..Default::default()
        };

        let address = Address { address: Some(AddressType::SocketAddress(socket_address)) };

        let endpoint = Endpoint { address: Some(address), ..Default::default() };

        LbEndpoint {
            host_identifier: Some(
                envoy_types::pb::envoy::config::endpoint::v3::lb_endpoint::HostIdentifier::Endpoint(
                    endpoint,
                ),
            ),
            ..Default::default()
        }
    }
}

impl DiscoveryMode {
    fn to_envoy_discovery_type(self) -> DiscoveryType {
        match self {
            DiscoveryMode::Static => DiscoveryType::Static,
            DiscoveryMode::StrictDns => DiscoveryType::StrictDns,
        }
    }
}

impl LoadBalancingPolicy {
    fn to_envoy_lb_policy(self) -> LbPolicy {
        match self {
            LoadBalancingPolicy::RoundRobin => LbPolicy::RoundRobin,
            LoadBalancingPolicy::LeastRequest => LbPolicy::LeastRequest,
            LoadBalancingPolicy::Random => LbPolicy::Random,
        }
    }
}
