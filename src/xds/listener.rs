//! Listener construction using envoy-types
//!
//! Listeners here are HTTP ingress listeners: every filter chain carries an
//! HTTP connection manager whose route table is delivered over ADS by route
//! configuration name, never inlined. Keeping routes behind RDS lets a route
//! update reach the proxy without draining the listener.

use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, config_source::ConfigSourceSpecifier, socket_address,
    AggregatedConfigSource, Address, ConfigSource, SocketAddress,
};
use envoy_types::pb::envoy::config::listener::v3::{Filter, FilterChain, Listener};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier},
    HttpConnectionManager, Rds,
};
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use prost::Message;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::xds::filters::http::{build_http_filters, filter_names, HttpFilterConfigEntry};

/// Envoy's canonical HTTP connection manager filter name
pub const HTTP_CONNECTION_MANAGER_NAME: &str = "envoy.filters.network.http_connection_manager";

const HTTP_CONNECTION_MANAGER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";

/// Gateway spec representation of a listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub name: String,
    #[serde(default = "default_bind_address")]
    pub address: String,
    pub port: u32,
    #[serde(default)]
    pub filter_chains: Vec<FilterChainConfig>,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Gateway spec representation of an HTTP filter chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterChainConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Route configuration served over ADS under this name
    pub route_config_name: String,
    #[serde(default)]
    pub http_filters: Vec<HttpFilterConfigEntry>,
}

impl ListenerConfig {
    /// Validate the listener configuration
    pub fn validate_config(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::structural("listener name cannot be empty"));
        }
        if !crate::utils::VALID_NAME_REGEX.is_match(&self.name) {
            return Err(Error::structural_for(
                self.name.clone(),
                "listener name must be a valid identifier",
            ));
        }
        if self.address.is_empty() {
            return Err(Error::structural_for(
                self.name.clone(),
                "listener has no bind address",
            ));
        }
        if self.port == 0 || self.port > 65535 {
            return Err(Error::structural_for(
                self.name.clone(),
                format!("listener port {} is out of range", self.port),
            ));
        }
        if self.filter_chains.is_empty() {
            return Err(Error::structural_for(
                self.name.clone(),
                "listener exposes no filter chains",
            ));
        }

        for chain in &self.filter_chains {
            if chain.route_config_name.is_empty() {
                return Err(Error::structural_for(
                    self.name.clone(),
                    format!("filter chain {} names no route configuration", chain.describe()),
                ));
            }
        }

        Ok(())
    }

    /// Convert the gateway spec ListenerConfig to an envoy-types Listener
    pub fn to_envoy_listener(&self) -> Result<Listener> {
        self.validate_config()?;

        let socket_address = SocketAddress {
            address: self.address.clone(),
            port_specifier: Some(socket_address::PortSpecifier::PortValue(self.port)),
            ..Default::default()
        };

        let address = Address { address: Some(AddressType::SocketAddress(socket_address)) };

        let filter_chains: Result<Vec<FilterChain>> =
            self.filter_chains.iter().map(|fc| fc.to_envoy_filter_chain()).collect();

        let listener = Listener {
            name: self.name.clone(),
            address: Some(address),
            filter_chains: filter_chains?,
            ..Default::default()
        };

        Ok(listener)
    }

    /// Route configuration names referenced by filter chains, with the
    /// referencing chain (for error context)
    pub fn referenced_route_configs(&self) -> Vec<(String, String)> {
        self.filter_chains
            .iter()
            .map(|chain| (chain.route_config_name.clone(), chain.describe()))
            .collect()
    }

    /// Effective filter names across all chains, including implicit routers
    pub fn http_filter_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for chain in &self.filter_chains {
            for name in filter_names(&chain.http_filters) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

impl FilterChainConfig {
    fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("'{}'", name),
            None => format!("for route '{}'", self.route_config_name),
        }
    }

    /// Convert the gateway spec FilterChainConfig to an envoy-types FilterChain
    fn to_envoy_filter_chain(&self) -> Result<FilterChain> {
        let http_filters = build_http_filters(&self.http_filters)?;

        let hcm = HttpConnectionManager {
            codec_type: CodecType::Auto as i32,
            stat_prefix: "ingress_http".to_string(),
            route_specifier: Some(RouteSpecifier::Rds(Rds {
                route_config_name: self.route_config_name.clone(),
                config_source: Some(ConfigSource {
                    config_source_specifier: Some(ConfigSourceSpecifier::Ads(
                        AggregatedConfigSource::default(),
                    )),
                    ..Default::default()
                }),
            })),
            http_filters,
            ..Default::default()
        };

        let typed_config = EnvoyAny {
            type_url: HTTP_CONNECTION_MANAGER_TYPE_URL.to_string(),
            value: hcm.encode_to_vec(),
        };

        let filter_chain = FilterChain {
            name: self.name.clone().unwrap_or_default(),
            filters: vec![Filter {
                name: HTTP_CONNECTION_MANAGER_NAME.to_string(),
                config_type: Some(
                    envoy_types::pb::envoy::config::listener::v3::filter::ConfigType::TypedConfig(
                        typed_config,
                    ),
                ),
            }],
            ..Default::default()
        };

        Ok(filter_chain)
    }
}
