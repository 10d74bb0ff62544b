//! Route table construction using envoy-types
//!
//! Typed route configuration and its conversion to the envoy-types protobuf
//! definitions. Routes are matched in declaration order by the proxy, first
//! match wins, so the builder warns about orderings that cannot work (missing
//! trailing catch-all, routes shadowed by an earlier catch-all).

use std::collections::HashMap;

use envoy_types::pb::envoy::config::core::v3::DataSource;
use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, route_action::HostRewriteSpecifier,
    route_action::UpgradeConfig, route_match::PathSpecifier, DirectResponseAction, Route,
    RouteAction, RouteConfiguration, RouteMatch, VirtualHost,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{Error, Result};
use crate::xds::filters::http::FilterOverride;

/// Gateway spec representation of a route configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHostConfig>,
}

/// Gateway spec representation of a virtual host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualHostConfig {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<RouteRule>,
}

/// Gateway spec representation of a route rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    #[serde(default)]
    pub name: Option<String>,
    pub r#match: PathMatch,
    pub action: RouteActionConfig,
    /// Per-filter overrides keyed by the filter's name in the owning chain
    #[serde(default)]
    pub typed_per_filter_config: HashMap<String, FilterOverride>,
}

/// Gateway spec representation of path matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

/// Gateway spec representation of route actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouteActionConfig {
    /// Answer the request inline without contacting an upstream
    DirectResponse {
        status: u32,
        #[serde(default)]
        body: Option<String>,
    },
    /// Proxy the request to a named cluster
    Cluster {
        name: String,
        /// Upstream request timeout in seconds
        #[serde(default)]
        timeout: Option<u64>,
        /// Rewrite the Host header before forwarding
        #[serde(default)]
        host_rewrite: Option<String>,
        /// Protocol upgrade allowed on this route (e.g. "websocket")
        #[serde(default)]
        upgrade: Option<String>,
    },
}

impl RouteConfig {
    /// Validate the route configuration
    pub fn validate_config(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::structural("route configuration name cannot be empty"));
        }
        if !crate::utils::VALID_NAME_REGEX.is_match(&self.name) {
            return Err(Error::structural_for(
                self.name.clone(),
                "route configuration name must be a valid identifier",
            ));
        }
        if self.virtual_hosts.is_empty() {
            return Err(Error::structural_for(
                self.name.clone(),
                "route configuration has no virtual hosts",
            ));
        }

        for vhost in &self.virtual_hosts {
            vhost.validate_config(&self.name)?;
        }

        Ok(())
    }

    /// Convert the gateway spec RouteConfig to an envoy-types RouteConfiguration
    pub fn to_envoy_route_configuration(&self) -> Result<RouteConfiguration> {
        self.validate_config()?;

        let virtual_hosts: Result<Vec<VirtualHost>> =
            self.virtual_hosts.iter().map(|vh| vh.to_envoy_virtual_host()).collect();

        let route_config = RouteConfiguration {
            name: self.name.clone(),
            virtual_hosts: virtual_hosts?,
            ..Default::default()
        };

        Ok(route_config)
    }

    /// Cluster names referenced by proxy actions, with the referencing route
    /// (for error context)
    pub fn referenced_clusters(&self) -> Vec<(String, String)> {
        let mut refs = Vec::new();
        for vhost in &self.virtual_hosts {
            for route in &vhost.routes {
                if let RouteActionConfig::Cluster { name, .. } = &route.action {
                    refs.push((name.clone(), route.describe()));
                }
            }
        }
        refs
    }

    /// Filter names used as per-route override keys, with the declaring route
    pub fn override_keys(&self) -> Vec<(String, String)> {
        let mut keys = Vec::new();
        for vhost in &self.virtual_hosts {
            for route in &vhost.routes {
                for key in route.typed_per_filter_config.keys() {
                    keys.push((key.clone(), route.describe()));
                }
            }
        }
        keys
    }
}

impl VirtualHostConfig {
    fn validate_config(&self, route_config_name: &str) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::structural_for(
                route_config_name.to_string(),
                "virtual host name cannot be empty",
            ));
        }
        if self.domains.is_empty() {
            return Err(Error::structural_for(
                self.name.clone(),
                "virtual host has no domains to match",
            ));
        }

        for route in &self.routes {
            route.validate_config(&self.name)?;
        }

        self.warn_on_broken_ordering();

        Ok(())
    }

    /// First match wins: a trailing catch-all is expected, and nothing may
    /// follow one
    fn warn_on_broken_ordering(&self) {
        let catch_all_at = self
            .routes
            .iter()
            .position(|route| matches!(&route.r#match, PathMatch::Prefix(p) if p == "/"));

        match catch_all_at {
            None => {
                warn!(
                    virtual_host = %self.name,
                    "No catch-all route (prefix \"/\") declared; unmatched requests will fail routing"
                );
            }
            Some(index) if index + 1 < self.routes.len() => {
                warn!(
                    virtual_host = %self.name,
                    unreachable = self.routes.len() - index - 1,
                    "Routes declared after the catch-all route are unreachable"
                );
            }
            Some(_) => {}
        }
    }

    /// Convert the gateway spec VirtualHostConfig to an envoy-types VirtualHost
    fn to_envoy_virtual_host(&self) -> Result<VirtualHost> {
        let routes: Result<Vec<Route>> = self.routes.iter().map(|r| r.to_envoy_route()).collect();

        let virtual_host = VirtualHost {
            name: self.name.clone(),
            domains: self.domains.clone(),
            routes: routes?,
            ..Default::default()
        };

        Ok(virtual_host)
    }
}

impl RouteRule {
    fn validate_config(&self, vhost_name: &str) -> Result<()> {
        match &self.r#match {
            PathMatch::Exact(path) | PathMatch::Prefix(path) | PathMatch::Regex(path) => {
                if path.is_empty() {
                    return Err(Error::structural_for(
                        vhost_name.to_string(),
                        format!("route {} has an empty path match", self.describe()),
                    ));
                }
            }
        }

        match &self.action {
            RouteActionConfig::DirectResponse { status, .. } => {
                if !(100..=599).contains(status) {
                    return Err(Error::structural_for(
                        vhost_name.to_string(),
                        format!(
                            "route {} direct response status {} is not a valid HTTP status",
                            self.describe(),
                            status
                        ),
                    ));
                }
            }
            RouteActionConfig::Cluster { name, host_rewrite, upgrade, .. } => {
                if name.is_empty() {
                    return Err(Error::structural_for(
                        vhost_name.to_string(),
                        format!("route {} action names no cluster", self.describe()),
                    ));
                }
                if host_rewrite.as_deref() == Some("") {
                    return Err(Error::structural_for(
                        vhost_name.to_string(),
                        format!("route {} has an empty host rewrite", self.describe()),
                    ));
                }
                if upgrade.as_deref() == Some("") {
                    return Err(Error::structural_for(
                        vhost_name.to_string(),
                        format!("route {} has an empty upgrade type", self.describe()),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Short label for log and error messages
    pub fn describe(&self) -> String {
        match (&self.name, &self.r#match) {
            (Some(name), _) => format!("'{}'", name),
            (None, PathMatch::Exact(p)) => format!("'{}'", p),
            (None, PathMatch::Prefix(p)) => format!("'{}'", p),
            (None, PathMatch::Regex(p)) => format!("'~{}'", p),
        }
    }

    /// Convert the gateway spec RouteRule to an envoy-types Route
    fn to_envoy_route(&self) -> Result<Route> {
        let mut route = Route {
            name: self.name.clone().unwrap_or_default(),
            r#match: Some(self.to_envoy_route_match()),
            action: Some(self.action.to_envoy_route_action()),
            ..Default::default()
        };

        if !self.typed_per_filter_config.is_empty() {
            route.typed_per_filter_config = self
                .typed_per_filter_config
                .iter()
                .map(|(name, config)| config.to_any().map(|any| (name.clone(), any)))
                .collect::<Result<_>>()?;
        }

        Ok(route)
    }

    fn to_envoy_route_match(&self) -> RouteMatch {
        let path_specifier = match &self.r#match {
            PathMatch::Exact(path) => PathSpecifier::Path(path.clone()),
            PathMatch::Prefix(prefix) => PathSpecifier::Prefix(prefix.clone()),
            PathMatch::Regex(regex) => PathSpecifier::SafeRegex(
                envoy_types::pb::envoy::r#type::matcher::v3::RegexMatcher {
                    regex: regex.clone(),
                    ..Default::default()
                },
            ),
        };

        RouteMatch { path_specifier: Some(path_specifier), ..Default::default() }
    }
}

impl RouteActionConfig {
    /// Convert the gateway spec RouteActionConfig to an envoy-types route action
    fn to_envoy_route_action(&self) -> Action {
        match self {
            RouteActionConfig::DirectResponse { status, body } => {
                Action::DirectResponse(DirectResponseAction {
                    status: *status,
                    body: body.as_ref().map(|text| DataSource {
                        specifier: Some(
                            envoy_types::pb::envoy::config::core::v3::data_source::Specifier::InlineString(
                                text.clone(),
                            ),
                        ),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
            }
            RouteActionConfig::Cluster { name, timeout, host_rewrite, upgrade } => {
                let route_action = RouteAction {
                    cluster_specifier: Some(ClusterSpecifier::Cluster(name.clone())),
                    timeout: timeout.map(|t| envoy_types::pb::google::protobuf::Duration {
                        seconds: t as i64,
                        nanos: 0,
                    }),
                    host_rewrite_specifier: host_rewrite
                        .as_ref()
                        .map(|host| HostRewriteSpecifier::HostRewriteLiteral(host.clone())),
                    upgrade_configs: upgrade
                        .as_ref()
                        .map(|upgrade_type| {
                            vec![UpgradeConfig {
                                upgrade_type: upgrade_type.clone(),
                                ..Default::default()
                            }]
                        })
                        .unwrap_or_default(),
                    ..Default::default()
                };

                Action::Route(route_action)
            }
        }
    }
}
