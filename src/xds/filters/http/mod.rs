//! HTTP filter registry and builders
//!
//! This module defines a common configuration model for Envoy HTTP filters and
//! helper functions to convert gateway spec entries into protobuf `HttpFilter`
//! messages. Individual filters (e.g. OAuth2) live in dedicated submodules and
//! register their configuration structs here.

pub mod basic_auth;
pub mod oauth2;

use crate::xds::filters::http::basic_auth::BasicAuthConfig;
use crate::xds::filters::http::oauth2::OAuth2Config;
use crate::xds::filters::{any_from_message, invalid_config};
use envoy_types::pb::envoy::config::route::v3::FilterConfig;
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router as RouterFilter;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::http_filter::ConfigType as HttpFilterConfigType;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use serde::{Deserialize, Serialize};

/// Envoy's canonical router filter name
pub const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";
/// Envoy's canonical basic auth filter name
pub const BASIC_AUTH_FILTER_NAME: &str = "envoy.filters.http.basic_auth";
/// Envoy's canonical OAuth2 filter name
pub const OAUTH2_FILTER_NAME: &str = "envoy.filters.http.oauth2";

const ROUTER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
const FILTER_OVERRIDE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.FilterConfig";

/// Gateway spec representation of an HTTP filter entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpFilterConfigEntry {
    /// Optional override for the filter name used in Envoy configuration
    #[serde(default)]
    pub name: Option<String>,
    /// Whether the filter should be marked optional in Envoy
    #[serde(default)]
    pub is_optional: bool,
    /// Filter type and configuration
    pub filter: HttpFilterKind,
}

impl HttpFilterConfigEntry {
    /// Effective name of the filter in the chain
    pub fn effective_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.filter.default_name().to_string())
    }
}

/// Supported HTTP filter types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HttpFilterKind {
    /// Built-in Envoy router filter
    Router,
    /// Envoy basic auth filter
    BasicAuth(BasicAuthConfig),
    /// Envoy OAuth2 filter
    OAuth2(OAuth2Config),
}

impl HttpFilterKind {
    fn is_router(&self) -> bool {
        matches!(self, Self::Router)
    }

    fn default_name(&self) -> &'static str {
        match self {
            Self::Router => ROUTER_FILTER_NAME,
            Self::BasicAuth(_) => BASIC_AUTH_FILTER_NAME,
            Self::OAuth2(_) => OAUTH2_FILTER_NAME,
        }
    }

    fn to_any(&self) -> Result<EnvoyAny, crate::Error> {
        match self {
            Self::Router => Ok(any_from_message(ROUTER_TYPE_URL, &RouterFilter::default())),
            Self::BasicAuth(cfg) => cfg.to_any(),
            Self::OAuth2(cfg) => cfg.to_any(),
        }
    }
}

/// Per-route override for a filter declared in the owning chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOverride {
    /// Skip the filter entirely on this route
    Disabled,
}

impl FilterOverride {
    /// Convert the override into an Envoy Any payload
    pub fn to_any(&self) -> Result<EnvoyAny, crate::Error> {
        match self {
            Self::Disabled => Ok(any_from_message(
                FILTER_OVERRIDE_TYPE_URL,
                &FilterConfig { disabled: true, ..Default::default() },
            )),
        }
    }
}

/// Build the ordered Envoy HTTP filter list with the router terminal.
///
/// The router must come last because it performs the actual routing; entries
/// declared after it could never run. Rather than silently reordering the
/// chain, a trailing non-router entry fails the build so the author fixes the
/// declaration.
pub fn build_http_filters(
    entries: &[HttpFilterConfigEntry],
) -> Result<Vec<HttpFilter>, crate::Error> {
    let mut filters = Vec::with_capacity(entries.len().max(1));
    let mut router_seen = false;

    for entry in entries {
        let name = entry.effective_name();

        if router_seen {
            return Err(invalid_config(format!(
                "filter '{}' is declared after the router filter and would never run",
                name
            )));
        }

        if entry.filter.is_router() || name == ROUTER_FILTER_NAME {
            router_seen = true;
        }

        let filter = HttpFilter {
            name,
            is_optional: entry.is_optional,
            config_type: Some(HttpFilterConfigType::TypedConfig(entry.filter.to_any()?)),
            ..Default::default()
        };

        filters.push(filter);
    }

    if !router_seen {
        filters.push(default_router_filter());
    }

    Ok(filters)
}

/// Effective filter names of a chain, including the implicit router.
///
/// Per-route override keys are checked against this set.
pub fn filter_names(entries: &[HttpFilterConfigEntry]) -> Vec<String> {
    let mut names: Vec<String> = entries.iter().map(|entry| entry.effective_name()).collect();
    if !names.iter().any(|name| name == ROUTER_FILTER_NAME) {
        names.push(ROUTER_FILTER_NAME.to_string());
    }
    names
}

fn default_router_filter() -> HttpFilter {
    HttpFilter {
        name: ROUTER_FILTER_NAME.to_string(),
        config_type: Some(HttpFilterConfigType::TypedConfig(any_from_message(
            ROUTER_TYPE_URL,
            &RouterFilter::default(),
        ))),
        ..Default::default()
    }
}
