//! Integration tests for the snapshot assembly pipeline
//!
//! Drives the demo gateway spec through assembly, validation, and publish,
//! then decodes the committed protobuf resources the way Envoy would.

use std::sync::Arc;

use edgeplane::xds::{
    BuiltResource, GatewaySpec, ResourceKind, SnapshotAssembler, SnapshotCache, SnapshotPhase,
};
use edgeplane::Error;
use envoy_types::pb::envoy::config::cluster::v3::{cluster, Cluster};
use envoy_types::pb::envoy::config::core::v3::address;
use envoy_types::pb::envoy::config::listener::v3::{filter, Listener};
use envoy_types::pb::envoy::config::route::v3::{
    route, route_action, FilterConfig, RouteConfiguration,
};
use envoy_types::pb::envoy::extensions::filters::http::basic_auth::v3::BasicAuth;
use envoy_types::pb::envoy::extensions::filters::http::oauth2::v3::OAuth2;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager, HttpConnectionManager,
};
use prost::Message;

const DEMO_SPEC: &str = include_str!("../demos/gateway.toml");

fn demo_spec() -> GatewaySpec {
    toml::from_str(DEMO_SPEC).expect("demo gateway spec parses")
}

fn decode<M: Message + Default>(resource: &BuiltResource) -> M {
    M::decode(resource.resource.value.as_slice()).expect("resource decodes")
}

/// Decode the HTTP connection manager out of the listener's first filter chain
fn decode_hcm(listener: &Listener) -> HttpConnectionManager {
    let chain = listener.filter_chains.first().expect("listener has a filter chain");
    let network_filter = chain.filters.first().expect("chain has a network filter");
    assert_eq!(network_filter.name, "envoy.filters.network.http_connection_manager");

    match network_filter.config_type.as_ref().expect("filter has config") {
        filter::ConfigType::TypedConfig(any) => {
            HttpConnectionManager::decode(any.value.as_slice()).expect("HCM decodes")
        }
        other => panic!("unexpected filter config type: {:?}", other),
    }
}

/// Test that the demo spec assembles into a validated three-kind snapshot
#[test]
fn demo_spec_assembles_and_validates() {
    let cache = Arc::new(SnapshotCache::new());
    let assembler = SnapshotAssembler::new(demo_spec(), cache);

    let snapshot = assembler.assemble("test").expect("demo spec assembles");

    assert_eq!(snapshot.phase(), SnapshotPhase::Validated);
    assert_eq!(snapshot.node_id(), "test");
    assert_eq!(snapshot.resources(ResourceKind::Cluster).len(), 2);
    assert_eq!(snapshot.resources(ResourceKind::RouteConfiguration).len(), 1);
    assert_eq!(snapshot.resources(ResourceKind::Listener).len(), 1);
    assert_eq!(
        snapshot.resource_names(ResourceKind::Cluster),
        vec!["ws_service", "keycloak"]
    );
}

/// Test that the demo listener serves its routes over ADS-backed RDS
#[test]
fn demo_listener_serves_routes_over_rds() {
    let cache = Arc::new(SnapshotCache::new());
    let assembler = SnapshotAssembler::new(demo_spec(), cache);
    let snapshot = assembler.assemble("test").expect("demo spec assembles");

    let listener: Listener = decode(&snapshot.resources(ResourceKind::Listener)[0]);
    assert_eq!(listener.name, "test");

    let address = listener.address.as_ref().and_then(|a| a.address.as_ref());
    match address {
        Some(address::Address::SocketAddress(socket)) => {
            assert_eq!(socket.address, "0.0.0.0");
        }
        other => panic!("unexpected listener address: {:?}", other),
    }

    let hcm = decode_hcm(&listener);
    match hcm.route_specifier.as_ref().expect("HCM names a route source") {
        http_connection_manager::RouteSpecifier::Rds(rds) => {
            assert_eq!(rds.route_config_name, "test-route");
            let config_source = rds.config_source.as_ref().expect("RDS has a config source");
            assert!(config_source.config_source_specifier.is_some());
        }
        other => panic!("expected RDS, got {:?}", other),
    }

    let filter_names: Vec<&str> = hcm.http_filters.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(
        filter_names,
        vec![
            "envoy.filters.http.basic_auth",
            "envoy.filters.http.oauth2",
            "envoy.filters.http.router"
        ]
    );
}

/// Test that per-route overrides land on the right routes with the right payload
#[test]
fn demo_routes_carry_filter_overrides() {
    let cache = Arc::new(SnapshotCache::new());
    let assembler = SnapshotAssembler::new(demo_spec(), cache);
    let snapshot = assembler.assemble("test").expect("demo spec assembles");

    let route_config: RouteConfiguration =
        decode(&snapshot.resources(ResourceKind::RouteConfiguration)[0]);
    assert_eq!(route_config.name, "test-route");

    let vhost = route_config.virtual_hosts.first().expect("route config has a virtual host");
    assert_eq!(vhost.domains, vec!["*"]);
    assert_eq!(vhost.routes.len(), 6);

    let disable_basic = &vhost.routes[0];
    let override_any = disable_basic
        .typed_per_filter_config
        .get("envoy.filters.http.basic_auth")
        .expect("first route disables basic auth");
    let filter_config =
        FilterConfig::decode(override_any.value.as_slice()).expect("override decodes");
    assert!(filter_config.disabled);

    assert!(vhost.routes[1].typed_per_filter_config.contains_key("envoy.filters.http.oauth2"));
    assert!(vhost.routes[4].typed_per_filter_config.is_empty());

    let ws_route = &vhost.routes[4];
    match ws_route.action.as_ref().expect("ws route has an action") {
        route::Action::Route(action) => {
            assert_eq!(
                action.cluster_specifier,
                Some(route_action::ClusterSpecifier::Cluster("ws_service".to_string()))
            );
            assert_eq!(
                action.host_rewrite_specifier,
                Some(route_action::HostRewriteSpecifier::HostRewriteLiteral(
                    "test-crmvoip.asterisk.local".to_string()
                ))
            );
            assert_eq!(action.upgrade_configs.len(), 1);
            assert_eq!(action.upgrade_configs[0].upgrade_type, "websocket");
        }
        other => panic!("expected a cluster route, got {:?}", other),
    }

    match vhost.routes[5].action.as_ref().expect("catch-all has an action") {
        route::Action::DirectResponse(direct) => assert_eq!(direct.status, 200),
        other => panic!("expected a direct response, got {:?}", other),
    }
}

/// Test that the demo clusters resolve upstreams over strict DNS
#[test]
fn demo_clusters_use_strict_dns() {
    let cache = Arc::new(SnapshotCache::new());
    let assembler = SnapshotAssembler::new(demo_spec(), cache);
    let snapshot = assembler.assemble("test").expect("demo spec assembles");

    let ws_cluster: Cluster = decode(&snapshot.resources(ResourceKind::Cluster)[0]);
    assert_eq!(ws_cluster.name, "ws_service");
    assert_eq!(
        ws_cluster.cluster_discovery_type,
        Some(cluster::ClusterDiscoveryType::Type(cluster::DiscoveryType::StrictDns as i32))
    );

    let assignment = ws_cluster.load_assignment.expect("cluster has a load assignment");
    assert_eq!(assignment.cluster_name, "ws_service");
    assert_eq!(assignment.endpoints.len(), 1);
}

/// Test that the OAuth2 filter carries the identity-provider wiring
#[test]
fn demo_oauth2_filter_matches_identity_provider() {
    let cache = Arc::new(SnapshotCache::new());
    let assembler = SnapshotAssembler::new(demo_spec(), cache);
    let snapshot = assembler.assemble("test").expect("demo spec assembles");

    let listener: Listener = decode(&snapshot.resources(ResourceKind::Listener)[0]);
    let hcm = decode_hcm(&listener);

    let oauth2_filter = &hcm.http_filters[1];
    let any = match oauth2_filter.config_type.as_ref().expect("oauth2 filter has config") {
        envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::http_filter::ConfigType::TypedConfig(any) => any,
        other => panic!("unexpected http filter config type: {:?}", other),
    };
    let oauth2 = OAuth2::decode(any.value.as_slice()).expect("oauth2 filter decodes");
    let config = oauth2.config.expect("oauth2 filter has a config");

    let token_endpoint = config.token_endpoint.expect("config names a token endpoint");
    assert_eq!(
        token_endpoint.uri,
        "http://keycloak:8080/realms/master/protocol/openid-connect/token"
    );
    assert_eq!(token_endpoint.timeout.map(|t| t.seconds), Some(5));

    assert_eq!(
        config.authorization_endpoint,
        "http://localhost:18083/realms/master/protocol/openid-connect/auth"
    );
    assert_eq!(config.redirect_uri, "http://%REQ(:authority)%/oauth/callback");
    assert_eq!(config.auth_scopes, ["openid", "profile", "email", "offline_access"]);
    assert_eq!(config.pass_through_matcher.len(), 1);
    assert_eq!(config.pass_through_matcher[0].name, "UPGRADE");

    let credentials = config.credentials.expect("config carries credentials");
    assert_eq!(credentials.client_id, "test");
    assert_eq!(credentials.token_secret.map(|s| s.name), Some("token".to_string()));
}

/// Test that the basic auth filter carries the inline htpasswd users
#[test]
fn demo_basic_auth_filter_carries_inline_users() {
    let cache = Arc::new(SnapshotCache::new());
    let assembler = SnapshotAssembler::new(demo_spec(), cache);
    let snapshot = assembler.assemble("test").expect("demo spec assembles");

    let listener: Listener = decode(&snapshot.resources(ResourceKind::Listener)[0]);
    let hcm = decode_hcm(&listener);

    let basic_auth_filter = &hcm.http_filters[0];
    let any = match basic_auth_filter.config_type.as_ref().expect("basic auth filter has config") {
        envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::http_filter::ConfigType::TypedConfig(any) => any,
        other => panic!("unexpected http filter config type: {:?}", other),
    };
    let basic_auth = BasicAuth::decode(any.value.as_slice()).expect("basic auth filter decodes");

    let users = basic_auth.users.expect("filter carries users");
    match users.specifier.expect("users have a specifier") {
        envoy_types::pb::envoy::config::core::v3::data_source::Specifier::InlineString(text) => {
            assert!(text.contains("user:{SHA}"));
        }
        other => panic!("expected inline users, got {:?}", other),
    }
}

/// Test that publishing lands resources in the cache and notifies subscribers
#[test]
fn published_snapshot_is_visible_to_subscribers() {
    let cache = Arc::new(SnapshotCache::new());
    let assembler = SnapshotAssembler::new(demo_spec(), Arc::clone(&cache));
    let mut update_rx = cache.subscribe();

    let receipt = assembler.assemble_and_publish("test").expect("demo spec publishes");
    assert_eq!(receipt.node_id, "test");
    assert_eq!(receipt.version, 2);

    let update = update_rx.try_recv().expect("publish notifies subscribers");
    assert_eq!(update.node_id, "test");
    assert_eq!(update.version, 2);
    assert_eq!(update.kinds.len(), 3);

    assert_eq!(cache.node_version("test"), Some(2));
    assert_eq!(cache.resources("test", ResourceKind::Listener).len(), 1);
    assert_eq!(cache.resources("test", ResourceKind::Cluster).len(), 2);
}

/// Test that republishing the same spec yields a new version
#[test]
fn republishing_bumps_the_node_version() {
    let cache = Arc::new(SnapshotCache::new());
    let assembler = SnapshotAssembler::new(demo_spec(), Arc::clone(&cache));

    let first = assembler.assemble_and_publish("test").expect("first publish");
    let second = assembler.assemble_and_publish("test").expect("second publish");

    assert!(second.version > first.version);
    assert_eq!(cache.node_version("test"), Some(second.version));
}

/// Test that assembling the same spec twice produces identical snapshots
#[test]
fn assembly_is_deterministic_for_the_demo_spec() {
    let cache = Arc::new(SnapshotCache::new());
    let assembler = SnapshotAssembler::new(demo_spec(), cache);

    let first = assembler.assemble("test").expect("first assembly");
    let second = assembler.assemble("test").expect("second assembly");

    assert_eq!(first, second);
}

/// Test that a route to a missing cluster rejects the whole snapshot
#[test]
fn route_to_unknown_cluster_rejects_the_snapshot() {
    let mut spec = demo_spec();
    spec.clusters.retain(|c| c.name != "ws_service");

    let cache = Arc::new(SnapshotCache::new());
    let assembler = SnapshotAssembler::new(spec, Arc::clone(&cache));

    let err = assembler.assemble("test").expect_err("dangling cluster must reject");
    assert!(matches!(err, Error::Reference { .. }), "unexpected error: {:?}", err);

    // Nothing may leak into the cache from a rejected snapshot
    assert_eq!(cache.node_version("test"), None);
}

/// Test that a rejected re-assembly leaves the previously published snapshot serving
#[test]
fn rejected_update_keeps_the_previous_snapshot() {
    let cache = Arc::new(SnapshotCache::new());

    let good = SnapshotAssembler::new(demo_spec(), Arc::clone(&cache));
    let receipt = good.assemble_and_publish("test").expect("initial publish");

    let mut broken_spec = demo_spec();
    broken_spec.clusters.clear();
    let broken = SnapshotAssembler::new(broken_spec, Arc::clone(&cache));
    assert!(broken.assemble("test").is_err());

    assert_eq!(cache.node_version("test"), Some(receipt.version));
    assert_eq!(cache.resources("test", ResourceKind::Cluster).len(), 2);
}

/// Test that a declared chain with a filter after the router fails assembly
#[test]
fn declared_chain_with_trailing_filter_is_rejected() {
    use edgeplane::xds::filters::http::{HttpFilterConfigEntry, HttpFilterKind};
    use edgeplane::xds::listener::FilterChainConfig;

    let mut spec = demo_spec();
    spec.listener.filter_chains = vec![FilterChainConfig {
        name: None,
        route_config_name: "test-route".to_string(),
        http_filters: vec![
            HttpFilterConfigEntry { name: None, is_optional: false, filter: HttpFilterKind::Router },
            HttpFilterConfigEntry {
                name: None,
                is_optional: false,
                filter: HttpFilterKind::BasicAuth(
                    spec.auth.basic_auth.clone().expect("demo spec has basic auth"),
                ),
            },
        ],
    }];

    let cache = Arc::new(SnapshotCache::new());
    let assembler = SnapshotAssembler::new(spec, cache);

    let err = assembler.assemble("test").expect_err("trailing filter must fail");
    assert!(matches!(err, Error::Structural { .. }), "unexpected error: {:?}", err);
}

/// Test that the built-in default gateway publishes without a spec file
#[test]
fn default_gateway_publishes_out_of_the_box() {
    let cache = Arc::new(SnapshotCache::new());
    let assembler = SnapshotAssembler::new(GatewaySpec::default(), Arc::clone(&cache));

    let receipt = assembler.assemble_and_publish("test").expect("default spec publishes");

    assert_eq!(receipt.version, 2);
    assert_eq!(cache.resources("test", ResourceKind::Listener).len(), 1);
    assert_eq!(cache.resources("test", ResourceKind::RouteConfiguration).len(), 1);
    assert!(cache.resources("test", ResourceKind::Cluster).is_empty());
}
