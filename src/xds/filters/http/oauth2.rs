//! Envoy OAuth2 HTTP filter configuration
//!
//! Models the `envoy.extensions.filters.http.oauth2.v3.OAuth2` filter. The
//! client secret and HMAC secret are never inlined in the snapshot; they are
//! referenced by SDS name and delivered out of band from a local SDS file.

use envoy_types::pb::envoy::config::core::v3::{
    config_source::ConfigSourceSpecifier, http_uri::HttpUpstreamType, ConfigSource, HttpUri,
    PathConfigSource,
};
use envoy_types::pb::envoy::config::route::v3::{header_matcher, HeaderMatcher};
use envoy_types::pb::envoy::extensions::filters::http::oauth2::v3::{
    o_auth2_config, o_auth2_credentials, OAuth2, OAuth2Config as OAuth2ConfigProto,
    OAuth2Credentials,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::SdsSecretConfig;
use envoy_types::pb::envoy::r#type::matcher::v3::{
    path_matcher, string_matcher, PathMatcher, StringMatcher,
};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, Duration};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::xds::filters::{any_from_message, invalid_config};

pub const OAUTH2_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.oauth2.v3.OAuth2";

/// Token endpoint of the authorization server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEndpointConfig {
    /// Full token endpoint URI, e.g. `http://keycloak:8080/realms/master/protocol/openid-connect/token`
    pub uri: String,
    /// Cluster the proxy uses to reach the endpoint
    pub cluster: String,
    /// Request timeout in seconds
    #[serde(default = "default_token_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_token_timeout_seconds() -> u64 {
    5
}

/// Secret referenced by SDS name, served from a local SDS config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdsSecretRef {
    pub name: String,
    pub path: String,
}

impl SdsSecretRef {
    fn to_sds_secret_config(&self) -> SdsSecretConfig {
        SdsSecretConfig {
            name: self.name.clone(),
            sds_config: Some(ConfigSource {
                config_source_specifier: Some(ConfigSourceSpecifier::PathConfigSource(
                    PathConfigSource { path: self.path.clone(), ..Default::default() },
                )),
                ..Default::default()
            }),
        }
    }
}

/// OAuth2 client credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2CredentialsConfig {
    pub client_id: String,
    /// Client secret for the token exchange
    pub token_secret: SdsSecretRef,
    /// HMAC secret signing the session cookies
    pub hmac_secret: SdsSecretRef,
}

/// How the client secret is presented to the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    UrlEncodedBody,
    BasicAuth,
}

impl AuthType {
    fn to_proto(self) -> o_auth2_config::AuthType {
        match self {
            AuthType::UrlEncodedBody => o_auth2_config::AuthType::UrlEncodedBody,
            AuthType::BasicAuth => o_auth2_config::AuthType::BasicAuth,
        }
    }
}

/// Header that lets a request bypass the OAuth2 flow when it matches exactly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderExactMatch {
    pub name: String,
    pub value: String,
}

/// Gateway spec representation of the OAuth2 filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Config {
    pub token_endpoint: TokenEndpointConfig,
    /// Authorization endpoint the browser is redirected to
    pub authorization_endpoint: String,
    /// Redirect URI registered with the authorization server; Envoy command
    /// operators such as `%REQ(:authority)%` are allowed here
    pub redirect_uri: String,
    /// Path that completes the flow
    #[serde(default = "default_redirect_path")]
    pub redirect_path: String,
    /// Path that clears the session
    #[serde(default)]
    pub signout_path: Option<String>,
    #[serde(default = "default_auth_scopes")]
    pub auth_scopes: Vec<String>,
    /// Requests matching any of these headers skip the filter entirely
    #[serde(default)]
    pub pass_through_headers: Vec<HeaderExactMatch>,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub forward_bearer_token: bool,
    pub credentials: OAuth2CredentialsConfig,
}

fn default_redirect_path() -> String {
    "/oauth2/callback".to_string()
}

fn default_auth_scopes() -> Vec<String> {
    vec!["openid".to_string(), "profile".to_string(), "email".to_string()]
}

impl OAuth2Config {
    /// Cluster the token endpoint resolves through, for referential checks
    pub fn referenced_cluster(&self) -> &str {
        &self.token_endpoint.cluster
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        Url::parse(&self.token_endpoint.uri).map_err(|err| {
            invalid_config(format!(
                "oauth2 token endpoint '{}' is not a valid URI: {}",
                self.token_endpoint.uri, err
            ))
        })?;
        if self.token_endpoint.cluster.is_empty() {
            return Err(invalid_config("oauth2 token endpoint names no cluster"));
        }
        if self.token_endpoint.timeout_seconds == 0 {
            return Err(invalid_config("oauth2 token endpoint timeout must be at least 1s"));
        }

        Url::parse(&self.authorization_endpoint).map_err(|err| {
            invalid_config(format!(
                "oauth2 authorization endpoint '{}' is not a valid URI: {}",
                self.authorization_endpoint, err
            ))
        })?;

        // redirect_uri may carry command operators, so it only needs to be present
        if self.redirect_uri.is_empty() {
            return Err(invalid_config("oauth2 redirect URI cannot be empty"));
        }
        if self.redirect_path.is_empty() {
            return Err(invalid_config("oauth2 redirect path cannot be empty"));
        }
        if self.signout_path.as_deref() == Some("") {
            return Err(invalid_config("oauth2 signout path cannot be empty"));
        }

        if self.credentials.client_id.is_empty() {
            return Err(invalid_config("oauth2 client id cannot be empty"));
        }
        for (label, secret) in [
            ("token", &self.credentials.token_secret),
            ("hmac", &self.credentials.hmac_secret),
        ] {
            if secret.name.is_empty() {
                return Err(invalid_config(format!("oauth2 {} secret has no SDS name", label)));
            }
            if secret.path.is_empty() {
                return Err(invalid_config(format!(
                    "oauth2 {} secret '{}' has no SDS config path",
                    label, secret.name
                )));
            }
        }

        for header in &self.pass_through_headers {
            if header.name.is_empty() {
                return Err(invalid_config("oauth2 pass-through header has no name"));
            }
        }

        Ok(())
    }

    /// Convert the gateway spec OAuth2Config to an envoy-types Any payload
    pub fn to_any(&self) -> Result<EnvoyAny, crate::Error> {
        self.validate()?;

        let token_endpoint = HttpUri {
            uri: self.token_endpoint.uri.clone(),
            timeout: Some(Duration {
                seconds: self.token_endpoint.timeout_seconds as i64,
                nanos: 0,
            }),
            http_upstream_type: Some(HttpUpstreamType::Cluster(
                self.token_endpoint.cluster.clone(),
            )),
        };

        let credentials = OAuth2Credentials {
            client_id: self.credentials.client_id.clone(),
            token_secret: Some(self.credentials.token_secret.to_sds_secret_config()),
            token_formation: Some(o_auth2_credentials::TokenFormation::HmacSecret(
                self.credentials.hmac_secret.to_sds_secret_config(),
            )),
            ..Default::default()
        };

        let config = OAuth2ConfigProto {
            token_endpoint: Some(token_endpoint),
            authorization_endpoint: self.authorization_endpoint.clone(),
            credentials: Some(credentials),
            redirect_uri: self.redirect_uri.clone(),
            redirect_path_matcher: Some(exact_path_matcher(&self.redirect_path)),
            signout_path: self.signout_path.as_deref().map(exact_path_matcher),
            auth_scopes: self.auth_scopes.clone(),
            pass_through_matcher: self
                .pass_through_headers
                .iter()
                .map(HeaderExactMatch::to_envoy_header_matcher)
                .collect(),
            auth_type: self.auth_type.to_proto() as i32,
            forward_bearer_token: self.forward_bearer_token,
            ..Default::default()
        };

        let filter = OAuth2 { config: Some(config) };
        Ok(any_from_message(OAUTH2_TYPE_URL, &filter))
    }
}

impl HeaderExactMatch {
    fn to_envoy_header_matcher(&self) -> HeaderMatcher {
        HeaderMatcher {
            name: self.name.clone(),
            header_match_specifier: Some(header_matcher::HeaderMatchSpecifier::StringMatch(
                StringMatcher {
                    match_pattern: Some(string_matcher::MatchPattern::Exact(self.value.clone())),
                    ..Default::default()
                },
            )),
            ..Default::default()
        }
    }
}

fn exact_path_matcher(path: &str) -> PathMatcher {
    PathMatcher {
        rule: Some(path_matcher::Rule::Path(StringMatcher {
            match_pattern: Some(string_matcher::MatchPattern::Exact(path.to_string())),
            ..Default::default()
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn demo_config() -> OAuth2Config {
        OAuth2Config {
            token_endpoint: TokenEndpointConfig {
                uri: "http://keycloak:8080/realms/master/protocol/openid-connect/token"
                    .to_string(),
                cluster: "keycloak".to_string(),
                timeout_seconds: 5,
            },
            authorization_endpoint:
                "http://localhost:18083/realms/master/protocol/openid-connect/auth".to_string(),
            redirect_uri: "http://%REQ(:authority)%/oauth/callback".to_string(),
            redirect_path: "/oauth/callback".to_string(),
            signout_path: Some("/oauth/signout".to_string()),
            auth_scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
                "offline_access".to_string(),
            ],
            pass_through_headers: vec![HeaderExactMatch {
                name: "UPGRADE".to_string(),
                value: "websocket".to_string(),
            }],
            auth_type: AuthType::UrlEncodedBody,
            forward_bearer_token: false,
            credentials: OAuth2CredentialsConfig {
                client_id: "test".to_string(),
                token_secret: SdsSecretRef {
                    name: "token".to_string(),
                    path: "/etc/envoy/token-secret.yaml".to_string(),
                },
                hmac_secret: SdsSecretRef {
                    name: "hmac".to_string(),
                    path: "/etc/envoy/hmac-secret.yaml".to_string(),
                },
            },
        }
    }

    fn decode(any: &EnvoyAny) -> OAuth2ConfigProto {
        assert_eq!(any.type_url, OAUTH2_TYPE_URL);
        let filter = OAuth2::decode(any.value.as_slice()).expect("decode OAuth2");
        filter.config.expect("config present")
    }

    #[test]
    fn demo_config_encodes_all_fields() {
        let any = demo_config().to_any().expect("encode");
        let proto = decode(&any);

        let token_endpoint = proto.token_endpoint.expect("token endpoint");
        assert_eq!(
            token_endpoint.uri,
            "http://keycloak:8080/realms/master/protocol/openid-connect/token"
        );
        assert_eq!(
            token_endpoint.http_upstream_type,
            Some(HttpUpstreamType::Cluster("keycloak".to_string()))
        );
        assert_eq!(token_endpoint.timeout.expect("timeout").seconds, 5);

        assert_eq!(
            proto.authorization_endpoint,
            "http://localhost:18083/realms/master/protocol/openid-connect/auth"
        );
        assert_eq!(proto.redirect_uri, "http://%REQ(:authority)%/oauth/callback");
        assert_eq!(proto.auth_scopes, vec!["openid", "profile", "email", "offline_access"]);
        assert!(!proto.forward_bearer_token);

        let redirect = proto.redirect_path_matcher.expect("redirect matcher");
        match redirect.rule.expect("rule") {
            path_matcher::Rule::Path(matcher) => {
                assert_eq!(
                    matcher.match_pattern,
                    Some(string_matcher::MatchPattern::Exact("/oauth/callback".to_string()))
                );
            }
        }

        assert!(proto.signout_path.is_some());
        assert_eq!(proto.pass_through_matcher.len(), 1);
        assert_eq!(proto.pass_through_matcher[0].name, "UPGRADE");
    }

    #[test]
    fn credentials_reference_secrets_by_sds_name() {
        let any = demo_config().to_any().expect("encode");
        let proto = decode(&any);

        let credentials = proto.credentials.expect("credentials");
        assert_eq!(credentials.client_id, "test");

        let token_secret = credentials.token_secret.expect("token secret");
        assert_eq!(token_secret.name, "token");
        let sds_config = token_secret.sds_config.expect("sds config");
        match sds_config.config_source_specifier.expect("specifier") {
            ConfigSourceSpecifier::PathConfigSource(path_source) => {
                assert_eq!(path_source.path, "/etc/envoy/token-secret.yaml");
            }
            other => panic!("expected path config source, got {:?}", other),
        }

        match credentials.token_formation.expect("token formation") {
            o_auth2_credentials::TokenFormation::HmacSecret(hmac) => {
                assert_eq!(hmac.name, "hmac");
            }
        }
    }

    #[test]
    fn missing_client_id_is_rejected() {
        let mut config = demo_config();
        config.credentials.client_id.clear();

        let err = config.to_any().expect_err("must fail");
        assert!(err.to_string().contains("client id"));
    }

    #[test]
    fn invalid_token_endpoint_uri_is_rejected() {
        let mut config = demo_config();
        config.token_endpoint.uri = "not a uri".to_string();

        assert!(config.to_any().is_err());
    }

    #[test]
    fn secret_without_path_is_rejected() {
        let mut config = demo_config();
        config.credentials.hmac_secret.path.clear();

        let err = config.to_any().expect_err("must fail");
        assert!(err.to_string().contains("hmac"));
    }

    #[test]
    fn referenced_cluster_is_the_token_endpoint_cluster() {
        assert_eq!(demo_config().referenced_cluster(), "keycloak");
    }
}
