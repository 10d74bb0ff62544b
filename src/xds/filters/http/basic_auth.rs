//! Envoy basic auth HTTP filter configuration
//!
//! Models the `envoy.extensions.filters.http.basic_auth.v3.BasicAuth` filter.
//! Credentials use the htpasswd format; Envoy only accepts `{SHA}` entries.

use envoy_types::pb::envoy::config::core::v3::{data_source, DataSource};
use envoy_types::pb::envoy::extensions::filters::http::basic_auth::v3::BasicAuth;
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use serde::{Deserialize, Serialize};

use crate::xds::filters::{any_from_message, invalid_config};

pub const BASIC_AUTH_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.basic_auth.v3.BasicAuth";

/// Where the htpasswd credentials come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// htpasswd content carried inline in the snapshot
    Inline { contents: String },
    /// htpasswd file read by the proxy at runtime
    File { path: String },
}

/// Gateway spec representation of the basic auth filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    pub users: CredentialSource,
    /// Header receiving the authenticated username on success
    #[serde(default)]
    pub forward_username_header: Option<String>,
}

impl BasicAuthConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match &self.users {
            CredentialSource::Inline { contents } => validate_htpasswd(contents),
            CredentialSource::File { path } => {
                if path.is_empty() {
                    return Err(invalid_config("basic auth credential file path cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Convert the gateway spec BasicAuthConfig to an envoy-types Any payload
    pub fn to_any(&self) -> Result<EnvoyAny, crate::Error> {
        self.validate()?;

        let specifier = match &self.users {
            CredentialSource::Inline { contents } => {
                data_source::Specifier::InlineString(contents.clone())
            }
            CredentialSource::File { path } => data_source::Specifier::Filename(path.clone()),
        };

        let filter = BasicAuth {
            users: Some(DataSource { specifier: Some(specifier), ..Default::default() }),
            forward_username_header: self.forward_username_header.clone().unwrap_or_default(),
            ..Default::default()
        };

        Ok(any_from_message(BASIC_AUTH_TYPE_URL, &filter))
    }
}

/// Check htpasswd content line by line. Envoy rejects anything that is not
/// `user:{SHA}digest`, so failing here gives a better error than a proxy NACK.
fn validate_htpasswd(contents: &str) -> Result<(), crate::Error> {
    let mut entries = 0usize;

    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (user, hash) = line.split_once(':').ok_or_else(|| {
            invalid_config(format!(
                "basic auth credentials line {} is not in user:hash form",
                number + 1
            ))
        })?;

        if user.is_empty() {
            return Err(invalid_config(format!(
                "basic auth credentials line {} has an empty user name",
                number + 1
            )));
        }

        let digest = hash.strip_prefix("{SHA}").ok_or_else(|| {
            invalid_config(format!(
                "basic auth credentials for '{}' must use the {{SHA}} scheme",
                user
            ))
        })?;

        if digest.is_empty() {
            return Err(invalid_config(format!(
                "basic auth credentials for '{}' have an empty digest",
                user
            )));
        }

        entries += 1;
    }

    if entries == 0 {
        return Err(invalid_config("basic auth credentials contain no users"));
    }

    Ok(())
}
