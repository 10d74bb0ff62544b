//! Modular filter utilities for Envoy HTTP filters.
//!
//! Filter modules follow a consistent pattern:
//! - High-level Rust configuration structs with serde support
//! - Validation methods ensuring configuration correctness
//! - `to_any()` methods converting to Envoy protobuf `Any` messages

pub mod http;

use envoy_types::pb::google::protobuf::Any;
use prost::Message;

/// Helper for building Envoy `Any` values from prost messages.
pub fn any_from_message<M: Message>(type_url: impl Into<String>, msg: &M) -> Any {
    Any { type_url: type_url.into(), value: msg.encode_to_vec() }
}

/// Error helper for invalid filter configuration.
///
/// Filter configuration problems surface during snapshot structural
/// validation, so they use that error class.
pub fn invalid_config(msg: impl Into<String>) -> crate::Error {
    crate::Error::structural(msg.into())
}
