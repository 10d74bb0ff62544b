//! # Configuration Management
//!
//! Environment-driven settings for the edgeplane control plane. Process-wide
//! knobs (node identifier, bind address, log format) come from `EDGEPLANE_*`
//! environment variables; everything describing the gateway itself comes from
//! the TOML spec file this module loads.

mod settings;

pub use settings::{LogSettings, Settings, XdsSettings};
