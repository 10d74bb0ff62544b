//! # Edgeplane
//!
//! Edgeplane is a file-driven Envoy control plane: it assembles a declarative
//! gateway definition into versioned, per-node xDS snapshots and serves them
//! to Envoy proxies over state-of-the-world ADS.
//!
//! ## Architecture
//!
//! ```text
//! Gateway Spec (TOML) → Snapshot Assembler → Snapshot Cache → ADS gRPC Server → Envoy
//!        ↓                      ↓                   ↓
//!   Validation          Reference Checks     Versioned Publish
//! ```
//!
//! ## Core Components
//!
//! - **Gateway Spec**: Declarative listeners, routes, clusters, and HTTP auth filters
//! - **Snapshot Assembler**: Builds protobuf resources and validates cross-references
//! - **Snapshot Cache**: Per-node versioned store with atomic publish transactions
//! - **ADS Server**: Tonic-based gRPC server implementing Envoy's discovery protocol
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use edgeplane::xds::{GatewaySpec, SnapshotAssembler, SnapshotCache};
//! use std::sync::Arc;
//!
//! fn main() -> edgeplane::Result<()> {
//!     let cache = Arc::new(SnapshotCache::new());
//!     let assembler = SnapshotAssembler::new(GatewaySpec::default(), Arc::clone(&cache));
//!     let receipt = assembler.assemble_and_publish("test")?;
//!     println!("published snapshot version {}", receipt.version);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod errors;
pub mod observability;
pub mod utils;
pub mod xds;

// Re-export commonly used types
pub use config::Settings;
pub use errors::{Error, Result};
pub use observability::init_tracing;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
