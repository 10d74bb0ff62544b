//! Envoy xDS (eXtended Discovery Service) implementation
//!
//! Assembles per-node configuration snapshots from a declarative gateway
//! spec and serves them over state-of-the-world ADS:
//! - CDS (clusters)
//! - RDS (route configurations)
//! - LDS (listeners)

pub mod cache;
pub mod cluster;
pub mod filters;
pub mod listener;
pub mod resources;
pub mod route;
pub mod server;
pub mod snapshot;

pub use cache::{SnapshotCache, SnapshotUpdate};
pub use cluster::ClusterConfig;
pub use listener::ListenerConfig;
pub use resources::{BuiltResource, ResourceKind};
pub use route::RouteConfig;
pub use server::{start_xds_server, AdsService};
pub use snapshot::{GatewaySpec, PublishReceipt, Snapshot, SnapshotAssembler, SnapshotPhase};
