//! ADS gRPC server
//!
//! State-of-the-world aggregated discovery over the snapshot cache. Each
//! stream serves one proxy: the node id arrives on the first request and
//! scopes every lookup afterwards. Responses carry the node's committed
//! version; commits for that node are pushed to the stream as they happen.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::{
        AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
    },
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};

use crate::config::XdsSettings;
use crate::errors::{Error, Result};
use crate::xds::cache::SnapshotCache;
use crate::xds::resources::ResourceKind;

/// Tracks the last sent version and nonce for ACK/NACK detection
#[derive(Clone, Debug)]
struct LastDiscoverySnapshot {
    version: Arc<str>,
    nonce: Arc<str>,
}

/// Aggregated discovery service backed by the snapshot cache
#[derive(Debug)]
pub struct AdsService {
    cache: Arc<SnapshotCache>,
    default_node_id: String,
}

impl AdsService {
    pub fn new(cache: Arc<SnapshotCache>, default_node_id: impl Into<String>) -> Self {
        Self { cache, default_node_id: default_node_id.into() }
    }
}

/// Build a discovery response from the node's committed snapshot
fn create_resource_response(
    cache: &SnapshotCache,
    node_id: &str,
    type_url: &str,
) -> DiscoveryResponse {
    let version = cache.node_version(node_id).unwrap_or(0);
    let nonce = Uuid::new_v4().to_string();

    let resources = match ResourceKind::from_type_url(type_url) {
        Some(kind) => {
            cache.resources(node_id, kind).into_iter().map(|resource| resource.body).collect()
        }
        None => {
            warn!(type_url = %type_url, node_id = %node_id, "Unknown resource type requested");
            Vec::new()
        }
    };

    DiscoveryResponse {
        version_info: version.to_string(),
        resources,
        type_url: type_url.to_string(),
        nonce,
        ..Default::default()
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AdsService {
    type StreamAggregatedResourcesStream =
        Pin<Box<dyn Stream<Item = std::result::Result<DiscoveryResponse, Status>> + Send>>;
    type DeltaAggregatedResourcesStream =
        Pin<Box<dyn Stream<Item = std::result::Result<DeltaDiscoveryResponse, Status>> + Send>>;

    async fn stream_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        info!("New ADS stream connection established");

        let (tx, rx) = mpsc::channel(100);
        let cache = Arc::clone(&self.cache);
        let default_node_id = self.default_node_id.clone();
        let mut update_rx = self.cache.subscribe();
        let mut in_stream = request.into_inner();

        tokio::spawn(async move {
            let mut node_id: Option<String> = None;
            let mut subscribed: HashSet<String> = HashSet::new();
            let mut last_sent: HashMap<String, LastDiscoverySnapshot> = HashMap::new();

            'stream: loop {
                tokio::select! {
                    result = in_stream.next() => {
                        match result {
                            Some(Ok(discovery_request)) => {
                                // Envoy only attaches the node to the first
                                // request of a stream; remember it
                                if let Some(node) = &discovery_request.node {
                                    if !node.id.is_empty() {
                                        node_id = Some(node.id.clone());
                                    }
                                }
                                let node = node_id.as_deref().unwrap_or(&default_node_id);

                                info!(
                                    type_url = %discovery_request.type_url,
                                    version_info = %discovery_request.version_info,
                                    node_id = %node,
                                    "Received discovery request"
                                );

                                let current_version =
                                    cache.node_version(node).unwrap_or(0).to_string();

                                let is_ack = last_sent
                                    .get(&discovery_request.type_url)
                                    .map(|snapshot| {
                                        !discovery_request.response_nonce.is_empty()
                                            && discovery_request.response_nonce.as_str()
                                                == snapshot.nonce.as_ref()
                                            && discovery_request.version_info.as_str()
                                                == snapshot.version.as_ref()
                                            && discovery_request.error_detail.is_none()
                                            && snapshot.version.as_ref() == current_version
                                    })
                                    .unwrap_or(false);

                                if is_ack {
                                    debug!(
                                        type_url = %discovery_request.type_url,
                                        version = %discovery_request.version_info,
                                        nonce = %discovery_request.response_nonce,
                                        node_id = %node,
                                        "[ACK] Skipping duplicate discovery request"
                                    );
                                    continue;
                                }

                                if let Some(error_detail) = discovery_request.error_detail.as_ref() {
                                    warn!(
                                        type_url = %discovery_request.type_url,
                                        nonce = %discovery_request.response_nonce,
                                        error_code = error_detail.code,
                                        error_message = %error_detail.message,
                                        node_id = %node,
                                        "[NACK] Envoy rejected previous response"
                                    );
                                }

                                subscribed.insert(discovery_request.type_url.clone());

                                let response =
                                    create_resource_response(&cache, node, &discovery_request.type_url);

                                info!(
                                    type_url = %response.type_url,
                                    version = %response.version_info,
                                    nonce = %response.nonce,
                                    resource_count = response.resources.len(),
                                    "Sending discovery response"
                                );

                                last_sent.insert(
                                    response.type_url.clone(),
                                    LastDiscoverySnapshot {
                                        version: Arc::from(response.version_info.clone()),
                                        nonce: Arc::from(response.nonce.clone()),
                                    },
                                );

                                if tx.send(Ok(response)).await.is_err() {
                                    error!("Discovery response receiver dropped");
                                    break 'stream;
                                }
                            }
                            Some(Err(e)) => {
                                warn!("Error receiving discovery request: {}", e);
                                let _ = tx.send(Err(e)).await;
                                break 'stream;
                            }
                            None => {
                                info!("ADS stream ended by client");
                                break 'stream;
                            }
                        }
                    }
                    update = update_rx.recv() => {
                        match update {
                            Ok(update) => {
                                let node = node_id.as_deref().unwrap_or(&default_node_id);
                                if update.node_id != node {
                                    continue;
                                }

                                for kind in &update.kinds {
                                    let type_url = kind.type_url();
                                    if !subscribed.contains(type_url) {
                                        continue;
                                    }

                                    let response =
                                        create_resource_response(&cache, node, type_url);

                                    info!(
                                        type_url = %response.type_url,
                                        version = %response.version_info,
                                        resource_count = response.resources.len(),
                                        node_id = %node,
                                        "Pushing snapshot update"
                                    );

                                    last_sent.insert(
                                        response.type_url.clone(),
                                        LastDiscoverySnapshot {
                                            version: Arc::from(response.version_info.clone()),
                                            nonce: Arc::from(response.nonce.clone()),
                                        },
                                    );

                                    if tx.send(Ok(response)).await.is_err() {
                                        error!("Discovery response receiver dropped");
                                        break 'stream;
                                    }
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "Missed {} update notifications", skipped);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                                warn!("Update notification channel closed");
                                break 'stream;
                            }
                        }
                    }
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Err(Status::unimplemented("delta xDS is not supported; use state-of-the-world ADS"))
    }
}

/// Start the xDS gRPC server with graceful shutdown
pub async fn start_xds_server<F>(
    config: &XdsSettings,
    cache: Arc<SnapshotCache>,
    shutdown_signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .map_err(|e| Error::config(format!("Invalid xDS address: {}", e)))?;

    let ads_service = AdsService::new(cache, config.node_id.clone());

    info!(address = %addr, node_id = %config.node_id, "Starting xDS server");

    Server::builder()
        .add_service(AggregatedDiscoveryServiceServer::new(ads_service))
        .serve_with_shutdown(addr, shutdown_signal)
        .await
        .map_err(|e| {
            let error_msg = e.to_string();
            if error_msg.contains("Address already in use") || error_msg.contains("bind") {
                Error::transport(format!(
                    "xDS server failed to bind to {}: port {} is already in use",
                    addr,
                    addr.port()
                ))
            } else {
                Error::transport(format!("xDS server failed: {}", e))
            }
        })?;

    Ok(())
}
