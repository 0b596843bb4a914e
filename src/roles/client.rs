//! Buyer client role
//!
//! Publishes time-boxed requests over topics, forcing delivery to the
//! configured direct peers (typically the relay servers it dials).

use crate::overlay::{
    DirectPeer, Outbound, RelayOverlay, RelayOverlayBuilder, Role,
};
use crate::roles::error::{RoleError, RoleResult};
use crate::window::MarketRequest;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Configuration for a buyer client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Unique identifier for this client
    pub node_id: String,

    /// Relay peers always targeted by publishes; required non-empty
    pub direct_peers: Vec<DirectPeer>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            direct_peers: Vec::new(),
        }
    }
}

/// A buyer client publishing requests into the marketplace
pub struct MarketClient {
    overlay: Arc<RelayOverlay>,
}

impl MarketClient {
    pub fn new(config: ClientConfig) -> RoleResult<Self> {
        if config.direct_peers.is_empty() {
            return Err(RoleError::Configuration(
                "client role requires at least one direct peer".to_string(),
            ));
        }

        let overlay = RelayOverlayBuilder::new(Role::Client)
            .node_id(config.node_id)
            .direct_peers(config.direct_peers)
            .build()?;

        Ok(Self {
            overlay: Arc::new(overlay),
        })
    }

    /// Bind the transport send primitive
    pub fn start(&self, transport: mpsc::Sender<Outbound>) {
        self.overlay.start(transport);
    }

    pub fn stop(&self) {
        self.overlay.stop();
    }

    /// Publish a request on a topic.
    ///
    /// Fire-and-forget: the caller observes outcomes only through
    /// downstream event streams.
    pub async fn publish_request(&self, topic: &str, request: &MarketRequest) -> RoleResult<()> {
        let payload = serde_json::to_vec(request)?;
        self.overlay.publish(topic, &payload).await?;
        tracing::debug!(
            client = %self.overlay.node_id(),
            topic,
            request_id = %request.request_id,
            nonce = request.nonce,
            "request published"
        );
        Ok(())
    }

    /// Underlying overlay, for host transport wiring
    pub fn overlay(&self) -> &Arc<RelayOverlay> {
        &self.overlay
    }
}
