//! Relay server role
//!
//! Bridges peers that are not simultaneously connected: caches observed
//! traffic, forwards it to subscribed peers, and replays missed messages
//! to peers reconnecting after a gap.

use crate::cache::{MessageCache, Storage};
use crate::overlay::{
    Direction, JsonCacheMeta, Outbound, OverlayStats, RelayOverlay, RelayOverlayBuilder, Role,
};
use crate::roles::error::{RoleError, RoleResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Configuration for a relay server
#[derive(Clone)]
pub struct ServerConfig {
    /// Unique identifier for this server
    pub node_id: String,

    /// Storage collaborator backing the message cache; required
    pub storage: Option<Arc<dyn Storage>>,

    /// Maximum entries retained by the message cache
    pub cache_capacity: usize,

    /// Delay before replaying cached messages to a new inbound peer
    pub replay_delay: Duration,

    /// Interval between heartbeat ticks (cache pruning)
    pub heartbeat_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            storage: None,
            cache_capacity: 4096,
            replay_delay: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// A relay server bridging intermittently-connected peers
pub struct RelayServer {
    overlay: Arc<RelayOverlay>,
    heartbeat_interval: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> RoleResult<Self> {
        let storage = config.storage.ok_or_else(|| {
            RoleError::Configuration("server role requires a storage collaborator".to_string())
        })?;

        let overlay = RelayOverlayBuilder::new(Role::Server)
            .node_id(config.node_id)
            .storage(storage)
            .meta_extractor(Arc::new(JsonCacheMeta))
            .replay_delay(config.replay_delay)
            .build()?;

        Ok(Self {
            overlay: Arc::new(overlay),
            heartbeat_interval: config.heartbeat_interval,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Bind the transport send primitive and start the heartbeat loop
    pub fn start(&self, transport: mpsc::Sender<Outbound>) {
        self.overlay.start(transport);

        let overlay = Arc::clone(&self.overlay);
        let interval = self.heartbeat_interval;
        let ticker = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                overlay.on_heartbeat();
            }
        });
        self.tasks.lock().push(ticker);
    }

    pub fn stop(&self) {
        self.overlay.stop();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Handle a raw frame from a peer
    pub async fn on_receive(&self, from: &str, bytes: Vec<u8>) {
        self.overlay.on_receive(from, bytes).await;
    }

    /// Register a peer reported by the transport
    pub async fn on_peer_added(&self, peer_id: &str, direction: Direction, addr: Option<String>) {
        self.overlay.on_peer_added(peer_id, direction, addr).await;
    }

    /// Drop a peer reported by the transport
    pub async fn on_peer_removed(&self, peer_id: &str) {
        self.overlay.on_peer_removed(peer_id).await;
    }

    /// Periodic maintenance: prunes expired cache entries
    pub fn on_heartbeat(&self) {
        self.overlay.on_heartbeat();
    }

    pub fn stats(&self) -> OverlayStats {
        self.overlay.stats()
    }

    /// The store-and-forward cache
    pub fn cache(&self) -> &Arc<MessageCache> {
        self.overlay.cache().expect("server overlay always has a cache")
    }

    /// Underlying overlay, for host transport wiring
    pub fn overlay(&self) -> &Arc<RelayOverlay> {
        &self.overlay
    }
}
