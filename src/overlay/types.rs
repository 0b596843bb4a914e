//! Overlay types and configuration

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Which role an overlay instance plays in the marketplace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Buyer client: publishes requests, forces delivery to direct peers
    Client,

    /// Supplier node: consumes requests, publishes offers
    Node,

    /// Relay server: caches and forwards traffic between the other roles
    Server,
}

/// Connection direction of a peer, as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A connected peer tracked by the overlay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer's unique identifier
    pub peer_id: String,

    /// Connection direction
    pub direction: Direction,

    /// Network address, when the transport reports one
    pub addr: Option<String>,

    /// Unix timestamp of the connect event
    pub connected_at: i64,
}

impl PeerInfo {
    pub fn new(peer_id: impl Into<String>, direction: Direction, addr: Option<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            direction,
            addr,
            connected_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// A peer address always treated as a valid publish target,
/// regardless of observed subscription state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectPeer {
    pub peer_id: String,
    pub addrs: Vec<String>,
}

impl DirectPeer {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            addrs: Vec::new(),
        }
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addrs.push(addr.into());
        self
    }
}

/// Wire frames exchanged between overlay instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    /// Announce interest in a topic
    Subscribe { topic: String },

    /// Withdraw interest in a topic
    Unsubscribe { topic: String },

    /// Application payload published on a topic
    Message { topic: String, payload: Vec<u8> },
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        // Frame variants carry only owned plain data; this cannot fail
        bincode::serialize(self).expect("frame encoding")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// A message in flight: topic, payload, origin, content-derived id
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub topic: String,
    pub payload: Vec<u8>,

    /// Peer the message arrived from; absent for locally published messages
    pub origin: Option<String>,

    /// BLAKE3 hash of the payload, hex-encoded
    pub message_id: String,
}

impl MessageEnvelope {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>, origin: Option<String>) -> Self {
        let message_id = blake3::hash(&payload).to_hex().to_string();
        Self {
            topic: topic.into(),
            payload,
            origin,
            message_id,
        }
    }

    /// A message with no origin peer or an empty payload cannot be cached
    pub fn is_anonymous(&self) -> bool {
        self.origin.is_none() || self.payload.is_empty()
    }
}

/// Expiry and nonce extracted from an opaque payload for caching
#[derive(Debug, Clone, Copy)]
pub struct CacheMeta {
    pub expire: i64,
    pub nonce: u64,
}

/// Extracts cache metadata from raw payload bytes.
///
/// When absent or failing for a given payload, the overlay skips caching
/// that message and the receive pipeline proceeds regardless.
pub trait CacheMetaExtractor: Send + Sync {
    fn extract(&self, raw: &[u8]) -> anyhow::Result<CacheMeta>;
}

/// Standard extractor for JSON payloads carrying `expire` and `nonce` fields
pub struct JsonCacheMeta;

#[derive(Deserialize)]
struct JsonMeta {
    expire: i64,
    #[serde(default)]
    nonce: u64,
}

impl CacheMetaExtractor for JsonCacheMeta {
    fn extract(&self, raw: &[u8]) -> anyhow::Result<CacheMeta> {
        let meta: JsonMeta = serde_json::from_slice(raw)?;
        Ok(CacheMeta {
            expire: meta.expire,
            nonce: meta.nonce,
        })
    }
}

/// An encoded frame addressed to one peer, drained by the host transport
#[derive(Debug, Clone)]
pub struct Outbound {
    pub peer_id: String,
    pub bytes: Vec<u8>,
}

/// Events emitted by the overlay
#[derive(Debug, Clone)]
pub enum OverlayEvent {
    /// Peer registered via `on_peer_added`
    PeerConnected { peer_id: String },

    /// Peer dropped via `on_peer_removed`
    PeerDisconnected { peer_id: String },

    /// Local subscription recorded for a topic
    Subscribed { topic: String },

    /// Message handed to local listeners
    Delivered { envelope: MessageEnvelope },

    /// Cached messages replayed to a reconnecting peer
    Replayed { peer_id: String, count: usize },
}

/// Configuration for a relay overlay instance
#[derive(Clone)]
pub struct OverlayConfig {
    /// Role this instance plays
    pub role: Role,

    /// Unique identifier for this overlay instance
    pub node_id: String,

    /// Fixed delay before replaying cached messages to a new inbound peer,
    /// allowing the peer's own outbound stream to finish establishing
    pub replay_delay: Duration,

    /// Peers always included in publish targets (client role)
    pub direct_peers: Vec<DirectPeer>,

    /// Maximum entries retained by the server-role message cache
    pub cache_capacity: usize,

    /// Payload inspector supplying expiry/nonce for caching (server role)
    pub meta_extractor: Option<Arc<dyn CacheMetaExtractor>>,
}

impl std::fmt::Debug for OverlayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayConfig")
            .field("role", &self.role)
            .field("node_id", &self.node_id)
            .field("replay_delay", &self.replay_delay)
            .field("direct_peers", &self.direct_peers)
            .field("cache_capacity", &self.cache_capacity)
            .field("meta_extractor", &self.meta_extractor.is_some())
            .finish()
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            role: Role::Node,
            node_id: uuid::Uuid::new_v4().to_string(),
            replay_delay: Duration::from_secs(1),
            direct_peers: Vec::new(),
            cache_capacity: 4096,
            meta_extractor: None,
        }
    }
}

/// Statistics for an overlay instance
#[derive(Debug, Clone, Default)]
pub struct OverlayStats {
    /// Messages published locally
    pub published: u64,

    /// Message frames received from peers
    pub received: u64,

    /// Envelopes handed to local listeners
    pub delivered: u64,

    /// Messages re-forwarded to other peers (server role)
    pub forwarded: u64,

    /// Cached messages replayed to reconnecting peers
    pub replayed: u64,

    /// Messages received but not cached (anonymous, no meta, cache fault)
    pub cache_skipped: u64,

    /// Currently connected peers
    pub active_peers: u64,
}

impl std::fmt::Display for OverlayStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Overlay: {} pub, {} recv, {} fwd, {} replayed, {} peers",
            self.published, self.received, self.forwarded, self.replayed, self.active_peers
        )
    }
}
