//! Relay Overlay Module
//!
//! Publish/subscribe layer over an externally-driven peer transport.
//! Delivers published bytes to the peer set selected for a topic and
//! guarantees eventual delivery despite transient disconnects.
//!
//! Key features:
//! - Forced direct-peer delivery in client role
//! - Server-side receive pipeline: auto-subscribe, cache, deliver, forward
//! - Store-and-forward replay to reconnecting inbound peers
//! - Pluggable peer selection strategy and receive hook

pub mod engine;
pub mod error;
pub mod overlay;
pub mod types;

pub use engine::{PeerBook, PeerSelector, ReceiveHook, SubscribedPeers, WithDirectPeers};
pub use error::{OverlayError, OverlayResult};
pub use overlay::{RelayOverlay, RelayOverlayBuilder};
pub use types::{
    CacheMeta, CacheMetaExtractor, DirectPeer, Direction, Frame, JsonCacheMeta, MessageEnvelope,
    Outbound, OverlayConfig, OverlayEvent, OverlayStats, PeerInfo, Role,
};
