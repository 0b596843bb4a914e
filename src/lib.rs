//! MarketMesh — coordination layer for a decentralized request/offer
//! marketplace.
//!
//! Buyer clients publish time-boxed requests over topics, supplier nodes
//! answer with offers, and a relay server bridges peers that are not
//! always simultaneously connected. The crate provides:
//!
//! - [`overlay`] — the pub/sub relay: peer bookkeeping, forced direct-peer
//!   delivery, receive pipeline, replay-on-reconnect
//! - [`cache`] — the bounded, expiry-driven store-and-forward buffer
//! - [`window`] — per-request-id deduplication with nonce-based
//!   supersession and delayed emission
//! - [`roles`] — client / node / server composition
//! - [`metrics`] — counters and gauges for relay and window health
//!
//! The underlying transport stays external: the host drives
//! `on_peer_added` / `on_peer_removed` / `on_receive` / `on_heartbeat`
//! from its connection events and drains the outbound channel bound at
//! `start()`.

pub mod cache;
pub mod metrics;
pub mod overlay;
pub mod roles;
pub mod window;

pub use cache::{MemoryStorage, MessageCache, Storage};
pub use overlay::{
    DirectPeer, Direction, MessageEnvelope, Outbound, OverlayEvent, RelayOverlay,
    RelayOverlayBuilder, Role,
};
pub use roles::{ClientConfig, MarketClient, NodeConfig, RelayServer, ServerConfig, SupplierNode};
pub use window::{MarketOffer, MarketRequest, RequestWindow, WindowConfig, WindowEvent};
