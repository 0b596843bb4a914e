//! Relay overlay implementation
//!
//! Delivers published bytes to the peer set selected for a topic and
//! replays cached traffic to peers reconnecting after a gap. The host
//! transport drives `on_peer_added` / `on_peer_removed` / `on_receive` /
//! `on_heartbeat` and drains the outbound channel bound at `start()`.

use crate::cache::{MessageCache, Storage};
use crate::metrics as mm;
use crate::overlay::engine::{PeerBook, PeerSelector, ReceiveHook, SubscribedPeers, WithDirectPeers};
use crate::overlay::error::{OverlayError, OverlayResult};
use crate::overlay::types::{
    Direction, Frame, MessageEnvelope, Outbound, OverlayConfig, OverlayEvent, OverlayStats, Role,
};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct OverlayStatsInner {
    published: AtomicU64,
    received: AtomicU64,
    delivered: AtomicU64,
    forwarded: AtomicU64,
    replayed: AtomicU64,
    cache_skipped: AtomicU64,
}

/// A publish/subscribe relay overlay instance
pub struct RelayOverlay {
    config: OverlayConfig,

    /// Peer bookkeeping: connections, subscriptions, delivery tracking
    book: Arc<RwLock<PeerBook>>,

    /// Topics this instance is subscribed to
    subscriptions: RwLock<HashSet<String>>,

    /// Store-and-forward buffer, server role only
    cache: Option<Arc<MessageCache>>,

    /// Publish target selection strategy
    selector: Arc<dyn PeerSelector>,

    /// Optional receive-pipeline hook
    hook: Option<Arc<dyn ReceiveHook>>,

    /// Transport send primitive, bound at start()
    outbound: Arc<RwLock<Option<mpsc::Sender<Outbound>>>>,

    /// Event sender for local listeners
    events: Option<mpsc::Sender<OverlayEvent>>,

    running: Arc<AtomicBool>,
    stats: Arc<OverlayStatsInner>,
}

impl RelayOverlay {
    /// Bind the transport send primitive and mark the overlay started
    pub fn start(&self, transport: mpsc::Sender<Outbound>) {
        *self.outbound.write() = Some(transport);
        self.running.store(true, Ordering::SeqCst);
    }

    /// Unbind the transport; pending replay tasks become no-ops
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        *self.outbound.write() = None;
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Publish bytes on a topic.
    ///
    /// Fire-and-forget: delivery outcomes surface only through the event
    /// stream. Zero reachable peers is success; the message is simply not
    /// delivered yet. The only synchronous failure is an unbound transport.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> OverlayResult<()> {
        let tx = self
            .outbound
            .read()
            .clone()
            .ok_or(OverlayError::TransportNotReady)?;

        let envelope = MessageEnvelope::new(topic, payload.to_vec(), None);
        let bytes = Frame::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        }
        .encode();

        let targets = {
            let book = self.book.read();
            self.selector.select(topic, &book)
        };

        let to_send = {
            let mut book = self.book.write();
            targets
                .into_iter()
                .filter(|p| book.mark_sent(p, &envelope.message_id))
                .collect::<Vec<_>>()
        };

        for peer_id in to_send {
            send_to(&tx, &peer_id, bytes.clone()).await;
        }

        self.stats.published.fetch_add(1, Ordering::Relaxed);
        mm::record_message_published();
        Ok(())
    }

    /// Record local interest in a topic and announce it to connected peers
    pub async fn subscribe(&self, topic: &str) -> OverlayResult<()> {
        let tx = self
            .outbound
            .read()
            .clone()
            .ok_or(OverlayError::TransportNotReady)?;
        self.subscribe_local(topic, Some(&tx)).await;
        Ok(())
    }

    /// Withdraw local interest in a topic and announce it to connected peers
    pub async fn unsubscribe(&self, topic: &str) -> OverlayResult<()> {
        let tx = self
            .outbound
            .read()
            .clone()
            .ok_or(OverlayError::TransportNotReady)?;

        if !self.subscriptions.write().remove(topic) {
            return Ok(());
        }

        let bytes = Frame::Unsubscribe {
            topic: topic.to_string(),
        }
        .encode();
        let peer_ids = self.book.read().peer_ids();
        for peer_id in peer_ids {
            send_to(&tx, &peer_id, bytes.clone()).await;
        }
        Ok(())
    }

    /// Topics this instance is currently subscribed to
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().iter().cloned().collect()
    }

    async fn subscribe_local(&self, topic: &str, tx: Option<&mpsc::Sender<Outbound>>) {
        if !self.subscriptions.write().insert(topic.to_string()) {
            return;
        }

        if let Some(tx) = tx {
            let bytes = Frame::Subscribe {
                topic: topic.to_string(),
            }
            .encode();
            let peer_ids = self.book.read().peer_ids();
            for peer_id in peer_ids {
                send_to(tx, &peer_id, bytes.clone()).await;
            }
        }

        self.emit(OverlayEvent::Subscribed {
            topic: topic.to_string(),
        })
        .await;
    }

    /// Handle a raw frame arriving from a peer.
    ///
    /// Never fails: malformed frames are logged and dropped, and a cache
    /// fault degrades to "skip caching this message" without blocking
    /// delivery.
    pub async fn on_receive(&self, from: &str, bytes: Vec<u8>) {
        let frame = match Frame::decode(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(peer = from, node = %self.config.node_id, "undecodable frame: {}", e);
                return;
            }
        };

        match frame {
            Frame::Subscribe { topic } => {
                self.book.write().subscribe_peer(&topic, from);

                // A relay server must be able to route any topic it
                // observes, including topics it only saw announced.
                if self.config.role == Role::Server && !self.subscriptions.read().contains(&topic) {
                    let tx = self.outbound.read().clone();
                    self.subscribe_local(&topic, tx.as_ref()).await;
                }
            }
            Frame::Unsubscribe { topic } => {
                self.book.write().unsubscribe_peer(&topic, from);
            }
            Frame::Message { topic, payload } => {
                self.stats.received.fetch_add(1, Ordering::Relaxed);
                let envelope = MessageEnvelope::new(&topic, payload, Some(from.to_string()));

                // The origin already holds this message; never echo or
                // replay it back.
                self.book.write().mark_sent(from, &envelope.message_id);

                if self.config.role == Role::Server {
                    // A relay server must be able to route any topic it
                    // observes.
                    if !self.subscriptions.read().contains(&topic) {
                        let tx = self.outbound.read().clone();
                        self.subscribe_local(&topic, tx.as_ref()).await;
                    }

                    self.try_cache(&envelope, &bytes);
                }

                self.deliver(&envelope).await;

                if self.config.role == Role::Server {
                    self.forward(&envelope, &bytes).await;
                }
            }
        }
    }

    /// Attempt to cache a received message; degrades to a no-op on any fault
    fn try_cache(&self, envelope: &MessageEnvelope, raw_frame: &[u8]) {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return,
        };

        if envelope.is_anonymous() {
            self.stats.cache_skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let extractor = match &self.config.meta_extractor {
            Some(extractor) => extractor,
            None => {
                self.stats.cache_skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let meta = match extractor.extract(&envelope.payload) {
            Ok(meta) => meta,
            Err(e) => {
                self.stats.cache_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    node = %self.config.node_id,
                    message_id = %envelope.message_id,
                    "no cache metadata, skipping cache: {}",
                    e
                );
                return;
            }
        };

        let origin = envelope.origin.as_deref().unwrap_or_default();
        match cache.set(
            &envelope.message_id,
            origin,
            raw_frame.to_vec(),
            meta.expire,
            meta.nonce,
        ) {
            Ok(true) => mm::record_message_cached(),
            Ok(false) => {}
            Err(e) => {
                self.stats.cache_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    node = %self.config.node_id,
                    message_id = %envelope.message_id,
                    "cache fault, message not retained: {}",
                    e
                );
            }
        }
    }

    /// Hand an envelope to local listeners
    async fn deliver(&self, envelope: &MessageEnvelope) {
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);

        if let Some(hook) = &self.hook {
            hook.on_envelope(envelope);
        }

        self.emit(OverlayEvent::Delivered {
            envelope: envelope.clone(),
        })
        .await;
    }

    /// Re-broadcast a received message to other subscribed peers
    async fn forward(&self, envelope: &MessageEnvelope, raw_frame: &[u8]) {
        let tx = match self.outbound.read().clone() {
            Some(tx) => tx,
            None => return,
        };

        let to_send = {
            let mut book = self.book.write();
            book.subscribers(&envelope.topic)
                .into_iter()
                .filter(|p| Some(p.as_str()) != envelope.origin.as_deref())
                .filter(|p| book.mark_sent(p, &envelope.message_id))
                .collect::<Vec<_>>()
        };

        for peer_id in &to_send {
            send_to(&tx, peer_id, raw_frame.to_vec()).await;
        }

        if !to_send.is_empty() {
            self.stats
                .forwarded
                .fetch_add(to_send.len() as u64, Ordering::Relaxed);
            mm::record_messages_forwarded(to_send.len());
        }
    }

    /// Register a peer reported by the transport.
    ///
    /// An inbound, previously unknown peer gets all currently cached,
    /// unexpired messages replayed after the configured delay, exactly once
    /// each. If the peer disconnects before the delay fires, the replay is
    /// skipped silently.
    pub async fn on_peer_added(&self, peer_id: &str, direction: Direction, addr: Option<String>) {
        let was_unknown = self.book.write().add_peer(peer_id, direction, addr);

        self.emit(OverlayEvent::PeerConnected {
            peer_id: peer_id.to_string(),
        })
        .await;
        mm::set_active_peers(self.book.read().peer_count());

        // Push local subscriptions so the new peer can route to us
        let tx = self.outbound.read().clone();
        if let Some(tx) = tx {
            for topic in self.subscriptions() {
                send_to(&tx, peer_id, Frame::Subscribe { topic }.encode()).await;
            }
        }

        if was_unknown && direction == Direction::Inbound {
            if let Some(cache) = &self.cache {
                self.spawn_replay(peer_id, Arc::clone(cache));
            }
        }
    }

    fn spawn_replay(&self, peer_id: &str, cache: Arc<MessageCache>) {
        let peer = peer_id.to_string();
        let node_id = self.config.node_id.clone();
        let delay = self.config.replay_delay;
        let book = Arc::clone(&self.book);
        let outbound = Arc::clone(&self.outbound);
        let events = self.events.clone();
        let stats = Arc::clone(&self.stats);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if !running.load(Ordering::SeqCst) {
                return;
            }

            let tx = match outbound.read().clone() {
                Some(tx) => tx,
                None => return,
            };

            let now = chrono::Utc::now().timestamp();
            let candidates: Vec<_> = cache
                .get()
                .into_iter()
                .filter(|e| !e.is_expired(now))
                .collect();

            let to_send = {
                let mut book = book.write();
                if !book.contains(&peer) {
                    // Peer disconnected while the delay was pending
                    return;
                }
                candidates
                    .into_iter()
                    .filter(|e| book.mark_sent(&peer, &e.message_id))
                    .collect::<Vec<_>>()
            };

            if to_send.is_empty() {
                return;
            }

            let count = to_send.len();
            for entry in to_send {
                send_to(&tx, &peer, entry.raw).await;
            }

            stats.replayed.fetch_add(count as u64, Ordering::Relaxed);
            mm::record_messages_replayed(count);
            tracing::debug!(node = %node_id, peer = %peer, count, "replayed cached messages");

            if let Some(events) = events {
                let _ = events
                    .send(OverlayEvent::Replayed {
                        peer_id: peer.clone(),
                        count,
                    })
                    .await;
            }
        });
    }

    /// Drop a peer and all per-peer delivery-tracking state
    pub async fn on_peer_removed(&self, peer_id: &str) {
        if self.book.write().remove_peer(peer_id).is_some() {
            self.emit(OverlayEvent::PeerDisconnected {
                peer_id: peer_id.to_string(),
            })
            .await;
            mm::set_active_peers(self.book.read().peer_count());
        }
    }

    /// Periodic tick, driven by the host transport's heartbeat
    pub fn on_heartbeat(&self) {
        if let Some(cache) = &self.cache {
            let pruned = cache.prune();
            if !pruned.is_empty() {
                mm::record_cache_pruned(pruned.len());
                tracing::debug!(
                    node = %self.config.node_id,
                    count = pruned.len(),
                    "pruned expired cache entries"
                );
            }
        }
    }

    /// Get current overlay statistics
    pub fn stats(&self) -> OverlayStats {
        OverlayStats {
            published: self.stats.published.load(Ordering::Relaxed),
            received: self.stats.received.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            forwarded: self.stats.forwarded.load(Ordering::Relaxed),
            replayed: self.stats.replayed.load(Ordering::Relaxed),
            cache_skipped: self.stats.cache_skipped.load(Ordering::Relaxed),
            active_peers: self.book.read().peer_count() as u64,
        }
    }

    /// Connected peers
    pub fn peers(&self) -> Vec<crate::overlay::types::PeerInfo> {
        self.book.read().peers()
    }

    /// Server-role message cache, when present
    pub fn cache(&self) -> Option<&Arc<MessageCache>> {
        self.cache.as_ref()
    }

    async fn emit(&self, event: OverlayEvent) {
        if let Some(events) = &self.events {
            if events.send(event).await.is_err() {
                tracing::debug!(node = %self.config.node_id, "event listener dropped");
            }
        }
    }
}

async fn send_to(tx: &mpsc::Sender<Outbound>, peer_id: &str, bytes: Vec<u8>) {
    if tx
        .send(Outbound {
            peer_id: peer_id.to_string(),
            bytes,
        })
        .await
        .is_err()
    {
        tracing::warn!(peer = peer_id, "transport channel closed, send dropped");
    }
}

/// Builder for relay overlays
pub struct RelayOverlayBuilder {
    config: OverlayConfig,
    storage: Option<Arc<dyn Storage>>,
    selector: Option<Box<dyn PeerSelector>>,
    hook: Option<Arc<dyn ReceiveHook>>,
    events: Option<mpsc::Sender<OverlayEvent>>,
}

impl RelayOverlayBuilder {
    pub fn new(role: Role) -> Self {
        Self {
            config: OverlayConfig {
                role,
                ..OverlayConfig::default()
            },
            storage: None,
            selector: None,
            hook: None,
            events: None,
        }
    }

    pub fn config(mut self, config: OverlayConfig) -> Self {
        let role = self.config.role;
        self.config = OverlayConfig { role, ..config };
        self
    }

    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.config.node_id = id.into();
        self
    }

    pub fn direct_peers(mut self, peers: Vec<crate::overlay::types::DirectPeer>) -> Self {
        self.config.direct_peers = peers;
        self
    }

    pub fn replay_delay(mut self, delay: std::time::Duration) -> Self {
        self.config.replay_delay = delay;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn meta_extractor(
        mut self,
        extractor: Arc<dyn crate::overlay::types::CacheMetaExtractor>,
    ) -> Self {
        self.config.meta_extractor = Some(extractor);
        self
    }

    /// Override the publish target selection strategy
    pub fn selector(mut self, selector: Box<dyn PeerSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Install a receive-pipeline hook
    pub fn hook(mut self, hook: Arc<dyn ReceiveHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Attach an event channel for local listeners
    pub fn events(mut self, tx: mpsc::Sender<OverlayEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn build(self) -> OverlayResult<RelayOverlay> {
        let config = self.config;

        if config.role == Role::Client && config.direct_peers.is_empty() {
            return Err(OverlayError::InvalidConfig(
                "client role requires at least one direct peer".to_string(),
            ));
        }

        let cache = match config.role {
            Role::Server => {
                let storage = self.storage.ok_or_else(|| {
                    OverlayError::InvalidConfig(
                        "server role requires a storage collaborator".to_string(),
                    )
                })?;
                Some(Arc::new(MessageCache::new(storage, config.cache_capacity)))
            }
            _ => None,
        };

        let selector: Arc<dyn PeerSelector> = match self.selector {
            Some(selector) => Arc::from(selector),
            None if config.role == Role::Client => {
                let direct = config
                    .direct_peers
                    .iter()
                    .map(|p| p.peer_id.clone())
                    .collect();
                Arc::new(WithDirectPeers::new(direct, Box::new(SubscribedPeers)))
            }
            None => Arc::new(SubscribedPeers),
        };

        Ok(RelayOverlay {
            config,
            book: Arc::new(RwLock::new(PeerBook::new())),
            subscriptions: RwLock::new(HashSet::new()),
            cache,
            selector,
            hook: self.hook,
            outbound: Arc::new(RwLock::new(None)),
            events: self.events,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(OverlayStatsInner::default()),
        })
    }
}
