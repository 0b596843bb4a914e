//! Peer bookkeeping and overlay extension points
//!
//! The overlay composes a generic peer book with a pluggable peer-selection
//! strategy and an optional receive-pipeline hook, instead of reaching into
//! any pub/sub engine's internals.

use crate::overlay::types::{Direction, MessageEnvelope, PeerInfo};
use std::collections::{HashMap, HashSet};

/// Connected peers, per-topic subscriptions, and per-peer delivery tracking.
///
/// Exclusively owned by one overlay instance behind its lock.
#[derive(Debug, Default)]
pub struct PeerBook {
    peers: HashMap<String, PeerInfo>,
    topic_peers: HashMap<String, HashSet<String>>,
    sent: HashMap<String, HashSet<String>>,
}

impl PeerBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. Returns `true` when the peer was previously unknown.
    pub fn add_peer(&mut self, peer_id: &str, direction: Direction, addr: Option<String>) -> bool {
        self.peers
            .insert(
                peer_id.to_string(),
                PeerInfo::new(peer_id, direction, addr),
            )
            .is_none()
    }

    /// Drop a peer and all state keyed by it
    pub fn remove_peer(&mut self, peer_id: &str) -> Option<PeerInfo> {
        for subscribers in self.topic_peers.values_mut() {
            subscribers.remove(peer_id);
        }
        self.sent.remove(peer_id);
        self.peers.remove(peer_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.values().cloned().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Record a remote peer's interest in a topic
    pub fn subscribe_peer(&mut self, topic: &str, peer_id: &str) {
        self.topic_peers
            .entry(topic.to_string())
            .or_default()
            .insert(peer_id.to_string());
    }

    pub fn unsubscribe_peer(&mut self, topic: &str, peer_id: &str) {
        if let Some(subscribers) = self.topic_peers.get_mut(topic) {
            subscribers.remove(peer_id);
        }
    }

    /// Connected peers known to be subscribed to a topic
    pub fn subscribers(&self, topic: &str) -> Vec<String> {
        self.topic_peers
            .get(topic)
            .map(|s| {
                s.iter()
                    .filter(|p| self.peers.contains_key(*p))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record a message id as sent to a peer.
    /// Returns `false` when the peer already had it.
    pub fn mark_sent(&mut self, peer_id: &str, message_id: &str) -> bool {
        self.sent
            .entry(peer_id.to_string())
            .or_default()
            .insert(message_id.to_string())
    }

    pub fn was_sent(&self, peer_id: &str, message_id: &str) -> bool {
        self.sent
            .get(peer_id)
            .map(|ids| ids.contains(message_id))
            .unwrap_or(false)
    }
}

/// Strategy choosing the peer set a publish targets
pub trait PeerSelector: Send + Sync {
    fn select(&self, topic: &str, book: &PeerBook) -> Vec<String>;
}

/// Default strategy: peers observed as subscribed to the topic
pub struct SubscribedPeers;

impl PeerSelector for SubscribedPeers {
    fn select(&self, topic: &str, book: &PeerBook) -> Vec<String> {
        book.subscribers(topic)
    }
}

/// Client-role strategy: union the inner selection with configured direct
/// peers, even when bookkeeping has not yet recorded them as subscribed.
///
/// Closes the race where a client publishes before its topic-subscription
/// state with the relay server has converged. Direct peers still have to be
/// connected to be reachable.
pub struct WithDirectPeers {
    direct: Vec<String>,
    inner: Box<dyn PeerSelector>,
}

impl WithDirectPeers {
    pub fn new(direct: Vec<String>, inner: Box<dyn PeerSelector>) -> Self {
        Self { direct, inner }
    }
}

impl PeerSelector for WithDirectPeers {
    fn select(&self, topic: &str, book: &PeerBook) -> Vec<String> {
        let mut selected = self.inner.select(topic, book);
        for peer_id in &self.direct {
            if book.contains(peer_id) && !selected.contains(peer_id) {
                selected.push(peer_id.clone());
            }
        }
        selected
    }
}

/// Hook invoked with every envelope delivered to local listeners
pub trait ReceiveHook: Send + Sync {
    fn on_envelope(&self, envelope: &MessageEnvelope);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_peer() {
        let mut book = PeerBook::new();

        assert!(book.add_peer("p1", Direction::Inbound, None));
        assert!(!book.add_peer("p1", Direction::Inbound, None));
        assert_eq!(book.peer_count(), 1);

        book.subscribe_peer("t", "p1");
        book.mark_sent("p1", "m1");

        let removed = book.remove_peer("p1").unwrap();
        assert_eq!(removed.peer_id, "p1");
        assert!(book.subscribers("t").is_empty());
        assert!(!book.was_sent("p1", "m1"));
    }

    #[test]
    fn test_subscribers_filters_disconnected() {
        let mut book = PeerBook::new();

        book.add_peer("p1", Direction::Inbound, None);
        book.subscribe_peer("t", "p1");
        book.subscribe_peer("t", "ghost");

        assert_eq!(book.subscribers("t"), vec!["p1".to_string()]);
    }

    #[test]
    fn test_mark_sent_once() {
        let mut book = PeerBook::new();
        book.add_peer("p1", Direction::Inbound, None);

        assert!(book.mark_sent("p1", "m1"));
        assert!(!book.mark_sent("p1", "m1"));
        assert!(book.was_sent("p1", "m1"));
    }

    #[test]
    fn test_direct_peer_union() {
        let mut book = PeerBook::new();
        book.add_peer("relay", Direction::Outbound, None);
        book.add_peer("p1", Direction::Inbound, None);
        book.subscribe_peer("t", "p1");

        let selector = WithDirectPeers::new(
            vec!["relay".to_string(), "offline".to_string()],
            Box::new(SubscribedPeers),
        );

        let mut selected = selector.select("t", &book);
        selected.sort();
        // "relay" included despite no observed subscription;
        // "offline" excluded because it is not connected
        assert_eq!(selected, vec!["p1".to_string(), "relay".to_string()]);
    }
}
