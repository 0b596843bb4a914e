//! Request window types and configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A buyer's time-boxed request, as decoded from an ingress payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRequest {
    /// Logical request id; revisions share it
    pub request_id: String,

    /// Sender-assigned version nonce; higher supersedes lower
    #[serde(default)]
    pub nonce: u64,

    /// Expiry as unix seconds
    pub expire: i64,

    /// Application-defined request body
    #[serde(default)]
    pub body: serde_json::Value,
}

impl MarketRequest {
    pub fn new(request_id: impl Into<String>, nonce: u64, expire: i64) -> Self {
        Self {
            request_id: request_id.into(),
            nonce,
            expire,
            body: serde_json::Value::Null,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }
}

/// A supplier's answer to a published request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOffer {
    /// Request this offer answers
    pub request_id: String,

    /// Supplier node id
    pub supplier_id: String,

    /// Expiry as unix seconds
    pub expire: i64,

    /// Application-defined offer body
    #[serde(default)]
    pub body: serde_json::Value,
}

/// Configuration for a request window
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Grace period between first sighting of a request id and its
    /// emission, allowing a higher-nonce revision to supersede it
    pub nonce_period: Duration,

    /// Minimum remaining lifetime a request needs to be worth processing
    pub min_margin: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            nonce_period: Duration::from_secs(5),
            min_margin: Duration::from_secs(1),
        }
    }
}

/// Events emitted by the request window
#[derive(Debug, Clone)]
pub enum WindowEvent {
    /// Canonical request emission, once per id, after the grace period
    Request {
        topic: String,
        payload: MarketRequest,
    },

    /// Non-fatal ingress failure
    Error { topic: String, detail: String },
}

/// Statistics for a request window
#[derive(Debug, Clone, Default)]
pub struct WindowStats {
    /// Entries currently tracked (pending or emitted)
    pub tracked: u64,

    /// Canonical emissions
    pub emitted: u64,

    /// Pending payloads replaced by a higher nonce
    pub superseded: u64,

    /// Sightings dropped for a stale nonce or post-emission arrival
    pub dropped_stale: u64,

    /// Sightings dropped as expired or expiring too soon
    pub dropped_expired: u64,

    /// Payloads that failed to decode
    pub decode_errors: u64,

    /// Entries removed by pruning
    pub pruned: u64,
}

impl std::fmt::Display for WindowStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Window: {} tracked, {} emitted, {} superseded, {} stale, {} expired",
            self.tracked, self.emitted, self.superseded, self.dropped_stale, self.dropped_expired
        )
    }
}
