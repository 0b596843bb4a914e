//! Metrics recorder for marketplace coordination
//!
//! Records counters and gauges about relay and request-window health.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    describe_counter!(
        "marketmesh_messages_published_total",
        "Total messages published locally"
    );
    describe_counter!(
        "marketmesh_messages_forwarded_total",
        "Total messages re-forwarded to peers"
    );
    describe_counter!(
        "marketmesh_messages_replayed_total",
        "Total cached messages replayed to reconnecting peers"
    );
    describe_counter!(
        "marketmesh_messages_cached_total",
        "Total messages retained in the store-and-forward cache"
    );
    describe_counter!(
        "marketmesh_cache_pruned_total",
        "Total cache entries removed by expiry pruning"
    );
    describe_counter!(
        "marketmesh_requests_emitted_total",
        "Total canonical request emissions"
    );
    describe_counter!(
        "marketmesh_requests_superseded_total",
        "Total pending requests superseded by a higher nonce"
    );

    describe_gauge!("marketmesh_active_peers", "Currently connected peers");
}

pub fn record_message_published() {
    counter!("marketmesh_messages_published_total").increment(1);
}

pub fn record_messages_forwarded(count: usize) {
    counter!("marketmesh_messages_forwarded_total").increment(count as u64);
}

pub fn record_messages_replayed(count: usize) {
    counter!("marketmesh_messages_replayed_total").increment(count as u64);
}

pub fn record_message_cached() {
    counter!("marketmesh_messages_cached_total").increment(1);
}

pub fn record_cache_pruned(count: usize) {
    counter!("marketmesh_cache_pruned_total").increment(count as u64);
}

pub fn record_request_emitted() {
    counter!("marketmesh_requests_emitted_total").increment(1);
}

pub fn record_request_superseded() {
    counter!("marketmesh_requests_superseded_total").increment(1);
}

pub fn set_active_peers(count: usize) {
    gauge!("marketmesh_active_peers").set(count as f64);
}
