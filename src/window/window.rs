//! Request deduplication and supersession window
//!
//! State machine per request id: absent -> pending -> emitted. The timer
//! is armed at first sighting and never re-armed, so the worst-case
//! latency is exactly one grace period regardless of how many revisions
//! arrive.

use crate::metrics as mm;
use crate::window::error::{WindowError, WindowResult};
use crate::window::types::{MarketRequest, WindowConfig, WindowEvent, WindowStats};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingState {
    Pending,
    Emitted,
}

struct PendingRequest {
    topic: String,
    payload: MarketRequest,
    nonce: u64,
    expire: i64,
    arrived_at: Instant,
    state: PendingState,
    timer: AbortHandle,
}

#[derive(Default)]
struct WindowStatsInner {
    emitted: AtomicU64,
    superseded: AtomicU64,
    dropped_stale: AtomicU64,
    dropped_expired: AtomicU64,
    decode_errors: AtomicU64,
    pruned: AtomicU64,
}

/// Collapses repeated or revised sightings of one logical request into a
/// single downstream event
pub struct RequestWindow {
    pending: Arc<DashMap<String, PendingRequest>>,
    nonce_period: RwLock<Duration>,
    min_margin: Duration,
    events: mpsc::Sender<WindowEvent>,
    stats: Arc<WindowStatsInner>,
}

impl RequestWindow {
    pub fn new(config: WindowConfig, events: mpsc::Sender<WindowEvent>) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            nonce_period: RwLock::new(config.nonce_period),
            min_margin: config.min_margin,
            events,
            stats: Arc::new(WindowStatsInner::default()),
        }
    }

    /// Feed a raw ingress payload into the window.
    ///
    /// Fire-and-forget: a decode failure emits a non-fatal `Error` event,
    /// an expired or nearly-expired payload is dropped silently, and a
    /// valid payload creates or updates the pending entry for its id.
    pub async fn add(&self, topic: &str, raw: &[u8]) {
        let payload = match self.screen(raw) {
            Ok(payload) => payload,
            Err(WindowError::Decode(detail)) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(topic, "malformed request payload: {}", detail);
                let _ = self
                    .events
                    .send(WindowEvent::Error {
                        topic: topic.to_string(),
                        detail,
                    })
                    .await;
                return;
            }
            Err(e) => {
                // Expired or expiring too soon: too late to be useful
                self.stats.dropped_expired.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(topic, "{}", e);
                return;
            }
        };

        let id = payload.request_id.clone();
        match self.pending.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                match entry.state {
                    PendingState::Emitted => {
                        // The canonical event already fired for this id
                        self.stats.dropped_stale.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(request_id = %id, "sighting after emission dropped");
                    }
                    PendingState::Pending if payload.nonce > entry.nonce => {
                        // Supersede in place; the timer stays anchored to
                        // the first sighting
                        entry.nonce = payload.nonce;
                        entry.expire = payload.expire;
                        entry.payload = payload;
                        self.stats.superseded.fetch_add(1, Ordering::Relaxed);
                        mm::record_request_superseded();
                    }
                    PendingState::Pending => {
                        self.stats.dropped_stale.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            request_id = %id,
                            nonce = payload.nonce,
                            held = entry.nonce,
                            "stale nonce dropped"
                        );
                    }
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let period = *self.nonce_period.read();
                let timer = self.arm_timer(id, period);
                vacant.insert(PendingRequest {
                    topic: topic.to_string(),
                    nonce: payload.nonce,
                    expire: payload.expire,
                    payload,
                    arrived_at: Instant::now(),
                    state: PendingState::Pending,
                    timer,
                });
            }
        }
    }

    /// Decode and gatekeep an ingress payload
    fn screen(&self, raw: &[u8]) -> WindowResult<MarketRequest> {
        let payload: MarketRequest =
            serde_json::from_slice(raw).map_err(|e| WindowError::Decode(e.to_string()))?;

        let now = chrono::Utc::now().timestamp();
        if payload.expire <= now {
            return Err(WindowError::Expired(payload.request_id));
        }
        if payload.expire - now < self.min_margin.as_secs() as i64 {
            return Err(WindowError::TooLate(payload.request_id));
        }

        Ok(payload)
    }

    fn arm_timer(&self, id: String, period: Duration) -> AbortHandle {
        let pending = Arc::clone(&self.pending);
        let events = self.events.clone();
        let stats = Arc::clone(&self.stats);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(period).await;

            let event = match pending.get_mut(&id) {
                Some(mut entry) if entry.state == PendingState::Pending => {
                    entry.state = PendingState::Emitted;
                    tracing::debug!(
                        request_id = %id,
                        nonce = entry.nonce,
                        elapsed_ms = entry.arrived_at.elapsed().as_millis() as u64,
                        "request window closed"
                    );
                    Some(WindowEvent::Request {
                        topic: entry.topic.clone(),
                        payload: entry.payload.clone(),
                    })
                }
                _ => None,
            };

            // The map guard is released before the channel send
            if let Some(event) = event {
                stats.emitted.fetch_add(1, Ordering::Relaxed);
                mm::record_request_emitted();
                let _ = events.send(event).await;
            }
        });

        handle.abort_handle()
    }

    /// Remove entries (pending or emitted) whose expiry has passed,
    /// cancelling their timers. Not-yet-expired pending entries and their
    /// timers are untouched. Returns the removed request ids.
    pub fn prune(&self) -> Vec<String> {
        let now = chrono::Utc::now().timestamp();

        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.expire <= now)
            .map(|entry| entry.key().clone())
            .collect();

        for id in &expired {
            if let Some((_, entry)) = self.pending.remove(id) {
                entry.timer.abort();
            }
        }

        self.stats
            .pruned
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired
    }

    /// Cancel all timers and drop all state; nothing emits afterwards
    pub fn clear(&self) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                entry.timer.abort();
            }
        }
    }

    /// Reconfigure the grace period for future sightings.
    /// In-flight timers are unaffected.
    pub fn set_nonce_period(&self, period: Duration) {
        *self.nonce_period.write() = period;
    }

    pub fn nonce_period(&self) -> Duration {
        *self.nonce_period.read()
    }

    /// Entries currently tracked (pending or emitted)
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Get current window statistics
    pub fn stats(&self) -> WindowStats {
        WindowStats {
            tracked: self.pending.len() as u64,
            emitted: self.stats.emitted.load(Ordering::Relaxed),
            superseded: self.stats.superseded.load(Ordering::Relaxed),
            dropped_stale: self.stats.dropped_stale.load(Ordering::Relaxed),
            dropped_expired: self.stats.dropped_expired.load(Ordering::Relaxed),
            decode_errors: self.stats.decode_errors.load(Ordering::Relaxed),
            pruned: self.stats.pruned.load(Ordering::Relaxed),
        }
    }
}

impl Drop for RequestWindow {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_with(
        nonce_period: Duration,
        min_margin: Duration,
    ) -> (RequestWindow, mpsc::Receiver<WindowEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let window = RequestWindow::new(
            WindowConfig {
                nonce_period,
                min_margin,
            },
            tx,
        );
        (window, rx)
    }

    fn fast_window() -> (RequestWindow, mpsc::Receiver<WindowEvent>) {
        window_with(Duration::from_millis(100), Duration::from_secs(1))
    }

    fn raw(id: &str, nonce: u64, expire_in: i64) -> Vec<u8> {
        serde_json::to_vec(&MarketRequest::new(
            id,
            nonce,
            chrono::Utc::now().timestamp() + expire_in,
        ))
        .unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<WindowEvent>) -> Vec<WindowEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn requests(events: &[WindowEvent]) -> Vec<&MarketRequest> {
        events
            .iter()
            .filter_map(|e| match e {
                WindowEvent::Request { payload, .. } => Some(payload),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_single_sighting_emits_once() {
        let (window, mut rx) = fast_window();

        window.add("hello", &raw("r1", 1, 20)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let events = drain(&mut rx);
        let emitted = requests(&events);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].request_id, "r1");
        assert_eq!(emitted[0].nonce, 1);

        // Nothing further fires for the same id
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_higher_nonce_supersedes_within_window() {
        let (window, mut rx) = fast_window();

        window.add("hello", &raw("r1", 1, 20)).await;
        window.add("hello", &raw("r1", 2, 25)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let events = drain(&mut rx);
        let emitted = requests(&events);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].nonce, 2);
        assert_eq!(window.stats().superseded, 1);
    }

    #[tokio::test]
    async fn test_stale_nonce_dropped() {
        let (window, mut rx) = fast_window();

        window.add("hello", &raw("r1", 5, 20)).await;
        window.add("hello", &raw("r1", 5, 20)).await;
        window.add("hello", &raw("r1", 3, 20)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let events = drain(&mut rx);
        assert_eq!(requests(&events).len(), 1);
        assert_eq!(requests(&events)[0].nonce, 5);
        assert_eq!(window.stats().dropped_stale, 2);
    }

    #[tokio::test]
    async fn test_expired_request_never_emits() {
        let (window, mut rx) = fast_window();

        window.add("hello", &raw("r1", 1, -20)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(drain(&mut rx).is_empty());
        assert!(window.is_empty());
        assert_eq!(window.stats().dropped_expired, 1);
    }

    #[tokio::test]
    async fn test_nearly_expired_request_dropped() {
        let (window, mut rx) = window_with(Duration::from_millis(100), Duration::from_secs(5));

        window.add("hello", &raw("r1", 1, 2)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(drain(&mut rx).is_empty());
        assert!(window.is_empty());
    }

    #[tokio::test]
    async fn test_decode_failure_emits_error_event() {
        let (window, mut rx) = fast_window();

        window.add("hello", b"{ not json").await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], WindowEvent::Error { .. }));
        assert!(window.is_empty());
        assert_eq!(window.stats().decode_errors, 1);
    }

    #[tokio::test]
    async fn test_timer_anchored_to_first_sighting() {
        let (window, mut rx) = fast_window();

        window.add("hello", &raw("r1", 1, 20)).await;
        // Keep revising just before the window closes; emission must not
        // be pushed back by updates
        tokio::time::sleep(Duration::from_millis(60)).await;
        window.add("hello", &raw("r1", 2, 20)).await;
        tokio::time::sleep(Duration::from_millis(90)).await;

        let events = drain(&mut rx);
        let emitted = requests(&events);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].nonce, 2);
    }

    #[tokio::test]
    async fn test_sighting_after_emission_dropped() {
        let (window, mut rx) = window_with(Duration::from_millis(50), Duration::from_secs(1));

        window.add("hello", &raw("r1", 1, 20)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        window.add("hello", &raw("r1", 2, 20)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let events = drain(&mut rx);
        assert_eq!(requests(&events).len(), 1);
        assert_eq!(requests(&events)[0].nonce, 1);
    }

    #[tokio::test]
    async fn test_clear_cancels_pending_timers() {
        let (window, mut rx) = fast_window();

        window.add("hello", &raw("r1", 1, 20)).await;
        window.add("hello", &raw("r2", 1, 20)).await;
        window.clear();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(drain(&mut rx).is_empty());
        assert!(window.is_empty());
    }

    #[tokio::test]
    async fn test_prune_removes_exactly_expired() {
        let (window, mut rx) = window_with(Duration::from_secs(10), Duration::ZERO);

        window.add("hello", &raw("r-short", 1, 1)).await;
        window.add("hello", &raw("r-long", 1, 60)).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let pruned = window.prune();
        assert_eq!(pruned, vec!["r-short".to_string()]);
        assert_eq!(window.len(), 1);

        // Idempotent: nothing left to prune
        assert!(window.prune().is_empty());
        assert_eq!(window.len(), 1);

        // The pruned entry's timer was cancelled; the survivor has not
        // fired yet
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_set_nonce_period_affects_future_sightings_only() {
        let (window, mut rx) = window_with(Duration::from_secs(10), Duration::from_secs(1));

        window.add("hello", &raw("r-slow", 1, 60)).await;
        window.set_nonce_period(Duration::from_millis(50));
        window.add("hello", &raw("r-fast", 1, 60)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let events = drain(&mut rx);
        let emitted = requests(&events);
        // Only the entry added after the change has fired
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].request_id, "r-fast");
    }

    #[tokio::test]
    async fn test_distinct_ids_emit_independently() {
        let (window, mut rx) = fast_window();

        window.add("hello", &raw("r1", 1, 20)).await;
        window.add("hello", &raw("r2", 7, 20)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let events = drain(&mut rx);
        let mut ids: Vec<_> = requests(&events)
            .iter()
            .map(|r| r.request_id.clone())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["r1".to_string(), "r2".to_string()]);
    }
}
