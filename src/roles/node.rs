//! Supplier node role
//!
//! Subscribes to request topics, feeds delivered payloads through the
//! request window, and publishes offers back into the marketplace.

use crate::overlay::{
    Outbound, OverlayEvent, RelayOverlay, RelayOverlayBuilder, Role,
};
use crate::roles::error::{RoleError, RoleResult};
use crate::window::{MarketOffer, RequestWindow, WindowConfig, WindowEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Configuration for a supplier node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique identifier for this node
    pub node_id: String,

    /// Request topics this node serves
    pub topics: Vec<String>,

    /// Request window tuning
    pub window: WindowConfig,

    /// How often expired window entries are pruned
    pub prune_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            topics: vec!["market/requests".to_string()],
            window: WindowConfig::default(),
            prune_interval: Duration::from_secs(5),
        }
    }
}

/// A supplier node consuming requests and answering with offers
pub struct SupplierNode {
    config: NodeConfig,
    overlay: Arc<RelayOverlay>,
    window: Arc<RequestWindow>,
    overlay_events: Mutex<Option<mpsc::Receiver<OverlayEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SupplierNode {
    /// Create a node. Returns the node together with the receiver of its
    /// canonical `WindowEvent` stream.
    pub fn new(config: NodeConfig) -> RoleResult<(Self, mpsc::Receiver<WindowEvent>)> {
        let (window_tx, window_rx) = mpsc::channel(64);
        let window = Arc::new(RequestWindow::new(config.window.clone(), window_tx));

        let (overlay_tx, overlay_rx) = mpsc::channel(64);
        let overlay = RelayOverlayBuilder::new(Role::Node)
            .node_id(config.node_id.clone())
            .events(overlay_tx)
            .build()?;

        Ok((
            Self {
                config,
                overlay: Arc::new(overlay),
                window,
                overlay_events: Mutex::new(Some(overlay_rx)),
                tasks: Mutex::new(Vec::new()),
            },
            window_rx,
        ))
    }

    /// Bind the transport, subscribe the configured topics, and start the
    /// delivery pump and prune loop.
    pub async fn start(&self, transport: mpsc::Sender<Outbound>) -> RoleResult<()> {
        let mut events = self
            .overlay_events
            .lock()
            .take()
            .ok_or_else(|| RoleError::Configuration("node already started".to_string()))?;

        self.overlay.start(transport);
        for topic in &self.config.topics {
            self.overlay.subscribe(topic).await?;
        }

        let window = Arc::clone(&self.window);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let OverlayEvent::Delivered { envelope } = event {
                    window.add(&envelope.topic, &envelope.payload).await;
                }
            }
        });

        let window = Arc::clone(&self.window);
        let prune_interval = self.config.prune_interval;
        let pruner = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(prune_interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                window.prune();
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.push(pump);
        tasks.push(pruner);
        Ok(())
    }

    /// Stop the node: unbind the transport, cancel the pump and prune
    /// tasks, and drop all window state.
    pub fn stop(&self) {
        self.overlay.stop();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.window.clear();
    }

    /// Publish an offer answering a request
    pub async fn publish_offer(&self, topic: &str, offer: &MarketOffer) -> RoleResult<()> {
        let payload = serde_json::to_vec(offer)?;
        self.overlay.publish(topic, &payload).await?;
        tracing::debug!(
            node = %self.overlay.node_id(),
            topic,
            request_id = %offer.request_id,
            "offer published"
        );
        Ok(())
    }

    /// Underlying overlay, for host transport wiring
    pub fn overlay(&self) -> &Arc<RelayOverlay> {
        &self.overlay
    }

    /// The request window, for inspection and reconfiguration
    pub fn window(&self) -> &Arc<RequestWindow> {
        &self.window
    }
}
