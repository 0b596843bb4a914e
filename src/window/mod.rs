//! Request Window Module
//!
//! Collapses duplicate or superseding sightings of the same logical request
//! id into a single emission, bounded in latency.
//!
//! Key features:
//! - Per-id state machine: absent -> pending -> emitted
//! - Emission timer anchored to first sighting only
//! - Higher-nonce revisions replace the pending payload in place
//! - Expiry-driven pruning and explicit clear

pub mod error;
pub mod types;
pub mod window;

pub use error::{WindowError, WindowResult};
pub use types::{MarketOffer, MarketRequest, WindowConfig, WindowEvent, WindowStats};
pub use window::RequestWindow;
