//! Role wiring
//!
//! Thin composition of the overlay, cache, and window for the three
//! marketplace roles: buyer client, supplier node, relay server.

pub mod client;
pub mod error;
pub mod node;
pub mod server;

pub use client::{ClientConfig, MarketClient};
pub use error::{RoleError, RoleResult};
pub use node::{NodeConfig, SupplierNode};
pub use server::{RelayServer, ServerConfig};
