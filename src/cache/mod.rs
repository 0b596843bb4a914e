//! Store-and-forward message cache
//!
//! Bounded, expiry-driven store of recently published messages, used by the
//! relay overlay to replay missed traffic to reconnecting peers.
//!
//! Key features:
//! - Content-addressed idempotence (re-insertion by id is a no-op)
//! - Expiry embedded per entry, enforced by heartbeat-driven pruning
//! - Narrow storage collaborator interface (get/set/delete/entries)

pub mod cache;
pub mod error;
pub mod storage;

pub use cache::{CacheStats, CachedEntry, MessageCache};
pub use error::{CacheError, CacheResult};
pub use storage::{MemoryStorage, Storage};
