//! Storage Module
//!
//! The in-memory heart of CinderKV: a thread-safe, sharded key/value map with
//! absolute wall-clock expiry, plus the background reaper that sweeps expired
//! entries nobody touches.
//!
//! ## Expiry happens twice
//!
//! - **Lazy**: any access that observes an expired entry removes it before
//!   answering, so clients never see a dead key.
//! - **Active**: the [`Reaper`] task periodically purges what access patterns
//!   miss.
//!
//! The [`Store::snapshot`] operation feeds the append-only-file rewrite: it
//! copies every live entry (purging expired ones on the way) with expiry
//! deadlines exported as absolute unix seconds.

pub mod engine;
pub mod expiry;

// Re-export commonly used types
pub use engine::{Entry, SnapshotEntry, Store};
pub use expiry::{Reaper, DEFAULT_REAP_INTERVAL};
