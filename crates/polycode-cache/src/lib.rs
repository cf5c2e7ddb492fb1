//! Polycode Cache
//!
//! A bounded, thread-safe key/value store used to remember call results
//! between replays of the same session. Entries expire in two ways:
//!
//! - **Sliding TTL**: an entry not touched for longer than `ttl` is dropped,
//!   either lazily by [`MemoCache::get`] or by the background janitor.
//! - **Fixed expiry**: an entry written with
//!   [`MemoCache::put_with_fixed_expiry`] is protected from sliding
//!   expiry until its timestamp passes.
//!
//! Capacity pressure always wins: when an insert pushes the cache over
//! capacity, the least-recently-used entry is dropped whether it is protected
//! or not.

mod cache;
mod config;

pub use cache::MemoCache;
pub use config::{CacheConfig, Capacity};
