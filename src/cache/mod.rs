//! Logical URL cache.
//!
//! Maps a [`CacheKey`] (backend scheme, preset, source URL) to the public
//! address of a materialized derivative. An entry only ever records an
//! address that was confirmed to exist in storage; eviction and expiry are
//! owned by the store.

mod keys;
mod lock;
mod store;

pub use keys::CacheKey;
pub use store::{MemoryUrlCache, MemoryUrlCacheConfig};
