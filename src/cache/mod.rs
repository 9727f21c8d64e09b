//! Generic TTL cache for gateway data.
//!
//! Entries are stored under a namespace (e.g. "people", "damage") and a key,
//! each with its own expiry. A fresh entry answers without touching the
//! network; an expired one is dropped and refetched.

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheEntry, CacheResult, CacheSource, QueryKey};
