//! Generation-scoped response storage.
//!
//! This module provides the store the worker serves from:
//! - Entries are request identity → fully-read response
//! - Entries are namespaced by generation (the version identifier)
//! - A whole generation can be written atomically and dropped in one step
//! - The current generation pointer is persisted alongside the entries

mod memory;
mod storage;
mod traits;

pub use memory::MemoryStore;
pub use storage::SqliteStore;
pub use traits::{CacheEntry, CacheStore};
