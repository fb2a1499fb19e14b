//! Retrieval strategies and the plumbing they share.

mod cache_first;
mod network_first;

pub use cache_first::CacheFirst;
pub use network_first::{offline_response, NetworkFirst};
#[cfg(test)]
pub use network_first::OFFLINE_DOCUMENT;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::http::{RequestKey, Response};
use crate::lifecycle::CurrentGeneration;

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// From the current generation
  Cache,
  /// The built-in offline document
  OfflineFallback,
}

/// A response handed back to the intercepted request.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the entry was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(entry: CacheEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Cache,
      cached_at: Some(entry.cached_at),
    }
  }

  pub fn offline() -> Self {
    Self {
      response: offline_response(),
      source: ResponseSource::OfflineFallback,
      cached_at: None,
    }
  }
}

/// Entry access scoped to the current generation.
///
/// Store failures never escape: a failed read is a miss and a failed write
/// leaves the response uncached.
#[derive(Clone)]
pub(crate) struct GenerationCache {
  store: Arc<dyn CacheStore>,
  current: CurrentGeneration,
}

impl GenerationCache {
  pub fn new(store: Arc<dyn CacheStore>, current: CurrentGeneration) -> Self {
    Self { store, current }
  }

  pub async fn lookup(&self, key: &RequestKey) -> Option<CacheEntry> {
    let generation = self.current.get()?;
    match self.store.get(&generation, key).await {
      Ok(Some(entry)) => {
        debug!(key = %entry.key, generation = %entry.generation, "Cache hit");
        Some(entry)
      }
      Ok(None) => None,
      Err(err) => {
        warn!(%key, %generation, error = %err, "Cache read failed, treating as miss");
        None
      }
    }
  }

  /// Store a copy of `response` if it is cacheable.
  pub async fn refill(&self, key: &RequestKey, response: &Response) {
    if !response.is_ok() {
      debug!(%key, status = response.status, "Not caching error response");
      return;
    }
    let Some(generation) = self.current.get() else {
      debug!(%key, "No current generation, not caching");
      return;
    };
    if let Err(err) = self.store.put(&generation, key, response).await {
      warn!(%key, %generation, error = %err, "Cache write failed, serving uncached");
    }
  }
}
