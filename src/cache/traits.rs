//! Core trait and types for the generation-scoped cache store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::http::{RequestKey, Response};

/// A cached response owned by one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub key: RequestKey,
  pub response: Response,
  /// Identifier of the generation this entry belongs to
  pub generation: String,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Async store of request identity → response, namespaced by generation.
///
/// Every method is a self-contained operation. Callers never hold the store
/// across awaits, so concurrent handlers can share one instance; writes to
/// the same key are last-write-wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
  /// Identifiers of all stored generations.
  async fn generations(&self) -> Result<Vec<String>, StoreError>;

  /// Create `generation` if needed and write all `entries` into it in one
  /// transaction. Either every entry is stored or none is.
  async fn write_generation(
    &self,
    generation: &str,
    entries: Vec<(RequestKey, Response)>,
  ) -> Result<(), StoreError>;

  /// Insert or overwrite one entry. Fails with `UnknownGeneration` instead of
  /// creating a missing generation.
  async fn put(
    &self,
    generation: &str,
    key: &RequestKey,
    response: &Response,
  ) -> Result<(), StoreError>;

  /// Look up one entry. A missing generation is a miss.
  async fn get(&self, generation: &str, key: &RequestKey)
    -> Result<Option<CacheEntry>, StoreError>;

  /// Remove one entry, returning whether it existed.
  async fn delete(&self, generation: &str, key: &RequestKey) -> Result<bool, StoreError>;

  /// Keys stored in `generation`, ordered by URL.
  async fn keys(&self, generation: &str) -> Result<Vec<RequestKey>, StoreError>;

  /// Remove a generation and all of its entries, returning whether it existed.
  async fn delete_generation(&self, generation: &str) -> Result<bool, StoreError>;

  /// The persisted current generation, if any has been activated.
  async fn active_generation(&self) -> Result<Option<String>, StoreError>;

  /// Persist `generation` as current. It must exist.
  async fn set_active_generation(&self, generation: &str) -> Result<(), StoreError>;
}
