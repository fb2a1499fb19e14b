//! In-memory cache store, for tests and hosts without persistent storage.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::traits::{CacheEntry, CacheStore};
use crate::error::StoreError;
use crate::http::{RequestKey, Response};

#[derive(Debug, Default)]
struct State {
  generations: BTreeMap<String, HashMap<RequestKey, CacheEntry>>,
  active: Option<String>,
}

impl State {
  fn used_bytes(&self) -> u64 {
    self
      .generations
      .values()
      .flat_map(|entries| entries.values())
      .map(|entry| entry.response.body.len() as u64)
      .sum()
  }

  /// Bytes currently held by `keys` in `generation`, i.e. what a write of
  /// those keys would free.
  fn replaced_bytes<'a>(
    &self,
    generation: &str,
    keys: impl Iterator<Item = &'a RequestKey>,
  ) -> u64 {
    let Some(entries) = self.generations.get(generation) else {
      return 0;
    };
    keys
      .filter_map(|key| entries.get(key))
      .map(|entry| entry.response.body.len() as u64)
      .sum()
  }
}

/// Cache store backed by a `RwLock`ed map.
#[derive(Debug, Default)]
pub struct MemoryStore {
  state: RwLock<State>,
  quota: Option<u64>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Limit the total size of stored bodies, in bytes.
  pub fn with_quota(mut self, quota: Option<u64>) -> Self {
    self.quota = quota;
    self
  }

  fn check_quota(&self, used: u64, freed: u64, added: u64) -> Result<(), StoreError> {
    if let Some(quota) = self.quota {
      let needed = used.saturating_sub(freed) + added;
      if needed > quota {
        return Err(StoreError::QuotaExceeded { needed, quota });
      }
    }
    Ok(())
  }
}

fn entry(generation: &str, key: RequestKey, response: Response) -> CacheEntry {
  CacheEntry {
    key,
    response,
    generation: generation.to_string(),
    cached_at: Utc::now(),
  }
}

#[async_trait]
impl CacheStore for MemoryStore {
  async fn generations(&self) -> Result<Vec<String>, StoreError> {
    Ok(self.state.read().await.generations.keys().cloned().collect())
  }

  async fn write_generation(
    &self,
    generation: &str,
    entries: Vec<(RequestKey, Response)>,
  ) -> Result<(), StoreError> {
    let mut state = self.state.write().await;

    let added: u64 = entries.iter().map(|(_, r)| r.body.len() as u64).sum();
    let freed = state.replaced_bytes(generation, entries.iter().map(|(k, _)| k));
    self.check_quota(state.used_bytes(), freed, added)?;

    let target = state
      .generations
      .entry(generation.to_string())
      .or_default();
    for (key, response) in entries {
      target.insert(key.clone(), entry(generation, key, response));
    }
    Ok(())
  }

  async fn put(
    &self,
    generation: &str,
    key: &RequestKey,
    response: &Response,
  ) -> Result<(), StoreError> {
    let mut state = self.state.write().await;
    if !state.generations.contains_key(generation) {
      return Err(StoreError::UnknownGeneration(generation.to_string()));
    }

    let freed = state.replaced_bytes(generation, std::iter::once(key));
    self.check_quota(state.used_bytes(), freed, response.body.len() as u64)?;

    if let Some(target) = state.generations.get_mut(generation) {
      target.insert(key.clone(), entry(generation, key.clone(), response.clone()));
    }
    Ok(())
  }

  async fn get(
    &self,
    generation: &str,
    key: &RequestKey,
  ) -> Result<Option<CacheEntry>, StoreError> {
    let state = self.state.read().await;
    Ok(
      state
        .generations
        .get(generation)
        .and_then(|entries| entries.get(key))
        .cloned(),
    )
  }

  async fn delete(&self, generation: &str, key: &RequestKey) -> Result<bool, StoreError> {
    let mut state = self.state.write().await;
    Ok(
      state
        .generations
        .get_mut(generation)
        .is_some_and(|entries| entries.remove(key).is_some()),
    )
  }

  async fn keys(&self, generation: &str) -> Result<Vec<RequestKey>, StoreError> {
    let state = self.state.read().await;
    let entries = state
      .generations
      .get(generation)
      .ok_or_else(|| StoreError::UnknownGeneration(generation.to_string()))?;
    let mut keys: Vec<RequestKey> = entries.keys().cloned().collect();
    keys.sort();
    Ok(keys)
  }

  async fn delete_generation(&self, generation: &str) -> Result<bool, StoreError> {
    let mut state = self.state.write().await;
    if state.active.as_deref() == Some(generation) {
      state.active = None;
    }
    Ok(state.generations.remove(generation).is_some())
  }

  async fn active_generation(&self) -> Result<Option<String>, StoreError> {
    Ok(self.state.read().await.active.clone())
  }

  async fn set_active_generation(&self, generation: &str) -> Result<(), StoreError> {
    let mut state = self.state.write().await;
    if !state.generations.contains_key(generation) {
      return Err(StoreError::UnknownGeneration(generation.to_string()));
    }
    state.active = Some(generation.to_string());
    Ok(())
  }
}
