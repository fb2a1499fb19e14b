//! Test doubles shared by the module tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::cache::{CacheEntry, CacheStore, MemoryStore};
use crate::error::{NetworkError, StoreError};
use crate::http::{Request, RequestKey, Response};
use crate::network::Network;

pub const ORIGIN: &str = "https://app.test";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Network that answers from a fixed route table and counts requests.
#[derive(Default)]
pub struct ScriptedNetwork {
  routes: Mutex<HashMap<String, Response>>,
  failing: Mutex<HashSet<String>>,
  offline: AtomicBool,
  hits: Mutex<HashMap<String, usize>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(&self, path: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), response);
  }

  /// Make requests for `path` fail at the transport level.
  pub fn fail(&self, path: &str) {
    self.failing.lock().unwrap().insert(url(path).to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn hits(&self, path: &str) -> usize {
    self
      .hits
      .lock()
      .unwrap()
      .get(url(path).as_str())
      .copied()
      .unwrap_or(0)
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let target = request.url.to_string();
    *self.hits.lock().unwrap().entry(target.clone()).or_default() += 1;

    let failing = self.failing.lock().unwrap().contains(&target);
    if self.offline.load(Ordering::SeqCst) || failing {
      return Err(NetworkError::Unavailable {
        url: target,
        reason: "connection refused".to_string(),
      });
    }

    Ok(
      self
        .routes
        .lock()
        .unwrap()
        .get(&target)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}

/// Memory store whose enumeration and generation deletion can be made to fail.
#[derive(Default)]
pub struct FaultyStore {
  pub inner: MemoryStore,
  fail_enumerate: AtomicBool,
  undeletable: Mutex<HashSet<String>>,
}

impl FaultyStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_enumerate(&self, fail: bool) {
    self.fail_enumerate.store(fail, Ordering::SeqCst);
  }

  pub fn make_undeletable(&self, generation: &str) {
    self
      .undeletable
      .lock()
      .unwrap()
      .insert(generation.to_string());
  }

  pub fn make_deletable(&self, generation: &str) {
    self.undeletable.lock().unwrap().remove(generation);
  }
}

fn io_failure() -> StoreError {
  StoreError::Io(std::io::Error::new(
    std::io::ErrorKind::PermissionDenied,
    "storage unavailable",
  ))
}

#[async_trait]
impl CacheStore for FaultyStore {
  async fn generations(&self) -> Result<Vec<String>, StoreError> {
    if self.fail_enumerate.load(Ordering::SeqCst) {
      return Err(io_failure());
    }
    self.inner.generations().await
  }

  async fn write_generation(
    &self,
    generation: &str,
    entries: Vec<(RequestKey, Response)>,
  ) -> Result<(), StoreError> {
    self.inner.write_generation(generation, entries).await
  }

  async fn put(
    &self,
    generation: &str,
    key: &RequestKey,
    response: &Response,
  ) -> Result<(), StoreError> {
    self.inner.put(generation, key, response).await
  }

  async fn get(
    &self,
    generation: &str,
    key: &RequestKey,
  ) -> Result<Option<CacheEntry>, StoreError> {
    self.inner.get(generation, key).await
  }

  async fn delete(&self, generation: &str, key: &RequestKey) -> Result<bool, StoreError> {
    self.inner.delete(generation, key).await
  }

  async fn keys(&self, generation: &str) -> Result<Vec<RequestKey>, StoreError> {
    self.inner.keys(generation).await
  }

  async fn delete_generation(&self, generation: &str) -> Result<bool, StoreError> {
    let blocked = self.undeletable.lock().unwrap().contains(generation);
    if blocked {
      return Err(io_failure());
    }
    self.inner.delete_generation(generation).await
  }

  async fn active_generation(&self) -> Result<Option<String>, StoreError> {
    self.inner.active_generation().await
  }

  async fn set_active_generation(&self, generation: &str) -> Result<(), StoreError> {
    self.inner.set_active_generation(generation).await
  }
}
