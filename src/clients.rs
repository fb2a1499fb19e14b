//! Open clients (pages) and the generation that controls each one.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use url::Url;

/// Unique identifier for an open client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
  fn next() -> Self {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    Self(COUNTER.fetch_add(1, Ordering::Relaxed))
  }
}

impl fmt::Display for ClientId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "client-{}", self.0)
  }
}

/// A page the worker may control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
  pub id: ClientId,
  pub url: Url,
  /// Generation serving this client, `None` if uncontrolled
  pub controller: Option<String>,
}

/// Shared registry of open clients.
#[derive(Debug, Clone, Default)]
pub struct Clients {
  inner: Arc<Mutex<HashMap<ClientId, Client>>>,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, Client>> {
    // Entries are plain data, a panicked writer cannot leave them half-updated.
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Register a newly opened page.
  pub fn open(&self, url: Url, controller: Option<String>) -> ClientId {
    let id = ClientId::next();
    self.lock().insert(
      id,
      Client {
        id,
        url,
        controller,
      },
    );
    id
  }

  /// Forget a closed page.
  pub fn close(&self, id: ClientId) -> Option<Client> {
    self.lock().remove(&id)
  }

  pub fn get(&self, id: ClientId) -> Option<Client> {
    self.lock().get(&id).cloned()
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Clients still served by a generation other than `generation`.
  /// Uncontrolled clients don't count.
  pub fn controlled_by_other(&self, generation: &str) -> usize {
    self
      .lock()
      .values()
      .filter(|c| c.controller.as_deref().is_some_and(|g| g != generation))
      .count()
  }

  /// Make `generation` the controller of every open client. Returns how many
  /// clients changed controller.
  pub fn claim(&self, generation: &str) -> usize {
    let mut clients = self.lock();
    let mut claimed = 0;
    for client in clients.values_mut() {
      if client.controller.as_deref() != Some(generation) {
        debug!(
          client = %client.id,
          url = %client.url,
          from = ?client.controller,
          to = generation,
          "Claiming client"
        );
        client.controller = Some(generation.to_string());
        claimed += 1;
      }
    }
    claimed
  }
}
