//! The worker: one async handler per host event kind.

use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::cache::CacheStore;
use crate::clients::{ClientId, Clients};
use crate::config::WorkerConfig;
use crate::dispatch::Dispatcher;
use crate::error::{FetchError, LifecycleError, StoreError};
use crate::http::{Request, RequestKey};
use crate::lifecycle::{ActivationReport, CurrentGeneration, InstallReport, LifecycleController};
use crate::network::Network;
use crate::strategy::Served;

pub struct Worker {
  controller: LifecycleController,
  dispatcher: Dispatcher,
  store: Arc<dyn CacheStore>,
  clients: Clients,
  current: CurrentGeneration,
  skip_waiting: bool,
}

impl Worker {
  /// Build a worker for `config`, resuming from the store's current generation.
  pub async fn new(
    config: &WorkerConfig,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
  ) -> Result<Self, StoreError> {
    let current = CurrentGeneration::restore(store.as_ref()).await?;
    let clients = Clients::new();

    Ok(Self {
      controller: LifecycleController::new(
        config,
        store.clone(),
        network.clone(),
        current.clone(),
        clients.clone(),
      ),
      dispatcher: Dispatcher::new(store.clone(), network, current.clone()),
      store,
      clients,
      current,
      skip_waiting: config.skip_waiting,
    })
  }

  /// Install event: populate the generation, then ask for immediate promotion
  /// if configured to.
  pub async fn on_install(&self) -> Result<InstallReport, LifecycleError> {
    let report = self.controller.install().await?;
    if self.skip_waiting {
      self.controller.skip_waiting();
    }
    Ok(report)
  }

  /// Activate event: purge stale generations, then take over open clients.
  pub async fn on_activate(&self) -> Result<ActivationReport, LifecycleError> {
    let report = self.controller.activate().await?;
    self.controller.claim_clients()?;
    Ok(report)
  }

  /// Fetch event.
  pub async fn on_fetch(&self, request: Request) -> Result<Served, FetchError> {
    if let Some(client) = request.client_id.and_then(|id| self.clients.get(id)) {
      debug!(client = %client.id, controller = ?client.controller, "Fetch from client");
    }
    self.dispatcher.handle(&request).await
  }

  pub fn controller(&self) -> &LifecycleController {
    &self.controller
  }

  pub fn clients(&self) -> &Clients {
    &self.clients
  }

  pub fn current_generation(&self) -> Option<String> {
    self.current.get()
  }

  /// A page was opened. It is controlled by the current generation, if any.
  pub fn open_client(&self, url: Url) -> ClientId {
    self.clients.open(url, self.current.get())
  }

  /// Drop the cached entry for `url` from the current generation.
  pub async fn evict(&self, url: &Url) -> Result<bool, StoreError> {
    match self.current.get() {
      Some(generation) => self.store.delete(&generation, &RequestKey::get(url)).await,
      None => Ok(false),
    }
  }
}
