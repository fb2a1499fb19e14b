//! Install → activate lifecycle and generation ownership.
//!
//! The controller is the only component that creates or deletes generations.
//! A generation is written during install but only becomes current once
//! activation has promoted it, so fetch handling never sees a half-built one.

use futures::future::try_join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::error::{CacheDeletionError, LifecycleError, StoreError};
use crate::http::{Request, RequestKey, Response};
use crate::manifest::ShellManifest;
use crate::network::Network;

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Nothing installed yet
  Idle,
  /// Fetching and storing the shell
  Installing,
  /// Shell stored, waiting to be promoted
  Installed,
  /// Purging old generations
  Activating,
  /// Current generation, serving fetches
  Active,
  /// Install failed
  Redundant,
}

/// Shared pointer to the generation fetch handling reads and writes.
#[derive(Debug, Clone, Default)]
pub struct CurrentGeneration {
  inner: Arc<RwLock<Option<String>>>,
}

impl CurrentGeneration {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start from whatever generation the store last activated.
  pub async fn restore(store: &dyn CacheStore) -> Result<Self, StoreError> {
    let current = Self::new();
    if let Some(generation) = store.active_generation().await? {
      current.set(generation);
    }
    Ok(current)
  }

  pub fn get(&self) -> Option<String> {
    self
      .inner
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .clone()
  }

  fn set(&self, generation: String) {
    *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(generation);
  }
}

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub version: String,
  /// Number of shell resources stored
  pub resources: usize,
  /// Total body bytes stored
  pub bytes: u64,
}

/// Outcome of a successful activation.
#[derive(Debug)]
pub struct ActivationReport {
  pub version: String,
  /// Generation that was current before, if any
  pub previous: Option<String>,
  /// Stale generations that were deleted
  pub removed: Vec<String>,
  /// Stale generations that could not be deleted this time
  pub failed: Vec<CacheDeletionError>,
}

/// Drives one version of the worker through install and activation.
pub struct LifecycleController {
  version: String,
  manifest: ShellManifest,
  store: Arc<dyn CacheStore>,
  network: Arc<dyn Network>,
  current: CurrentGeneration,
  clients: Clients,
  state: Mutex<WorkerState>,
  skip_waiting: AtomicBool,
}

impl LifecycleController {
  pub fn new(
    config: &WorkerConfig,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    current: CurrentGeneration,
    clients: Clients,
  ) -> Self {
    Self {
      version: config.version.clone(),
      manifest: config.manifest.clone(),
      store,
      network,
      current,
      clients,
      state: Mutex::new(WorkerState::Idle),
      skip_waiting: AtomicBool::new(false),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn state(&self) -> WorkerState {
    *self.lock_state()
  }

  fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: WorkerState) {
    *self.lock_state() = state;
  }

  /// Move to `to` if the current state is one of `from`.
  fn transition(&self, from: &[WorkerState], to: WorkerState) -> Result<(), LifecycleError> {
    let mut state = self.lock_state();
    if !from.contains(&state) {
      return Err(LifecycleError::InvalidTransition { from: *state, to });
    }
    *state = to;
    Ok(())
  }

  /// Fetch the whole shell and store it as this version's generation.
  ///
  /// All-or-nothing: if any resource fails, nothing is written and the
  /// previously current generation is left alone.
  pub async fn install(&self) -> Result<InstallReport, LifecycleError> {
    self.transition(
      &[WorkerState::Idle, WorkerState::Redundant],
      WorkerState::Installing,
    )?;
    info!(
      version = %self.version,
      resources = self.manifest.len(),
      "Installing generation"
    );
    if self.manifest.is_empty() {
      warn!(version = %self.version, "Shell manifest is empty, nothing will be precached");
    }

    match self.populate().await {
      Ok(report) => {
        self.set_state(WorkerState::Installed);
        info!(
          version = %self.version,
          resources = report.resources,
          bytes = report.bytes,
          "Generation installed"
        );
        Ok(report)
      }
      Err(err) => {
        self.set_state(WorkerState::Redundant);
        warn!(version = %self.version, error = %err, "Install failed, previous generation kept");
        Err(err)
      }
    }
  }

  async fn populate(&self) -> Result<InstallReport, LifecycleError> {
    if let Some(report) = self.reuse_current().await {
      info!(version = %self.version, "Generation already current with this shell");
      return Ok(report);
    }

    let fetches = self
      .manifest
      .resources()
      .iter()
      .map(|url| self.fetch_shell_resource(url));
    let entries = try_join_all(fetches).await?;

    let report = InstallReport {
      version: self.version.clone(),
      resources: entries.len(),
      bytes: entries.iter().map(|(_, r)| r.body.len() as u64).sum(),
    };

    // Unknown counts as pre-existing so a failed write never deletes it.
    let pre_existing = self
      .store
      .generations()
      .await
      .map(|names| names.contains(&self.version))
      .unwrap_or(true);

    if let Err(source) = self.store.write_generation(&self.version, entries).await {
      if !pre_existing {
        if let Err(e) = self.store.delete_generation(&self.version).await {
          warn!(version = %self.version, error = %e, "Failed to discard partial generation");
        }
      }
      return Err(LifecycleError::CacheWrite {
        generation: self.version.clone(),
        source,
      });
    }

    Ok(report)
  }

  /// The live generation is never rewritten in place: reinstalling the
  /// current version with the same shell reuses what is stored.
  async fn reuse_current(&self) -> Option<InstallReport> {
    if self.current.get().as_deref() != Some(self.version.as_str()) {
      return None;
    }
    let stored = self.store.keys(&self.version).await.ok()?;
    let mut wanted: Vec<RequestKey> = self
      .manifest
      .resources()
      .iter()
      .map(RequestKey::get)
      .collect();
    wanted.sort();
    if stored != wanted {
      return None;
    }

    let mut bytes = 0;
    for key in &stored {
      let entry = self.store.get(&self.version, key).await.ok()??;
      bytes += entry.response.body.len() as u64;
    }
    Some(InstallReport {
      version: self.version.clone(),
      resources: stored.len(),
      bytes,
    })
  }

  async fn fetch_shell_resource(&self, url: &Url) -> Result<(RequestKey, Response), LifecycleError> {
    let request = Request::get(url.clone());
    let response = self
      .network
      .fetch(&request)
      .await
      .map_err(|e| LifecycleError::ManifestFetch {
        url: url.to_string(),
        reason: e.to_string(),
      })?;

    if !response.is_ok() {
      return Err(LifecycleError::ManifestFetch {
        url: url.to_string(),
        reason: format!("HTTP status {}", response.status),
      });
    }

    Ok((RequestKey::get(url), response))
  }

  /// Promote as soon as installed, without waiting for old clients to close.
  pub fn skip_waiting(&self) {
    if !self.skip_waiting.swap(true, Ordering::SeqCst) {
      info!(version = %self.version, "Skip waiting requested");
    }
  }

  /// Make this version current and delete every other generation.
  ///
  /// Only failing to read or promote storage is fatal; a stale generation
  /// that can't be deleted is reported and picked up by the next activation.
  pub async fn activate(&self) -> Result<ActivationReport, LifecycleError> {
    {
      let mut state = self.lock_state();
      if *state != WorkerState::Installed {
        return Err(LifecycleError::InvalidTransition {
          from: *state,
          to: WorkerState::Activating,
        });
      }
      if !self.skip_waiting.load(Ordering::SeqCst) {
        let waiting = self.clients.controlled_by_other(&self.version);
        if waiting > 0 {
          return Err(LifecycleError::WaitingForClients(waiting));
        }
      }
      *state = WorkerState::Activating;
    }
    info!(version = %self.version, "Activating generation");

    match self.promote().await {
      Ok(report) => {
        self.set_state(WorkerState::Active);
        info!(
          version = %self.version,
          removed = report.removed.len(),
          failed = report.failed.len(),
          "Generation active"
        );
        Ok(report)
      }
      Err(err) => {
        self.set_state(WorkerState::Installed);
        error!(version = %self.version, error = %err, "Activation failed");
        Err(err)
      }
    }
  }

  async fn promote(&self) -> Result<ActivationReport, LifecycleError> {
    let generations = self
      .store
      .generations()
      .await
      .map_err(LifecycleError::Enumerate)?;
    let previous = self.current.get();

    self
      .store
      .set_active_generation(&self.version)
      .await
      .map_err(|source| LifecycleError::Promote {
        generation: self.version.clone(),
        source,
      })?;
    self.current.set(self.version.clone());

    let mut removed = Vec::new();
    let mut failed = Vec::new();
    for generation in generations.into_iter().filter(|g| *g != self.version) {
      match self.store.delete_generation(&generation).await {
        Ok(_) => {
          info!(generation = %generation, "Deleted stale generation");
          removed.push(generation);
        }
        Err(source) => {
          let err = CacheDeletionError { generation, source };
          warn!(error = %err, "Stale generation kept until next activation");
          failed.push(err);
        }
      }
    }

    Ok(ActivationReport {
      version: self.version.clone(),
      previous,
      removed,
      failed,
    })
  }

  /// Take control of every open client. Returns how many changed controller.
  pub fn claim_clients(&self) -> Result<usize, LifecycleError> {
    let state = self.state();
    if state != WorkerState::Active {
      return Err(LifecycleError::NotActive(state));
    }
    if self.clients.is_empty() {
      debug!(version = %self.version, "No open clients to claim");
      return Ok(0);
    }
    let claimed = self.clients.claim(&self.version);
    info!(
      version = %self.version,
      claimed,
      open = self.clients.len(),
      "Claimed clients"
    );
    Ok(claimed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::testing::{url, FaultyStore, ScriptedNetwork, ORIGIN};

  fn worker_config(version: &str, shell: &[&str]) -> WorkerConfig {
    let shell: Vec<String> = shell.iter().map(|s| s.to_string()).collect();
    WorkerConfig {
      version: version.to_string(),
      manifest: ShellManifest::resolve(&Url::parse(ORIGIN).unwrap(), &shell).unwrap(),
      skip_waiting: true,
    }
  }

  fn shell_network() -> Arc<ScriptedNetwork> {
    let network = Arc::new(ScriptedNetwork::new());
    network.route("/", Response::new(200, "<html>home</html>"));
    network.route(
      "/manifest.json",
      Response::new(200, r#"{"name":"tasks"}"#).with_header("content-type", "application/json"),
    );
    network
  }

  fn controller(
    version: &str,
    store: Arc<dyn CacheStore>,
    network: Arc<ScriptedNetwork>,
    current: CurrentGeneration,
    clients: Clients,
  ) -> LifecycleController {
    LifecycleController::new(
      &worker_config(version, &["/", "/manifest.json"]),
      store,
      network,
      current,
      clients,
    )
  }

  async fn seed_active(store: &dyn CacheStore, current: &CurrentGeneration, version: &str) {
    store
      .write_generation(version, vec![(RequestKey::get(&url("/")), Response::new(200, "old"))])
      .await
      .unwrap();
    store.set_active_generation(version).await.unwrap();
    current.set(version.to_string());
  }

  #[tokio::test]
  async fn test_install_stores_exact_manifest() {
    let store = Arc::new(MemoryStore::new());
    let network = shell_network();
    let current = CurrentGeneration::new();
    let ctl = controller("v2", store.clone(), network.clone(), current.clone(), Clients::new());

    let report = ctl.install().await.unwrap();

    assert_eq!(ctl.state(), WorkerState::Installed);
    assert_eq!(report.resources, 2);
    assert_eq!(
      store.keys("v2").await.unwrap(),
      vec![RequestKey::get(&url("/")), RequestKey::get(&url("/manifest.json"))]
    );
    let home = store.get("v2", &RequestKey::get(&url("/"))).await.unwrap().unwrap();
    assert_eq!(home.response, Response::new(200, "<html>home</html>"));
    // Installed is not current yet.
    assert_eq!(current.get(), None);
    assert_eq!(store.active_generation().await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_failed_manifest_fetch_keeps_previous_generation() {
    let store = Arc::new(MemoryStore::new());
    let network = shell_network();
    let current = CurrentGeneration::new();
    seed_active(store.as_ref(), &current, "v1").await;
    network.fail("/manifest.json");

    let ctl = controller("v2", store.clone(), network.clone(), current.clone(), Clients::new());
    let err = ctl.install().await.unwrap_err();

    assert!(matches!(err, LifecycleError::ManifestFetch { ref url, .. } if url.ends_with("/manifest.json")));
    assert_eq!(ctl.state(), WorkerState::Redundant);
    assert_eq!(store.generations().await.unwrap(), vec!["v1"]);
    assert_eq!(store.active_generation().await.unwrap().as_deref(), Some("v1"));
    assert_eq!(current.get().as_deref(), Some("v1"));
    let old = store.get("v1", &RequestKey::get(&url("/"))).await.unwrap().unwrap();
    assert_eq!(old.response.body, b"old");
  }

  #[tokio::test]
  async fn test_error_status_fails_install() {
    let store = Arc::new(MemoryStore::new());
    let network = shell_network();
    network.route("/manifest.json", Response::new(500, "oops"));

    let ctl = controller("v2", store.clone(), network, CurrentGeneration::new(), Clients::new());
    let err = ctl.install().await.unwrap_err();

    assert!(matches!(err, LifecycleError::ManifestFetch { ref reason, .. } if reason.contains("500")));
    assert!(store.generations().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_can_be_retried_after_failure() {
    let store = Arc::new(MemoryStore::new());
    let network = shell_network();
    network.set_offline(true);

    let ctl = controller("v2", store.clone(), network.clone(), CurrentGeneration::new(), Clients::new());
    assert!(ctl.install().await.is_err());

    network.set_offline(false);
    ctl.install().await.unwrap();
    assert_eq!(ctl.state(), WorkerState::Installed);
  }

  #[tokio::test]
  async fn test_quota_failure_discards_generation() {
    let store = Arc::new(MemoryStore::new().with_quota(Some(4)));
    let ctl = controller("v2", store.clone(), shell_network(), CurrentGeneration::new(), Clients::new());

    let err = ctl.install().await.unwrap_err();

    assert!(matches!(err, LifecycleError::CacheWrite { .. }));
    assert!(store.generations().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_reinstalling_current_version_keeps_live_entries() {
    let store = Arc::new(MemoryStore::new());
    let network = shell_network();
    let current = CurrentGeneration::new();
    store
      .write_generation(
        "v1",
        vec![
          (RequestKey::get(&url("/")), Response::new(200, "live home")),
          (RequestKey::get(&url("/manifest.json")), Response::new(200, "{}")),
        ],
      )
      .await
      .unwrap();
    store.set_active_generation("v1").await.unwrap();
    current.set("v1".to_string());

    let ctl = controller("v1", store.clone(), network.clone(), current.clone(), Clients::new());
    let report = ctl.install().await.unwrap();

    assert_eq!(report.resources, 2);
    assert_eq!(report.bytes, 11);
    assert_eq!(network.hits("/"), 0);
    assert_eq!(network.hits("/manifest.json"), 0);
    let home = store.get("v1", &RequestKey::get(&url("/"))).await.unwrap().unwrap();
    assert_eq!(home.response.body, b"live home");

    let activated = ctl.activate().await.unwrap();
    assert!(activated.removed.is_empty());
    assert_eq!(current.get().as_deref(), Some("v1"));
  }

  #[tokio::test]
  async fn test_reinstalling_current_version_with_new_shell_refetches() {
    let store = Arc::new(MemoryStore::new());
    let network = shell_network();
    let current = CurrentGeneration::new();
    seed_active(store.as_ref(), &current, "v1").await;

    let ctl = controller("v1", store.clone(), network.clone(), current.clone(), Clients::new());
    ctl.install().await.unwrap();

    assert_eq!(network.hits("/manifest.json"), 1);
    assert_eq!(store.keys("v1").await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_activate_leaves_exactly_one_generation() {
    let store = Arc::new(MemoryStore::new());
    let current = CurrentGeneration::new();
    seed_active(store.as_ref(), &current, "v1").await;
    store.write_generation("v0", Vec::new()).await.unwrap();

    let ctl = controller("v2", store.clone(), shell_network(), current.clone(), Clients::new());
    ctl.install().await.unwrap();
    let report = ctl.activate().await.unwrap();

    assert_eq!(ctl.state(), WorkerState::Active);
    assert_eq!(report.previous.as_deref(), Some("v1"));
    assert_eq!(report.removed, vec!["v0", "v1"]);
    assert!(report.failed.is_empty());
    assert_eq!(store.generations().await.unwrap(), vec!["v2"]);
    assert_eq!(store.active_generation().await.unwrap().as_deref(), Some("v2"));
    assert_eq!(current.get().as_deref(), Some("v2"));
  }

  #[tokio::test]
  async fn test_activate_before_install_is_invalid() {
    let ctl = controller(
      "v2",
      Arc::new(MemoryStore::new()),
      shell_network(),
      CurrentGeneration::new(),
      Clients::new(),
    );

    let err = ctl.activate().await.unwrap_err();
    assert!(matches!(
      err,
      LifecycleError::InvalidTransition {
        from: WorkerState::Idle,
        to: WorkerState::Activating
      }
    ));
  }

  #[tokio::test]
  async fn test_activation_waits_for_old_clients_unless_skipped() {
    let store = Arc::new(MemoryStore::new());
    let current = CurrentGeneration::new();
    let clients = Clients::new();
    seed_active(store.as_ref(), &current, "v1").await;
    clients.open(url("/"), Some("v1".to_string()));

    let ctl = controller("v2", store.clone(), shell_network(), current.clone(), clients.clone());
    ctl.install().await.unwrap();

    let err = ctl.activate().await.unwrap_err();
    assert!(matches!(err, LifecycleError::WaitingForClients(1)));
    assert_eq!(ctl.state(), WorkerState::Installed);
    assert_eq!(current.get().as_deref(), Some("v1"));

    ctl.skip_waiting();
    ctl.activate().await.unwrap();
    assert_eq!(current.get().as_deref(), Some("v2"));
  }

  #[tokio::test]
  async fn test_deletion_failure_is_not_fatal_and_retried() {
    let store = Arc::new(FaultyStore::new());
    let current = CurrentGeneration::new();
    seed_active(store.as_ref(), &current, "v1").await;
    store.make_undeletable("v1");

    let ctl = controller("v2", store.clone(), shell_network(), current.clone(), Clients::new());
    ctl.install().await.unwrap();
    let report = ctl.activate().await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].generation, "v1");
    assert_eq!(current.get().as_deref(), Some("v2"));
    assert_eq!(store.generations().await.unwrap(), vec!["v1", "v2"]);

    // The next activation picks the leftover up.
    store.make_deletable("v1");
    let next = controller("v3", store.clone(), shell_network(), current.clone(), Clients::new());
    next.install().await.unwrap();
    let report = next.activate().await.unwrap();
    assert_eq!(report.removed, vec!["v1", "v2"]);
    assert_eq!(store.generations().await.unwrap(), vec!["v3"]);
  }

  #[tokio::test]
  async fn test_enumeration_failure_keeps_previous_current() {
    let store = Arc::new(FaultyStore::new());
    let current = CurrentGeneration::new();
    seed_active(store.as_ref(), &current, "v1").await;

    let ctl = controller("v2", store.clone(), shell_network(), current.clone(), Clients::new());
    ctl.install().await.unwrap();
    store.fail_enumerate(true);

    let err = ctl.activate().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Enumerate(_)));
    assert_eq!(ctl.state(), WorkerState::Installed);
    assert_eq!(current.get().as_deref(), Some("v1"));
    assert_eq!(store.active_generation().await.unwrap().as_deref(), Some("v1"));

    store.fail_enumerate(false);
    ctl.activate().await.unwrap();
    assert_eq!(current.get().as_deref(), Some("v2"));
  }

  #[tokio::test]
  async fn test_claim_clients_requires_active() {
    let clients = Clients::new();
    let old = clients.open(url("/"), Some("v1".to_string()));
    let uncontrolled = clients.open(url("/today"), None);

    let ctl = controller(
      "v2",
      Arc::new(MemoryStore::new()),
      shell_network(),
      CurrentGeneration::new(),
      clients.clone(),
    );
    assert!(matches!(
      ctl.claim_clients(),
      Err(LifecycleError::NotActive(WorkerState::Idle))
    ));

    ctl.skip_waiting();
    ctl.install().await.unwrap();
    ctl.activate().await.unwrap();

    assert_eq!(ctl.claim_clients().unwrap(), 2);
    assert_eq!(clients.get(old).unwrap().controller.as_deref(), Some("v2"));
    assert_eq!(clients.get(uncontrolled).unwrap().controller.as_deref(), Some("v2"));
  }

  #[tokio::test]
  async fn test_restore_reads_persisted_pointer() {
    let store = MemoryStore::new();
    store.write_generation("v7", Vec::new()).await.unwrap();
    store.set_active_generation("v7").await.unwrap();

    let current = CurrentGeneration::restore(&store).await.unwrap();
    assert_eq!(current.get().as_deref(), Some("v7"));
  }
}
