//! Error types for the worker.
//!
//! None of these reach the application as exceptions. The lifecycle errors are
//! reported to the host, the rest are either logged or turned into a fallback.

use thiserror::Error;

use crate::lifecycle::WorkerState;

/// Failures of a cache store backend.
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("Generation {0} does not exist")]
  UnknownGeneration(String),

  #[error("Storage quota exceeded: {needed} bytes needed, {quota} allowed")]
  QuotaExceeded { needed: u64, quota: u64 },

  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("Failed to serialize cached response: {0}")]
  Serde(#[from] serde_json::Error),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Corrupt cache entry: {0}")]
  Corrupt(String),

  #[error("Storage lock poisoned")]
  LockPoisoned,
}

/// Transport failures. An HTTP error status is not one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
  #[error("Network unavailable for {url}: {reason}")]
  Unavailable { url: String, reason: String },

  #[error("Request to {url} timed out")]
  Timeout { url: String },
}

/// A stale generation that could not be removed during activation.
#[derive(Error, Debug)]
#[error("Failed to delete generation {generation}: {source}")]
pub struct CacheDeletionError {
  pub generation: String,
  #[source]
  pub source: StoreError,
}

/// Lifecycle failures surfaced to the host.
#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("Failed to fetch shell resource {url}: {reason}")]
  ManifestFetch { url: String, reason: String },

  #[error("Failed to write generation {generation}: {source}")]
  CacheWrite {
    generation: String,
    #[source]
    source: StoreError,
  },

  #[error("Failed to enumerate generations: {0}")]
  Enumerate(#[source] StoreError),

  #[error("Failed to promote generation {generation}: {source}")]
  Promote {
    generation: String,
    #[source]
    source: StoreError,
  },

  #[error("Invalid lifecycle transition from {from:?} to {to:?}")]
  InvalidTransition { from: WorkerState, to: WorkerState },

  #[error("{0} client(s) still controlled by an older generation")]
  WaitingForClients(usize),

  #[error("Worker is {0:?}, not active")]
  NotActive(WorkerState),
}

/// A fetch that could not be answered at all.
#[derive(Error, Debug)]
pub enum FetchError {
  #[error(transparent)]
  NetworkUnavailable(#[from] NetworkError),
}

/// A shell manifest that cannot be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
  #[error("Invalid shell resource '{locator}': {reason}")]
  InvalidLocator { locator: String, reason: String },

  #[error("Duplicate shell resource {0}")]
  Duplicate(String),
}

/// Failures reported by the worker host to whoever sent the event.
#[derive(Error, Debug)]
pub enum HostError {
  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error("Worker host has stopped")]
  Stopped,
}
