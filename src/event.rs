//! The host side: lifecycle and fetch events delivered to the worker.
//!
//! Every event runs on its own task and answers through a one-shot reply.
//! That task is what keeps a lifecycle transition alive until all of its
//! fetches, writes and deletions are done; dropping the reply does not cancel
//! it.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{FetchError, HostError, LifecycleError};
use crate::http::Request;
use crate::lifecycle::{ActivationReport, InstallReport};
use crate::strategy::Served;
use crate::worker::Worker;

/// Events the host delivers to the worker
#[derive(Debug)]
pub enum HostEvent {
  Install {
    reply: oneshot::Sender<Result<InstallReport, LifecycleError>>,
  },
  Activate {
    reply: oneshot::Sender<Result<ActivationReport, LifecycleError>>,
  },
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<Served, FetchError>>,
  },
}

/// Handle for sending events to a running worker.
#[derive(Clone)]
pub struct WorkerHost {
  tx: mpsc::UnboundedSender<HostEvent>,
}

impl WorkerHost {
  /// Start delivering events to `worker`. The delivery loop stops once every
  /// handle is dropped.
  pub fn new(worker: Arc<Worker>) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        let worker = Arc::clone(&worker);
        tokio::spawn(deliver(worker, event));
      }
      debug!("Worker host stopped");
    });

    Self { tx }
  }

  fn send(&self, event: HostEvent) -> Result<(), HostError> {
    self.tx.send(event).map_err(|_| HostError::Stopped)
  }

  pub async fn install(&self) -> Result<InstallReport, HostError> {
    let (reply, rx) = oneshot::channel();
    self.send(HostEvent::Install { reply })?;
    Ok(rx.await.map_err(|_| HostError::Stopped)??)
  }

  pub async fn activate(&self) -> Result<ActivationReport, HostError> {
    let (reply, rx) = oneshot::channel();
    self.send(HostEvent::Activate { reply })?;
    Ok(rx.await.map_err(|_| HostError::Stopped)??)
  }

  /// Intercept one request, suspending until a strategy answers.
  pub async fn fetch(&self, request: Request) -> Result<Served, HostError> {
    let (reply, rx) = oneshot::channel();
    self.send(HostEvent::Fetch { request, reply })?;
    Ok(rx.await.map_err(|_| HostError::Stopped)??)
  }
}

async fn deliver(worker: Arc<Worker>, event: HostEvent) {
  // A closed reply channel just means nobody is waiting any more.
  match event {
    HostEvent::Install { reply } => {
      let _ = reply.send(worker.on_install().await);
    }
    HostEvent::Activate { reply } => {
      let _ = reply.send(worker.on_activate().await);
    }
    HostEvent::Fetch { request, reply } => {
      let _ = reply.send(worker.on_fetch(request).await);
    }
  }
}
