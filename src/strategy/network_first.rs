//! Network first, falling back to the cache and then the offline document.
//! Used for navigations, which are never fingerprinted and must be fresh
//! whenever the network is reachable.

use std::sync::Arc;
use tracing::debug;

use super::{GenerationCache, Served};
use crate::http::{Request, RequestKey, Response};
use crate::network::Network;

/// The document served when a navigation fails and nothing is cached.
pub const OFFLINE_DOCUMENT: &str = include_str!("../offline.html");

pub fn offline_response() -> Response {
  Response::new(200, OFFLINE_DOCUMENT).with_header("content-type", "text/html; charset=utf-8")
}

pub struct NetworkFirst {
  network: Arc<dyn Network>,
  cache: GenerationCache,
}

impl NetworkFirst {
  pub(crate) fn new(network: Arc<dyn Network>, cache: GenerationCache) -> Self {
    Self { network, cache }
  }

  /// Always resolves. No retries and no timeout beyond the transport's.
  pub async fn respond(&self, request: &Request, key: &RequestKey) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => {
        // Latest network response wins.
        self.cache.refill(key, &response).await;
        Served::from_network(response)
      }
      Err(err) => {
        debug!(%key, error = %err, "Navigation failed, falling back to cache");
        match self.cache.lookup(key).await {
          Some(entry) => Served::from_cache(entry),
          None => Served::offline(),
        }
      }
    }
  }
}
