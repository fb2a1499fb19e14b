//! Classifies intercepted requests and hands them to a strategy.

use reqwest::Method;
use std::sync::Arc;
use tracing::debug;

use crate::cache::CacheStore;
use crate::error::FetchError;
use crate::http::Request;
use crate::lifecycle::CurrentGeneration;
use crate::network::Network;
use crate::strategy::{CacheFirst, GenerationCache, NetworkFirst, Served};

/// How a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Straight to the network, never cached
  Passthrough,
  /// Top-level document: network first
  Navigation,
  /// Script, stylesheet, image, font...: cache first
  SubResource,
}

pub fn classify(request: &Request) -> Route {
  if request.method != Method::GET || !matches!(request.url.scheme(), "http" | "https") {
    return Route::Passthrough;
  }
  if request.is_navigation() {
    Route::Navigation
  } else {
    Route::SubResource
  }
}

pub struct Dispatcher {
  network: Arc<dyn Network>,
  network_first: NetworkFirst,
  cache_first: CacheFirst,
}

impl Dispatcher {
  pub fn new(
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    current: CurrentGeneration,
  ) -> Self {
    let cache = GenerationCache::new(store, current);
    Self {
      network_first: NetworkFirst::new(network.clone(), cache.clone()),
      cache_first: CacheFirst::new(network.clone(), cache),
      network,
    }
  }

  /// Resolve one intercepted request. Only a sub-resource or passthrough
  /// request that can't reach the network fails.
  pub async fn handle(&self, request: &Request) -> Result<Served, FetchError> {
    let route = classify(request);
    debug!(
      method = %request.method,
      url = %request.url,
      client = ?request.client_id,
      ?route,
      "Intercepted request"
    );

    match (route, request.key()) {
      (Route::Navigation, Some(key)) => Ok(self.network_first.respond(request, &key).await),
      (Route::SubResource, Some(key)) => self.cache_first.respond(request, &key).await,
      _ => {
        let response = self.network.fetch(request).await?;
        Ok(Served::from_network(response))
      }
    }
  }
}
