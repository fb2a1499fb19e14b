//! Cache first, refilling from the network on a miss. Used for
//! sub-resources, whose build-fingerprinted URLs make any entry in the
//! current generation correct.

use std::sync::Arc;

use super::{GenerationCache, Served};
use crate::error::FetchError;
use crate::http::{Request, RequestKey};
use crate::network::Network;

pub struct CacheFirst {
  network: Arc<dyn Network>,
  cache: GenerationCache,
}

impl CacheFirst {
  pub(crate) fn new(network: Arc<dyn Network>, cache: GenerationCache) -> Self {
    Self { network, cache }
  }

  /// A hit never touches the network. A miss that can't reach the network
  /// fails; an HTML fallback would corrupt a script or stylesheet.
  pub async fn respond(&self, request: &Request, key: &RequestKey) -> Result<Served, FetchError> {
    if let Some(entry) = self.cache.lookup(key).await {
      return Ok(Served::from_cache(entry));
    }

    let response = self.network.fetch(request).await?;
    self.cache.refill(key, &response).await;
    Ok(Served::from_network(response))
  }
}
