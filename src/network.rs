//! The transport seam between the worker and the real network.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::NetworkError;
use crate::http::{Headers, Request, Response};

/// Something that can perform a request.
///
/// Implementations resolve with a fully-read response for any HTTP status and
/// fail only on transport errors.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Network backed by a reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  /// Build a client. Without `timeout` only the transport's own limits apply.
  pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    Ok(Self {
      client: builder.build()?,
    })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| transport_error(&request.url, e))?;

    let status = response.status().as_u16();
    let headers: Headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| match value.to_str() {
        Ok(v) => Some((name.as_str().to_string(), v.to_string())),
        Err(_) => {
          debug!(url = %request.url, header = %name, "Dropping non-UTF-8 header value");
          None
        }
      })
      .collect();

    // The body is read to the end before anyone can cache it.
    let body = response
      .bytes()
      .await
      .map_err(|e| transport_error(&request.url, e))?
      .to_vec();

    debug!(url = %request.url, status, bytes = body.len(), "network response");
    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

fn transport_error(url: &Url, err: reqwest::Error) -> NetworkError {
  if err.is_timeout() {
    NetworkError::Timeout {
      url: url.to_string(),
    }
  } else {
    NetworkError::Unavailable {
      url: url.to_string(),
      reason: err.to_string(),
    }
  }
}
