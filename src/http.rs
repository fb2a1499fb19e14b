//! Request and response primitives shared by the store, the network and the strategies.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::clients::ClientId;

/// Header fields in arrival order, names lowercased. A repeated header
/// (`link`, `vary`, `set-cookie`) keeps one field per value.
pub type Headers = Vec<(String, String)>;

/// How the page initiated a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Top-level document load
  Navigate,
  /// Script, stylesheet, image, font, fetch() call...
  #[default]
  SameOrigin,
}

/// An intercepted outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Headers,
  /// The page that issued the request, if known
  pub client_id: Option<ClientId>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      mode: RequestMode::default(),
      headers: Headers::new(),
      client_id: None,
    }
  }

  /// A sub-resource GET (script, stylesheet, image, ...).
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A top-level document load.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self
      .headers
      .push((name.to_ascii_lowercase(), value.to_string()));
    self
  }

  pub fn from_client(mut self, client_id: ClientId) -> Self {
    self.client_id = Some(client_id);
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Cache identity of this request. `None` for anything but GET.
  pub fn key(&self) -> Option<RequestKey> {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Normalized request identity used as the cache key.
///
/// Only GET requests are cacheable, so the method is implied. The URL is kept
/// without its fragment, which never reaches the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
  url: String,
}

impl RequestKey {
  /// Identity for `method url`, or `None` when the method is not GET.
  pub fn new(method: &Method, url: &Url) -> Option<Self> {
    if *method != Method::GET {
      return None;
    }
    Some(Self::get(url))
  }

  /// Identity of a GET for `url`.
  pub fn get(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self { url: url.into() }
  }

  /// Rebuild a key from a URL that was already normalized before storage.
  pub(crate) fn from_normalized(url: String) -> Self {
    Self { url }
  }

  pub fn method(&self) -> &'static str {
    "GET"
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// Stable, fixed-length hash for storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method(), self.url)
  }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self
      .headers
      .push((name.to_ascii_lowercase(), value.to_string()));
    self
  }

  /// First value of header `name`.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// 2xx status. Only these are written to the cache.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
