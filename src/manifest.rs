//! The shell manifest: the resources an offline bootstrap cannot do without.

use std::collections::HashSet;
use url::Url;

use crate::error::ManifestError;
use crate::http::RequestKey;

/// Ordered, de-duplicated list of absolute shell resource URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellManifest {
  resources: Vec<Url>,
}

impl ShellManifest {
  /// Resolve `locators` against `origin`.
  ///
  /// Locators may be absolute or relative (`/`, `/manifest.json`). Two
  /// locators with the same request identity are rejected rather than merged,
  /// since one of them is almost certainly a typo.
  pub fn resolve(origin: &Url, locators: &[String]) -> Result<Self, ManifestError> {
    let mut seen = HashSet::new();
    let mut resources = Vec::with_capacity(locators.len());

    for locator in locators {
      let url = origin
        .join(locator)
        .map_err(|e| ManifestError::InvalidLocator {
          locator: locator.clone(),
          reason: e.to_string(),
        })?;

      if !matches!(url.scheme(), "http" | "https") {
        return Err(ManifestError::InvalidLocator {
          locator: locator.clone(),
          reason: format!("unsupported scheme {}", url.scheme()),
        });
      }

      if !seen.insert(RequestKey::get(&url)) {
        return Err(ManifestError::Duplicate(url.to_string()));
      }
      resources.push(url);
    }

    Ok(Self { resources })
  }

  pub fn resources(&self) -> &[Url] {
    &self.resources
  }

  pub fn len(&self) -> usize {
    self.resources.len()
  }

  pub fn is_empty(&self) -> bool {
    self.resources.is_empty()
  }
}
