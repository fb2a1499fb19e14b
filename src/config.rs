use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::manifest::ShellManifest;

/// Version identifier used when the config file doesn't name one.
pub const DEFAULT_VERSION: &str = "v1";

/// Shell resources cached when the config file doesn't list any.
pub const DEFAULT_SHELL: &[&str] = &["/", "/manifest.json"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Version identifier. Bump it to roll out a new generation.
  #[serde(default = "default_version")]
  pub version: String,
  /// Origin that relative shell locators are resolved against
  pub origin: String,
  /// Ordered shell manifest
  #[serde(default = "default_shell")]
  pub shell: Vec<String>,
  /// Promote a freshly installed generation without waiting for old clients
  #[serde(default = "default_skip_waiting")]
  pub skip_waiting: bool,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database file (default: $XDG_DATA_HOME/shellcache/cache.db)
  pub path: Option<PathBuf>,
  /// Upper bound on stored response bodies, in bytes
  pub quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
  /// Transport timeout. Unset means the client's defaults.
  pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Filter directive used when SHELLCACHE_LOG is not set (e.g. "debug")
  pub level: Option<String>,
  /// Directory for the rolling log file
  pub dir: Option<PathBuf>,
}

fn default_version() -> String {
  DEFAULT_VERSION.to_string()
}

fn default_shell() -> Vec<String> {
  DEFAULT_SHELL.iter().map(|s| s.to_string()).collect()
}

fn default_skip_waiting() -> bool {
  true
}

/// The part of the configuration the worker itself is built from.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub version: String,
  pub manifest: ShellManifest,
  pub skip_waiting: bool,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if p.exists() => p.to_path_buf(),
      Some(p) => return Err(eyre!("Config file not found: {}", p.display())),
      None => Self::config_candidates()
        .into_iter()
        .find(|candidate| candidate.exists())
        .ok_or_else(|| {
          eyre!(
            "No configuration file found. Create one at ~/.config/shellcache/config.yaml \
             with at least an `origin:` entry."
          )
        })?,
    };
    Self::load_from_path(&path)
  }

  /// Implicit config locations, most specific first.
  fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from("shellcache.yaml")];
    if let Some(config_dir) = dirs::config_dir() {
      candidates.push(config_dir.join("shellcache").join("config.yaml"));
    }
    candidates
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to load config file {}: {}", path.display(), e))
  }

  /// Parse and validate a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Invalid config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(eyre!("`version` must not be empty"));
    }
    self.origin()?;
    Ok(())
  }

  pub fn origin(&self) -> Result<Url> {
    let origin =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;
    if !matches!(origin.scheme(), "http" | "https") {
      return Err(eyre!("Origin must be http or https, got {}", self.origin));
    }
    Ok(origin)
  }

  /// Resolve a path or URL typed by the user against the origin.
  pub fn resolve(&self, locator: &str) -> Result<Url> {
    self
      .origin()?
      .join(locator)
      .map_err(|e| eyre!("Invalid URL {}: {}", locator, e))
  }

  pub fn worker_config(&self) -> Result<WorkerConfig> {
    let manifest = ShellManifest::resolve(&self.origin()?, &self.shell)?;
    Ok(WorkerConfig {
      version: self.version.clone(),
      manifest,
      skip_waiting: self.skip_waiting,
    })
  }

  pub fn network_timeout(&self) -> Option<Duration> {
    self.network.timeout_secs.map(Duration::from_secs)
  }

  /// Database path, explicit or under the user's data directory.
  pub fn storage_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => Ok(data_dir()?.join("cache.db")),
    }
  }

  pub fn log_dir(&self) -> Result<PathBuf> {
    match &self.log.dir {
      Some(dir) => Ok(dir.clone()),
      None => Ok(data_dir()?.join("logs")),
    }
  }
}

fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("shellcache"))
}
