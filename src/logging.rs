use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

/// Environment variable holding a filter directive, e.g. `shellcache=debug`.
pub const LOG_ENV: &str = "SHELLCACHE_LOG";

const LOG_FILE: &str = "shellcache.log";

/// Install the global subscriber: a daily rolling file under the log
/// directory, plus stderr when `verbose` is set.
///
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init(config: &Config, verbose: bool) -> Result<WorkerGuard> {
  let dir = config.log_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, LOG_FILE));

  let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
  let stderr_layer = verbose.then(|| fmt::layer().compact().with_writer(std::io::stderr));

  tracing_subscriber::registry()
    .with(filter(config)?)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}

/// `SHELLCACHE_LOG` wins over the configured level; `info` otherwise.
fn filter(config: &Config) -> Result<EnvFilter> {
  if let Ok(directive) = std::env::var(LOG_ENV) {
    return EnvFilter::try_new(&directive).map_err(|e| eyre!("Invalid {}: {}", LOG_ENV, e));
  }
  let level = config.log.level.as_deref().unwrap_or("info");
  EnvFilter::try_new(level).map_err(|e| eyre!("Invalid log level {}: {}", level, e))
}
