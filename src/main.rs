mod cache;
mod clients;
mod config;
mod dispatch;
mod error;
mod event;
mod http;
mod lifecycle;
mod logging;
mod manifest;
mod network;
mod strategy;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheStore, MemoryStore, SqliteStore};
use crate::event::WorkerHost;
use crate::http::Request;
use crate::network::HttpNetwork;
use crate::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline-first cache for a web application shell")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache database to use instead of the configured one
  #[arg(long, conflicts_with = "ephemeral")]
  db: Option<PathBuf>,

  /// Keep the cache in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured version and make it current
  Upgrade,
  /// Fetch a path through the worker, writing the body to stdout
  Fetch {
    /// Path or URL, resolved against the origin
    path: String,
    /// Treat the request as a top-level navigation
    #[arg(short, long)]
    navigate: bool,
    /// Extra request header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
  },
  /// Show stored generations
  Status,
  /// Drop one entry from the current generation
  Evict {
    /// Path or URL, resolved against the origin
    path: String,
  },
}

fn parse_header(s: &str) -> Result<(String, String), String> {
  match s.split_once(':') {
    Some((name, value)) if !name.trim().is_empty() => {
      Ok((name.trim().to_string(), value.trim().to_string()))
    }
    _ => Err(format!("expected `Name: value`, got {}", s)),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config, args.verbose)?;

  let quota = config.storage.quota_bytes;
  let (store, location): (Arc<dyn CacheStore>, String) = if args.ephemeral {
    (Arc::new(MemoryStore::new().with_quota(quota)), "memory".to_string())
  } else {
    let db_path = match args.db {
      Some(path) => path,
      None => config.storage_path()?,
    };
    let store = SqliteStore::open(&db_path)?.with_quota(quota);
    (Arc::new(store), db_path.display().to_string())
  };
  let network = Arc::new(HttpNetwork::new(config.network_timeout())?);

  let worker = Arc::new(Worker::new(&config.worker_config()?, store.clone(), network).await?);
  info!(
    version = %worker.controller().version(),
    current = ?worker.current_generation(),
    store = %location,
    "Worker started"
  );

  match args.command {
    Command::Upgrade => {
      let host = WorkerHost::new(Arc::clone(&worker));
      let installed = host.install().await?;
      eprintln!(
        "Installed {} ({} resources, {} bytes)",
        installed.version, installed.resources, installed.bytes
      );

      let activated = host.activate().await?;
      match &activated.previous {
        Some(previous) if *previous != activated.version => {
          eprintln!("Activated {} (was {})", activated.version, previous)
        }
        _ => eprintln!("Activated {}", activated.version),
      }
      for generation in &activated.removed {
        eprintln!("Removed {}", generation);
      }
      for failure in &activated.failed {
        eprintln!("Warning: {}", failure);
      }
    }

    Command::Fetch {
      path,
      navigate,
      headers,
    } => {
      let url = config.resolve(&path)?;
      // A navigation opens a page for as long as it loads.
      let client = navigate.then(|| worker.open_client(url.clone()));
      let mut request = match client {
        Some(id) => Request::navigate(url).from_client(id),
        None => Request::get(url),
      };
      for (name, value) in &headers {
        request = request.with_header(name, value);
      }

      let host = WorkerHost::new(Arc::clone(&worker));
      let served = host.fetch(request).await;
      if let Some(id) = client {
        worker.clients().close(id);
      }
      let served = served?;
      match served.cached_at {
        Some(cached_at) => eprintln!(
          "{} {} ({:?}, cached {})",
          served.response.status,
          served.response.header("content-type").unwrap_or("-"),
          served.source,
          cached_at.format("%Y-%m-%d %H:%M:%S")
        ),
        None => eprintln!(
          "{} {} ({:?})",
          served.response.status,
          served.response.header("content-type").unwrap_or("-"),
          served.source
        ),
      }
      std::io::stdout().write_all(&served.response.body)?;
    }

    Command::Status => {
      let current = worker.current_generation();
      let generations = store.generations().await?;
      if generations.is_empty() {
        println!("No generations stored");
      }
      for generation in generations {
        let marker = if current.as_deref() == Some(generation.as_str()) {
          "*"
        } else {
          " "
        };
        let entries = store.keys(&generation).await?.len();
        println!("{} {} ({} entries)", marker, generation, entries);
      }
    }

    Command::Evict { path } => {
      let url = config.resolve(&path)?;
      if worker.evict(&url).await? {
        eprintln!("Evicted {}", url);
      } else {
        eprintln!("{} was not cached", url);
      }
    }
  }

  Ok(())
}
