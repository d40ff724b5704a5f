mod cache;
mod config;
mod controller;
mod logging;
mod network;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use cache::{CacheSource, CacheStorage, SqliteStorage};
use controller::OfflineCacheController;
use network::{HttpNetwork, Network, OfflineNetwork, Request};

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Network-first offline cache for static web assets")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache every configured asset
  Install,
  /// Fetch a resource, falling back to the cache when the network fails
  Fetch {
    /// Path or URL, resolved against the configured origin
    locator: String,
    /// Skip the network entirely
    #[arg(long)]
    offline: bool,
    /// Write the body to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List cache partitions
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let _guard = logging::init()?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let storage = Arc::new(SqliteStorage::open_path(&config.storage.resolve_path()?)?);

  match args.command {
    Command::Install => {
      let network = HttpNetwork::new(&config.network)?;
      let controller = OfflineCacheController::from_config(&config, storage, network)?;
      eprintln!(
        "Installing {} assets into {}",
        controller.assets().len(),
        controller.cache_name()
      );
      let report = controller.handle_install().await?;
      eprintln!("Cached {} assets in {}", report.cached, report.cache_name);
    }
    Command::Fetch {
      locator,
      offline,
      output,
    } => {
      let request = Request::get(config.resolve(&locator)?);
      if !storage.is_installed(&config.cache.name)? {
        eprintln!(
          "Cache {} is not installed; offline fallback will miss (run `offcache install`)",
          config.cache.name
        );
      }
      if offline {
        let controller = OfflineCacheController::from_config(&config, storage, OfflineNetwork)?;
        fetch(&controller, &request, output).await?;
      } else {
        let network = HttpNetwork::new(&config.network)?;
        let controller = OfflineCacheController::from_config(&config, storage, network)?;
        fetch(&controller, &request, output).await?;
      }
    }
    Command::Status => {
      let partitions = storage.partitions()?;
      if partitions.is_empty() {
        eprintln!("No cache partitions");
      }
      for p in partitions {
        let state = match p.installed_at {
          Some(at) => format!("installed {}", at.format("%Y-%m-%d %H:%M:%S")),
          None => "not installed".to_string(),
        };
        let marker = if p.name == config.cache.name { "*" } else { " " };
        println!(
          "{} {}  {} entries  created {}  {}",
          marker,
          p.name,
          p.entries,
          p.created_at.format("%Y-%m-%d %H:%M:%S"),
          state
        );
      }
    }
  }

  Ok(())
}

/// Dispatch one fetch event and write out the response body.
async fn fetch<S: CacheStorage, N: Network>(
  controller: &OfflineCacheController<S, N>,
  request: &Request,
  output: Option<PathBuf>,
) -> Result<()> {
  let result = controller.handle_fetch(request).await?;

  match result.source {
    CacheSource::Network => eprintln!(
      "{} {} {} (network)",
      result.data.status,
      request.url,
      result
        .data
        .header("content-type")
        .map(String::from_utf8_lossy)
        .unwrap_or_else(|| "-".into())
    ),
    CacheSource::Offline => eprintln!(
      "{} {} (cache, stored {})",
      result.data.status,
      request.url,
      result
        .cached_at
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
    ),
  }

  match output {
    Some(path) => std::fs::write(&path, &result.data.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
    None => std::io::stdout()
      .write_all(&result.data.body)
      .map_err(|e| eyre!("Failed to write response body: {}", e))?,
  }

  Ok(())
}
