use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::SqliteStorage;

/// Default cache partition name. Bump the suffix to start a fresh partition.
pub const DEFAULT_CACHE_NAME: &str = "mihomo-studio-cache-v1";

/// Assets pre-cached at install time.
pub const DEFAULT_ASSETS: &[&str] = &[
  "/",
  "/manifest.json",
  "/icons/icon-192x192.png",
  "/icons/icon-512x512.png",
];

const DEFAULT_ORIGIN: &str = "http://localhost:8888";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL that asset locators are resolved against
  #[serde(default = "default_origin")]
  pub origin: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub network: NetworkConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      cache: CacheConfig::default(),
      storage: StorageConfig::default(),
      network: NetworkConfig::default(),
    }
  }
}

fn default_origin() -> String {
  DEFAULT_ORIGIN.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Partition identifier
  #[serde(default = "default_cache_name")]
  pub name: String,
  /// Locators to pre-cache, in order
  #[serde(default = "default_assets")]
  pub assets: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: default_cache_name(),
      assets: default_assets(),
    }
  }
}

fn default_cache_name() -> String {
  DEFAULT_CACHE_NAME.to_string()
}

fn default_assets() -> Vec<String> {
  DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Cache database path (default: $XDG_DATA_HOME/offcache/cache.db)
  pub path: Option<PathBuf>,
}

impl StorageConfig {
  pub fn resolve_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(p) => Ok(p.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  /// Request timeout applied by the HTTP client
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Resolve a locator (path or absolute URL) against the origin.
  pub fn resolve(&self, locator: &str) -> Result<Url> {
    let origin = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;

    origin
      .join(locator)
      .map_err(|e| eyre!("Invalid locator '{}': {}", locator, e))
  }

  /// Resolve every configured asset locator, preserving order.
  pub fn asset_urls(&self) -> Result<Vec<Url>> {
    self
      .cache
      .assets
      .iter()
      .map(|locator| self.resolve(locator))
      .collect()
  }
}
