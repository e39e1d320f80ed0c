//! Configuration loading.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(String),
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: String,
    source: std::io::Error,
  },
  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: String,
    source: serde_yaml::Error,
  },
  #[error("invalid api url {url}: {source}")]
  InvalidUrl {
    url: String,
    source: url::ParseError,
  },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Directory for persisted session files (defaults to the platform data
  /// directory).
  pub session_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the API, e.g. "https://gallery.example.com/api".
  pub url: String,
  /// Per-request timeout in seconds.
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Token-refresh endpoint path, relative to `url`.
  #[serde(default = "default_refresh_path")]
  pub refresh_path: String,
}

fn default_timeout_secs() -> u64 {
  15
}

fn default_refresh_path() -> String {
  "auth/refresh".to_string()
}

impl ApiConfig {
  pub fn base_url(&self) -> Result<Url, ConfigError> {
    Url::parse(&self.url).map_err(|source| ConfigError::InvalidUrl {
      url: self.url.clone(),
      source,
    })
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./atelier.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/atelier/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(ConfigError::NotFound(p.display().to_string()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(ConfigError::NotFound(
        "no atelier.yaml in the current directory or config dir".to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("atelier.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("atelier").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.display().to_string(),
      source,
    })?;

    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
      path: path.display().to_string(),
      source,
    })
  }
}
