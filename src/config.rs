use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Default tracing filter when RUST_LOG is unset
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the backend, e.g. https://tasks.example.com
  pub url: String,
  /// Path prefix of the primary routes. Stripped on a 404 fallback.
  #[serde(default = "default_prefix")]
  pub prefix: String,
  #[serde(default = "default_csrf_path")]
  pub csrf_path: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// How long a completed CSRF pre-flight is reused
  #[serde(default = "default_csrf_reuse_ms")]
  pub csrf_reuse_ms: u64,
}

impl ApiConfig {
  /// Config for `url` with every other field at its default.
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      prefix: default_prefix(),
      csrf_path: default_csrf_path(),
      timeout_secs: default_timeout_secs(),
      csrf_reuse_ms: default_csrf_reuse_ms(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Disable to send every read to the network
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_list_ttl")]
  pub list_ttl_secs: u64,
  #[serde(default = "default_stats_ttl")]
  pub stats_ttl_secs: u64,
  #[serde(default = "default_notifications_ttl")]
  pub notifications_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      list_ttl_secs: default_list_ttl(),
      stats_ttl_secs: default_stats_ttl(),
      notifications_ttl_secs: default_notifications_ttl(),
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_prefix() -> String {
  "/api".to_string()
}

fn default_csrf_path() -> String {
  "/sanctum/csrf-cookie".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_csrf_reuse_ms() -> u64 {
  2000
}

fn default_true() -> bool {
  true
}

fn default_list_ttl() -> u64 {
  30
}

fn default_stats_ttl() -> u64 {
  60
}

fn default_notifications_ttl() -> u64 {
  15
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./taskdesk.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/taskdesk/config.yaml
  ///
  /// `TASKDESK_API_URL` overrides `api.url`. With no file at all, the
  /// variable alone is enough to run with defaults.
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

    let env_url = std::env::var("TASKDESK_API_URL").ok();
    let mut config = match (path, env_url.as_deref()) {
      (Some(p), _) => Self::load_from_path(&p)?,
      (None, Some(url)) => Self::with_url(url),
      (None, None) => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/taskdesk/config.yaml\n\
                 or set TASKDESK_API_URL. See config.example.yaml for the format."
        ))
      }
    };

    if let Some(url) = env_url {
      config.api.url = url;
    }
    Ok(config)
  }

  fn with_url(url: &str) -> Self {
    Self {
      api: ApiConfig::new(url),
      cache: CacheConfig::default(),
      log_level: default_log_level(),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("taskdesk.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("taskdesk").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Get the account password from the environment.
  ///
  /// Checks TASKDESK_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("TASKDESK_PASSWORD")
      .map_err(|_| eyre!("Password not given. Pass --password or set TASKDESK_PASSWORD."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  url: https://tasks.example.com\n").unwrap();

    assert_eq!(config.api.url, "https://tasks.example.com");
    assert_eq!(config.api.prefix, "/api");
    assert_eq!(config.api.csrf_path, "/sanctum/csrf-cookie");
    assert_eq!(config.api.timeout_secs, 30);
    assert_eq!(config.api.csrf_reuse_ms, 2000);
    assert!(config.cache.enabled);
    assert_eq!(config.cache.list_ttl_secs, 30);
    assert_eq!(config.cache.stats_ttl_secs, 60);
    assert_eq!(config.cache.notifications_ttl_secs, 15);
    assert_eq!(config.log_level, "info");
  }

  #[test]
  fn test_overrides() {
    let yaml = r#"
api:
  url: http://localhost:8000
  prefix: /v2
  timeout_secs: 5
cache:
  enabled: false
  notifications_ttl_secs: 5
log_level: debug
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.api.prefix, "/v2");
    assert_eq!(config.api.timeout_secs, 5);
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.notifications_ttl_secs, 5);
    assert_eq!(config.cache.list_ttl_secs, 30);
    assert_eq!(config.log_level, "debug");
  }

  #[test]
  fn test_missing_url_is_rejected() {
    assert!(Config::parse("api:\n  prefix: /api\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_errors() {
    let err = Config::load(Some(Path::new("/nonexistent/taskdesk.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
