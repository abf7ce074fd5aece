//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.askdoc/config.json`) and environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default service host when neither config nor ASKDOC_API_HOST set one.
pub const DEFAULT_API_HOST: &str = "http://127.0.0.1:8000";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Remote chat and file-indexing service.
    #[serde(default)]
    pub api: ApiConfig,

    /// Persisted identity settings.
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Remote service host and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base URL, e.g. "http://127.0.0.1:8000". Overridden by ASKDOC_API_HOST env.
    pub host: Option<String>,

    /// Upload request timeout in seconds (default 600).
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    /// When set, a chat stream that delivers no chunk within this many seconds fails.
    #[serde(default)]
    pub stream_idle_timeout_secs: Option<u64>,
}

fn default_upload_timeout_secs() -> u64 {
    600
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: None,
            upload_timeout_secs: default_upload_timeout_secs(),
            stream_idle_timeout_secs: None,
        }
    }
}

impl ApiConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

/// Where and under which namespace the day-scoped identity keys live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
    /// Key prefix; stored keys look like "askdoc.user".
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Store file. Relative paths are resolved against the config file's parent.
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Bearer token for chat requests. Overridden by ASKDOC_ACCESS_TOKEN env.
    #[serde(default)]
    pub access_token: Option<String>,
}

fn default_namespace() -> String {
    "askdoc".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            store_path: None,
            access_token: None,
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the service host: env ASKDOC_API_HOST overrides config, then the default.
pub fn resolve_api_host(config: &Config) -> String {
    non_empty_env("ASKDOC_API_HOST")
        .or_else(|| {
            config
                .api
                .host
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| DEFAULT_API_HOST.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve the access token: env ASKDOC_ACCESS_TOKEN overrides config.
/// None means the persisted `accessToken` key decides.
pub fn resolve_access_token(config: &Config) -> Option<String> {
    non_empty_env("ASKDOC_ACCESS_TOKEN").or_else(|| {
        config
            .identity
            .access_token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("ASKDOC_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".askdoc").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the identity store file: `identity.storePath` if set, else `storage.json` next to the config.
pub fn resolve_store_path(config: &Config, config_path: &Path) -> PathBuf {
    let parent = config_parent(config_path);
    match &config.identity.store_path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                parent.join(p)
            }
        }
        _ => parent.join("storage.json"),
    }
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_fields_missing() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.api.upload_timeout_secs, 600);
        assert_eq!(config.api.stream_idle_timeout(), None);
        assert_eq!(config.identity.namespace, "askdoc");
    }

    #[test]
    fn camel_case_keys() {
        let config: Config = serde_json::from_str(
            r#"{"api":{"host":"http://h:1/","streamIdleTimeoutSecs":30},"identity":{"storePath":"s.json"}}"#,
        )
        .unwrap();
        assert_eq!(config.api.host.as_deref(), Some("http://h:1/"));
        assert_eq!(config.api.stream_idle_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.identity.store_path, Some(PathBuf::from("s.json")));
    }

    #[test]
    fn zero_idle_timeout_disables_it() {
        let mut config = Config::default();
        config.api.stream_idle_timeout_secs = Some(0);
        assert_eq!(config.api.stream_idle_timeout(), None);
    }

    #[test]
    fn resolve_store_path_default() {
        let config = Config::default();
        let path = Path::new("/home/user/.askdoc/config.json");
        assert_eq!(
            resolve_store_path(&config, path),
            PathBuf::from("/home/user/.askdoc/storage.json")
        );
    }

    #[test]
    fn resolve_store_path_override_relative() {
        let mut config = Config::default();
        config.identity.store_path = Some(PathBuf::from("state/ids.json"));
        let path = Path::new("/home/user/.askdoc/config.json");
        assert_eq!(
            resolve_store_path(&config, path),
            PathBuf::from("/home/user/.askdoc/state/ids.json")
        );
    }

    #[test]
    fn resolve_store_path_override_absolute() {
        let mut config = Config::default();
        config.identity.store_path = Some(PathBuf::from("/var/askdoc/ids.json"));
        let path = Path::new("/home/user/.askdoc/config.json");
        assert_eq!(
            resolve_store_path(&config, path),
            PathBuf::from("/var/askdoc/ids.json")
        );
    }

    #[test]
    fn load_config_missing_file_is_default() {
        let path = std::env::temp_dir()
            .join(format!("askdoc-config-test-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert!(config.api.host.is_none());
    }
}
