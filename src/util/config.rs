//! Engine configuration: a JSON file in the platform config directory with
//! environment overrides.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

const APP_QUALIFIER: &str = "com";
const APP_ORG: &str = "FretEmissions";
const APP_NAME: &str = "FretEmissions";

pub const ENV_ROUTING_URL: &str = "FRET_ROUTING_URL";
pub const ENV_ROUTING_API_KEY: &str = "FRET_ROUTING_API_KEY";
pub const ENV_ROUTING_TIMEOUT: &str = "FRET_ROUTING_TIMEOUT_SECS";

pub const DEFAULT_ROUTING_URL: &str = "https://api.openrouteservice.org/";
pub const DEFAULT_ROUTING_TIMEOUT_SECS: u64 = 10;
/// Placeholder distance when neither routing nor the city table knows the route.
pub const DEFAULT_DISTANCE_KM: f64 = 200.0;
pub const DEFAULT_ENERGY_CACHE_TTL_SECS: u64 = 5 * 60;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub base_url: String,
    /// Never serialized back to disk.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ROUTING_URL.to_string(),
            api_key: None,
            timeout_secs: DEFAULT_ROUTING_TIMEOUT_SECS,
        }
    }
}

impl RoutingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub routing: RoutingConfig,
    pub default_distance_km: f64,
    pub energy_cache_ttl_secs: u64,
    /// Where resolved routing distances are persisted; platform data dir when unset.
    pub distance_cache_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            routing: RoutingConfig::default(),
            default_distance_km: DEFAULT_DISTANCE_KM,
            energy_cache_ttl_secs: DEFAULT_ENERGY_CACHE_TTL_SECS,
            distance_cache_path: None,
        }
    }
}

impl EngineConfig {
    pub fn energy_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.energy_cache_ttl_secs)
    }

    /// Applies `FRET_ROUTING_*` overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_ROUTING_URL).filter(|v| !v.trim().is_empty()) {
            self.routing.base_url = url;
        }
        if let Some(key) = lookup(ENV_ROUTING_API_KEY).filter(|v| !v.trim().is_empty()) {
            self.routing.api_key = Some(key);
        }
        if let Some(secs) = lookup(ENV_ROUTING_TIMEOUT).and_then(|v| v.trim().parse().ok()) {
            self.routing.timeout_secs = secs;
        }
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config directory unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}

pub fn config_file() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.config_dir().join("config.json"))
}

/// Loads the config file (defaults when it does not exist) and applies the
/// process environment on top.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    let base = match config_file() {
        Some(path) if path.exists() => load_config_from(&path)?,
        _ => EngineConfig::default(),
    };
    Ok(base.with_env_overrides(|key| std::env::var(key).ok()))
}

pub fn load_config_from(path: &Path) -> Result<EngineConfig, ConfigError> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

pub fn save_config(config: &EngineConfig) -> Result<PathBuf, ConfigError> {
    let path = config_file().ok_or(ConfigError::StorageUnavailable)?;
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &EngineConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}
