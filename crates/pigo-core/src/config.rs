use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use pigo_api::RetryPolicy;

use crate::error::PigoError;
use crate::handoff::{HandoffConfig, Platform};

const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub catalog: CatalogConfig,
    pub retry: RetryConfig,
    pub handoff: HandoffSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub history_path: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub endpoint: String,
    pub per_page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffSection {
    pub scheme: String,
    pub app_version: String,
    pub timeout_ms: u64,
    pub install_page: String,
    pub capable_platforms: Vec<String>,
}

impl AppConfig {
    /// Load config: user file (if exists) over built-in defaults.
    pub fn load() -> Result<Self, PigoError> {
        let user_path = Self::config_path();
        if user_path.exists() {
            Self::load_from(&user_path)
        } else {
            toml::from_str(DEFAULT_CONFIG).map_err(|e| PigoError::Config(e.to_string()))
        }
    }

    /// Load config from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, PigoError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| PigoError::Config(e.to_string()))?;
        let config: AppConfig =
            toml::from_str(&content).map_err(|e| PigoError::Config(e.to_string()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Save current config to the user config file.
    pub fn save(&self) -> Result<(), PigoError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), PigoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| PigoError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Path to user config file (XDG on Linux, AppData on Windows).
    pub fn config_path() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Directory for log files.
    pub fn log_dir() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"))
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "pigo")
    }

    pub fn backend_url(&self) -> Result<Url, PigoError> {
        Url::parse(&self.backend.base_url)
            .map_err(|e| PigoError::Config(format!("backend.base_url: {e}")))
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.attempts, Duration::from_millis(self.retry.delay_ms))
    }

    pub fn handoff_config(&self) -> HandoffConfig {
        let section = &self.handoff;
        HandoffConfig {
            scheme: section.scheme.clone(),
            app_version: section.app_version.clone(),
            timeout: Duration::from_millis(section.timeout_ms),
            install_page: section.install_page.clone(),
            capable_platforms: section
                .capable_platforms
                .iter()
                .filter_map(|p| match p.parse::<Platform>() {
                    Ok(platform) => Some(platform),
                    Err(e) => {
                        tracing::warn!(platform = %p, error = %e, "ignoring unknown platform");
                        None
                    }
                })
                .collect(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("built-in default config is valid TOML")
    }
}
