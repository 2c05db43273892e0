//! CLI configuration and the cached license snapshot

use anyhow::{Context, Result};
use parley_common::LicenseSnapshot;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path
pub fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
    }

    #[cfg(not(target_os = "windows"))]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".parley")
    }
}

/// Get the config file path
pub fn config_file() -> PathBuf {
    config_dir().join("config.yml")
}

/// Last snapshot returned by the server
pub fn snapshot_file() -> PathBuf {
    config_dir().join("license.json")
}

/// Ensure the config directory exists
pub fn ensure_dirs() -> Result<()> {
    fs::create_dir_all(config_dir()).context("Failed to create config directory")?;
    Ok(())
}

/// Main configuration file structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// License server URL (default: http://localhost:8080)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Account identity sent with every license call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Last key activated from this machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
}

fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            email: None,
            license_key: None,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        ensure_dirs()?;
        self.save_to(&config_file())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, server_url: Option<String>, email: Option<String>) -> Self {
        if let Some(url) = server_url {
            self.server_url = url;
        }
        if let Some(email) = email {
            self.email = Some(email);
        }
        self
    }

    /// Get the account email or error
    pub fn require_email(&self) -> Result<&str> {
        self.email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("No account email. Run `parley config --email <EMAIL>` first.")
            })
    }

    /// Base URL without a trailing slash
    pub fn api_base(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }
}

/// Save the latest snapshot so `parley status` works offline
pub fn store_snapshot(path: &Path, snapshot: &LicenseSnapshot) -> Result<()> {
    let content = snapshot.to_json().context("Failed to serialize license snapshot")?;
    fs::write(path, content).context("Failed to write license cache")?;
    Ok(())
}

/// Load the cached snapshot, if any
pub fn load_snapshot(path: &Path) -> Result<Option<LicenseSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).context("Failed to read license cache")?;
    let snapshot = LicenseSnapshot::from_json(&content).context("Failed to parse license cache")?;
    Ok(Some(snapshot))
}
