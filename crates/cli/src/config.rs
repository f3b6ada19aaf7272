//! Console configuration file
//!
//! ```toml
//! [registration]
//! domain = "pbx.example.com"
//! extension = "9001"
//! password = "s3cret"
//!
//! [registration.origin]
//! host = "console.example.com"
//! secure = true
//!
//! [backend]
//! base_url = "https://api.example.com"
//! api_token = "..."
//!
//! [feed]
//! poll_interval_ms = 3000
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use switchboard_client_core::{BackendConfig, DuplicatePolicy, FeedConfig, RegistrationConfig};

/// Everything the console reads from disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Exchange registration
    pub registration: RegistrationConfig,
    /// Operator backend
    pub backend: BackendConfig,
    /// Live-call polling
    pub feed: FeedConfig,
    /// What a repeated monitor/whisper/barge does
    pub duplicate_policy: DuplicatePolicy,
}

impl ConsoleConfig {
    /// Load from `path`, or from the default location when `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_path().context("No configuration directory on this platform; pass --config")?,
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Parse TOML text
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// `{config dir}/switchboard/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("switchboard").join("config.toml"))
}
