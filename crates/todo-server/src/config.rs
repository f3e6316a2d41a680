//! Configuration loading and management

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for the todo server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Lists per page on the history view
    #[serde(default = "default_history_page_size")]
    pub history_page_size: usize,

    /// Name of the cookie carrying the session id
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,

    /// Where unauthenticated page loads are redirected
    #[serde(default = "default_signin_path")]
    pub signin_path: String,

    /// Extra attempts for a batch whose commit failed transiently
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,

    /// Largest accepted WebSocket message or POST body, in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_history_page_size() -> usize {
    10
}

fn default_session_cookie() -> String {
    "session".to_string()
}

fn default_signin_path() -> String {
    "/signin".to_string()
}

fn default_commit_retries() -> u32 {
    3
}

fn default_max_message_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history_page_size: default_history_page_size(),
            session_cookie: default_session_cookie(),
            signin_path: default_signin_path(),
            commit_retries: default_commit_retries(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl Config {
    /// Load configuration from the config directory
    pub fn load(config_path: &str) -> Result<Self> {
        let config_file = Path::new(config_path).join("config.json");

        if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config =
                serde_json::from_str(&content).with_context(|| "Failed to parse config.json")?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            Ok(config)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_file);
            let config = Config::default();

            std::fs::create_dir_all(config_path)
                .with_context(|| format!("Failed to create config directory: {}", config_path))?;

            // Write default config for reference
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            Ok(config)
        }
    }
}
