//! Configuration management for yomiage-rs.
//!
//! Loads config from YAML files in standard locations. Every field has a
//! default, so the player runs with no config file at all.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the VOICEVOX engine.
    pub url: String,
    /// Default speaker (style) id. 3 is Shikoku Metan.
    pub speaker: u32,
    /// Attempts per request before a failure is surfaced.
    pub max_retries: u32,
    /// First backoff delay; doubles after each failed attempt.
    pub backoff_base_ms: u64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:50021".into(),
            speaker: 3,
            max_retries: 3,
            backoff_base_ms: 100,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Pause between a sentence finishing and the next one starting.
    pub advance_delay_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            advance_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub port: u16,
    /// Directory whose *.txt files are exposed through /api/files.
    pub files_dir: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            files_dir: ".".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub player: PlayerConfig,
    pub proxy: ProxyConfig,
    pub feedback: FeedbackConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/yomiage/config.yaml
    /// 3. /etc/yomiage/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/yomiage/config.yaml")),
                Some(PathBuf::from("/etc/yomiage/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }
}
