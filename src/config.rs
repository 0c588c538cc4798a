//! Configuration management for patchpilot
//!
//! Stores settings in ~/.config/patchpilot/config.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const API_KEY_ENV: &str = "PATCHPILOT_API_KEY";

fn default_model() -> String {
    "openrouter/auto".to_string()
}

fn default_episode_length() -> usize {
    8
}

fn default_completion_timeout_secs() -> u64 {
    90
}

fn default_tool_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Fixed per-episode step cap.
    #[serde(default = "default_episode_length")]
    pub episode_length: usize,
    /// Fan-out worker count; unset means all available workers.
    pub workers: Option<usize>,
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Optional cap on fragments per pattern match.
    pub pattern_limit: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            episode_length: default_episode_length(),
            workers: None,
            completion_timeout_secs: default_completion_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            pattern_limit: None,
        }
    }
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("patchpilot"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return defaults. A corrupt file is
    /// backed up next to itself so a hand-edit is never silently lost.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        tracing::warn!(
                            "config file was corrupted ({err}); backup saved, defaults loaded"
                        );
                    }
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
        fs::create_dir_all(&dir)?;
        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// API key from the environment (preferred) or the config file.
    pub fn api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                return Some(key);
            }
        }
        self.api_key.clone().filter(|k| !k.trim().is_empty())
    }
}

fn preserve_corrupt_config(path: &std::path::Path, content: &str) {
    let backup = path.with_extension("json.corrupt");
    if let Err(err) = fs::write(&backup, content) {
        tracing::warn!("failed to back up corrupt config to '{}': {err}", backup.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.episode_length, 8);
        assert_eq!(config.completion_timeout_secs, 90);
        assert!(config.workers.is_none());
        assert!(config.api_key.is_none());
    }

    #[test]
    fn partial_config_files_fill_with_defaults() {
        let config: Config = serde_json::from_str(r#"{"api_key": "sk-test"}"#).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model, "openrouter/auto");
        assert_eq!(config.episode_length, 8);
    }

    #[test]
    fn blank_api_keys_count_as_absent() {
        let config = Config { api_key: Some("   ".into()), ..Default::default() };
        // ignoring the env var path, a blank key must not be returned
        if std::env::var(API_KEY_ENV).is_err() {
            assert!(config.api_key().is_none());
        }
    }

    #[test]
    fn corrupt_config_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        preserve_corrupt_config(&path, "{ not json");
        assert!(dir.path().join("config.json.corrupt").exists());
    }
}
