//! Configuration loading.
//!
//! A single YAML file with `${ENV_VAR}` substitution. Every section has
//! defaults, so a minimal (or empty) file parses into a working
//! configuration.

use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::divider::DividerConfig;
use crate::orchestrator::MergeConfig;
use crate::server::messages::WordGateConfig;
use crate::tts::preprocessor::TtsPreprocessorConfig;
use crate::tts::remote::RemoteTtsConfig;

/// Identity of the avatar character and its interlocutor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterConfig {
    pub character_name: String,
    pub human_name: String,
    pub avatar: String,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            character_name: "Avatar".to_string(),
            human_name: "Human".to_string(),
            avatar: String::new(),
        }
    }
}

/// Listener settings for the WebSocket server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 12393,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub character: CharacterConfig,
    pub divider: DividerConfig,
    pub tts_preprocessor: TtsPreprocessorConfig,
    pub remote_tts: RemoteTtsConfig,
    pub audio_merge: MergeConfig,
    pub wake_word: WordGateConfig,
    pub stop_word: WordGateConfig,
    pub cache_dir: String,
    pub proactive_speak_prompt: String,
}

impl Config {
    /// The cache directory, defaulting to `cache/`.
    pub fn cache_dir(&self) -> &str {
        if self.cache_dir.is_empty() {
            "cache"
        } else {
            &self.cache_dir
        }
    }

    /// The proactive-speak prompt, with a fallback when unconfigured.
    pub fn proactive_prompt(&self) -> &str {
        if self.proactive_speak_prompt.is_empty() {
            "Please say something."
        } else {
            &self.proactive_speak_prompt
        }
    }
}

static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(\w+)\}").expect("valid env var regex"));

/// Replace `${NAME}` with the environment value; unset variables are
/// left as-is so the error surfaces in validation rather than silently
/// becoming empty strings.
fn substitute_env_vars(content: &str) -> String {
    ENV_VAR
        .replace_all(content, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Parse configuration from a YAML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let substituted = substitute_env_vars(content);
    serde_yaml::from_str(&substituted).context("failed to parse configuration YAML")
}

/// Load configuration from a YAML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    debug!(path = %path.display(), "loading configuration");
    parse_config(&content)
}
