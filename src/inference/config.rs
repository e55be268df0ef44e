//! Engine and model configuration.
//!
//! Reads `config/legaldraft.yaml` and resolves environment variables.
//! The file picks the active model endpoint, the retry schedule applied to
//! provider calls, and the engine's turn limits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::errors::InferenceError;
use super::retry::RetryPolicy;

/// Relative location searched for upward from the working directory.
const CONFIG_RELATIVE_PATH: &str = "config/legaldraft.yaml";

// ─── Public Types ────────────────────────────────────────────────────────────

/// A single model endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub display_name: String,
    /// OpenAI-compatible base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Sent as a bearer token when non-empty.
    #[serde(default)]
    pub api_key: Option<String>,
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-call timeout. Streaming calls get the same budget for the whole body.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_request_timeout_secs() -> u64 {
    120
}

/// Limits and switches for the conversation engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineSettings {
    /// Gateway responses carrying tool invocations allowed per turn.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
    /// Longest accepted user message, in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    /// Global switch for the per-section reflection loop.
    #[serde(default = "default_true")]
    pub reflection_enabled: bool,
    /// Messages kept in a reflection history, the first one included.
    #[serde(default = "default_reflection_history_window")]
    pub reflection_history_window: usize,
}

fn default_max_tool_iterations() -> usize {
    6
}
fn default_max_history_messages() -> usize {
    50
}
fn default_max_message_length() -> usize {
    10_000
}
fn default_true() -> bool {
    true
}
fn default_reflection_history_window() -> usize {
    5
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            max_history_messages: default_max_history_messages(),
            max_message_length: default_max_message_length(),
            reflection_enabled: true,
            reflection_history_window: default_reflection_history_window(),
        }
    }
}

/// Top-level configuration (mirrors `config/legaldraft.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub active_model: String,
    pub models: HashMap<String, ModelConfig>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl Default for AppConfig {
    /// An OpenAI-compatible endpoint taken from `OPENAI_*` variables.
    fn default() -> Self {
        let model = ModelConfig {
            display_name: "OpenAI".to_string(),
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            model_name: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        };
        let mut models = HashMap::new();
        models.insert("openai".to_string(), model);
        Self {
            active_model: "openai".to_string(),
            models,
            retry: RetryPolicy::default(),
            engine: EngineSettings::default(),
        }
    }
}

impl AppConfig {
    /// The active model's configuration.
    pub fn active(&self) -> Result<&ModelConfig, InferenceError> {
        self.models
            .get(&self.active_model)
            .ok_or_else(|| InferenceError::ConfigError {
                reason: format!("active model '{}' not found in config", self.active_model),
            })
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the configuration file.
///
/// Order: `LEGALDRAFT_CONFIG`, then `config/legaldraft.yaml` searched upward
/// from `start`, then `~/.config/legaldraft/config.yaml`.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("LEGALDRAFT_CONFIG") {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "LEGALDRAFT_CONFIG points at a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_RELATIVE_PATH);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    dirs::config_dir()
        .map(|d| d.join("legaldraft").join("config.yaml"))
        .filter(|p| p.exists())
}

/// Load and parse a configuration file.
///
/// `${VAR}` and `${VAR:-default}` are interpolated before parsing.
pub fn load_config(path: &Path) -> Result<AppConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_config(&raw)
}

/// Parse configuration text and check that the active model exists.
pub fn parse_config(raw: &str) -> Result<AppConfig, InferenceError> {
    let interpolated = interpolate_env_vars(raw);
    let config: AppConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })?;
    config.active()?;
    if config.engine.max_tool_iterations == 0 {
        return Err(InferenceError::ConfigError {
            reason: "engine.max_tool_iterations must be at least 1".into(),
        });
    }
    Ok(config)
}

/// Find and load the configuration, falling back to environment defaults.
pub fn load_or_default(start: &Path) -> Result<AppConfig, InferenceError> {
    match find_config_path(start) {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            load_config(&path)
        }
        None => {
            tracing::info!("no config file found, using OPENAI_* environment defaults");
            Ok(AppConfig::default())
        }
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
///
/// An unterminated `${` is kept verbatim.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                result.push_str(&resolve_var_expr(&after[..end]));
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
