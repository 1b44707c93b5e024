//! Relay configuration loading and validation.
//!
//! Reads `relay.yaml` and resolves environment variables. The file holds the
//! completion endpoint settings and the orchestration limits; server
//! descriptors are never stored here, they arrive with each request.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::errors::InferenceError;

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "relay.yaml";

/// Env var naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MCP_RELAY_CONFIG";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Completion endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// OpenAI-compatible base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model_name: String,
    /// Bearer token. Empty after interpolation means "no auth header".
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ModelConfig {
    /// The API key, if one is configured and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

/// Limits for one orchestration request.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrationConfig {
    /// Model passes per request before the loop is cut short.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Per-server connect timeout.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Per-call tool invocation timeout. Absent means no limit.
    #[serde(default)]
    pub invocation_timeout_secs: Option<u64>,
    /// Fallback root for relative executable paths. Defaults to the current
    /// directory.
    #[serde(default)]
    pub working_root: Option<PathBuf>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            connect_timeout_secs: default_connect_timeout_secs(),
            invocation_timeout_secs: None,
            working_root: None,
        }
    }
}

impl OrchestrationConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn invocation_timeout(&self) -> Option<Duration> {
        self.invocation_timeout_secs.map(Duration::from_secs)
    }

    /// Resolved working root; relative values are taken against the current
    /// directory.
    pub fn working_root(&self) -> PathBuf {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        match &self.working_root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => cwd.join(root),
            None => cwd,
        }
    }
}

/// Top-level configuration (mirrors `relay.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

impl RelayConfig {
    /// Parse YAML text after env-var interpolation, then validate.
    pub fn from_yaml_str(raw: &str) -> Result<Self, InferenceError> {
        let interpolated = interpolate_env_vars(raw);
        let config: RelayConfig =
            serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
                reason: format!("failed to parse config: {e}"),
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), InferenceError> {
        if self.model.base_url.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "model.base_url must not be empty".into(),
            });
        }
        if self.model.model_name.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "model.model_name must not be empty".into(),
            });
        }
        if self.orchestration.max_iterations == 0 {
            return Err(InferenceError::ConfigError {
                reason: "orchestration.max_iterations must be at least 1".into(),
            });
        }
        if self.orchestration.connect_timeout_secs == 0 {
            return Err(InferenceError::ConfigError {
                reason: "orchestration.connect_timeout_secs must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_max_iterations() -> u32 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    30
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Order: the explicit path (must exist), then `MCP_RELAY_CONFIG`, then
/// `relay.yaml` in `start` or any of its ancestors.
pub fn find_config_path(explicit: Option<&Path>, start: &Path) -> Result<PathBuf, InferenceError> {
    // 1. Explicit path
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(InferenceError::ConfigError {
            reason: format!("config file {} does not exist", path.display()),
        });
    }

    // 2. Env var
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.is_file() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points at a missing file");
    }

    // 3. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(InferenceError::ConfigError {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Load and parse the configuration file.
///
/// Performs environment-variable interpolation on string values matching
/// `${VAR_NAME}` or `${VAR_NAME:-default}`.
pub fn load_config(path: &Path) -> Result<RelayConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let config = RelayConfig::from_yaml_str(&raw)?;
    tracing::info!(
        path = %path.display(),
        model = %config.model.model_name,
        max_iterations = config.orchestration.max_iterations,
        "configuration loaded"
    );
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
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
