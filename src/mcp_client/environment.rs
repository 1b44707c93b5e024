//! Environment construction for spawned servers.
//!
//! The child's environment is computed as a pure function of an ambient
//! snapshot and the descriptor's overrides, then handed to the spawn call.
//! The parent process environment is never mutated.

use std::collections::BTreeMap;

use super::errors::McpError;
use super::types::EnvSource;

/// Fully-resolved environment for one child process.
pub type EnvMap = BTreeMap<String, String>;

/// Snapshot the current process environment.
///
/// Entries whose key or value is not valid Unicode have no defined string
/// value and are dropped.
pub fn ambient_snapshot() -> EnvMap {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

/// Decode a descriptor's environment overrides.
///
/// Non-string values are coerced to their JSON text (`true`, `42`, `null`).
/// A blank JSON string means "no overrides"; anything else that is not a JSON
/// object is a configuration error for this server only.
pub fn parse_env(server: &str, source: &EnvSource) -> Result<EnvMap, McpError> {
    let object = match source {
        EnvSource::Map(map) => map.clone(),
        EnvSource::Json(raw) if raw.trim().is_empty() => return Ok(EnvMap::new()),
        EnvSource::Json(raw) => {
            let value: serde_json::Value = serde_json::from_str(raw)
                .map_err(|e| McpError::config(server, format!("malformed env JSON: {e}")))?;
            match value {
                serde_json::Value::Object(map) => map,
                other => {
                    return Err(McpError::config(
                        server,
                        format!("env must be a JSON object, got {}", json_type_name(&other)),
                    ))
                }
            }
        }
    };

    Ok(object
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

/// Overlay `overrides` on top of `ambient`. Overrides win on key conflicts.
pub fn merge_environment(ambient: &EnvMap, overrides: &EnvMap) -> EnvMap {
    let mut merged = ambient.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
