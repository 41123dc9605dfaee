//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`JiralSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::JiralSettings;

/// Resolve the path to the settings file (`~/.jiral/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".jiral").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<JiralSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<JiralSettings> {
    let mut settings = load_file(path)?;
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn load_file(path: &Path) -> Result<JiralSettings> {
    let defaults = serde_json::to_value(JiralSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides read through `lookup` (the process environment in
/// production). Invalid values are logged and ignored.
///
/// The `JIRA_*` names match the ones the tool server has always read.
pub fn apply_overrides(settings: &mut JiralSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Model backend ───────────────────────────────────────────────
    if let Some(v) = read("JIRAL_OLLAMA_URL").or_else(|| read("OLLAMA_HOST")) {
        settings.ollama.base_url = normalize_base_url(&v);
    }
    if let Some(v) = read("JIRAL_PRIMARY_MODEL") {
        settings.models.primary = v;
    }
    if let Some(v) = read("JIRAL_SUMMARY_MODEL") {
        settings.models.summary = v;
    }

    // ── Orchestration ───────────────────────────────────────────────
    if let Some(v) = read("JIRAL_DEBUG") {
        match parse_bool(&v) {
            Some(b) => settings.debug = b,
            None => warn!(key = "JIRAL_DEBUG", value = %v, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(v) = read("JIRAL_CHUNK_DELAY_MS") {
        match parse_u64_range(&v, 0, 60_000) {
            Some(n) => settings.chunk_delay_ms = n,
            None => warn!(key = "JIRAL_CHUNK_DELAY_MS", value = %v, "invalid u64 env var, ignoring"),
        }
    }
    if let Some(v) = read("JIRAL_VALIDATE_ARGUMENTS") {
        match parse_bool(&v) {
            Some(b) => settings.validate_arguments = b,
            None => warn!(key = "JIRAL_VALIDATE_ARGUMENTS", value = %v, "invalid boolean env var, ignoring"),
        }
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("JIRAL_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("JIRAL_PORT") {
        match parse_u16_range(&v, 1, 65535) {
            Some(n) => settings.server.port = n,
            None => warn!(key = "JIRAL_PORT", value = %v, "invalid u16 env var, ignoring"),
        }
    }
    if let Some(v) = read("JIRAL_TOOL_SERVER") {
        settings.tools.command = Some(v);
        settings.tools.args.clear();
    }

    // ── Jira ────────────────────────────────────────────────────────
    if let Some(v) = read("JIRA_DOMAIN") {
        settings.jira.domain = Some(v);
    }
    if let Some(v) = read("JIRA_EMAIL") {
        settings.jira.email = Some(v);
    }
    if let Some(v) = read("JIRA_API") {
        settings.jira.api_token = Some(SecretString::from(v));
    }
}

/// `OLLAMA_HOST` is often given without a scheme (`127.0.0.1:11434`).
fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
