//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PolarisSettings::default()`]
//! 2. If `~/.polaris/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `POLARIS_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use polaris_core::security::InternalKey;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::PolarisSettings;

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}

/// Resolve the path to the settings file (`~/.polaris/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join(".polaris").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PolarisSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or the merged values fail validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<PolarisSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the settings file, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<PolarisSettings> {
    let defaults = serde_json::to_value(PolarisSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_owned(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_owned(),
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

/// Apply `POLARIS_*` environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut PolarisSettings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_overrides_with<F>(settings: &mut PolarisSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // Server
    if let Some(v) = env.string("POLARIS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("POLARIS_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("POLARIS_DB_PATH") {
        settings.database.path = v;
    }

    // Agent
    if let Some(v) = env.u64("POLARIS_MAX_ITERATIONS", 1, 1_000) {
        settings.agent.max_iterations = v as u32;
    }
    if let Some(v) = env.usize("POLARIS_HISTORY_LIMIT", 0, 1_000) {
        settings.agent.history_limit = v;
    }
    if let Some(v) = env.u64("POLARIS_SETTLE_DELAY_MS", 0, 600_000) {
        settings.agent.settle_delay_ms = v;
    }

    // Gateway
    if let Some(v) = env.string("POLARIS_GATEWAY_URL") {
        settings.gateway.base_url = v;
    }
    if let Some(v) = env.string("POLARIS_AGENT_MODEL") {
        settings.gateway.agent_model = v;
    }
    if let Some(v) = env.string("POLARIS_TITLE_MODEL") {
        settings.gateway.title_model = v;
    }

    // Logging
    if let Some(v) = env.string("POLARIS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("POLARIS_LOG_JSON") {
        settings.logging.json = v;
    }

    // Trust boundary
    if let Some(key) = InternalKey::from_optional((env.lookup)("POLARIS_INTERNAL_KEY").as_deref()) {
        settings.internal_key = Some(key);
    }
}

// Pure parsing functions (testable without env vars)

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

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}
