//! Settings sections. Every struct uses camelCase keys and `#[serde(default)]`
//! so a partial settings file only overrides what it names.

use polaris_core::security::InternalKey;
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolarisSettings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub agent: AgentSettings,
    pub steps: StepSettings,
    pub gateway: GatewaySettings,
    pub logging: LoggingSettings,
    /// Internal shared secret. Only ever taken from `POLARIS_INTERNAL_KEY`.
    #[serde(skip)]
    pub internal_key: Option<InternalKey>,
}

impl PolarisSettings {
    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> crate::errors::Result<()> {
        use crate::errors::SettingsError;
        if self.agent.max_iterations == 0 {
            return Err(SettingsError::InvalidValue(
                "agent.maxIterations must be at least 1".into(),
            ));
        }
        if self.steps.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "steps.maxAttempts must be at least 1".into(),
            ));
        }
        if self.steps.base_delay_ms > self.steps.max_delay_ms {
            return Err(SettingsError::InvalidValue(
                "steps.baseDelayMs must not exceed steps.maxDelayMs".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9191,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// SQLite file path. A leading `~/` expands to `$HOME`.
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "~/.polaris/database/polaris.db".to_string(),
        }
    }
}

impl DatabaseSettings {
    pub fn resolved_path(&self) -> std::path::PathBuf {
        crate::loader::expand_home(&self.path)
    }
}

/// Agent loop and message job tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Hard cap on model turns per message.
    pub max_iterations: u32,
    /// How many past messages are folded into the system prompt.
    pub history_limit: usize,
    /// Delay before a job starts reading the conversation.
    pub settle_delay_ms: u64,
    pub max_tokens: u32,
    /// Tool output beyond this many bytes is truncated before reaching the model.
    pub tool_output_limit_bytes: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            history_limit: 10,
            settle_delay_ms: 0,
            max_tokens: 4096,
            tool_output_limit_bytes: 256 * 1024,
        }
    }
}

/// Step retry policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StepSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

/// Model gateway endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    pub base_url: String,
    pub agent_model: String,
    pub title_model: String,
    pub timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            agent_model: "agent-default".to_string(),
            title_model: "title-default".to_string(),
            timeout_ms: 120_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}
