//! Runtime configuration, sourced from the environment with sane defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// SQLite database location.
    pub database_path: PathBuf,
    /// Optional YAML file overriding the built-in schema rules.
    pub schema_rules_path: Option<PathBuf>,
    /// Default reasoner model; each turn may override it.
    pub model: String,
    /// Reflection cycles before a session is forced to finish.
    pub max_reflections: usize,
    /// Budget for one planner or reasoner call.
    pub block_timeout: Duration,
    /// Recent exchanges included as conversation context.
    pub history_window: usize,
    pub api_base: String,
    pub api_key: String,
}

impl AgentConfig {
    /// Read configuration from the environment. `OPENAI_API_KEY` is the only
    /// required variable; everything else has a default.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;

        Ok(Self {
            database_path: match std::env::var("PANTRY_AGENT_DB") {
                Ok(path) => PathBuf::from(path),
                Err(_) => default_database_path(),
            },
            schema_rules_path: std::env::var("PANTRY_AGENT_SCHEMA_RULES")
                .ok()
                .map(PathBuf::from),
            model: std::env::var("PANTRY_AGENT_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            max_reflections: env_usize("PANTRY_AGENT_MAX_REFLECTIONS", 5),
            block_timeout: Duration::from_secs(env_usize("PANTRY_AGENT_BLOCK_TIMEOUT_SECS", 60) as u64),
            history_window: env_usize("PANTRY_AGENT_HISTORY_WINDOW", 5),
            api_base: std::env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key,
        })
    }
}

fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pantry-agent")
        .join("pantry.db")
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
