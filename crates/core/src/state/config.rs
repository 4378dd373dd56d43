//! # Engine Configuration
//!
//! Loaded once per run and threaded explicitly into the coordinator; nothing
//! here is global.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::credentials::CredentialStore;
use crate::models::AgentId;
use crate::tools::runner::{
    ExecutionSettings, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT,
};

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_base_ms() -> u64 {
    DEFAULT_BACKOFF_BASE.as_millis() as u64
}

/// Settings for one swarm run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock limit per attempt
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Explicit model per agent id (`"claude" -> "claude-opus-4"`)
    #[serde(default)]
    pub agent_models: HashMap<String, String>,
    /// Environment every agent starts from (secrets included)
    #[serde(default, skip_serializing)]
    pub base_environment: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            agent_models: HashMap::new(),
            base_environment: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Defaults plus a snapshot of the current process environment
    pub fn from_env() -> Self {
        Self {
            base_environment: std::env::vars().collect(),
            ..Self::default()
        }
    }

    /// Overlay stored credentials onto the base environment
    pub fn with_credentials(mut self, store: &CredentialStore) -> Self {
        self.base_environment
            .extend(store.keys().iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_agent_models(mut self, models: HashMap<String, String>) -> Self {
        self.agent_models.extend(models);
        self
    }

    pub fn execution_settings(&self) -> ExecutionSettings {
        ExecutionSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            max_attempts: self.max_attempts.max(1),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }

    /// Explicit model for `id`, if one was configured
    pub fn model_for(&self, id: &AgentId) -> Option<&str> {
        self.agent_models
            .get(id.as_str())
            .map(String::as_str)
            .filter(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        let settings = config.execution_settings();
        assert_eq!(settings.timeout, Duration::from_secs(1800));
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.backoff_base, Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_attempts": 5, "agent_models": {"codex": "gpt-4o"}}"#)
                .unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.timeout_secs, 1800);
        assert_eq!(config.model_for(&AgentId::new("codex")), Some("gpt-4o"));
        assert_eq!(config.model_for(&AgentId::new("claude")), None);
    }

    #[test]
    fn test_credentials_overlay_environment() {
        let mut config = EngineConfig::default();
        config
            .base_environment
            .insert("OPENAI_API_KEY".to_string(), "from-env".to_string());

        let mut store = CredentialStore::default();
        store.set("OPENAI_API_KEY", "from-store");
        let config = config.with_credentials(&store);

        assert_eq!(
            config.base_environment.get("OPENAI_API_KEY").unwrap(),
            "from-store"
        );
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let config = EngineConfig {
            max_attempts: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.execution_settings().max_attempts, 1);
    }

    #[test]
    fn test_environment_is_not_serialized() {
        let mut config = EngineConfig::default();
        config
            .base_environment
            .insert("SECRET".to_string(), "x".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("SECRET"));
    }
}
