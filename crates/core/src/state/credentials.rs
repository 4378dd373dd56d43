//! # Credential Store
//!
//! Provider API keys persisted as a flat JSON object of
//! `ENV_VAR_NAME -> secret`. Every entry is merged into each agent's base
//! environment at the start of a run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const CREDENTIALS_FILE: &str = "api_keys.json";

/// Fallback directory used when `api_keys.json` is itself a directory
/// (a bind mount of a file that did not exist yet ends up as one)
pub const FALLBACK_DIR: &str = "config";

/// Keys as submitted by a client, one per provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyUpdate {
    pub claude_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub codex_api_key: Option<String>,
}

/// Environment-variable-keyed secrets backed by a JSON file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialStore {
    path: PathBuf,
    keys: BTreeMap<String, String>,
}

/// Resolve where the credential file lives under `base`
pub fn credentials_path(base: impl AsRef<Path>) -> PathBuf {
    let base = base.as_ref();
    let candidate = base.join(CREDENTIALS_FILE);
    if candidate.is_dir() {
        base.join(FALLBACK_DIR).join(CREDENTIALS_FILE)
    } else {
        candidate
    }
}

impl CredentialStore {
    /// Load from `path`; a missing or unreadable file yields an empty store
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let keys = match fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt credential file");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self { path, keys }
    }

    /// Load from the resolved location under `base`
    pub async fn load_from_dir(base: impl AsRef<Path>) -> Self {
        Self::load(credentials_path(base)).await
    }

    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory: {:?}", parent))?;
            }
        }
        let data = serde_json::to_string_pretty(&self.keys)?;
        fs::write(&self.path, data)
            .await
            .with_context(|| format!("Failed to write credentials: {:?}", self.path))
    }

    /// Apply a client update; empty or absent keys leave existing entries alone
    pub fn merge_keys(&mut self, update: &ApiKeyUpdate) {
        let pairs = [
            ("ANTHROPIC_API_KEY", &update.claude_api_key),
            ("GEMINI_API_KEY", &update.gemini_api_key),
            ("OPENAI_API_KEY", &update.codex_api_key),
        ];
        for (var, value) in pairs {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                self.keys.insert(var.to_string(), value.to_string());
            }
        }
    }

    pub fn set(&mut self, var: impl Into<String>, value: impl Into<String>) {
        self.keys.insert(var.into(), value.into());
    }

    pub fn keys(&self) -> &BTreeMap<String, String> {
        &self.keys
    }

    /// Keys with their values masked down to the last four characters
    pub fn masked(&self) -> BTreeMap<String, String> {
        self.keys
            .iter()
            .map(|(k, v)| {
                let tail: String = v
                    .chars()
                    .rev()
                    .take(4)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                (k.clone(), format!("****{}", tail))
            })
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_and_corrupt_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("nope.json")).await;
        assert!(store.keys().is_empty());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{not json").unwrap();
        let store = CredentialStore::load(&corrupt).await;
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_merge_and_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CredentialStore::load_from_dir(dir.path()).await;
        store.set("OPENAI_API_KEY", "old");
        store.merge_keys(&ApiKeyUpdate {
            claude_api_key: Some("sk-ant".to_string()),
            gemini_api_key: Some(String::new()),
            codex_api_key: None,
        });
        tokio_test::assert_ok!(store.save().await);

        let reloaded = CredentialStore::load_from_dir(dir.path()).await;
        assert_eq!(reloaded.keys().get("ANTHROPIC_API_KEY").unwrap(), "sk-ant");
        assert_eq!(reloaded.keys().get("OPENAI_API_KEY").unwrap(), "old");
        assert!(reloaded.keys().get("GEMINI_API_KEY").is_none());
    }

    #[test]
    fn test_directory_shadowing_falls_back_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            credentials_path(dir.path()),
            dir.path().join(CREDENTIALS_FILE)
        );

        std::fs::create_dir(dir.path().join(CREDENTIALS_FILE)).unwrap();
        assert_eq!(
            credentials_path(dir.path()),
            dir.path().join(FALLBACK_DIR).join(CREDENTIALS_FILE)
        );
    }

    #[test]
    fn test_masked_hides_secrets() {
        let mut store = CredentialStore::default();
        store.set("GEMINI_API_KEY", "abcdefgh");
        assert_eq!(store.masked().get("GEMINI_API_KEY").unwrap(), "****efgh");
    }
}
