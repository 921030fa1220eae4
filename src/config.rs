use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TriageError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Message ids requested per listing page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Concurrent metadata fetches per page
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Unanalyzed messages sent per model request
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI-compatible endpoint base, e.g. "https://api.openai.com/v1"
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Snippet length ceiling in the prompt payload
    #[serde(default = "default_snippet_max_chars")]
    pub snippet_max_chars: usize,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            snippet_max_chars: default_snippet_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_page_size() -> u32 {
    10
}

fn default_max_concurrent_fetches() -> usize {
    10
}

fn default_batch_size() -> u32 {
    20
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_temperature() -> f32 {
    0.4
}

fn default_snippet_max_chars() -> usize {
    200
}

fn default_database_path() -> String {
    ".gmail-triage/messages.db".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TriageError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TriageError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TriageError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Write a commented example configuration
    pub async fn create_example(path: &Path) -> Result<()> {
        let example = r#"# gmail-triage configuration

[sync]
# Message ids requested per listing page (1-500)
page_size = 10
# Concurrent metadata fetches per page (1-50)
max_concurrent_fetches = 10

[classification]
# Unanalyzed messages sent per model request (1-100)
batch_size = 20
model = "gpt-4"
# Any OpenAI-compatible chat-completions endpoint
base_url = "https://api.openai.com/v1"
temperature = 0.4
# Snippet length ceiling in the prompt payload
snippet_max_chars = 200

[storage]
database_path = ".gmail-triage/messages.db"
"#;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TriageError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        tokio::fs::write(path, example)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.sync.page_size == 0 || self.sync.page_size > 500 {
            return Err(TriageError::ConfigError(
                "sync.page_size must be between 1 and 500".to_string(),
            ));
        }

        if self.sync.max_concurrent_fetches == 0 || self.sync.max_concurrent_fetches > 50 {
            return Err(TriageError::ConfigError(
                "sync.max_concurrent_fetches must be between 1 and 50 (to stay under Gmail API rate limits)"
                    .to_string(),
            ));
        }

        if self.classification.batch_size == 0 || self.classification.batch_size > 100 {
            return Err(TriageError::ConfigError(
                "classification.batch_size must be between 1 and 100".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.classification.temperature) {
            return Err(TriageError::ConfigError(
                "classification.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.classification.base_url.trim().is_empty() {
            return Err(TriageError::ConfigError(
                "classification.base_url must not be empty".to_string(),
            ));
        }

        if self.classification.snippet_max_chars == 0 {
            return Err(TriageError::ConfigError(
                "classification.snippet_max_chars must be at least 1".to_string(),
            ));
        }

        if self.storage.database_path.trim().is_empty() {
            return Err(TriageError::ConfigError(
                "storage.database_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
