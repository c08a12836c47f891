//! Typed view of the merged configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults::{
    DEFAULT_EMBEDDING_MODEL, DEFAULT_GENERATION_MODEL, DEFAULT_HOST, DEFAULT_OPENAI_BASE_URL,
    DEFAULT_PORT,
};
use crate::core::retry::{Backoff, RetryPolicy};
use crate::index::QualityTier;
use crate::synthesis::request::DEFAULT_TOP_K;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub retry: RetryConfig,
    pub synthesis: SynthesisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Empty allows any origin.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Relative paths resolve against the data directory.
    pub path: Option<PathBuf>,
    pub watch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimensions: Option<usize>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_GENERATION_MODEL.to_string(),
            temperature: Some(0.7),
            max_tokens: Some(1000),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.backoff,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_jitter(self.jitter)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub default_top_k: usize,
    pub channel_capacity: usize,
    pub tier_preference: Vec<QualityTier>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_TOP_K,
            channel_capacity: 64,
            tier_preference: QualityTier::DEFAULT_PREFERENCE.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::MAX_ATTEMPTS_CEILING;
    use serde_json::json;

    #[test]
    fn empty_config_uses_defaults() {
        let config: AppConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.synthesis.default_top_k, 5);
        assert_eq!(config.synthesis.tier_preference, QualityTier::DEFAULT_PREFERENCE);
        assert_eq!(config.retry.policy().max_attempts(), 3);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: AppConfig = serde_json::from_value(json!({
            "generation": { "model": "local-llm" },
            "retry": { "backoff": "fixed", "max_attempts": 50 }
        }))
        .unwrap();
        assert_eq!(config.generation.model, "local-llm");
        assert_eq!(config.generation.max_tokens, Some(1000));
        assert_eq!(config.retry.backoff, Backoff::Fixed);
        assert_eq!(config.retry.policy().max_attempts(), MAX_ATTEMPTS_CEILING);
    }
}
