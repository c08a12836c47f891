use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::settings::AppConfig;
use super::validation::validate_config;
use crate::core::errors::ConfigError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 8] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "access_key",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 2] = ["max_tokens", "tokens"];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("THERAPY_SYNTH_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// `config.yml` with `secrets.yaml` merged over it.
    pub fn load_config(&self) -> Value {
        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.secrets_path());
        deep_merge(&public_config, &secrets_config)
    }

    /// Loads, validates and types the configuration, then applies
    /// environment overrides.
    pub fn load_app_config(&self) -> Result<AppConfig, ConfigError> {
        let merged = self.load_config();
        validate_config(&merged)?;
        tracing::debug!("Effective config: {}", redact_sensitive_values(&merged));

        let mut config: AppConfig = serde_json::from_value(merged)
            .map_err(|e| ConfigError::Deserialize(e.to_string()))?;
        apply_env_overrides(&mut config, |key| env::var(key).ok());
        Ok(config)
    }

    pub fn index_path(&self, config: &AppConfig) -> PathBuf {
        match &config.index.path {
            Some(path) => self.paths.resolve(path),
            None => self.paths.index_path.clone(),
        }
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value) => match value {
                Value::Object(_) => value,
                _ => Value::Object(Map::new()),
            },
            Err(err) => {
                tracing::warn!("Ignoring unparseable config {}: {}", path.display(), err);
                Value::Object(Map::new())
            }
        },
        Err(err) => {
            tracing::warn!("Failed to read config {}: {}", path.display(), err);
            Value::Object(Map::new())
        }
    }
}

fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
        config.server.port = port;
    }

    if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()) {
        if config.embedding.api_key.is_none() {
            config.embedding.api_key = Some(key.clone());
        }
        if config.generation.api_key.is_none() {
            config.generation.api_key = Some(key);
        }
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(dir: &Path) -> ConfigService {
        ConfigService::new(Arc::new(AppPaths::from_dirs(
            dir.to_path_buf(),
            dir.join("data"),
        )))
    }

    #[test]
    fn deep_merge_merges_objects_and_overrides_scalars() {
        let base = json!({
            "a": 1,
            "b": { "c": 2, "d": 3 },
            "arr": [1, 2]
        });
        let override_value = json!({
            "b": { "c": 99 },
            "arr": [3],
            "e": "x"
        });

        let merged = deep_merge(&base, &override_value);

        assert_eq!(
            merged,
            json!({
                "a": 1,
                "b": { "c": 99, "d": 3 },
                "arr": [3],
                "e": "x"
            })
        );
    }

    #[test]
    fn redact_sensitive_values_replaces_secrets_only() {
        let input = json!({
            "generation": { "api_key": "sk-live", "max_tokens": 1000 },
            "embedding": { "api_key": null }
        });

        assert_eq!(
            redact_sensitive_values(&input),
            json!({
                "generation": { "api_key": "****", "max_tokens": 1000 },
                "embedding": { "api_key": null }
            })
        );
    }

    #[test]
    fn secrets_file_overrides_public_config() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        fs::write(
            dir.path().join("config.yml"),
            "generation:\n  model: gpt-4.1-mini\n  max_tokens: 400\n",
        )
        .unwrap();
        fs::write(svc.secrets_path(), "generation:\n  api_key: sk-secret\n").unwrap();

        let merged = svc.load_config();
        assert_eq!(merged["generation"]["model"], "gpt-4.1-mini");
        assert_eq!(merged["generation"]["api_key"], "sk-secret");
        assert_eq!(merged["generation"]["max_tokens"], 400);
    }

    #[test]
    fn env_overrides_fill_missing_keys_and_port() {
        let mut config = AppConfig::default();
        config.generation.api_key = Some("configured".into());

        apply_env_overrides(&mut config, |key| match key {
            "PORT" => Some("9100".into()),
            "OPENAI_API_KEY" => Some("from-env".into()),
            _ => None,
        });

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.embedding.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.generation.api_key.as_deref(), Some("configured"));
    }

    #[test]
    fn index_path_resolves_against_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let mut config = AppConfig::default();
        assert_eq!(svc.index_path(&config), svc.paths().index_path);

        config.index.path = Some(PathBuf::from("other.db"));
        assert_eq!(svc.index_path(&config), dir.path().join("data").join("other.db"));
    }
}
