use serde_json::{Map, Value};

use crate::core::errors::ConfigError;
use crate::core::retry::MAX_ATTEMPTS_CEILING;
use crate::index::QualityTier;
use crate::synthesis::request::{MAX_TOP_K, MIN_TOP_K};

pub fn validate_config(config: &Value) -> Result<(), ConfigError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 1, 65535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
    }

    if let Some(index) = expect_optional_object(root, "index")? {
        validate_optional_string_field(index, "index.path", "path")?;
        validate_bool_field(index, "index.watch", "watch")?;
    }

    for section in ["embedding", "generation"] {
        if let Some(provider) = expect_optional_object(root, section)? {
            validate_non_empty_string_field(provider, &format!("{}.base_url", section), "base_url")?;
            validate_non_empty_string_field(provider, &format!("{}.model", section), "model")?;
            validate_optional_string_field(provider, &format!("{}.api_key", section), "api_key")?;
            validate_u64_field(
                provider,
                &format!("{}.timeout_secs", section),
                "timeout_secs",
                1,
                3_600,
            )?;
        }
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_u64_field(embedding, "embedding.dimensions", "dimensions", 1, 65_536)?;
    }

    if let Some(generation) = expect_optional_object(root, "generation")? {
        validate_f64_field(generation, "generation.temperature", "temperature", 0.0, 2.0)?;
        validate_u64_field(generation, "generation.max_tokens", "max_tokens", 1, 1_000_000)?;
    }

    if let Some(retry) = expect_optional_object(root, "retry")? {
        validate_u64_field(
            retry,
            "retry.max_attempts",
            "max_attempts",
            1,
            MAX_ATTEMPTS_CEILING as u64,
        )?;
        validate_enum_field(retry, "retry.backoff", "backoff", &["fixed", "exponential"])?;
        validate_u64_field(retry, "retry.base_delay_ms", "base_delay_ms", 0, 600_000)?;
        validate_u64_field(retry, "retry.max_delay_ms", "max_delay_ms", 0, 600_000)?;
        validate_bool_field(retry, "retry.jitter", "jitter")?;
    }

    if let Some(synthesis) = expect_optional_object(root, "synthesis")? {
        validate_u64_field(
            synthesis,
            "synthesis.default_top_k",
            "default_top_k",
            MIN_TOP_K as u64,
            MAX_TOP_K as u64,
        )?;
        validate_u64_field(
            synthesis,
            "synthesis.channel_capacity",
            "channel_capacity",
            1,
            10_000,
        )?;
        validate_string_array_field(synthesis, "synthesis.tier_preference", "tier_preference")?;
        if let Some(tiers) = synthesis.get("tier_preference").and_then(Value::as_array) {
            for (index, tier) in tiers.iter().enumerate() {
                let name = tier.as_str().unwrap_or_default();
                if name.parse::<QualityTier>().is_err() {
                    return Err(invalid(
                        &format!("synthesis.tier_preference[{}]", index),
                        "must be one of high, medium, low",
                    ));
                }
            }
        }
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ConfigError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(invalid(path, &format!("must be between {} and {}", min, max)));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if !(min..=max).contains(&number) {
        return Err(invalid(path, &format!("must be between {} and {}", min, max)));
    }
    Ok(())
}

fn validate_non_empty_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if text.trim().is_empty() {
        return Err(invalid(path, "value cannot be empty"));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "string"))
}

fn validate_enum_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    allowed: &[&str],
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if !allowed.contains(&text) {
        return Err(invalid(path, &format!("must be one of {}", allowed.join(", "))));
    }
    Ok(())
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(invalid(&format!("{}[{}]", path, index), "value cannot be empty"));
        }
    }
    Ok(())
}

fn invalid(path: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        path: path.to_string(),
        message: message.to_string(),
    }
}

fn config_type_error(path: &str, expected: &str) -> ConfigError {
    invalid(path, &format!("expected {}", expected))
}
