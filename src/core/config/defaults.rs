use serde_json::{json, Value};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_GENERATION_MODEL: &str = "gpt-4.1";

/// Sample request served by `/synthesis-example`.
pub fn example_request() -> Value {
    json!({
        "user_query": "I'm a 25-year-old female who has been struggling with sleep for the past few weeks. I keep waking up at 3am and can't fall back asleep. How can I help myself?",
        "keywords": ["Sleep & Fatigue", "Anxiety"],
        "top_k": 5
    })
}

/// Commented starter config written by `build_index --init-config`.
pub fn starter_config_yaml() -> &'static str {
    r#"server:
  host: 127.0.0.1
  port: 8000
  cors_allowed_origins: []

index:
  path: therapy_index.db
  watch: false

embedding:
  base_url: https://api.openai.com/v1
  model: text-embedding-3-small
  timeout_secs: 30

generation:
  base_url: https://api.openai.com/v1
  model: gpt-4.1
  temperature: 0.7
  max_tokens: 1000
  timeout_secs: 120

retry:
  max_attempts: 3
  backoff: exponential
  base_delay_ms: 500
  max_delay_ms: 8000
  jitter: true

synthesis:
  default_top_k: 5
  channel_capacity: 64
  tier_preference: [high, medium, low]
"#
}
