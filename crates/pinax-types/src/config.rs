//! Validated runtime configuration, loaded once at startup from the
//! environment per §6 of the specification. Every required variable missing
//! is collected and reported together, rather than failing on the first one
//! found, so an operator sees the whole problem in one pass.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid configuration: missing or malformed variables: {0:?}")]
pub struct ConfigError(pub Vec<String>);

/// Process-wide configuration. Constructed once in the binary crate and
/// shared behind an `Arc` by the dispatcher and every chunk worker.
#[derive(Debug, Clone)]
pub struct Config {
    pub deepinfra_api_key: String,
    pub deepinfra_base_url: String,
    pub model_name: String,
    pub model_max_tokens: i64,
    pub content_token_proportion: f64,
    pub max_retries_per_pi: u32,
    pub max_callback_retries: u32,
    pub alarm_interval_ms: u64,
    pub object_store_base_url: String,
    pub orchestrator_base_url: String,
    pub store_path: String,
    pub listen_addr: String,
    pub metrics_addr: String,
}

struct Builder {
    errors: Vec<String>,
}

impl Builder {
    fn new() -> Self {
        Self { errors: Vec::new() }
    }

    fn require(&mut self, name: &str) -> String {
        match std::env::var(name) {
            Ok(v) if !v.is_empty() => v,
            _ => {
                self.errors.push(name.to_string());
                String::new()
            }
        }
    }

    fn optional_parsed<T: std::str::FromStr>(&mut self, name: &str, default: T) -> T {
        match std::env::var(name) {
            Ok(v) => v.parse().unwrap_or_else(|_| {
                self.errors.push(format!("{name} (invalid value: {v:?})"));
                default
            }),
            Err(_) => default,
        }
    }

    fn optional_string(&self, name: &str, default: &str) -> String {
        std::env::var(name).unwrap_or_else(|_| default.to_string())
    }
}

impl Config {
    /// Reads every variable listed in §6. Required variables missing (or,
    /// for numeric ones, unparseable) are accumulated into one
    /// [`ConfigError`] rather than failing on the first problem found.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut b = Builder::new();

        let deepinfra_api_key = b.require("DEEPINFRA_API_KEY");
        let deepinfra_base_url = b.require("DEEPINFRA_BASE_URL");
        let model_name = b.require("MODEL_NAME");
        let object_store_base_url = b.require("OBJECT_STORE_BASE_URL");
        let orchestrator_base_url = b.require("ORCHESTRATOR_BASE_URL");

        let model_max_tokens = b.optional_parsed("MODEL_MAX_TOKENS", 128_000i64);
        let content_token_proportion = b.optional_parsed("CONTENT_TOKEN_PROPORTION", 0.5f64);
        let max_retries_per_pi = b.optional_parsed("MAX_RETRIES_PER_PI", 3u32);
        let max_callback_retries = b.optional_parsed("MAX_CALLBACK_RETRIES", 3u32);
        let alarm_interval_ms = b.optional_parsed("ALARM_INTERVAL_MS", 100u64);

        let store_path = b.optional_string("STORE_PATH", "./pinax-state.redb");
        let listen_addr = b.optional_string("LISTEN_ADDR", "0.0.0.0:8080");
        let metrics_addr = b.optional_string("METRICS_ADDR", "0.0.0.0:9090");

        if !b.errors.is_empty() {
            return Err(ConfigError(b.errors));
        }

        Ok(Config {
            deepinfra_api_key,
            deepinfra_base_url,
            model_name,
            model_max_tokens,
            content_token_proportion,
            max_retries_per_pi,
            max_callback_retries,
            alarm_interval_ms,
            object_store_base_url,
            orchestrator_base_url,
            store_path,
            listen_addr,
            metrics_addr,
        })
    }
}
