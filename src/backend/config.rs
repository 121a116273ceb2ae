//! Backend configuration: one reachable model endpoint
//!
//! A `BackendConfig` is validated once when it is built and is immutable
//! afterwards. Roles hold it behind an `Arc`, so several roles can route to
//! the same endpoint without copying it.

use std::time::Duration;

use super::error::ConfigError;

/// Default sampling temperature used by the role presets
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry schedule for a backend call
///
/// Attempt `n` (0-based) that failed with a retryable error waits
/// `min(base_delay * 2^n, max_delay)` before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay to wait after the failed attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Connection and sampling parameters for one model-serving endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    id: String,
    base_url: String,
    model_name: String,
    api_key: String,
    temperature: f32,
    timeout: Duration,
    retry: RetryPolicy,
}

impl BackendConfig {
    /// Start building a config for `model_name` served at `base_url`
    ///
    /// `base_url` is the OpenAI-compatible root, e.g. `http://localhost:11434/v1`.
    pub fn builder(
        id: impl Into<String>,
        base_url: impl Into<String>,
        model_name: impl Into<String>,
    ) -> BackendConfigBuilder {
        BackendConfigBuilder {
            id: id.into(),
            base_url: base_url.into(),
            model_name: model_name.into(),
            api_key: "ollama".to_string(),
            temperature: DEFAULT_TEMPERATURE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.retry.max_retries
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Root of the server's native API (where `/api/pull` lives)
    ///
    /// Ollama serves the OpenAI-compatible API under `/v1`; the native API
    /// sits one level up.
    pub fn native_root(&self) -> &str {
        self.base_url
            .strip_suffix("/v1")
            .unwrap_or(&self.base_url)
    }

    /// Build a full URL for an OpenAI-compatible endpoint path
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Builder for [`BackendConfig`]; validation happens in [`build`](Self::build)
#[derive(Debug, Clone)]
pub struct BackendConfigBuilder {
    id: String,
    base_url: String,
    model_name: String,
    api_key: String,
    temperature: f32,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl BackendConfigBuilder {
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate and freeze the config
    ///
    /// Out-of-range values are rejected, never clamped.
    pub fn build(self) -> Result<BackendConfig, ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::Empty { field: "id" });
        }
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::Empty { field: "model_name" });
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }

        let base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ConfigError::Empty { field: "base_url" });
        }
        let parsed = reqwest::Url::parse(&base_url).map_err(|e| ConfigError::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: base_url,
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }

        Ok(BackendConfig {
            id: self.id,
            base_url,
            model_name: self.model_name,
            api_key: self.api_key,
            temperature: self.temperature,
            timeout: Duration::from_secs(self.timeout_secs),
            retry: self.retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> BackendConfigBuilder {
        BackendConfig::builder("local", "http://localhost:11434/v1", "qwen2.5:7b")
    }

    #[test]
    fn test_defaults() {
        let config = builder().build().unwrap();
        assert_eq!(config.id(), "local");
        assert_eq!(config.model_name(), "qwen2.5:7b");
        assert_eq!(config.api_key(), "ollama");
        assert!((config.temperature() - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert_eq!(config.max_retries(), 3);
    }

    #[test]
    fn test_temperature_out_of_range_rejected() {
        assert_eq!(
            builder().temperature(2.5).build(),
            Err(ConfigError::InvalidTemperature(2.5))
        );
        assert!(builder().temperature(-0.1).build().is_err());
        assert!(builder().temperature(f32::NAN).build().is_err());
        // Bounds are inclusive
        assert!(builder().temperature(0.0).build().is_ok());
        assert!(builder().temperature(2.0).build().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert_eq!(
            builder().timeout_secs(0).build(),
            Err(ConfigError::InvalidTimeout)
        );
    }

    #[test]
    fn test_bad_urls_rejected() {
        let err = BackendConfig::builder("x", "not a url", "m").build();
        assert!(matches!(err, Err(ConfigError::InvalidUrl { .. })));

        let err = BackendConfig::builder("x", "ftp://host/v1", "m").build();
        assert!(matches!(err, Err(ConfigError::InvalidUrl { .. })));

        let err = BackendConfig::builder("x", "  ", "m").build();
        assert_eq!(err, Err(ConfigError::Empty { field: "base_url" }));
    }

    #[test]
    fn test_native_root_strips_openai_prefix() {
        let config = builder().build().unwrap();
        assert_eq!(config.native_root(), "http://localhost:11434");
        assert_eq!(
            config.endpoint("/chat/completions"),
            "http://localhost:11434/v1/chat/completions"
        );

        let config = BackendConfig::builder("x", "http://gpu-box:8080/", "m")
            .build()
            .unwrap();
        assert_eq!(config.base_url(), "http://gpu-box:8080");
        assert_eq!(config.native_root(), "http://gpu-box:8080");
    }

    #[test]
    fn test_retry_delays_grow_and_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for(30), Duration::from_millis(350));
        assert_eq!(policy.total_attempts(), 6);
    }
}
