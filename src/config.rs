//! Runtime settings read from the environment
//!
//! Every setting has a hard-coded default so the crate runs against a stock
//! local Ollama with no configuration at all. A variable that is set but
//! malformed is an error, never a silent fallback.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::agent::HumanInputMode;
use crate::backend::{BackendConfig, ConfigError};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_MODEL: &str = "qwen2.5:7b";
pub const DEFAULT_CODE_MODEL: &str = "starcoder2:3b";

/// Settings shared by the CLI and the role presets
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// OpenAI-compatible base URL (`OLLAMA_BASE_URL`)
    pub base_url: String,
    /// General-purpose model (`OLLAMA_MODEL`)
    pub model: String,
    /// Code-specialised model (`OLLAMA_CODE_MODEL`)
    pub code_model: String,
    /// Credential placeholder sent as a bearer token (`OLLAMA_API_KEY`)
    pub api_key: String,
    /// Sampling temperature (`AUTOGEN_TEMPERATURE`)
    pub temperature: f32,
    /// Per-request timeout in seconds (`OLLAMA_TIMEOUT_SECS`)
    pub timeout_secs: u64,
    /// Retries after a failed backend call (`OLLAMA_MAX_RETRIES`)
    pub max_retries: u32,
    /// Default turn bound for sessions (`AGENTS_MAX_TURNS`)
    pub max_turns: usize,
    /// Default human-input mode (`AGENTS_HUMAN_INPUT_MODE`)
    pub human_input_mode: HumanInputMode,
    /// Working directory for sandboxed execution (`AGENTS_WORK_DIR`)
    pub work_dir: PathBuf,
    /// OTLP collector endpoint (`OTEL_EXPORTER_OTLP_ENDPOINT`)
    pub otlp_endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            code_model: DEFAULT_CODE_MODEL.to_string(),
            api_key: "ollama".to_string(),
            temperature: 0.7,
            timeout_secs: 300,
            max_retries: 3,
            max_turns: 10,
            human_input_mode: HumanInputMode::Never,
            work_dir: PathBuf::from("."),
            otlp_endpoint: None,
        }
    }
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            base_url: get("OLLAMA_BASE_URL").unwrap_or(defaults.base_url),
            model: get("OLLAMA_MODEL").unwrap_or(defaults.model),
            code_model: get("OLLAMA_CODE_MODEL").unwrap_or(defaults.code_model),
            api_key: get("OLLAMA_API_KEY").unwrap_or(defaults.api_key),
            temperature: parse_var("AUTOGEN_TEMPERATURE", get("AUTOGEN_TEMPERATURE"))?
                .unwrap_or(defaults.temperature),
            timeout_secs: parse_var("OLLAMA_TIMEOUT_SECS", get("OLLAMA_TIMEOUT_SECS"))?
                .unwrap_or(defaults.timeout_secs),
            max_retries: parse_var("OLLAMA_MAX_RETRIES", get("OLLAMA_MAX_RETRIES"))?
                .unwrap_or(defaults.max_retries),
            max_turns: parse_var("AGENTS_MAX_TURNS", get("AGENTS_MAX_TURNS"))?
                .unwrap_or(defaults.max_turns),
            human_input_mode: parse_var(
                "AGENTS_HUMAN_INPUT_MODE",
                get("AGENTS_HUMAN_INPUT_MODE"),
            )?
            .unwrap_or(defaults.human_input_mode),
            work_dir: get("AGENTS_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }

    /// Build a validated backend for `model` using these settings
    pub fn backend(
        &self,
        id: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Arc<BackendConfig>, ConfigError> {
        BackendConfig::builder(id, self.base_url.clone(), model)
            .api_key(self.api_key.clone())
            .temperature(self.temperature)
            .timeout_secs(self.timeout_secs)
            .max_retries(self.max_retries)
            .build()
            .map(Arc::new)
    }
}

fn parse_var<T>(key: &str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidVar {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
