//! Error types for backend configuration and backend calls

use std::time::Duration;

/// Rejected configuration value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("temperature {0} is outside [0, 2]")]
    InvalidTemperature(f32),

    #[error("timeout must be greater than zero")]
    InvalidTimeout,

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("invalid base url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidVar {
        key: String,
        value: String,
        reason: String,
    },
}

/// Failure of a single backend call
///
/// The variants map onto the three causes a user has to tell apart:
/// the backend is down, the model is not pulled, or the backend speaks a
/// different protocol.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("backend {backend} unreachable: {detail}")]
    Connectivity { backend: String, detail: String },

    #[error("backend {backend} has no model {model}")]
    ModelMissing { backend: String, model: String },

    #[error("backend {backend} returned an unexpected response: {detail}")]
    ProtocolMismatch { backend: String, detail: String },
}

impl BackendError {
    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Connectivity { .. })
    }

    pub fn category(&self) -> FailureCategory {
        match self {
            BackendError::Connectivity { .. } => FailureCategory::BackendDown,
            BackendError::ModelMissing { .. } => FailureCategory::ModelNotPulled,
            BackendError::ProtocolMismatch { .. } => FailureCategory::BadResponseShape,
        }
    }

    pub(crate) fn from_reqwest(backend: &str, err: reqwest::Error) -> Self {
        let detail = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_decode() {
            return BackendError::ProtocolMismatch {
                backend: backend.to_string(),
                detail: err.to_string(),
            };
        } else {
            err.to_string()
        };
        BackendError::Connectivity {
            backend: backend.to_string(),
            detail,
        }
    }
}

/// User-visible cause of a terminal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    BackendDown,
    ModelNotPulled,
    BadResponseShape,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCategory::BackendDown => write!(f, "backend down"),
            FailureCategory::ModelNotPulled => write!(f, "model not pulled"),
            FailureCategory::BadResponseShape => write!(f, "bad response shape"),
        }
    }
}

/// Why `ensure_available` gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    Timeout { waited: Duration },
    PullFailed { detail: String },
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::Timeout { waited } => {
                write!(f, "not ready after {:.1}s", waited.as_secs_f64())
            }
            UnavailableReason::PullFailed { detail } => write!(f, "pull failed: {}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("model {model} unavailable on backend {backend}: {reason}")]
pub struct ModelUnavailableError {
    pub backend: String,
    pub model: String,
    pub reason: UnavailableReason,
}

impl ModelUnavailableError {
    pub fn is_timeout(&self) -> bool {
        matches!(self.reason, UnavailableReason::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connectivity_is_retryable() {
        let down = BackendError::Connectivity {
            backend: "a".into(),
            detail: "refused".into(),
        };
        let shape = BackendError::ProtocolMismatch {
            backend: "a".into(),
            detail: "no choices".into(),
        };
        let missing = BackendError::ModelMissing {
            backend: "a".into(),
            model: "qwen2.5:7b".into(),
        };

        assert!(down.is_retryable());
        assert!(!shape.is_retryable());
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_categories_are_distinct() {
        let missing = BackendError::ModelMissing {
            backend: "a".into(),
            model: "m".into(),
        };
        assert_eq!(missing.category(), FailureCategory::ModelNotPulled);
        assert_eq!(missing.category().to_string(), "model not pulled");
    }

    #[test]
    fn test_unavailable_message_names_backend_and_model() {
        let err = ModelUnavailableError {
            backend: "local".into(),
            model: "qwen2.5:7b".into(),
            reason: UnavailableReason::PullFailed {
                detail: "manifest unknown".into(),
            },
        };
        let text = err.to_string();
        assert!(text.contains("local"));
        assert!(text.contains("qwen2.5:7b"));
        assert!(text.contains("manifest unknown"));
        assert!(!err.is_timeout());
    }
}
