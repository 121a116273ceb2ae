//! Model backend integration
//!
//! This module describes one model-serving endpoint ([`BackendConfig`]) and
//! provides the HTTP client that talks to it ([`BackendClient`]).

pub mod client;
pub mod config;
pub mod error;

pub use client::{BackendClient, ChatMessage, Completion, PullProgress};
pub use config::{BackendConfig, BackendConfigBuilder, RetryPolicy};
pub use error::{BackendError, ConfigError, FailureCategory, ModelUnavailableError, UnavailableReason};
