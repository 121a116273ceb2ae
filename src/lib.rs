//! agentmesh - multi-agent coding assistant sessions over local LLM backends
//!
//! Roles (coder, reviewer, tester, ...) talk to OpenAI-compatible servers
//! such as Ollama. Sessions drive bounded, turn-sequential conversations
//! between roles, and the availability manager makes sure the models they
//! need are present before a session starts.
//!
//! # Modules
//!
//! - `backend` - Backend configuration and chat-completions client
//! - `availability` - Model presence checks and coordinated pulls
//! - `roles` - Roles, the role registry and preset rosters
//! - `agent` - Session controller, transcript and human-input seam
//! - `config` - Environment-driven settings
//! - `metrics` - Prometheus metrics
//! - `tracing` - Logging and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use agentmesh::{ModelAvailabilityManager, SessionController, SessionOptions, Settings};
//! use agentmesh::roles::ide_roster;
//!
//! let settings = Settings::from_env()?;
//! let registry = ide_roster(&settings)?;
//! let roles = registry.resolve_all(&["user-proxy", "coder"])?;
//!
//! let session = SessionController::new(roles, SessionOptions::from(&settings))?;
//! session.prepare(&ModelAvailabilityManager::new(), Duration::from_secs(600)).await?;
//! let report = session.start("Write a function that reverses a string").await;
//! ```

pub mod agent;
pub mod availability;
pub mod backend;
pub mod config;
pub mod metrics;
pub mod roles;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{
    HumanInput, HumanInputMode, Message, SessionController, SessionOptions, SessionOutcome,
    SessionReport, SessionState,
};
pub use availability::{ModelAvailabilityManager, ModelStatus, PullState};
pub use backend::{BackendClient, BackendConfig, BackendError, ModelUnavailableError};
pub use config::Settings;
pub use roles::{ExecutionPolicy, Role, RoleRegistry};
