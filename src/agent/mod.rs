//! Multi-agent conversation sessions
//!
//! A session coordinates a fixed set of [`Role`](crate::roles::Role)s
//! through a bounded sequence of turns:
//!
//! ```text
//! task → SessionController ──► speaker's backend (/v1/chat/completions)
//!              │                      ↓
//!              │              Transcript.append(reply)
//!              │                      ↓
//!              ├── predicate fired?  → Completed (or ask the human)
//!              ├── code fences?      → CodeExecutor → "executor" message
//!              └── turn bound / cancel → Terminated
//! ```

pub mod controller;
pub mod execution;
pub mod human;
pub mod termination;
pub mod transcript;

pub use controller::{
    SessionController, SessionError, SessionEvent, SessionOptions, SessionOutcome,
    SessionReport, SessionState, TerminationReason, TurnFailure,
};
pub use execution::{
    extract_code_fragments, CodeExecutor, CodeFragment, ExecutionError, ExecutionOutput,
};
pub use human::{HumanInput, HumanInputMode, HumanPrompt, SuspendReason};
pub use termination::{SentinelPredicate, TerminationPredicate, DEFAULT_SENTINEL};
pub use transcript::{Message, Transcript, EXECUTOR_SENDER, HUMAN_SENDER};
