//! Model availability lifecycle
//!
//! Decouples "does this model exist and answer correctly" from "run a
//! conversation with it".

pub mod manager;

pub use manager::{model_matches, ModelAvailabilityManager, ModelStatus, PollBackoff, PullState};
