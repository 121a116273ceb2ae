//! Termination predicates
//!
//! A predicate looks at each generated message and decides whether the
//! conversation is finished. Closures `Fn(&Message) -> bool` implement the
//! trait directly.

use super::transcript::Message;

/// Sentinel the built-in role prompts ask models to emit when done
pub const DEFAULT_SENTINEL: &str = "TERMINATE";

pub trait TerminationPredicate: Send + Sync {
    fn should_terminate(&self, message: &Message) -> bool;
}

impl<F> TerminationPredicate for F
where
    F: Fn(&Message) -> bool + Send + Sync,
{
    fn should_terminate(&self, message: &Message) -> bool {
        self(message)
    }
}

/// Fires when the trimmed message ends with a sentinel phrase
///
/// The sentinel must stand as its own word: `NOTERMINATE` or `SELF_TERMINATE`
/// do not count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelPredicate {
    sentinel: String,
}

impl SentinelPredicate {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }
}

impl Default for SentinelPredicate {
    fn default() -> Self {
        Self::new(DEFAULT_SENTINEL)
    }
}

impl TerminationPredicate for SentinelPredicate {
    fn should_terminate(&self, message: &Message) -> bool {
        let text = message.content.trim_end().trim_end_matches(['.', '!']);
        match text.strip_suffix(self.sentinel.as_str()) {
            Some(before) => !before
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_'),
            None => false,
        }
    }
}
