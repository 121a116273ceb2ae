//! Human-input suspension points
//!
//! When a session needs a human decision it sends a [`HumanPrompt`] over the
//! channel returned by `SessionController::take_human_prompts` and waits for
//! the answer on the prompt's reply channel. Dropping the receiver or the
//! reply sender is read as [`HumanInput::Stop`].

use std::str::FromStr;

use tokio::sync::oneshot;

use super::transcript::Message;

/// When a session yields to a human
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HumanInputMode {
    /// Never suspend
    #[default]
    Never,
    /// Suspend only when the termination predicate fires
    Terminate,
    /// Suspend before every automatic turn
    Always,
}

impl FromStr for HumanInputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(HumanInputMode::Never),
            "terminate" => Ok(HumanInputMode::Terminate),
            "always" => Ok(HumanInputMode::Always),
            other => Err(format!(
                "unknown human input mode {:?} (expected never, terminate or always)",
                other
            )),
        }
    }
}

/// A human's answer at a suspension point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanInput {
    /// Proceed: take the next turn, or accept the proposed termination
    Continue,
    /// Append this text as a message from the human, then keep going
    Reply(String),
    /// End the session now
    Stop,
}

/// Why the session suspended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspendReason {
    /// About to take automatic turn `turn` with `speaker`
    BeforeTurn { turn: usize, speaker: String },
    /// The termination predicate fired on `message`
    TerminationProposed { message: Message },
}

/// Suspension notice delivered to the external caller
#[derive(Debug)]
pub struct HumanPrompt {
    pub reason: SuspendReason,
    reply: oneshot::Sender<HumanInput>,
}

impl HumanPrompt {
    pub(crate) fn new(reason: SuspendReason) -> (Self, oneshot::Receiver<HumanInput>) {
        let (reply, rx) = oneshot::channel();
        (Self { reason, reply }, rx)
    }

    /// Resume the session with `input`
    pub fn respond(self, input: HumanInput) {
        // The session may already be gone (cancelled); nothing to resume then
        let _ = self.reply.send(input);
    }
}
