//! Session transcript: an append-only sequence of messages

use serde::Serialize;

/// Sender name used for messages carrying execution output
pub const EXECUTOR_SENDER: &str = "executor";
/// Sender name used for messages typed by a human at a suspension point
pub const HUMAN_SENDER: &str = "human";

/// One transcript entry; immutable once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub sender: String,
    pub content: String,
    pub turn_index: usize,
}

/// Ordered messages of one session
///
/// `turn_index` is assigned on append and equals the message's position, so
/// indices start at 0 and increase strictly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return a reference to it
    pub fn append(&mut self, sender: impl Into<String>, content: impl Into<String>) -> &Message {
        let turn_index = self.messages.len();
        self.messages.push(Message {
            sender: sender.into(),
            content: content.into(),
            turn_index,
        });
        &self.messages[turn_index]
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_indices_follow_append_order() {
        let mut transcript = Transcript::new();
        transcript.append("coder", "fn main() {}");
        transcript.append(EXECUTOR_SENDER, "Exit code: 0");
        let last = transcript.append("reviewer", "Looks fine");
        assert_eq!(last.turn_index, 2);

        let indices: Vec<usize> = transcript.messages().iter().map(|m| m.turn_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(transcript.last().map(|m| m.sender.as_str()), Some("reviewer"));
    }
}
