//! Bounded conversation session state

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::SkillId;

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Build a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Build a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Build an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Conversation history for one session
///
/// Holds at most `2 × max_rounds` alternating user/assistant messages;
/// truncation drops from the oldest end. Mutated only by the turn pipeline,
/// one turn at a time.
#[derive(Debug, Clone)]
pub struct SessionState {
    session_id: Uuid,
    messages: Vec<Message>,
    last_skill: Option<SkillId>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Create an empty session
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            messages: Vec::new(),
            last_skill: None,
        }
    }

    /// The session identifier
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.session_id
    }

    /// The skill invoked by the most recent turn, if any
    #[must_use]
    pub const fn last_skill(&self) -> Option<SkillId> {
        self.last_skill
    }

    /// Record which skill handled the most recent turn
    pub fn set_last_skill(&mut self, skill: Option<SkillId>) {
        self.last_skill = skill;
    }

    /// Append one user/assistant exchange, keeping the newest `max_rounds`
    pub fn append_turn(&mut self, user: Message, assistant: Message, max_rounds: usize) {
        self.messages.push(user);
        self.messages.push(assistant);
        let keep = 2 * max_rounds;
        if self.messages.len() > keep {
            self.messages.drain(..self.messages.len() - keep);
        }
    }

    /// The newest `max_rounds` worth of messages, oldest first
    #[must_use]
    pub fn recent_messages(&self, max_rounds: usize) -> &[Message] {
        let keep = 2 * max_rounds;
        let start = self.messages.len().saturating_sub(keep);
        &self.messages[start..]
    }

    /// All retained messages
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Clear history and skill tracking
    pub fn reset(&mut self) {
        self.messages.clear();
        self.last_skill = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_never_exceeds_two_times_max_rounds() {
        let mut state = SessionState::new();
        for i in 0..50 {
            state.append_turn(
                Message::user(format!("q{i}")),
                Message::assistant(format!("a{i}")),
                8,
            );
            assert!(state.messages().len() <= 16);
        }
        assert_eq!(state.messages().len(), 16);
        // oldest entries were dropped, order preserved
        assert_eq!(state.messages()[0].content, "q42");
        assert_eq!(state.messages()[15].content, "a49");
    }

    #[test]
    fn recent_messages_takes_newest_window() {
        let mut state = SessionState::new();
        for i in 0..5 {
            state.append_turn(
                Message::user(format!("q{i}")),
                Message::assistant(format!("a{i}")),
                10,
            );
        }
        let recent = state.recent_messages(2);
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].content, "q3");
    }

    #[test]
    fn reset_clears_history_and_skill() {
        let mut state = SessionState::new();
        state.append_turn(Message::user("q"), Message::assistant("a"), 8);
        state.set_last_skill(Some(SkillId::Steelman));
        state.reset();
        assert!(state.messages().is_empty());
        assert!(state.last_skill().is_none());
    }

    #[test]
    fn message_roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
