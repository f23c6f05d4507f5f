//! Per-session state: the conversation and the pending fix.
//!
//! One [`SessionContext`] is created per operator session and passed into
//! every router call. Nothing here is process-wide.

use crate::llm::{prompts, Message, Role};
use crate::remediation::Diagnosis;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    #[serde(flatten)]
    pub message: Message,
    pub at: DateTime<Utc>,
}

/// Ordered turns behind a fixed system prompt. When `max_turns` is non-zero
/// the oldest turns are dropped once it is exceeded; the system prompt is
/// never dropped.
#[derive(Debug, Clone)]
pub struct Conversation {
    system: Message,
    turns: Vec<Turn>,
    max_turns: usize,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>, max_turns: usize) -> Self {
        Self {
            system: Message::system(system_prompt),
            turns: Vec::new(),
            max_turns,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.turns.push(Turn {
            message,
            at: Utc::now(),
        });
        if self.max_turns > 0 && self.turns.len() > self.max_turns {
            let excess = self.turns.len() - self.max_turns;
            self.turns.drain(..excess);
            tracing::debug!(dropped = excess, "trimmed conversation history");
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content));
    }

    /// System prompt followed by every kept turn, ready to send to the model.
    pub fn messages(&self) -> Vec<Message> {
        std::iter::once(self.system.clone())
            .chain(self.turns.iter().map(|t| t.message.clone()))
            .collect()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.turns.last().map(|t| &t.message)
    }

    pub fn last_assistant(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.message.role == Role::Assistant)
            .map(|t| t.message.content.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: Uuid,
    pub conversation: Conversation,
    pending_fix: Option<Diagnosis>,
}

impl SessionContext {
    pub fn new(max_turns: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation: Conversation::new(prompts::ROUTER_SYSTEM, max_turns),
            pending_fix: None,
        }
    }

    pub fn pending_fix(&self) -> Option<&Diagnosis> {
        self.pending_fix.as_ref()
    }

    pub fn has_pending_fix(&self) -> bool {
        self.pending_fix.is_some()
    }

    /// Store a newer fix, returning the one it replaced.
    pub fn set_pending_fix(&mut self, diagnosis: Diagnosis) -> Option<Diagnosis> {
        tracing::info!(
            session = %self.id,
            file = %diagnosis.file_path,
            line = diagnosis.line_number,
            "pending fix recorded"
        );
        self.pending_fix.replace(diagnosis)
    }

    pub fn clear_pending_fix(&mut self) -> Option<Diagnosis> {
        self.pending_fix.take()
    }
}
