use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::AiError;

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Chat history for one server session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
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

    /// Record a completed exchange
    pub fn record(&mut self, prompt: impl Into<String>, reply: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::User,
            text: prompt.into(),
        });
        self.turns.push(Turn {
            role: Role::Model,
            text: reply.into(),
        });
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Text completion capability used by the AI tools.
///
/// Implementations append the exchange to `conversation` only when the call
/// succeeds.
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn ask(&self, conversation: &mut Conversation, prompt: &str) -> Result<String, AiError>;
}

/// Backend used when no API key is available
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredBackend;

#[async_trait]
impl AiBackend for UnconfiguredBackend {
    async fn ask(&self, _conversation: &mut Conversation, _prompt: &str) -> Result<String, AiError> {
        Err(AiError::NotConfigured)
    }
}

#[async_trait]
impl<B: AiBackend + ?Sized> AiBackend for Box<B> {
    async fn ask(&self, conversation: &mut Conversation, prompt: &str) -> Result<String, AiError> {
        (**self).ask(conversation, prompt).await
    }
}
