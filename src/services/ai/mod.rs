pub mod assistant;
pub mod groq;
pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::ConversationMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl From<&ConversationMessage> for Message {
    fn from(m: &ConversationMessage) -> Self {
        Self {
            role: m.role.clone(),
            content: m.content.clone(),
        }
    }
}

/// Sampling knobs passed through to the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 250,
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[Message],
        options: ChatOptions,
    ) -> anyhow::Result<String>;
}

/// Coarse intent hint for a single utterance.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> anyhow::Result<String>;
}

/// Free-form reply for turns the booking engine does not handle.
#[async_trait]
pub trait ConversationalFallback: Send + Sync {
    async fn respond(&self, history: &[ConversationMessage]) -> anyhow::Result<String>;
}

/// System prompt followed by the conversation, in chat-completions shape.
pub(crate) fn chat_messages(system_prompt: &str, messages: &[Message]) -> Vec<serde_json::Value> {
    let mut out = vec![json!({
        "role": "system",
        "content": system_prompt,
    })];

    for msg in messages {
        out.push(json!({
            "role": msg.role,
            "content": msg.content,
        }));
    }
    out
}
