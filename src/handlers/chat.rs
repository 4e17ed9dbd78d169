use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::services::conversation;
use crate::state::AppState;

pub const EXIT_REPLY: &str = "Exiting chatbot. Goodbye!";
pub const TROUBLE_REPLY: &str = "Sorry, I'm having trouble right now. Please try again in a moment.";

#[derive(Debug, Deserialize, Serialize)]
pub struct ChatMessage {
    pub content: String,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChatEnvelope {
    pub message: ChatMessage,
}

fn is_exit_command(content: &str) -> bool {
    content.eq_ignore_ascii_case("exit") || content.eq_ignore_ascii_case("quit")
}

fn envelope(content: String, id: String) -> Json<ChatEnvelope> {
    Json(ChatEnvelope {
        message: ChatMessage { content, id },
    })
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatEnvelope>,
) -> Result<Json<ChatEnvelope>, AppError> {
    let content = payload.message.content.trim().to_string();
    if content.is_empty() {
        return Err(AppError::BadRequest("message content is empty".to_string()));
    }

    let session_id = match payload.message.id.trim() {
        "" => uuid::Uuid::new_v4().to_string(),
        id => id.to_string(),
    };

    tracing::info!(session = %session_id, "incoming chat message");

    if is_exit_command(&content) {
        if let Err(e) = conversation::end_session(&state, &session_id).await {
            tracing::warn!(session = %session_id, error = %e, "failed to clear session");
        }
        return Ok(envelope(EXIT_REPLY.to_string(), session_id));
    }

    let reply = match conversation::process_message(&state, &session_id, &content).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(session = %session_id, error = %e, "failed to process message");
            TROUBLE_REPLY.to_string()
        }
    };

    Ok(envelope(reply, session_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_commands() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("QUIT"));
        assert!(!is_exit_command("exit please"));
    }

    #[test]
    fn test_envelope_accepts_missing_id() {
        let payload: ChatEnvelope = serde_json::from_str(r#"{"message":{"content":"hi"}}"#).unwrap();
        assert_eq!(payload.message.content, "hi");
        assert!(payload.message.id.is_empty());
    }
}
