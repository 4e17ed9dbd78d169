use std::sync::Arc;

use chrono::{Duration, Local, Utc};

use crate::db::queries;
use crate::errors::BookingError;
use crate::models::{Conversation, ConversationMessage};
use crate::services::orchestrator::{self, Collaborators};
use crate::state::AppState;

/// Run one chat turn for `session_id` and return the reply text.
///
/// Turns for the same session are serialized. A turn whose commit fails
/// replies with the failure text and leaves the stored conversation as it
/// was before the turn.
pub async fn process_message(
    state: &Arc<AppState>,
    session_id: &str,
    message: &str,
) -> anyhow::Result<String> {
    let lock = state.session_lock(session_id);
    let _guard = lock.lock().await;

    let mut conv = {
        let db = state
            .db
            .lock()
            .map_err(|_| anyhow::anyhow!("database lock poisoned"))?;
        queries::get_conversation(&db, session_id)?
    }
    .unwrap_or_else(|| new_conversation(session_id, state.config.session_ttl_minutes));

    conv.messages.push(ConversationMessage::user(message));

    let deps = Collaborators {
        store: state.store.as_ref(),
        write_lock: &state.appointments_lock,
        backup: state.backup.as_ref(),
        classifier: state.classifier.as_ref(),
        fallback: state.fallback.as_ref(),
    };

    let now = Local::now().naive_local();
    let turn = match orchestrator::handle_turn(&deps, &conv.context, &conv.messages, message, now)
        .await
    {
        Ok(turn) => turn,
        Err(e @ BookingError::PersistenceFailure(_)) => {
            tracing::error!(session = session_id, error = %e, "turn not committed");
            return Ok(e.to_string());
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(
        session = session_id,
        intent = turn.intent.as_str(),
        state = turn.context.state().as_str(),
        "processed message"
    );

    conv.context = turn.context;
    conv.messages.push(ConversationMessage::assistant(&turn.reply));

    let now = Utc::now().naive_utc();
    conv.last_activity = now;
    conv.expires_at = now + Duration::minutes(state.config.session_ttl_minutes);

    {
        let db = state
            .db
            .lock()
            .map_err(|_| anyhow::anyhow!("database lock poisoned"))?;
        queries::save_conversation(&db, &conv)?;
    }

    Ok(turn.reply)
}

fn new_conversation(session_id: &str, ttl_minutes: i64) -> Conversation {
    let now = Utc::now().naive_utc();
    Conversation {
        session_id: session_id.to_string(),
        messages: vec![],
        context: Default::default(),
        last_activity: now,
        expires_at: now + Duration::minutes(ttl_minutes),
    }
}

/// Forget a session's history and dialogue context.
pub async fn end_session(state: &Arc<AppState>, session_id: &str) -> anyhow::Result<()> {
    let lock = state.session_lock(session_id);
    let _guard = lock.lock().await;

    let db = state
        .db
        .lock()
        .map_err(|_| anyhow::anyhow!("database lock poisoned"))?;
    if queries::delete_conversation(&db, session_id)? {
        tracing::info!(session = session_id, "session ended");
    }
    Ok(())
}

/// Delete expired conversations and release idle session locks.
pub fn sweep_sessions(state: &AppState) -> anyhow::Result<usize> {
    let removed = {
        let db = state
            .db
            .lock()
            .map_err(|_| anyhow::anyhow!("database lock poisoned"))?;
        queries::expire_old_conversations(&db)?
    };
    state.prune_session_locks();
    if removed > 0 {
        tracing::info!(removed, "expired idle conversations");
    }
    Ok(removed)
}
