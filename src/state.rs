use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::services::ai::{ConversationalFallback, IntentClassifier};
use crate::services::backup::BackupService;
use crate::services::store::AppointmentStore;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub store: Box<dyn AppointmentStore>,
    /// Serializes appointment writes across all sessions.
    pub appointments_lock: tokio::sync::Mutex<()>,
    pub backup: Box<dyn BackupService>,
    pub classifier: Arc<dyn IntentClassifier>,
    pub fallback: Arc<dyn ConversationalFallback>,
    /// One lock per session so turns within a session run one at a time.
    pub session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AppState {
    pub fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }

    /// Drop locks nobody is holding or waiting on.
    pub fn prune_session_locks(&self) {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
