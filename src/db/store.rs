use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;

use crate::db::queries;
use crate::models::Appointment;
use crate::services::store::AppointmentStore;

/// Appointment store on the shared SQLite connection.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl AppointmentStore for SqliteStore {
    async fn load_all(&self) -> anyhow::Result<Vec<Appointment>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database lock poisoned"))?;
        queries::get_all_appointments(&conn)
    }

    async fn replace_all(&self, appointments: &[Appointment]) -> anyhow::Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database lock poisoned"))?;
        queries::replace_appointments(&mut conn, appointments)?;
        tracing::debug!(count = appointments.len(), "appointments saved");
        Ok(())
    }
}
