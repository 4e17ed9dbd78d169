use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};

use crate::models::Appointment;

#[async_trait]
pub trait BackupService: Send + Sync {
    /// Snapshot the committed set; returns where it was written.
    async fn create_backup(&self, appointments: &[Appointment]) -> anyhow::Result<PathBuf>;
}

/// Timestamped JSON snapshots in a local directory.
pub struct JsonFileBackup {
    dir: PathBuf,
}

impl JsonFileBackup {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn backup_path(&self, at: NaiveDateTime) -> PathBuf {
        self.dir.join(format!(
            "appointments_backup_{}.json",
            at.format("%Y%m%d_%H%M%S")
        ))
    }

    fn write_snapshot(&self, path: &Path, appointments: &[Appointment]) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create backup directory {}", self.dir.display()))?;
        let json = serde_json::to_string_pretty(appointments)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write backup {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl BackupService for JsonFileBackup {
    async fn create_backup(&self, appointments: &[Appointment]) -> anyhow::Result<PathBuf> {
        let path = self.backup_path(Local::now().naive_local());
        self.write_snapshot(&path, appointments)?;
        tracing::info!(path = %path.display(), count = appointments.len(), "appointments backed up");
        Ok(path)
    }
}
