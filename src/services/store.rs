use async_trait::async_trait;

use crate::models::Appointment;

/// Durable home of the appointment set. Reads return the latest committed
/// snapshot; writes replace the whole set at once.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn load_all(&self) -> anyhow::Result<Vec<Appointment>>;

    async fn replace_all(&self, appointments: &[Appointment]) -> anyhow::Result<()>;
}
