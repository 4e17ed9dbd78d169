use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{NaiveDate, NaiveTime};

use crate::models::TimeSlot;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

/// Failures a booking turn can run into. Only `PersistenceFailure` ever
/// leaves the orchestrator as an `Err`; the rest become re-prompts or
/// reported outcomes.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("malformed time: {0}")]
    MalformedTime(String),

    #[error("malformed date: {0}")]
    MalformedDate(String),

    #[error("the slot from {start} to {end} on {date} is not available")]
    SlotConflict {
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        available: Vec<TimeSlot>,
    },

    #[error("no booking found for {name} on {date} with the email {email}")]
    RecordNotFound {
        name: String,
        date: NaiveDate,
        email: String,
    },

    #[error("Sorry, we couldn't save your changes: {0}")]
    PersistenceFailure(String),

    #[error("unrecognized intent")]
    UnrecognizedIntent,
}
