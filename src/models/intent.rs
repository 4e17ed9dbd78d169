use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CheckAvailability,
    BookAppointment,
    CancelAppointment,
    Unknown,
}

impl Intent {
    /// Known intents in the order a classifier label is scanned for them.
    pub const KNOWN: [Intent; 3] = [
        Intent::CheckAvailability,
        Intent::BookAppointment,
        Intent::CancelAppointment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::CheckAvailability => "check_availability",
            Intent::BookAppointment => "book_appointment",
            Intent::CancelAppointment => "cancel_appointment",
            Intent::Unknown => "unknown",
        }
    }

    /// Find the first known intent keyword inside a free-text label.
    pub fn from_label(label: &str) -> Self {
        let label = label.to_lowercase();
        Self::KNOWN
            .into_iter()
            .find(|intent| label.contains(intent.as_str()))
            .unwrap_or(Intent::Unknown)
    }
}

/// Normalized fields pulled out of one user turn. Absent fields stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySet {
    pub date: Option<NaiveDate>,
    pub relative_time: Option<String>,
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub contact_number: Option<String>,
}

impl EntitySet {
    pub fn is_empty(&self) -> bool {
        *self == EntitySet::default()
    }
}
