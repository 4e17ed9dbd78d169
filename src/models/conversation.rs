use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::models::TimeSlot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    AwaitingBookingDetails,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::AwaitingBookingDetails => "awaiting_booking_details",
        }
    }
}

/// A validated slot still waiting on contact details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBooking {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub contact_number: Option<String>,
}

impl PendingBooking {
    pub fn new(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            date,
            start,
            end,
            name: None,
            email: None,
            contact_number: None,
        }
    }
}

/// Per-session carry-over state between turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogueContext {
    #[serde(default)]
    pub last_date: Option<NaiveDate>,
    #[serde(default)]
    pub last_available_slots: Option<Vec<TimeSlot>>,
    #[serde(default)]
    pub pending_booking: Option<PendingBooking>,
    #[serde(default)]
    pub start: Option<NaiveTime>,
    #[serde(default)]
    pub end: Option<NaiveTime>,
}

impl DialogueContext {
    pub fn state(&self) -> ConversationState {
        if self.pending_booking.is_some() {
            ConversationState::AwaitingBookingDetails
        } else {
            ConversationState::Idle
        }
    }

    /// Forget everything once a booking or cancellation commits.
    pub fn reset(&mut self) {
        *self = DialogueContext::default();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
}

impl ConversationMessage {
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub session_id: String,
    pub messages: Vec<ConversationMessage>,
    pub context: DialogueContext,
    pub last_activity: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
