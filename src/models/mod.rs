pub mod appointment;
pub mod conversation;
pub mod intent;
pub mod slot;

pub use appointment::Appointment;
pub use conversation::{
    Conversation, ConversationMessage, ConversationState, DialogueContext, PendingBooking,
};
pub use intent::{EntitySet, Intent};
pub use slot::TimeSlot;
