//! Turn-level state machine for booking, availability and cancellation.
//!
//! `handle_turn` takes the session's context by reference and hands back
//! the context for the next turn. Nothing here keeps state between calls,
//! so a failed turn leaves the caller's context untouched.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::errors::BookingError;
use crate::models::slot::to_human_readable;
use crate::models::{
    Appointment, ConversationMessage, DialogueContext, EntitySet, Intent, PendingBooking, TimeSlot,
};
use crate::services::ai::{ConversationalFallback, IntentClassifier};
use crate::services::availability::{self, closing_time, opening_time};
use crate::services::backup::BackupService;
use crate::services::extractor;
use crate::services::resolver::{self, format_date};
use crate::services::store::AppointmentStore;

pub const FALLBACK_REPLY: &str = "Sorry, I didn't understand your request.";

/// External capabilities a turn may call into.
pub struct Collaborators<'a> {
    pub store: &'a dyn AppointmentStore,
    /// Shared by every session. Held from snapshot load to commit so a
    /// write never replaces the set with a stale snapshot.
    pub write_lock: &'a tokio::sync::Mutex<()>,
    pub backup: &'a dyn BackupService,
    pub classifier: &'a dyn IntentClassifier,
    pub fallback: &'a dyn ConversationalFallback,
}

#[derive(Debug)]
pub enum TurnOutcome {
    Availability {
        date: NaiveDate,
        slots: Vec<TimeSlot>,
    },
    MissingBookingInterval {
        missing: Vec<&'static str>,
    },
    InvalidInterval {
        start: NaiveTime,
        end: NaiveTime,
    },
    OutsideBusinessHours {
        start: NaiveTime,
        end: NaiveTime,
    },
    /// Slot conflicts and unknown cancellation targets.
    Rejected(BookingError),
    AwaitingDetails {
        missing: Vec<&'static str>,
    },
    Booked(Appointment),
    MissingCancellationFields {
        missing: Vec<&'static str>,
    },
    Cancelled {
        name: String,
        date: NaiveDate,
        removed: usize,
    },
    Fallback(String),
}

#[derive(Debug)]
pub struct Turn {
    pub intent: Intent,
    pub outcome: TurnOutcome,
    pub context: DialogueContext,
    pub reply: String,
}

fn fmt_time(t: NaiveTime) -> String {
    t.format("%I:%M %p").to_string()
}

/// "a", "a and b", "a, b, and c"
fn join_fields(fields: &[&str]) -> String {
    match fields {
        [] => String::new(),
        [one] => one.to_string(),
        [a, b] => format!("{a} and {b}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}

impl TurnOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            TurnOutcome::Availability { .. } => "availability",
            TurnOutcome::MissingBookingInterval { .. } => "missing_booking_interval",
            TurnOutcome::InvalidInterval { .. } => "invalid_interval",
            TurnOutcome::OutsideBusinessHours { .. } => "outside_business_hours",
            TurnOutcome::Rejected(BookingError::SlotConflict { .. }) => "slot_conflict",
            TurnOutcome::Rejected(BookingError::RecordNotFound { .. }) => "record_not_found",
            TurnOutcome::Rejected(_) => "rejected",
            TurnOutcome::AwaitingDetails { .. } => "awaiting_details",
            TurnOutcome::Booked(_) => "booked",
            TurnOutcome::MissingCancellationFields { .. } => "missing_cancellation_fields",
            TurnOutcome::Cancelled { .. } => "cancelled",
            TurnOutcome::Fallback(_) => "fallback",
        }
    }

    pub fn reply(&self) -> String {
        match self {
            TurnOutcome::Availability { date, slots } if slots.is_empty() => format!(
                "No available slots for {}. Would you like to try another date?",
                format_date(*date)
            ),
            TurnOutcome::Availability { date, slots } => format!(
                "Available slots for {}: {}. Would you like to book one of these slots, or would you prefer to consider another date?",
                format_date(*date),
                to_human_readable(slots)
            ),
            TurnOutcome::MissingBookingInterval { missing } => format!(
                "Please provide the {} for the booking.",
                join_fields(missing)
            ),
            TurnOutcome::InvalidInterval { start, end } => format!(
                "The start time ({}) must be before the end time ({}). Please provide a valid time range.",
                fmt_time(*start),
                fmt_time(*end)
            ),
            TurnOutcome::OutsideBusinessHours { start, end } => format!(
                "Sorry, {} to {} is outside business hours. Bookings are only accepted from {} to {}.",
                fmt_time(*start),
                fmt_time(*end),
                fmt_time(opening_time()),
                fmt_time(closing_time())
            ),
            TurnOutcome::Rejected(BookingError::SlotConflict {
                date,
                start,
                end,
                available,
            }) => {
                let alternatives = if available.is_empty() {
                    "none left that day".to_string()
                } else {
                    to_human_readable(available)
                };
                format!(
                    "Sorry, the slot from {} to {} on {} is not available. Available slots: {}. Would you like to book one of these?",
                    fmt_time(*start),
                    fmt_time(*end),
                    format_date(*date),
                    alternatives
                )
            }
            TurnOutcome::Rejected(BookingError::RecordNotFound { name, date, email }) => format!(
                "No booking found for {name} on {} with the email {email}.",
                format_date(*date)
            ),
            TurnOutcome::Rejected(other) => other.to_string(),
            TurnOutcome::AwaitingDetails { missing } => format!(
                "Please provide your {} for the booking.",
                join_fields(missing)
            ),
            TurnOutcome::Booked(a) => format!(
                "Booking confirmed for {} on {} from {} to {}.",
                a.name,
                a.date_str(),
                fmt_time(a.start),
                fmt_time(a.end)
            ),
            TurnOutcome::MissingCancellationFields { missing } => format!(
                "Please provide your {} to cancel the booking.",
                join_fields(missing)
            ),
            TurnOutcome::Cancelled { name, date, .. } => format!(
                "Booking for {name} on {} has been successfully cancelled.",
                format_date(*date)
            ),
            TurnOutcome::Fallback(text) => text.clone(),
        }
    }
}

/// Process one user turn. `history` already ends with the current message.
pub async fn handle_turn(
    deps: &Collaborators<'_>,
    context: &DialogueContext,
    history: &[ConversationMessage],
    text: &str,
    now: NaiveDateTime,
) -> Result<Turn, BookingError> {
    let today = now.date();
    let (intent, entities) = extractor::extract(deps.classifier, text, context, today).await;
    let mut next = context.clone();

    let outcome = match intent {
        Intent::CheckAvailability => check_availability(deps, &mut next, &entities, today).await?,
        Intent::BookAppointment => book_appointment(deps, &mut next, &entities, now).await?,
        Intent::CancelAppointment => cancel_appointment(deps, &mut next, &entities).await?,
        Intent::Unknown => fallback(deps, history).await,
    };

    tracing::info!(
        intent = intent.as_str(),
        outcome = outcome.kind(),
        state = next.state().as_str(),
        "turn handled"
    );

    let reply = outcome.reply();
    Ok(Turn {
        intent,
        outcome,
        context: next,
        reply,
    })
}

async fn load_snapshot(store: &dyn AppointmentStore) -> Result<Vec<Appointment>, BookingError> {
    store.load_all().await.map_err(|e| {
        tracing::error!(error = %e, "failed to load appointments");
        BookingError::PersistenceFailure(format!("failed to load appointments: {e}"))
    })
}

/// Replace the stored set, then take a best-effort backup.
async fn commit(deps: &Collaborators<'_>, appointments: &[Appointment]) -> Result<(), BookingError> {
    deps.store.replace_all(appointments).await.map_err(|e| {
        tracing::error!(error = %e, "failed to save appointments");
        BookingError::PersistenceFailure(e.to_string())
    })?;

    if let Err(e) = deps.backup.create_backup(appointments).await {
        tracing::warn!(error = %e, "backup failed after commit");
    }
    Ok(())
}

async fn check_availability(
    deps: &Collaborators<'_>,
    next: &mut DialogueContext,
    entities: &EntitySet,
    today: NaiveDate,
) -> Result<TurnOutcome, BookingError> {
    // A new availability query supersedes whatever date was shown before.
    next.last_date = None;

    let date = match (entities.date, entities.relative_time.as_deref()) {
        (Some(date), _) => date,
        (None, Some(phrase)) => resolver::resolve_relative(phrase, today),
        (None, None) => {
            tracing::warn!("availability request without a date, defaulting to today");
            today
        }
    };

    let snapshot = load_snapshot(deps.store).await?;
    let slots = availability::find_available_slots(date, &snapshot);

    next.last_date = Some(date);
    next.last_available_slots = Some(slots.clone());
    Ok(TurnOutcome::Availability { date, slots })
}

async fn book_appointment(
    deps: &Collaborators<'_>,
    next: &mut DialogueContext,
    entities: &EntitySet,
    now: NaiveDateTime,
) -> Result<TurnOutcome, BookingError> {
    let pending = next.pending_booking.clone();

    let date = entities
        .date
        .or(next.last_date)
        .or(pending.as_ref().map(|p| p.date));
    let start = entities
        .start
        .or(next.start)
        .or(pending.as_ref().map(|p| p.start));
    let end = entities
        .end
        .or(next.end)
        .or(pending.as_ref().map(|p| p.end));

    let (date, start, end) = match (date, start, end) {
        (Some(date), Some(start), Some(end)) => (date, start, end),
        _ => {
            let mut missing = vec![];
            if date.is_none() {
                missing.push("date");
            }
            if start.is_none() {
                missing.push("start time");
            }
            if end.is_none() {
                missing.push("end time");
            }
            return Ok(TurnOutcome::MissingBookingInterval { missing });
        }
    };

    if start >= end {
        return Ok(TurnOutcome::InvalidInterval { start, end });
    }
    if start < opening_time() || end > closing_time() {
        return Ok(TurnOutcome::OutsideBusinessHours { start, end });
    }

    let _write = deps.write_lock.lock().await;
    let mut snapshot = load_snapshot(deps.store).await?;
    if !availability::is_interval_free(date, start, end, &snapshot) {
        tracing::info!(%date, %start, %end, "requested slot unavailable");
        let available = availability::find_available_slots(date, &snapshot);
        return Ok(TurnOutcome::Rejected(BookingError::SlotConflict {
            date,
            start,
            end,
            available,
        }));
    }

    let pending = pending.as_ref();
    let name = entities
        .name
        .clone()
        .or_else(|| pending.and_then(|p| p.name.clone()));
    let email = entities
        .email
        .clone()
        .or_else(|| pending.and_then(|p| p.email.clone()));
    let contact_number = entities
        .contact_number
        .clone()
        .or_else(|| pending.and_then(|p| p.contact_number.clone()));

    match (name, email, contact_number) {
        (Some(name), Some(email), Some(contact_number)) => {
            let appointment = Appointment {
                name,
                date,
                start,
                end,
                email,
                contact_number,
                booking_time: now,
            };
            snapshot.push(appointment.clone());
            commit(deps, &snapshot).await?;

            tracing::info!(%date, %start, %end, "booking committed");
            next.reset();
            Ok(TurnOutcome::Booked(appointment))
        }
        (name, email, contact_number) => {
            let mut missing = vec![];
            if name.is_none() {
                missing.push("name");
            }
            if email.is_none() {
                missing.push("email");
            }
            if contact_number.is_none() {
                missing.push("contact number");
            }

            next.pending_booking = Some(PendingBooking {
                date,
                start,
                end,
                name,
                email,
                contact_number,
            });
            next.last_date = Some(date);
            next.start = Some(start);
            next.end = Some(end);
            Ok(TurnOutcome::AwaitingDetails { missing })
        }
    }
}

async fn cancel_appointment(
    deps: &Collaborators<'_>,
    next: &mut DialogueContext,
    entities: &EntitySet,
) -> Result<TurnOutcome, BookingError> {
    let (name, date, email) = match (&entities.name, entities.date, &entities.email) {
        (Some(name), Some(date), Some(email)) => (name.clone(), date, email.clone()),
        (name, date, email) => {
            let mut missing = vec![];
            if name.is_none() {
                missing.push("name");
            }
            if date.is_none() {
                missing.push("date of the booking");
            }
            if email.is_none() {
                missing.push("email");
            }
            return Ok(TurnOutcome::MissingCancellationFields { missing });
        }
    };

    let _write = deps.write_lock.lock().await;
    let snapshot = load_snapshot(deps.store).await?;
    let (removed, kept): (Vec<Appointment>, Vec<Appointment>) = snapshot
        .into_iter()
        .partition(|a| a.matches(&name, date, &email));

    if removed.is_empty() {
        tracing::info!(%date, "cancellation target not found");
        return Ok(TurnOutcome::Rejected(BookingError::RecordNotFound {
            name,
            date,
            email,
        }));
    }

    commit(deps, &kept).await?;
    tracing::info!(%date, removed = removed.len(), "booking cancelled");
    next.reset();
    Ok(TurnOutcome::Cancelled {
        name,
        date,
        removed: removed.len(),
    })
}

async fn fallback(deps: &Collaborators<'_>, history: &[ConversationMessage]) -> TurnOutcome {
    tracing::debug!(reason = %BookingError::UnrecognizedIntent, "routing turn to conversational fallback");
    match deps.fallback.respond(history).await {
        Ok(reply) => TurnOutcome::Fallback(reply),
        Err(e) => {
            tracing::warn!(error = %e, "conversational fallback failed");
            TurnOutcome::Fallback(FALLBACK_REPLY.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversationState;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MemoryStore {
        appointments: Mutex<Vec<Appointment>>,
        fail_writes: bool,
        yield_on_load: bool,
    }

    impl MemoryStore {
        fn new(appointments: Vec<Appointment>) -> Self {
            Self {
                appointments: Mutex::new(appointments),
                fail_writes: false,
                yield_on_load: false,
            }
        }

        /// Hands control back to the runtime mid-read, letting other turns interleave.
        fn yielding(appointments: Vec<Appointment>) -> Self {
            Self {
                yield_on_load: true,
                ..Self::new(appointments)
            }
        }

        fn failing(appointments: Vec<Appointment>) -> Self {
            Self {
                appointments: Mutex::new(appointments),
                fail_writes: true,
                yield_on_load: false,
            }
        }

        fn snapshot(&self) -> Vec<Appointment> {
            self.appointments.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AppointmentStore for MemoryStore {
        async fn load_all(&self) -> anyhow::Result<Vec<Appointment>> {
            let snapshot = self.snapshot();
            if self.yield_on_load {
                tokio::task::yield_now().await;
            }
            Ok(snapshot)
        }

        async fn replace_all(&self, appointments: &[Appointment]) -> anyhow::Result<()> {
            if self.fail_writes {
                anyhow::bail!("database is locked");
            }
            *self.appointments.lock().unwrap() = appointments.to_vec();
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingBackup {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl BackupService for CountingBackup {
        async fn create_backup(&self, _appointments: &[Appointment]) -> anyhow::Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("backup directory is read-only");
            }
            Ok(PathBuf::from("backup/test.json"))
        }
    }

    struct StaticClassifier(&'static str);

    #[async_trait]
    impl IntentClassifier for StaticClassifier {
        async fn classify(&self, _text: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct EchoFallback {
        fail: bool,
    }

    #[async_trait]
    impl ConversationalFallback for EchoFallback {
        async fn respond(&self, history: &[ConversationMessage]) -> anyhow::Result<String> {
            if self.fail {
                anyhow::bail!("model offline");
            }
            Ok(format!("fallback saw {} messages", history.len()))
        }
    }

    struct Harness {
        store: MemoryStore,
        backup: CountingBackup,
        classifier: StaticClassifier,
        fallback: EchoFallback,
        write_lock: tokio::sync::Mutex<()>,
    }

    impl Harness {
        fn new(label: &'static str, appointments: Vec<Appointment>) -> Self {
            Self {
                store: MemoryStore::new(appointments),
                backup: CountingBackup::default(),
                classifier: StaticClassifier(label),
                fallback: EchoFallback { fail: false },
                write_lock: tokio::sync::Mutex::new(()),
            }
        }

        fn deps(&self) -> Collaborators<'_> {
            Collaborators {
                store: &self.store,
                write_lock: &self.write_lock,
                backup: &self.backup,
                classifier: &self.classifier,
                fallback: &self.fallback,
            }
        }

        async fn turn(&self, context: &DialogueContext, text: &str) -> Result<Turn, BookingError> {
            let history = vec![ConversationMessage::user(text)];
            handle_turn(&self.deps(), context, &history, text, now()).await
        }
    }

    // 2024-06-10 is a Monday
    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 10)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn appointment(name: &str, date: &str, start: NaiveTime, end: NaiveTime, email: &str) -> Appointment {
        Appointment {
            name: name.to_string(),
            date: d(date),
            start,
            end,
            email: email.to_string(),
            contact_number: "5550001111".to_string(),
            booking_time: now(),
        }
    }

    #[test]
    fn test_join_fields() {
        assert_eq!(join_fields(&["email"]), "email");
        assert_eq!(join_fields(&["email", "contact number"]), "email and contact number");
        assert_eq!(
            join_fields(&["name", "email", "contact number"]),
            "name, email, and contact number"
        );
    }

    #[tokio::test]
    async fn test_check_availability_on_empty_day() {
        let h = Harness::new("check_availability", vec![]);
        let turn = h
            .turn(&DialogueContext::default(), "Any openings on 2024-06-10?")
            .await
            .unwrap();

        assert_eq!(turn.intent, Intent::CheckAvailability);
        assert_eq!(
            turn.reply,
            "Available slots for 2024-06-10: 09:00 AM - 06:00 PM. Would you like to book one of these slots, or would you prefer to consider another date?"
        );
        assert_eq!(turn.context.last_date, Some(d("2024-06-10")));
        assert_eq!(turn.context.last_available_slots.as_ref().map(|s| s.len()), Some(1));
        assert_eq!(turn.context.state(), ConversationState::Idle);
    }

    #[tokio::test]
    async fn test_check_availability_resolves_relative_phrase() {
        let h = Harness::new(
            "check_availability",
            vec![appointment("Jane Doe", "2024-06-17", t(9, 0), t(10, 0), "jane@example.com")],
        );
        let turn = h
            .turn(&DialogueContext::default(), "what about next monday?")
            .await
            .unwrap();

        match &turn.outcome {
            TurnOutcome::Availability { date, slots } => {
                assert_eq!(*date, d("2024-06-17"));
                assert_eq!(slots[0].to_string(), "10:00 AM - 06:00 PM");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_new_availability_query_replaces_last_date() {
        let h = Harness::new("check_availability", vec![]);
        let ctx = DialogueContext {
            last_date: Some(d("2024-06-12")),
            ..Default::default()
        };
        let turn = h.turn(&ctx, "and tomorrow?").await.unwrap();
        assert_eq!(turn.context.last_date, Some(d("2024-06-11")));
    }

    #[tokio::test]
    async fn test_booking_without_interval_asks_and_keeps_context() {
        let h = Harness::new("book_appointment", vec![]);
        let ctx = DialogueContext::default();
        let turn = h.turn(&ctx, "I'd like to book an appointment").await.unwrap();

        assert_eq!(
            turn.reply,
            "Please provide the date, start time, and end time for the booking."
        );
        assert_eq!(turn.context, ctx);
    }

    #[tokio::test]
    async fn test_booking_conflict_reports_alternatives() {
        let h = Harness::new(
            "book_appointment",
            vec![appointment("Jane Doe", "2024-06-10", t(9, 0), t(10, 0), "jane@example.com")],
        );
        let ctx = DialogueContext {
            last_date: Some(d("2024-06-10")),
            start: Some(t(9, 30)),
            end: Some(t(10, 30)),
            ..Default::default()
        };
        let turn = h.turn(&ctx, "book that please").await.unwrap();

        match &turn.outcome {
            TurnOutcome::Rejected(BookingError::SlotConflict { available, .. }) => {
                assert_eq!(available[0].to_string(), "10:00 AM - 06:00 PM");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(turn.reply.starts_with("Sorry, the slot from 09:30 AM to 10:30 AM on 2024-06-10 is not available."));
        assert!(turn.reply.contains("Available slots: 10:00 AM - 06:00 PM"));
        assert!(h.store.snapshot().len() == 1);
        assert_eq!(turn.context, ctx);
    }

    #[tokio::test]
    async fn test_booking_adjacent_to_existing_is_accepted() {
        let h = Harness::new(
            "book_appointment",
            vec![appointment("Jane Doe", "2024-06-10", t(9, 0), t(10, 0), "jane@example.com")],
        );
        let ctx = DialogueContext {
            last_date: Some(d("2024-06-10")),
            start: Some(t(10, 0)),
            end: Some(t(10, 30)),
            ..Default::default()
        };
        let turn = h
            .turn(&ctx, "Book it for John Smith, john@example.com, 5551234567")
            .await
            .unwrap();

        assert!(matches!(turn.outcome, TurnOutcome::Booked(_)));
        assert_eq!(h.store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_booking_missing_contact_then_follow_up_completes() {
        let h = Harness::new("book_appointment", vec![]);

        let first = h
            .turn(
                &DialogueContext::default(),
                "Please book 2024-06-12 from 2 pm to 3 pm for Jane Doe",
            )
            .await
            .unwrap();
        assert_eq!(
            first.reply,
            "Please provide your email and contact number for the booking."
        );
        assert_eq!(first.context.state(), ConversationState::AwaitingBookingDetails);
        let pending = first.context.pending_booking.clone().unwrap();
        assert_eq!(pending.date, d("2024-06-12"));
        assert_eq!((pending.start, pending.end), (t(14, 0), t(15, 0)));
        assert_eq!(pending.name.as_deref(), Some("Jane Doe"));
        assert!(h.store.snapshot().is_empty());

        let second = h
            .turn(&first.context, "jane@example.com, 5551234567")
            .await
            .unwrap();
        assert_eq!(
            second.reply,
            "Booking confirmed for Jane Doe on 2024-06-12 from 02:00 PM to 03:00 PM."
        );
        assert_eq!(second.context, DialogueContext::default());

        let stored = h.store.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].email, "jane@example.com");
        assert_eq!(stored[0].contact_number, "5551234567");
        assert_eq!(stored[0].booking_time, now());
        assert_eq!(h.backup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_explicit_date_beats_stored_last_date() {
        let h = Harness::new("book_appointment", vec![]);
        let ctx = DialogueContext {
            last_date: Some(d("2024-06-12")),
            ..Default::default()
        };
        let turn = h
            .turn(&ctx, "Book 2024-06-14 11 to 12 for Ada Lovelace, ada@example.com, 5551234567")
            .await
            .unwrap();

        match &turn.outcome {
            TurnOutcome::Booked(a) => assert_eq!(a.date, d("2024-06-14")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_booking_rejects_reversed_and_out_of_hours_ranges() {
        let h = Harness::new("book_appointment", vec![]);
        let turn = h
            .turn(&DialogueContext::default(), "book 2024-06-12 4 pm to 2 pm")
            .await
            .unwrap();
        assert!(matches!(turn.outcome, TurnOutcome::InvalidInterval { .. }));

        let turn = h
            .turn(&DialogueContext::default(), "book 2024-06-12 4 to 6 pm")
            .await
            .unwrap();
        assert!(matches!(turn.outcome, TurnOutcome::OutsideBusinessHours { .. }));
        assert!(turn.reply.contains("09:00 AM to 06:00 PM"));
    }

    #[tokio::test]
    async fn test_concurrent_bookings_from_two_sessions_both_persist() {
        let h = Harness {
            store: MemoryStore::yielding(vec![]),
            ..Harness::new("book_appointment", vec![])
        };
        let ctx = DialogueContext::default();

        let (a, b) = tokio::join!(
            h.turn(&ctx, "Book 2024-06-12 10 to 11 for Ada Lovelace, ada@example.com, 5551234567"),
            h.turn(&ctx, "Book 2024-06-12 14 to 15 for Alan Turing, alan@example.com, 5559876543"),
        );
        assert!(matches!(a.unwrap().outcome, TurnOutcome::Booked(_)));
        assert!(matches!(b.unwrap().outcome, TurnOutcome::Booked(_)));

        let names: Vec<String> = h.store.snapshot().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(h.backup.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_bookings_for_same_slot_admit_one() {
        let h = Harness {
            store: MemoryStore::yielding(vec![]),
            ..Harness::new("book_appointment", vec![])
        };
        let ctx = DialogueContext::default();

        let (a, b) = tokio::join!(
            h.turn(&ctx, "Book 2024-06-12 10 to 11 for Ada Lovelace, ada@example.com, 5551234567"),
            h.turn(&ctx, "Book 2024-06-12 10 to 11 for Alan Turing, alan@example.com, 5559876543"),
        );
        assert!(matches!(a.unwrap().outcome, TurnOutcome::Booked(_)));
        assert!(matches!(
            b.unwrap().outcome,
            TurnOutcome::Rejected(BookingError::SlotConflict { .. })
        ));

        let stored = h.store.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_concurrent_cancellation_and_booking_keep_both_changes() {
        let h = Harness {
            store: MemoryStore::yielding(vec![appointment(
                "Jane Doe",
                "2024-06-12",
                t(9, 0),
                t(10, 0),
                "jane@example.com",
            )]),
            ..Harness::new("cancel_appointment", vec![])
        };
        let ctx = DialogueContext::default();

        let (cancel, book) = tokio::join!(
            h.turn(&ctx, "Name: Jane Doe, Date: 2024-06-12, Email: jane@example.com"),
            h.turn(&ctx, "Book 2024-06-12 14 to 15 for Alan Turing, alan@example.com, 5559876543"),
        );
        assert!(matches!(cancel.unwrap().outcome, TurnOutcome::Cancelled { .. }));
        assert!(matches!(book.unwrap().outcome, TurnOutcome::Booked(_)));

        let names: Vec<String> = h.store.snapshot().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["Alan Turing"]);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_an_error() {
        let h = Harness {
            store: MemoryStore::failing(vec![]),
            ..Harness::new("book_appointment", vec![])
        };
        let result = h
            .turn(
                &DialogueContext::default(),
                "Book 2024-06-12 10 to 11 for Ada Lovelace, ada@example.com, 5551234567",
            )
            .await;

        match result {
            Err(BookingError::PersistenceFailure(msg)) => assert!(msg.contains("database is locked")),
            other => panic!("expected persistence failure, got {other:?}"),
        }
        assert!(h.store.snapshot().is_empty());
        assert_eq!(h.backup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backup_failure_does_not_undo_booking() {
        let h = Harness {
            backup: CountingBackup {
                calls: AtomicUsize::new(0),
                fail: true,
            },
            ..Harness::new("book_appointment", vec![])
        };
        let turn = h
            .turn(
                &DialogueContext::default(),
                "Book 2024-06-12 10 to 11 for Ada Lovelace, ada@example.com, 5551234567",
            )
            .await
            .unwrap();

        assert!(matches!(turn.outcome, TurnOutcome::Booked(_)));
        assert_eq!(h.store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_removes_exact_match() {
        let h = Harness::new(
            "cancel_appointment",
            vec![
                appointment("Jane Doe", "2024-06-10", t(9, 0), t(10, 0), "jane@example.com"),
                appointment("Jane Doe", "2024-06-11", t(9, 0), t(10, 0), "jane@example.com"),
                appointment("John Smith", "2024-06-10", t(11, 0), t(12, 0), "john@example.com"),
            ],
        );
        let turn = h
            .turn(
                &DialogueContext::default(),
                "Name: Jane Doe, Date: 2024-06-10, Email: jane@example.com",
            )
            .await
            .unwrap();

        assert_eq!(
            turn.reply,
            "Booking for Jane Doe on 2024-06-10 has been successfully cancelled."
        );
        let stored = h.store.snapshot();
        assert_eq!(stored.len(), 2);
        assert!(!stored.iter().any(|a| a.matches("Jane Doe", d("2024-06-10"), "jane@example.com")));
        assert_eq!(h.backup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_not_found_leaves_set_unchanged() {
        let h = Harness::new(
            "cancel_appointment",
            vec![appointment("Jane Doe", "2024-06-10", t(9, 0), t(10, 0), "jane@example.com")],
        );
        let turn = h
            .turn(
                &DialogueContext::default(),
                "Name: Jane Doe, Date: 2024-06-10, Email: other@example.com",
            )
            .await
            .unwrap();

        assert!(matches!(
            turn.outcome,
            TurnOutcome::Rejected(BookingError::RecordNotFound { .. })
        ));
        assert_eq!(
            turn.reply,
            "No booking found for Jane Doe on 2024-06-10 with the email other@example.com."
        );
        assert_eq!(h.store.snapshot().len(), 1);
        assert_eq!(h.backup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_missing_fields() {
        let h = Harness::new("cancel_appointment", vec![]);
        let turn = h
            .turn(&DialogueContext::default(), "please cancel my booking")
            .await
            .unwrap();
        assert_eq!(
            turn.reply,
            "Please provide your name, date of the booking, and email to cancel the booking."
        );
    }

    #[tokio::test]
    async fn test_unknown_intent_uses_fallback_with_history() {
        let h = Harness::new("greeting", vec![]);
        let ctx = DialogueContext {
            last_date: Some(d("2024-06-12")),
            ..Default::default()
        };
        let history = vec![
            ConversationMessage::user("hi"),
            ConversationMessage::assistant("Hello!"),
            ConversationMessage::user("who are you?"),
        ];
        let turn = handle_turn(&h.deps(), &ctx, &history, "who are you?", now())
            .await
            .unwrap();

        assert_eq!(turn.intent, Intent::Unknown);
        assert_eq!(turn.reply, "fallback saw 3 messages");
        assert_eq!(turn.context, ctx);
    }

    #[tokio::test]
    async fn test_fallback_failure_still_replies() {
        let h = Harness {
            fallback: EchoFallback { fail: true },
            ..Harness::new("nothing useful", vec![])
        };
        let turn = h.turn(&DialogueContext::default(), "hello?").await.unwrap();
        assert_eq!(turn.reply, FALLBACK_REPLY);
    }
}
