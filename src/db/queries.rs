use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::models::appointment::{BOOKING_TIME_FORMAT, DATE_FORMAT, TIME_FORMAT};
use crate::models::{Appointment, Conversation, ConversationMessage, DialogueContext};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ── Conversations ──

pub fn get_conversation(
    conn: &Connection,
    session_id: &str,
) -> anyhow::Result<Option<Conversation>> {
    let now = Utc::now().naive_utc().format(TIMESTAMP_FORMAT).to_string();
    let mut stmt = conn.prepare(
        "SELECT session_id, messages, context, last_activity, expires_at FROM conversations WHERE session_id = ?1 AND expires_at > ?2",
    )?;

    let result = stmt.query_row(params![session_id, now], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    });

    match result {
        Ok((session_id, messages_json, context_json, last_activity_str, expires_at_str)) => {
            let messages: Vec<ConversationMessage> =
                serde_json::from_str(&messages_json).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "discarding unreadable conversation history");
                    vec![]
                });
            let context: DialogueContext =
                serde_json::from_str(&context_json).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "discarding unreadable dialogue context");
                    DialogueContext::default()
                });

            let last_activity = NaiveDateTime::parse_from_str(&last_activity_str, TIMESTAMP_FORMAT)
                .unwrap_or_else(|_| Utc::now().naive_utc());
            let expires_at = NaiveDateTime::parse_from_str(&expires_at_str, TIMESTAMP_FORMAT)
                .unwrap_or_else(|_| Utc::now().naive_utc());

            Ok(Some(Conversation {
                session_id,
                messages,
                context,
                last_activity,
                expires_at,
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_conversation(conn: &Connection, conv: &Conversation) -> anyhow::Result<()> {
    let messages_json = serde_json::to_string(&conv.messages)?;
    let context_json = serde_json::to_string(&conv.context)?;
    let last_activity = conv.last_activity.format(TIMESTAMP_FORMAT).to_string();
    let expires_at = conv.expires_at.format(TIMESTAMP_FORMAT).to_string();

    conn.execute(
        "INSERT INTO conversations (session_id, messages, context, state, last_activity, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(session_id) DO UPDATE SET
           messages = excluded.messages,
           context = excluded.context,
           state = excluded.state,
           last_activity = excluded.last_activity,
           expires_at = excluded.expires_at",
        params![
            conv.session_id,
            messages_json,
            context_json,
            conv.context.state().as_str(),
            last_activity,
            expires_at
        ],
    )?;
    Ok(())
}

pub fn delete_conversation(conn: &Connection, session_id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "DELETE FROM conversations WHERE session_id = ?1",
        params![session_id],
    )?;
    Ok(count > 0)
}

pub fn expire_old_conversations(conn: &Connection) -> anyhow::Result<usize> {
    let now = Utc::now().naive_utc().format(TIMESTAMP_FORMAT).to_string();
    let count = conn.execute("DELETE FROM conversations WHERE expires_at <= ?1", params![now])?;
    Ok(count)
}

// ── Appointments ──

type RawAppointment = (String, String, String, String, String, String, String);

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawAppointment> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn parse_appointment(raw: RawAppointment) -> anyhow::Result<Appointment> {
    let (name, date, start, end, email, contact_number, booking_time) = raw;
    Ok(Appointment {
        name,
        date: NaiveDate::parse_from_str(&date, DATE_FORMAT)?,
        start: NaiveTime::parse_from_str(&start, TIME_FORMAT)?,
        end: NaiveTime::parse_from_str(&end, TIME_FORMAT)?,
        email,
        contact_number,
        booking_time: NaiveDateTime::parse_from_str(&booking_time, BOOKING_TIME_FORMAT)?,
    })
}

/// Every stored appointment in insertion order. Rows that no longer parse
/// are skipped.
pub fn get_all_appointments(conn: &Connection) -> anyhow::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(
        r#"SELECT "Name", "Date", "Start", "End", "Email", "Contact Number", "Booking Time"
           FROM appointments ORDER BY rowid ASC"#,
    )?;

    let rows = stmt.query_map([], read_raw)?;

    let mut appointments = vec![];
    for row in rows {
        match parse_appointment(row?) {
            Ok(appointment) => appointments.push(appointment),
            Err(e) => tracing::warn!(error = %e, "skipping unreadable appointment row"),
        }
    }
    Ok(appointments)
}

/// Swap the whole appointment set in one transaction.
pub fn replace_appointments(
    conn: &mut Connection,
    appointments: &[Appointment],
) -> anyhow::Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM appointments", [])?;
    {
        let mut stmt = tx.prepare(
            r#"INSERT INTO appointments ("Name", "Date", "Start", "End", "Email", "Contact Number", "Booking Time")
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        )?;
        for a in appointments {
            stmt.execute(params![
                a.name,
                a.date_str(),
                a.start_str(),
                a.end_str(),
                a.email,
                a.contact_number,
                a.booking_time_str(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}
