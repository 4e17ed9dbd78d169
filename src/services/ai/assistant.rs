use async_trait::async_trait;
use chrono::{Datelike, Duration, Local, NaiveDate};

use crate::models::ConversationMessage;
use crate::services::ai::{
    ChatOptions, ConversationalFallback, IntentClassifier, LlmProvider, Message,
};
use crate::services::resolver::format_date;

const CLASSIFIER_PROMPT: &str = "You are an intent detection assistant. Identify the intent \
(check_availability, book_appointment, cancel_appointment) and relevant details (date, start_time, \
end_time, name, email, contact number) from the user query. If the user provides contact number, \
assume the intent is book_appointment.";

const CLASSIFIER_OPTIONS: ChatOptions = ChatOptions {
    temperature: 0.2,
    max_tokens: 100,
};

const FALLBACK_OPTIONS: ChatOptions = ChatOptions {
    temperature: 0.2,
    max_tokens: 250,
};

/// Classifier and fallback responder backed by one chat model.
pub struct LlmAssistant {
    llm: Box<dyn LlmProvider>,
}

impl LlmAssistant {
    pub fn new(llm: Box<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

/// Monday of the week after `today`, followed by the six days after it.
fn next_week_dates(today: NaiveDate) -> Vec<NaiveDate> {
    let days_from_monday = today.weekday().num_days_from_monday() as i64;
    let next_monday = today - Duration::days(days_from_monday) + Duration::weeks(1);
    (0..7).map(|i| next_monday + Duration::days(i)).collect()
}

pub fn fallback_system_prompt(today: NaiveDate) -> String {
    let next_week = next_week_dates(today)
        .into_iter()
        .map(format_date)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You are Booking Appointment Agent, an automated service for booking appointments.
Your role is to assist customers with booking appointments, checking availability, and canceling bookings.

- Greet the customer warmly and ask whether they want to book, cancel, or check availability.
- Bookings are only accepted from 9 AM to 6 PM.
- To book, the customer needs a date, a start and end time, their name, email, and a 10-digit contact number.
- To cancel, the customer needs to give their name, the booking date, and their email.
- Never share another customer's data.

Today is {today}. Tomorrow is {tomorrow}. The dates for the next week (starting from Monday) are: {next_week}.

Respond in a concise, friendly, and conversational style.",
        today = format_date(today),
        tomorrow = format_date(today + Duration::days(1)),
    )
}

#[async_trait]
impl IntentClassifier for LlmAssistant {
    async fn classify(&self, text: &str) -> anyhow::Result<String> {
        let messages = [Message {
            role: "user".to_string(),
            content: text.to_string(),
        }];
        let label = self
            .llm
            .chat(CLASSIFIER_PROMPT, &messages, CLASSIFIER_OPTIONS)
            .await?;
        tracing::debug!(label = %label, "intent classifier response");
        Ok(label)
    }
}

#[async_trait]
impl ConversationalFallback for LlmAssistant {
    async fn respond(&self, history: &[ConversationMessage]) -> anyhow::Result<String> {
        let messages: Vec<Message> = history.iter().map(Message::from).collect();
        let system = fallback_system_prompt(Local::now().date_naive());
        self.llm.chat(&system, &messages, FALLBACK_OPTIONS).await
    }
}
