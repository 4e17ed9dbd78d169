//! Intent and entity extraction from free text.
//!
//! Every field is pulled by an ordered list of rules. Rules are tried in
//! order, and within a rule every match is tried left to right; the first
//! candidate that converts into a valid value wins. Values that fail to
//! convert (bad dates, minute-bearing time ranges) are dropped, so the
//! caller sees the field as missing and re-asks.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;

use crate::models::{DialogueContext, EntitySet, Intent};
use crate::services::ai::IntentClassifier;
use crate::services::resolver;

/// One pattern plus the capture group that carries the value.
pub struct ExtractionRule {
    pub label: &'static str,
    regex: Regex,
    group: usize,
}

impl ExtractionRule {
    fn new(label: &'static str, pattern: &str, group: usize) -> Self {
        Self {
            label,
            regex: Regex::new(pattern).expect("invalid extraction regex"),
            group,
        }
    }

    /// Every captured value in `text`, left to right.
    pub fn candidates<'t>(&self, text: &'t str) -> Vec<&'t str> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| caps.get(self.group).map(|m| m.as_str()))
            .collect()
    }
}

/// Result of a successful rule application.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch<T> {
    pub rule: &'static str,
    pub value: T,
}

pub fn first_valid<T>(
    rules: &[ExtractionRule],
    text: &str,
    convert: impl Fn(&str) -> Option<T>,
) -> Option<RuleMatch<T>> {
    rules.iter().find_map(|rule| {
        rule.candidates(text)
            .into_iter()
            .find_map(&convert)
            .map(|value| RuleMatch {
                rule: rule.label,
                value,
            })
    })
}

const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";
const WORDS_PATTERN: &str = r"[A-Za-z]+(?:[ \t]+[A-Za-z]+)*";

static EMAIL_RULES: LazyLock<Vec<ExtractionRule>> = LazyLock::new(|| {
    vec![
        ExtractionRule::new("labeled_email", &format!(r"(?i)\bemail:\s*({EMAIL_PATTERN})"), 1),
        ExtractionRule::new("email", &format!(r"\b({EMAIL_PATTERN})\b"), 1),
    ]
});

static CONTACT_RULES: LazyLock<Vec<ExtractionRule>> =
    LazyLock::new(|| vec![ExtractionRule::new("contact_number", r"\b(\d{10})\b", 1)]);

static ISO_DATE_RULES: LazyLock<Vec<ExtractionRule>> =
    LazyLock::new(|| vec![ExtractionRule::new("iso_date", r"\b(\d{4}-\d{2}-\d{2})\b", 1)]);

static RELATIVE_TIME_RULES: LazyLock<Vec<ExtractionRule>> = LazyLock::new(|| {
    vec![
        ExtractionRule::new("later_today", r"(?i)\b(later today)\b", 1),
        ExtractionRule::new("tomorrow", r"(?i)\b(tomorrow)\b", 1),
        ExtractionRule::new("next_week", r"(?i)\b(next week)\b", 1),
        ExtractionRule::new("next_word", r"(?i)\b(next [a-z]+)\b", 1),
        ExtractionRule::new(
            "weekday",
            r"(?i)\b(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
            1,
        ),
    ]
});

static TIME_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2}(?::\d{2})?\s*(?:am|pm)?)\s+to\s+(\d{1,2}(?::\d{2})?\s*(?:am|pm)?)\b")
        .expect("invalid time range regex")
});

static BOOKING_NAME_RULES: LazyLock<Vec<ExtractionRule>> = LazyLock::new(|| {
    vec![
        ExtractionRule::new("labeled_name", &format!(r"(?i)\bname:\s*({WORDS_PATTERN})"), 1),
        ExtractionRule::new(
            "introduced_name",
            r"(?i:\bmy name is|\bi am|\bi'm|\bthis is)\s+([A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)*)",
            1,
        ),
        ExtractionRule::new(
            "capitalized_name",
            r"\b([A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)+)\b",
            1,
        ),
    ]
});

static CANCEL_NAME_RULES: LazyLock<Vec<ExtractionRule>> = LazyLock::new(|| {
    vec![ExtractionRule::new(
        "labeled_name",
        &format!(r"(?i)\bname:\s*({WORDS_PATTERN})"),
        1,
    )]
});

/// Words that show up capitalized in requests but are never part of a name.
const NAME_STOPWORDS: &[&str] = &[
    "hi", "hello", "hey", "please", "book", "booking", "reserve", "schedule", "cancel", "check",
    "appointment", "slot", "name", "email", "date", "contact", "phone", "number", "for", "on",
    "at", "and", "thanks", "thank", "you", "today", "tomorrow", "next", "monday", "tuesday",
    "wednesday", "thursday", "friday", "saturday", "sunday", "january", "february", "march",
    "april", "may", "june", "july", "august", "september", "october", "november", "december",
];

fn is_stopword(word: &str) -> bool {
    NAME_STOPWORDS.contains(&word.to_lowercase().as_str())
}

fn clean_name(raw: &str, min_words: usize) -> Option<String> {
    let mut words: Vec<&str> = raw.split_whitespace().collect();
    while words.first().is_some_and(|w| is_stopword(w)) {
        words.remove(0);
    }
    while words.last().is_some_and(|w| is_stopword(w)) {
        words.pop();
    }
    (words.len() >= min_words).then(|| words.join(" "))
}

fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    match resolver::parse_date(raw) {
        Ok(date) => Some(date),
        Err(e) => {
            tracing::debug!(error = %e, "dropping unparseable date");
            None
        }
    }
}

/// Parse one side of a time range: `4 pm`, `4pm`, or a bare 24-hour `16`.
pub fn parse_hour(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim().to_lowercase();
    if raw.contains(':') {
        tracing::debug!(side = %raw, "minute-level time ranges are not parsed");
        return None;
    }

    let (digits, meridiem) = match raw.strip_suffix("am") {
        Some(rest) => (rest.trim(), Some(false)),
        None => match raw.strip_suffix("pm") {
            Some(rest) => (rest.trim(), Some(true)),
            None => (raw.as_str(), None),
        },
    };
    let hour: u32 = digits.parse().ok()?;

    let hour = match meridiem {
        Some(pm) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            match (hour, pm) {
                (12, false) => 0,
                (12, true) => 12,
                (h, true) => h + 12,
                (h, false) => h,
            }
        }
        None => hour,
    };
    NaiveTime::from_hms_opt(hour, 0, 0)
}

/// Find a `<start> to <end>` range; each side is parsed independently.
pub fn extract_time_range(text: &str) -> Option<(NaiveTime, NaiveTime)> {
    let caps = TIME_RANGE.captures(text)?;
    let start = parse_hour(caps.get(1)?.as_str())?;
    let end = parse_hour(caps.get(2)?.as_str())?;
    Some((start, end))
}

pub fn extract_email(text: &str) -> Option<String> {
    first_valid(&EMAIL_RULES, text, |s| Some(s.to_string())).map(|m| m.value)
}

pub fn extract_contact_number(text: &str) -> Option<String> {
    first_valid(&CONTACT_RULES, text, |s| Some(s.to_string())).map(|m| m.value)
}

/// Explicit `YYYY-MM-DD`, then any relative phrase the resolver recognizes.
fn extract_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    first_valid(&ISO_DATE_RULES, text, parse_iso_date)
        .or_else(|| {
            first_valid(&RELATIVE_TIME_RULES, text, |s| {
                resolver::try_resolve_relative(s, today)
            })
        })
        .map(|m| m.value)
}

/// Ask the classifier for a coarse label unless a contact number already
/// settles the question.
pub async fn detect_intent(
    classifier: &dyn IntentClassifier,
    text: &str,
    has_contact_number: bool,
) -> Intent {
    if has_contact_number {
        return Intent::BookAppointment;
    }

    match classifier.classify(text).await {
        Ok(label) => Intent::from_label(&label),
        Err(e) => {
            tracing::warn!(error = %e, "intent classifier failed, treating as unknown");
            Intent::Unknown
        }
    }
}

/// Intent-specific field extraction. Never fails; unmatched fields stay `None`.
pub fn extract_entities(
    intent: Intent,
    text: &str,
    context: &DialogueContext,
    today: NaiveDate,
) -> EntitySet {
    let mut entities = EntitySet {
        email: extract_email(text),
        contact_number: extract_contact_number(text),
        ..Default::default()
    };

    match intent {
        Intent::CheckAvailability => {
            if let Some(m) = first_valid(&ISO_DATE_RULES, text, parse_iso_date) {
                entities.date = Some(m.value);
            } else if let Some(m) =
                first_valid(&RELATIVE_TIME_RULES, text, |s| Some(s.to_string()))
            {
                if m.rule == "weekday" {
                    entities.date = resolver::resolve_weekday_name(&m.value, today);
                } else {
                    entities.relative_time = Some(m.value);
                }
            }
        }
        Intent::BookAppointment => {
            entities.name = first_valid(&BOOKING_NAME_RULES, text, |s| {
                let min_words = if s.split_whitespace().count() > 1 { 2 } else { 1 };
                clean_name(s, min_words)
            })
            .map(|m| m.value);
            entities.date = extract_date(text, today).or(context.last_date);
            if let Some((start, end)) = extract_time_range(text) {
                entities.start = Some(start);
                entities.end = Some(end);
            }
        }
        Intent::CancelAppointment => {
            entities.name = first_valid(&CANCEL_NAME_RULES, text, |s| clean_name(s, 1))
                .map(|m| m.value);
            entities.date = extract_date(text, today);
        }
        Intent::Unknown => {}
    }

    entities
}

/// Full extraction pass for one user turn.
pub async fn extract(
    classifier: &dyn IntentClassifier,
    text: &str,
    context: &DialogueContext,
    today: NaiveDate,
) -> (Intent, EntitySet) {
    let has_contact_number = extract_contact_number(text).is_some();
    let intent = detect_intent(classifier, text, has_contact_number).await;
    let entities = extract_entities(intent, text, context, today);

    tracing::debug!(intent = intent.as_str(), ?entities, "extracted entities");
    (intent, entities)
}
