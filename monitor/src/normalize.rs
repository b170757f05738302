//! Span normalization
//!
//! Converts raw telemetry spans into canonical [`Log`] entries. Pure and
//! total: malformed input degrades to empty fields, never to an error.

use chrono::{DateTime, SecondsFormat, Utc};
use shared_types::{Log, LogLevel, Span, EVENT_TYPE_PREFIX, START_SPAN_NAME};

const NAME_SEPARATOR: &str = " - ";

/// Parsed form of a composite span name.
///
/// Grammar:
///
/// ```text
/// name      := "SCHWARM_START" | agent [ " - " activity ]
/// activity  := [ ... ] "EventType." KIND [ ... ] | text
/// ```
///
/// Anything that does not match falls back to `Activity` with the whole
/// name as the agent and an empty activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanName<'a> {
    Start,
    Activity { agent: &'a str, activity: &'a str },
}

pub fn parse_span_name(name: &str) -> SpanName<'_> {
    if name == START_SPAN_NAME {
        return SpanName::Start;
    }
    match name.split_once(NAME_SEPARATOR) {
        Some((agent, activity)) => SpanName::Activity {
            agent: agent.trim(),
            activity: activity.trim(),
        },
        None => SpanName::Activity {
            agent: name.trim(),
            activity: "",
        },
    }
}

/// Level for a non-start span. Error status beats activity classification.
pub fn classify(status_is_error: bool, activity: &str) -> LogLevel {
    if status_is_error {
        return LogLevel::Error;
    }
    if !activity.contains(EVENT_TYPE_PREFIX) {
        return LogLevel::Log;
    }
    let candidate = activity.replacen(EVENT_TYPE_PREFIX, "", 1);
    LogLevel::from_event_type(&candidate).unwrap_or(LogLevel::Info)
}

/// Render nanoseconds since the epoch as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
///
/// Sub-millisecond precision is truncated; out-of-range values render as
/// the epoch.
pub fn format_timestamp(start_time_nanos: i64) -> String {
    let millis = start_time_nanos / 1_000_000;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn normalize(span: &Span) -> Log {
    let run_id = span
        .attributes
        .get("run_id")
        .and_then(|v| v.as_str())
        .unwrap_or(&span.run_id)
        .to_string();

    let (agent, level, message) = match parse_span_name(&span.name) {
        SpanName::Start => (
            "System".to_string(),
            LogLevel::Info,
            "Agent Framework Started".to_string(),
        ),
        SpanName::Activity { agent, activity } => (
            agent.to_string(),
            classify(span.is_error(), activity),
            format!("Agent {} activity", span.name),
        ),
    };

    Log {
        id: span.id.clone(),
        timestamp: format_timestamp(span.start_time),
        parent_id: span.parent_span_id.clone(),
        run_id,
        level,
        agent,
        message,
        attributes: span.attributes.clone(),
    }
}

pub fn normalize_all(spans: &[Span]) -> Vec<Log> {
    spans.iter().map(normalize).collect()
}
