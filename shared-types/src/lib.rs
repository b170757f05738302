//! Shared types between the monitor core and the dashboard
//!
//! These types are used by both:
//! - the `monitor` crate (ingestion, stores, transports)
//! - the dashboard frontend (via the generated TypeScript bindings)
//!
//! Serializable with serde for JSON over WebSocket/HTTP

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use ts_rs::TS;

// ============================================================================
// Constants
// ============================================================================

/// Span name emitted once when the agent framework boots.
pub const START_SPAN_NAME: &str = "SCHWARM_START";

/// Prefix carried by lifecycle activities in composite span names.
pub const EVENT_TYPE_PREFIX: &str = "EventType.";

/// In-band sentinel that opens a new streamed message.
pub const STREAM_START_MARKER: &str = "##START##";

pub const DEFAULT_ENDPOINT_URL: &str = "http://127.0.0.1:8123";

// ============================================================================
// Telemetry input
// ============================================================================

/// Raw telemetry record emitted by the agent framework.
///
/// A span must be a JSON object. Within it decoding never fails: missing,
/// null or wrongly typed fields fall back to their defaults, numeric
/// identifiers are rendered as strings and `start_time` is accepted either
/// as a JSON number or a numeric string.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Span {
    pub id: String,
    pub parent_span_id: String,
    pub run_id: String,
    pub name: String,
    /// Nanoseconds since the Unix epoch.
    pub start_time: i64,
    pub status_code: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Span {
    pub fn from_value(value: &serde_json::Value) -> Self {
        let field = |key: &str| lenient_string(value.get(key));
        Self {
            id: field("id"),
            parent_span_id: field("parent_span_id"),
            run_id: field("run_id"),
            name: field("name"),
            start_time: lenient_nanos(value.get("start_time")),
            status_code: field("status_code"),
            attributes: value
                .get("attributes")
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Decode `value` if it is a JSON object; anything else is not a span.
    pub fn try_from_value(value: &serde_json::Value) -> Option<Self> {
        value.is_object().then(|| Self::from_value(value))
    }

    pub fn is_error(&self) -> bool {
        self.status_code == "ERROR"
    }
}

impl<'de> Deserialize<'de> for Span {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Span::try_from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("span is not an object: {value}")))
    }
}

fn lenient_string(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn lenient_nanos(value: Option<&serde_json::Value>) -> i64 {
    match value {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

// ============================================================================
// Canonical log model
// ============================================================================

/// Closed classification of a normalized log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum LogLevel {
    Log,
    Error,
    Info,
    StartTurn,
    Instruct,
    MessageCompletion,
    PostMessageCompletion,
    ToolExecution,
    PostToolExecution,
    Handoff,
}

impl LogLevel {
    /// Levels that correspond to a lifecycle hook the framework can break on.
    pub const HOOKS: [LogLevel; 7] = [
        LogLevel::StartTurn,
        LogLevel::Instruct,
        LogLevel::MessageCompletion,
        LogLevel::PostMessageCompletion,
        LogLevel::ToolExecution,
        LogLevel::PostToolExecution,
        LogLevel::Handoff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Log => "LOG",
            LogLevel::Error => "ERROR",
            LogLevel::Info => "INFO",
            LogLevel::StartTurn => "START_TURN",
            LogLevel::Instruct => "INSTRUCT",
            LogLevel::MessageCompletion => "MESSAGE_COMPLETION",
            LogLevel::PostMessageCompletion => "POST_MESSAGE_COMPLETION",
            LogLevel::ToolExecution => "TOOL_EXECUTION",
            LogLevel::PostToolExecution => "POST_TOOL_EXECUTION",
            LogLevel::Handoff => "HANDOFF",
        }
    }

    /// Map an `EventType.<KIND>` suffix to its lifecycle level.
    pub fn from_event_type(kind: &str) -> Option<Self> {
        Self::HOOKS.into_iter().find(|level| level.as_str() == kind)
    }

    pub fn is_hook(&self) -> bool {
        Self::HOOKS.contains(self)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized, immutable log entry derived from exactly one [`Span`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct Log {
    /// Copied from the span; dedup and ordering key.
    pub id: String,
    /// ISO-8601 with millisecond precision, e.g. `1970-01-01T00:01:00.000Z`.
    pub timestamp: String,
    /// Empty for root entries.
    pub parent_id: String,
    pub run_id: String,
    pub level: LogLevel,
    pub agent: String,
    pub message: String,
    #[ts(type = "Record<string, unknown>")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Log {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_empty()
    }
}

// ============================================================================
// Pause / breakpoint state
// ============================================================================

/// Who produced the current pause value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum PauseOrigin {
    /// Optimistic value written by a user action, not yet confirmed.
    Local,
    /// Authoritative value pushed or returned by the debuggee.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct PauseState {
    pub paused: bool,
    pub origin: PauseOrigin,
    pub recorded_at: DateTime<Utc>,
}

impl PauseState {
    pub fn local(paused: bool) -> Self {
        Self {
            paused,
            origin: PauseOrigin::Local,
            recorded_at: Utc::now(),
        }
    }

    pub fn remote(paused: bool) -> Self {
        Self {
            paused,
            origin: PauseOrigin::Remote,
            recorded_at: Utc::now(),
        }
    }

    /// True while the value is an unconfirmed local intent.
    pub fn is_pending(&self) -> bool {
        self.origin == PauseOrigin::Local
    }
}

/// Breakpoint configuration exchanged with `GET/POST /breakpoints`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct BreakpointConfig {
    #[serde(default)]
    pub breakpoints: BTreeMap<LogLevel, bool>,
    #[serde(default = "default_break_after_turns")]
    pub break_after_turns: u32,
}

fn default_break_after_turns() -> u32 {
    1
}

impl Default for BreakpointConfig {
    fn default() -> Self {
        Self {
            breakpoints: LogLevel::HOOKS.iter().map(|hook| (*hook, false)).collect(),
            break_after_turns: default_break_after_turns(),
        }
    }
}

impl BreakpointConfig {
    pub fn is_enabled(&self, hook: LogLevel) -> bool {
        self.breakpoints.get(&hook).copied().unwrap_or(false)
    }
}

// ============================================================================
// Streams and chat
// ============================================================================

/// A streamed message that has been closed and will never change again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct CompletedMessage {
    pub content: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum ChatDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct ChatEntry {
    pub direction: ChatDirection,
    pub text: String,
    pub at: DateTime<Utc>,
}

// ============================================================================
// Transport surface
// ============================================================================

/// Logical connection owned by the transport manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum ChannelKind {
    Spans,
    BreakStatus,
    ChatStatus,
    Chat,
    Stream,
    /// Single socket carrying every message class in an envelope.
    Multiplexed,
    /// Chunked `GET /stream` body.
    HttpStream,
    /// Chunked `GET /stream/tool` body.
    HttpToolStream,
}

impl ChannelKind {
    pub fn path(&self) -> &'static str {
        match self {
            ChannelKind::Spans => "/ws/spans",
            ChannelKind::BreakStatus => "/ws/break-status",
            ChannelKind::ChatStatus => "/ws/chat-status",
            ChannelKind::Chat => "/ws/chat",
            ChannelKind::Stream => "/ws/stream",
            ChannelKind::Multiplexed => "/ws",
            ChannelKind::HttpStream => "/stream",
            ChannelKind::HttpToolStream => "/stream/tool",
        }
    }

    pub fn is_socket(&self) -> bool {
        !matches!(self, ChannelKind::HttpStream | ChannelKind::HttpToolStream)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum ErrorCategory {
    /// Endpoint unreachable, connection refused, CORS preflight failure, timeout.
    Network,
    /// Endpoint answered with a non-2xx status.
    HttpStatus,
    /// Anything else, including undecodable bodies and remote error frames.
    Generic,
}

/// Typed error surface shown to the user; replaces uncaught transport errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct ErrorState {
    pub category: ErrorCategory,
    pub detail: String,
    pub endpoint: String,
    pub occurred_at: DateTime<Utc>,
}

// ============================================================================
// Wire frames
// ============================================================================

/// Client request on `/ws/break-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct SetBreakRequest {
    pub set_break: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum EnvelopeKind {
    Break,
    Event,
    Stream,
    Chat,
    Error,
}

/// Envelope used by the multiplexed single-socket variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct WsEnvelope {
    pub message_type: EnvelopeKind,
    pub message: String,
}

// ============================================================================
// Derived views
// ============================================================================

/// Aggregate numbers shown on the dashboard cards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct DashboardSummary {
    pub active_agents: usize,
    pub total_events: usize,
    pub token_usage: f64,
    pub cost: f64,
    pub latest_instruction: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ts_rs::Config;

    #[test]
    fn test_span_decodes_string_and_numeric_start_time() {
        let a: Span = serde_json::from_str(r#"{"id":"1","start_time":"60000000000"}"#).unwrap();
        let b: Span = serde_json::from_str(r#"{"id":"1","start_time":60000000000}"#).unwrap();
        assert_eq!(a.start_time, 60_000_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn test_span_decoding_is_total() {
        let span: Span = serde_json::from_str(
            r#"{"id":42,"parent_span_id":null,"name":["not","a","string"],"attributes":"oops"}"#,
        )
        .unwrap();
        assert_eq!(span.id, "42");
        assert_eq!(span.parent_span_id, "");
        assert_eq!(span.name, "");
        assert_eq!(span.start_time, 0);
        assert!(span.attributes.is_empty());

        let empty = Span::from_value(&serde_json::Value::Null);
        assert_eq!(empty, Span::default());
    }

    #[test]
    fn test_non_object_is_not_a_span() {
        for raw in ["7", r#""span""#, "null", "[1,2]"] {
            let value: serde_json::Value = serde_json::from_str(raw).unwrap();
            assert_eq!(Span::try_from_value(&value), None, "{raw}");
            assert!(serde_json::from_str::<Span>(raw).is_err(), "{raw}");
        }
        assert!(Span::try_from_value(&serde_json::json!({})).is_some());
    }

    #[test]
    fn test_log_level_wire_names() {
        let json = serde_json::to_string(&LogLevel::PostToolExecution).unwrap();
        assert_eq!(json, "\"POST_TOOL_EXECUTION\"");
        assert_eq!(
            LogLevel::from_event_type("HANDOFF"),
            Some(LogLevel::Handoff)
        );
        assert_eq!(LogLevel::from_event_type("INFO"), None);
        assert!(!LogLevel::Error.is_hook());
    }

    #[test]
    fn test_breakpoint_config_defaults_cover_every_hook() {
        let config = BreakpointConfig::default();
        assert_eq!(config.breakpoints.len(), LogLevel::HOOKS.len());
        assert_eq!(config.break_after_turns, 1);

        let partial: BreakpointConfig =
            serde_json::from_str(r#"{"breakpoints":{"START_TURN":true}}"#).unwrap();
        assert!(partial.is_enabled(LogLevel::StartTurn));
        assert!(!partial.is_enabled(LogLevel::Handoff));
        assert_eq!(partial.break_after_turns, 1);
    }

    #[test]
    fn test_envelope_protocol() {
        let envelope = WsEnvelope {
            message_type: EnvelopeKind::Break,
            message: "true".to_string(),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(json, r#"{"message_type":"BREAK","message":"true"}"#);
    }

    #[test]
    fn export_types() {
        // The export_to attribute in each type's #[ts] macro specifies the output file
        let config = Config::default();
        LogLevel::export(&config).unwrap();
        Log::export(&config).unwrap();
        PauseOrigin::export(&config).unwrap();
        PauseState::export(&config).unwrap();
        BreakpointConfig::export(&config).unwrap();
        CompletedMessage::export(&config).unwrap();
        ChatDirection::export(&config).unwrap();
        ChatEntry::export(&config).unwrap();
        ChannelKind::export(&config).unwrap();
        ErrorCategory::export(&config).unwrap();
        ErrorState::export(&config).unwrap();
        SetBreakRequest::export(&config).unwrap();
        EnvelopeKind::export(&config).unwrap();
        WsEnvelope::export(&config).unwrap();
        DashboardSummary::export(&config).unwrap();
    }
}
