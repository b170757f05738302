//! Wire frames for the push channels.

use serde_json::Value;
use shared_types::{ChannelKind, EnvelopeKind, SetBreakRequest, Span, WsEnvelope};

/// A decoded frame, routed to exactly one consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Span(Span),
    PauseStatus(bool),
    ChatRequested(bool),
    ChatMessage(String),
    StreamFragment(String),
    StreamClose,
    RemoteError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unrecognized tag {0:?}")]
    UnknownTag(String),

    #[error("missing field {0:?}")]
    MissingField(&'static str),

    #[error("{0} does not carry frames")]
    NotFramed(ChannelKind),
}

fn parse_json(payload: &str) -> Result<Value, FrameError> {
    serde_json::from_str(payload).map_err(|e| FrameError::Malformed(e.to_string()))
}

fn bool_field(json: &Value, key: &'static str) -> Result<bool, FrameError> {
    json.get(key)
        .and_then(Value::as_bool)
        .ok_or(FrameError::MissingField(key))
}

fn str_field<'a>(json: &'a Value, key: &'static str) -> Result<&'a str, FrameError> {
    json.get(key)
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingField(key))
}

fn span_from(data: &Value) -> Result<Span, FrameError> {
    Span::try_from_value(data)
        .ok_or_else(|| FrameError::Malformed(format!("span is not an object: {data}")))
}

/// Decode one text frame received on `channel`.
pub fn parse_frame(channel: ChannelKind, payload: &str) -> Result<PushEvent, FrameError> {
    match channel {
        ChannelKind::Spans => {
            let json = parse_json(payload)?;
            match str_field(&json, "type")? {
                "span" => span_from(json.get("data").ok_or(FrameError::MissingField("data"))?)
                    .map(PushEvent::Span),
                other => Err(FrameError::UnknownTag(other.to_string())),
            }
        }
        ChannelKind::BreakStatus => {
            let json = parse_json(payload)?;
            bool_field(&json, "is_paused").map(PushEvent::PauseStatus)
        }
        ChannelKind::ChatStatus => {
            let json = parse_json(payload)?;
            bool_field(&json, "chat_requested").map(PushEvent::ChatRequested)
        }
        ChannelKind::Chat => Ok(PushEvent::ChatMessage(payload.to_string())),
        ChannelKind::Stream => {
            let json = parse_json(payload)?;
            match str_field(&json, "type")? {
                "content" => Ok(PushEvent::StreamFragment(
                    json.get("content")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                )),
                "close" => Ok(PushEvent::StreamClose),
                other => Err(FrameError::UnknownTag(other.to_string())),
            }
        }
        ChannelKind::Multiplexed => parse_envelope(payload),
        ChannelKind::HttpStream | ChannelKind::HttpToolStream => {
            Err(FrameError::NotFramed(channel))
        }
    }
}

fn parse_envelope(payload: &str) -> Result<PushEvent, FrameError> {
    let json = parse_json(payload)?;
    let tag = str_field(&json, "message_type")?;
    let message = json
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let kind: EnvelopeKind = serde_json::from_value(Value::String(tag.to_string()))
        .map_err(|_| FrameError::UnknownTag(tag.to_string()))?;

    match kind {
        // Only an explicit "false" resumes.
        EnvelopeKind::Break => Ok(PushEvent::PauseStatus(message.trim() != "false")),
        EnvelopeKind::Event => span_from(&parse_json(message)?).map(PushEvent::Span),
        EnvelopeKind::Stream => Ok(PushEvent::StreamFragment(message.to_string())),
        EnvelopeKind::Chat => Ok(PushEvent::ChatMessage(message.to_string())),
        EnvelopeKind::Error => Ok(PushEvent::RemoteError(message.to_string())),
    }
}

/// Pause intent in the shape expected by the break channel.
pub fn encode_pause_intent(multiplexed: bool, paused: bool) -> String {
    if multiplexed {
        envelope(EnvelopeKind::Break, paused.to_string())
    } else {
        serde_json::to_string(&SetBreakRequest { set_break: paused }).unwrap_or_default()
    }
}

pub fn encode_chat(multiplexed: bool, text: &str) -> String {
    if multiplexed {
        envelope(EnvelopeKind::Chat, text.to_string())
    } else {
        text.to_string()
    }
}

fn envelope(message_type: EnvelopeKind, message: String) -> String {
    serde_json::to_string(&WsEnvelope {
        message_type,
        message,
    })
    .unwrap_or_default()
}

pub fn http_to_ws_url(http_url: &str) -> String {
    if let Some(rest) = http_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = http_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if http_url.starts_with("ws://") || http_url.starts_with("wss://") {
        http_url.to_string()
    } else if http_url.is_empty() {
        "ws://localhost".to_string()
    } else {
        format!("ws://{http_url}")
    }
}
