use shared_types::{ChatDirection, ErrorCategory, ErrorState};

use super::frames::PushEvent;
use crate::app_state::{IngestMode, MonitorState, StreamTarget};

/// Route one decoded frame to the store that owns it.
pub async fn apply_push_event(state: &MonitorState, source: &str, event: PushEvent) {
    match event {
        PushEvent::Span(span) => {
            state.ingest_spans(vec![span], IngestMode::Append).await;
        }
        PushEvent::PauseStatus(paused) => state.apply_remote_pause(paused).await,
        PushEvent::ChatRequested(requested) => state.set_chat_requested(requested).await,
        PushEvent::ChatMessage(text) => state.record_chat(ChatDirection::Inbound, text).await,
        PushEvent::StreamFragment(fragment) => {
            state.stream_fragment(StreamTarget::Message, &fragment).await
        }
        PushEvent::StreamClose => state.stream_close(StreamTarget::Message).await,
        PushEvent::RemoteError(detail) => {
            tracing::warn!(source = %source, detail = %detail, "Debuggee reported an error");
            state
                .raise_error(ErrorState {
                    category: ErrorCategory::Generic,
                    detail,
                    endpoint: source.to_string(),
                    occurred_at: chrono::Utc::now(),
                })
                .await;
        }
    }
}
