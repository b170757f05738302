//! Context-scoped state container shared between the transport tasks and
//! observers.
//!
//! The transport manager is the only writer. Observers read cloned
//! snapshots and subscribe to [`StateChange`] notifications.

use std::collections::BTreeMap;
use std::sync::Arc;

use shared_types::{
    BreakpointConfig, ChannelKind, ChatDirection, ChatEntry, CompletedMessage, DashboardSummary,
    ErrorState, Log, LogLevel, PauseState, Span,
};
use tokio::sync::{broadcast, RwLock};

use crate::error::ValidationError;
use crate::normalize::normalize_all;
use crate::stores::{ChatState, LogStore, PauseController, RunTracker, StreamBuffer, StreamOutcome};
use crate::views::{self, LogQuery};

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTarget {
    /// Agent message text (`/ws/stream`, `STREAM` envelopes or `GET /stream`).
    Message,
    /// Tool output (`GET /stream/tool`).
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Incremental delivery; duplicates are dropped.
    Append,
    /// Full resync; the store is rebuilt from the batch.
    Replace,
}

/// Notification broadcast after every visible mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    LogsAppended {
        added: usize,
        latest_id: Option<String>,
    },
    LogsReplaced {
        total: usize,
    },
    ActiveRunChanged(Option<String>),
    PauseChanged(PauseState),
    BreakpointsChanged(BreakpointConfig),
    StreamUpdated(StreamTarget),
    MessageCompleted(StreamTarget),
    ChatRequested(bool),
    ChatMessage(ChatEntry),
    ConnectionChanged {
        channel: ChannelKind,
        connected: bool,
    },
    ErrorRaised(ErrorState),
    ErrorCleared,
    Reset,
}

/// Log store and run tracker share one lock so a dedup check, insert and
/// run recomputation are never interleaved with another ingest.
#[derive(Debug, Default)]
struct LogFeed {
    store: LogStore,
    tracker: RunTracker,
    raw_spans: Vec<Span>,
}

#[derive(Debug, Default)]
struct Streams {
    message: StreamBuffer,
    tool: StreamBuffer,
}

impl Streams {
    fn get(&self, target: StreamTarget) -> &StreamBuffer {
        match target {
            StreamTarget::Message => &self.message,
            StreamTarget::Tool => &self.tool,
        }
    }

    fn get_mut(&mut self, target: StreamTarget) -> &mut StreamBuffer {
        match target {
            StreamTarget::Message => &mut self.message,
            StreamTarget::Tool => &mut self.tool,
        }
    }
}

struct Inner {
    feed: RwLock<LogFeed>,
    pause: RwLock<PauseController>,
    streams: RwLock<Streams>,
    chat: RwLock<ChatState>,
    connections: RwLock<BTreeMap<ChannelKind, bool>>,
    error: RwLock<Option<ErrorState>>,
    changes: broadcast::Sender<StateChange>,
}

#[derive(Clone)]
pub struct MonitorState {
    inner: Arc<Inner>,
}

impl MonitorState {
    pub fn new(initial_paused: bool, breakpoints: BreakpointConfig) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                feed: RwLock::new(LogFeed::default()),
                pause: RwLock::new(PauseController::new(initial_paused, breakpoints)),
                streams: RwLock::new(Streams::default()),
                chat: RwLock::new(ChatState::new()),
                connections: RwLock::new(BTreeMap::new()),
                error: RwLock::new(None),
                changes,
            }),
        }
    }

    fn notify(&self, change: StateChange) {
        // No subscribers is fine.
        let _ = self.inner.changes.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.inner.changes.subscribe()
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub async fn logs(&self) -> Vec<Log> {
        self.inner.feed.read().await.store.logs().to_vec()
    }

    pub async fn log_count(&self) -> usize {
        self.inner.feed.read().await.store.len()
    }

    pub async fn latest_id(&self) -> Option<String> {
        self.inner.feed.read().await.store.latest_id().map(str::to_string)
    }

    pub async fn active_run(&self) -> Option<String> {
        self.inner
            .feed
            .read()
            .await
            .tracker
            .active_run()
            .map(str::to_string)
    }

    /// The last span batch as received, for the raw-data view.
    pub async fn raw_spans(&self) -> Vec<Span> {
        self.inner.feed.read().await.raw_spans.clone()
    }

    pub async fn pause_state(&self) -> PauseState {
        self.inner.pause.read().await.state().clone()
    }

    pub async fn breakpoints(&self) -> BreakpointConfig {
        self.inner.pause.read().await.breakpoints().clone()
    }

    pub async fn stream_current(&self, target: StreamTarget) -> String {
        self.inner.streams.read().await.get(target).current().to_string()
    }

    pub async fn stream_history(&self, target: StreamTarget) -> Vec<CompletedMessage> {
        self.inner.streams.read().await.get(target).history().to_vec()
    }

    pub async fn chat_requested(&self) -> bool {
        self.inner.chat.read().await.requested()
    }

    pub async fn chat_transcript(&self) -> Vec<ChatEntry> {
        self.inner.chat.read().await.transcript().to_vec()
    }

    pub async fn connections(&self) -> BTreeMap<ChannelKind, bool> {
        self.inner.connections.read().await.clone()
    }

    pub async fn is_connected(&self, channel: ChannelKind) -> bool {
        self.inner
            .connections
            .read()
            .await
            .get(&channel)
            .copied()
            .unwrap_or(false)
    }

    pub async fn error(&self) -> Option<ErrorState> {
        self.inner.error.read().await.clone()
    }

    pub async fn summary(&self) -> DashboardSummary {
        views::summarize(self.inner.feed.read().await.store.logs())
    }

    pub async fn query(&self, query: &LogQuery) -> Vec<Log> {
        query.apply(self.inner.feed.read().await.store.logs())
    }

    pub async fn message_flow(&self) -> Vec<Log> {
        views::message_flow(self.inner.feed.read().await.store.logs())
    }

    // ------------------------------------------------------------------
    // Writes (transport manager only)
    // ------------------------------------------------------------------

    /// Normalize and store a span batch. Returns how many logs were added.
    pub(crate) async fn ingest_spans(&self, spans: Vec<Span>, mode: IngestMode) -> usize {
        let logs = normalize_all(&spans);
        let mut changes = Vec::new();

        let added = {
            let mut guard = self.inner.feed.write().await;
            let feed = &mut *guard;
            let (added, run_changed) = match mode {
                IngestMode::Append => {
                    let arrived = feed.store.append(logs);
                    let added = arrived.len();
                    (added, feed.tracker.observe(arrived))
                }
                IngestMode::Replace => {
                    feed.store.replace(logs);
                    (feed.store.len(), feed.tracker.rebuild(feed.store.logs()))
                }
            };
            if !spans.is_empty() || mode == IngestMode::Replace {
                feed.raw_spans = spans;
            }

            match mode {
                IngestMode::Append if added > 0 => changes.push(StateChange::LogsAppended {
                    added,
                    latest_id: feed.store.latest_id().map(str::to_string),
                }),
                IngestMode::Append => {}
                IngestMode::Replace => changes.push(StateChange::LogsReplaced { total: added }),
            }
            if run_changed {
                changes.push(StateChange::ActiveRunChanged(
                    feed.tracker.active_run().map(str::to_string),
                ));
            }
            added
        };

        for change in changes {
            self.notify(change);
        }
        added
    }

    pub(crate) async fn apply_remote_pause(&self, paused: bool) {
        let state = {
            let mut pause = self.inner.pause.write().await;
            if !pause.apply_remote(paused) {
                return;
            }
            pause.state().clone()
        };
        tracing::debug!(paused, "Pause state confirmed by debuggee");
        self.notify(StateChange::PauseChanged(state));
    }

    /// Flip the pause state optimistically and return the intent to send.
    pub(crate) async fn toggle_local_pause(&self) -> bool {
        let (intent, state) = {
            let mut pause = self.inner.pause.write().await;
            let intent = pause.toggle();
            (intent, pause.state().clone())
        };
        self.notify(StateChange::PauseChanged(state));
        intent
    }

    pub(crate) async fn set_breakpoint(
        &self,
        hook: LogLevel,
        enabled: bool,
    ) -> Result<BreakpointConfig, ValidationError> {
        let config = {
            let mut pause = self.inner.pause.write().await;
            pause.set_breakpoint(hook, enabled)?;
            pause.breakpoints().clone()
        };
        self.notify(StateChange::BreakpointsChanged(config.clone()));
        Ok(config)
    }

    pub(crate) async fn set_break_after_turns(
        &self,
        input: &str,
    ) -> Result<BreakpointConfig, ValidationError> {
        let config = {
            let mut pause = self.inner.pause.write().await;
            pause.set_break_after_turns(input)?;
            pause.breakpoints().clone()
        };
        self.notify(StateChange::BreakpointsChanged(config.clone()));
        Ok(config)
    }

    pub(crate) async fn apply_remote_breakpoints(&self, remote: BreakpointConfig) {
        let config = {
            let mut pause = self.inner.pause.write().await;
            if !pause.apply_remote_breakpoints(remote) {
                return;
            }
            pause.breakpoints().clone()
        };
        self.notify(StateChange::BreakpointsChanged(config));
    }

    pub(crate) async fn stream_fragment(&self, target: StreamTarget, fragment: &str) {
        let outcome = self
            .inner
            .streams
            .write()
            .await
            .get_mut(target)
            .push_fragment(fragment);
        match outcome {
            StreamOutcome::Appended => self.notify(StateChange::StreamUpdated(target)),
            StreamOutcome::Completed => {
                self.notify(StateChange::MessageCompleted(target));
                self.notify(StateChange::StreamUpdated(target));
            }
            StreamOutcome::Unchanged => {}
        }
    }

    pub(crate) async fn stream_close(&self, target: StreamTarget) {
        let completed = self.inner.streams.write().await.get_mut(target).close();
        if completed {
            self.notify(StateChange::MessageCompleted(target));
        }
    }

    pub(crate) async fn set_chat_requested(&self, requested: bool) {
        let changed = self.inner.chat.write().await.set_requested(requested);
        if changed {
            self.notify(StateChange::ChatRequested(requested));
        }
    }

    pub(crate) async fn record_chat(&self, direction: ChatDirection, text: String) {
        let entry = {
            let mut chat = self.inner.chat.write().await;
            chat.record(direction, text);
            chat.transcript().last().cloned()
        };
        if let Some(entry) = entry {
            self.notify(StateChange::ChatMessage(entry));
        }
    }

    pub(crate) async fn set_connected(&self, channel: ChannelKind, connected: bool) {
        let previous = self
            .inner
            .connections
            .write()
            .await
            .insert(channel, connected);
        if previous != Some(connected) {
            self.notify(StateChange::ConnectionChanged { channel, connected });
        }
    }

    pub(crate) async fn raise_error(&self, error: ErrorState) {
        *self.inner.error.write().await = Some(error.clone());
        self.notify(StateChange::ErrorRaised(error));
    }

    pub(crate) async fn clear_error(&self) {
        let had_error = self.inner.error.write().await.take().is_some();
        if had_error {
            self.notify(StateChange::ErrorCleared);
        }
    }

    /// Clear the current error only when `endpoint` raised it, so a
    /// successful poll does not hide a failed control request.
    pub(crate) async fn clear_error_for(&self, endpoint: &str) {
        let cleared = {
            let mut error = self.inner.error.write().await;
            match error.as_ref() {
                Some(current) if current.endpoint == endpoint => error.take().is_some(),
                _ => false,
            }
        };
        if cleared {
            self.notify(StateChange::ErrorCleared);
        }
    }

    /// Drop collected data. Pause, breakpoints and connection flags stay.
    pub(crate) async fn reset_data(&self) {
        {
            let mut feed = self.inner.feed.write().await;
            feed.store.reset();
            feed.tracker.reset();
            feed.raw_spans.clear();
        }
        {
            let mut streams = self.inner.streams.write().await;
            streams.message.reset();
            streams.tool.reset();
        }
        self.inner.chat.write().await.reset();
        self.notify(StateChange::Reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::PauseOrigin;

    fn span(id: &str, parent: &str) -> Span {
        Span::from_value(&json!({
            "id": id,
            "name": "Alice - EventType.START_TURN",
            "parent_span_id": parent,
            "run_id": "run-1",
            "start_time": "0",
            "status_code": "OK",
        }))
    }

    fn state() -> MonitorState {
        MonitorState::new(false, BreakpointConfig::default())
    }

    #[tokio::test]
    async fn append_dedups_and_tracks_latest_root() {
        let state = state();
        assert_eq!(state.ingest_spans(vec![span("a", "")], IngestMode::Append).await, 1);
        assert_eq!(
            state
                .ingest_spans(vec![span("a", ""), span("b", "a")], IngestMode::Append)
                .await,
            1
        );
        let ids: Vec<_> = state.logs().await.into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(state.latest_id().await.as_deref(), Some("b"));
        assert_eq!(state.active_run().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn replace_rebuilds_store_and_run() {
        let state = state();
        state
            .ingest_spans(vec![span("a", ""), span("b", "a")], IngestMode::Append)
            .await;
        state
            .ingest_spans(vec![span("x", ""), span("y", "x")], IngestMode::Replace)
            .await;
        let ids: Vec<_> = state.logs().await.into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["x", "y"]);
        assert_eq!(state.active_run().await.as_deref(), Some("x"));
        assert_eq!(state.raw_spans().await.len(), 2);
    }

    #[tokio::test]
    async fn empty_append_is_silent() {
        let state = state();
        let mut rx = state.subscribe();
        assert_eq!(state.ingest_spans(Vec::new(), IngestMode::Append).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_appends_never_duplicate() {
        let state = state();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                let batch = (0..50).map(|i| span(&format!("s{i}"), "root")).collect();
                state.ingest_spans(batch, IngestMode::Append).await
            }));
        }
        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 50);
        assert_eq!(state.log_count().await, 50);
    }

    #[tokio::test]
    async fn pause_toggle_then_remote_confirmation() {
        let state = state();
        let mut rx = state.subscribe();
        assert!(state.toggle_local_pause().await);
        assert!(state.pause_state().await.is_pending());
        state.apply_remote_pause(true).await;
        let confirmed = state.pause_state().await;
        assert!(confirmed.paused);
        assert_eq!(confirmed.origin, PauseOrigin::Remote);

        assert!(matches!(rx.recv().await, Ok(StateChange::PauseChanged(s)) if s.is_pending()));
        assert!(matches!(rx.recv().await, Ok(StateChange::PauseChanged(s)) if !s.is_pending()));
    }

    #[tokio::test]
    async fn invalid_turn_amount_leaves_breakpoints_untouched() {
        let state = state();
        let mut rx = state.subscribe();
        assert!(state.set_break_after_turns("0").await.is_err());
        assert_eq!(state.breakpoints().await.break_after_turns, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn streams_are_independent() {
        let state = state();
        state.stream_fragment(StreamTarget::Message, "Hello ").await;
        state.stream_fragment(StreamTarget::Tool, "ls").await;
        state.stream_fragment(StreamTarget::Message, "world").await;
        state.stream_close(StreamTarget::Message).await;

        let history = state.stream_history(StreamTarget::Message).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Hello world");
        assert_eq!(state.stream_current(StreamTarget::Tool).await, "ls");
    }

    #[tokio::test]
    async fn reset_keeps_pause_and_connections() {
        let state = state();
        state.ingest_spans(vec![span("a", "")], IngestMode::Append).await;
        state.set_connected(ChannelKind::Spans, true).await;
        state.toggle_local_pause().await;
        state.reset_data().await;

        assert_eq!(state.log_count().await, 0);
        assert_eq!(state.active_run().await, None);
        assert!(state.pause_state().await.paused);
        assert!(state.is_connected(ChannelKind::Spans).await);
    }

    #[tokio::test]
    async fn error_raise_and_clear() {
        let state = state();
        let error = crate::error::TransportError::NotConnected(ChannelKind::Chat).to_error_state();
        state.raise_error(error.clone()).await;
        assert_eq!(state.error().await, Some(error));
        state.clear_error().await;
        assert_eq!(state.error().await, None);
    }

    #[tokio::test]
    async fn endpoint_scoped_clear_keeps_other_errors() {
        let state = state();
        let error = ErrorState {
            category: shared_types::ErrorCategory::HttpStatus,
            detail: "status 500".to_string(),
            endpoint: "http://localhost:8123/break".to_string(),
            occurred_at: chrono::Utc::now(),
        };
        state.raise_error(error.clone()).await;

        state.clear_error_for("http://localhost:8123/spans").await;
        assert_eq!(state.error().await, Some(error));

        state.clear_error_for("http://localhost:8123/break").await;
        assert_eq!(state.error().await, None);
    }
}
