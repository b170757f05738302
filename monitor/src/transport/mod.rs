//! Transport manager: owns every connection and is the only writer of
//! [`MonitorState`].
//!
//! Poll mode fetches `/spans` on an interval with exponential backoff.
//! Push mode keeps one reconnecting socket per message class, or a single
//! multiplexed socket. Both may run at once; the stores deduplicate.

pub mod dispatch;
pub mod error;
pub mod frames;
pub mod poll;
pub mod push;
pub mod rest;
pub mod retry;
pub mod stream;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use shared_types::{BreakpointConfig, ChannelKind, ChatDirection, LogLevel};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app_state::{IngestMode, MonitorState, StreamTarget};
use crate::config::{enabled_hooks, MonitorConfig};
use crate::error::ControlError;
use error::TransportError;
use frames::{encode_chat, encode_pause_intent};
use push::{Outbound, PushChannel};
use rest::RestClient;
use retry::retry_with_backoff;

/// Live connections of one `initialize` call. Dropping it cancels every task.
///
/// The runtime is registered before the startup load runs, so its token
/// cancels that load as well as the tasks spawned afterwards.
struct TransportRuntime {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    poll_trigger: Arc<Notify>,
    outbound: HashMap<ChannelKind, mpsc::UnboundedSender<Outbound>>,
}

impl TransportRuntime {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: Vec::new(),
            poll_trigger: Arc::new(Notify::new()),
            outbound: HashMap::new(),
        }
    }

    async fn shutdown(mut self) {
        self.cancel.cancel();
        self.outbound.clear();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Transport task ended abnormally");
            }
        }
    }
}

impl Drop for TransportRuntime {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct TransportManager {
    config: MonitorConfig,
    state: MonitorState,
    client: RestClient,
    runtime: Mutex<Option<TransportRuntime>>,
}

impl TransportManager {
    pub fn new(config: MonitorConfig, state: MonitorState) -> Result<Self, TransportError> {
        let client = RestClient::new(config.http_base(), config.request_timeout)?;
        Ok(Self {
            config,
            state,
            client,
            runtime: Mutex::new(None),
        })
    }

    /// Build the manager together with a fresh state container.
    pub fn from_config(config: MonitorConfig) -> Result<Self, TransportError> {
        let state = MonitorState::new(config.start_paused, config.breakpoints.clone());
        Self::new(config, state)
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Take the current runtime out of its slot and cancel it. The lock is
    /// released before the caller waits for its tasks.
    async fn detach_runtime(&self, next: Option<TransportRuntime>) -> Option<TransportRuntime> {
        let mut slot = self.runtime.lock().await;
        let previous = std::mem::replace(&mut *slot, next);
        if let Some(previous) = &previous {
            previous.cancel.cancel();
        }
        previous
    }

    /// Tear down any previous connections, resync past events, then open
    /// the configured poll and push channels.
    ///
    /// A later `initialize` or `shutdown` abandons the resync, including any
    /// retry backoff in progress.
    pub async fn initialize(&self) {
        let cancel = CancellationToken::new();
        let previous = self
            .detach_runtime(Some(TransportRuntime::new(cancel.clone())))
            .await;
        if let Some(previous) = previous {
            tracing::info!("Superseding previous transport runtime");
            previous.shutdown().await;
        }

        let resync = async {
            match self.load_past_events().await {
                Ok(total) => tracing::info!(total, "Loaded past events"),
                Err(e) => tracing::warn!(error = %e, "Past events unavailable"),
            }
            poll::sync_control_state(&self.client, &self.state).await;
        };
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Startup load abandoned");
                return;
            }
            _ = resync => {}
        }

        let mut slot = self.runtime.lock().await;
        // Superseding and shutdown cancel under this lock, so an uncancelled
        // token means the slot still holds this call's runtime.
        if cancel.is_cancelled() {
            return;
        }
        if let Some(runtime) = slot.as_mut() {
            self.start_tasks(runtime);
        }
    }

    /// Full `GET /spans` resync; replaces the store on success.
    pub async fn load_past_events(&self) -> Result<usize, TransportError> {
        let endpoint = self.client.url("/spans");
        let client = &self.client;
        let result = retry_with_backoff(self.config.retry_policy(), &endpoint, move || {
            client.fetch_spans(None)
        })
        .await;
        match result {
            Ok(spans) => {
                let total = self.state.ingest_spans(spans, IngestMode::Replace).await;
                self.state.clear_error_for(&endpoint).await;
                Ok(total)
            }
            Err(e) => {
                self.state.raise_error(e.to_error_state()).await;
                Err(e)
            }
        }
    }

    fn start_tasks(&self, runtime: &mut TransportRuntime) {
        let TransportRuntime {
            cancel,
            tasks,
            poll_trigger,
            outbound,
        } = runtime;

        tasks.push(tokio::spawn(poll::run_poller(
            self.client.clone(),
            self.state.clone(),
            self.config.retry_policy(),
            self.config.poll_interval,
            poll_trigger.clone(),
            cancel.child_token(),
        )));

        if self.config.push_enabled {
            for channel in self.push_channels() {
                let (tx, rx) = mpsc::unbounded_channel();
                outbound.insert(channel.kind, tx);
                tasks.push(tokio::spawn(push::run_push_channel(
                    channel,
                    self.state.clone(),
                    rx,
                    cancel.child_token(),
                )));
            }
        }

        if self.config.stream_over_http {
            for (kind, target) in [
                (ChannelKind::HttpStream, StreamTarget::Message),
                (ChannelKind::HttpToolStream, StreamTarget::Tool),
            ] {
                tasks.push(tokio::spawn(stream::run_http_stream(
                    self.client.clone(),
                    kind,
                    target,
                    self.state.clone(),
                    self.config.reconnect_delay,
                    cancel.child_token(),
                )));
            }
        }

        tracing::info!(
            tasks = tasks.len(),
            push = self.config.push_enabled,
            multiplexed = self.config.multiplexed,
            "Transport started"
        );
    }

    fn push_channels(&self) -> Vec<PushChannel> {
        let ws_base = self.config.ws_base();
        let start_pause = self
            .config
            .start_paused
            .then(|| encode_pause_intent(self.config.multiplexed, true));

        let kinds: Vec<ChannelKind> = if self.config.multiplexed {
            vec![ChannelKind::Multiplexed]
        } else {
            let mut kinds = vec![
                ChannelKind::Spans,
                ChannelKind::BreakStatus,
                ChannelKind::ChatStatus,
                ChannelKind::Chat,
            ];
            if !self.config.stream_over_http {
                kinds.push(ChannelKind::Stream);
            }
            kinds
        };

        kinds
            .into_iter()
            .map(|kind| PushChannel {
                kind,
                url: format!("{ws_base}{}", kind.path()),
                reconnect_delay: self.config.reconnect_delay,
                greeting: match kind {
                    ChannelKind::BreakStatus | ChannelKind::Multiplexed => start_pause.clone(),
                    _ => None,
                },
            })
            .collect()
    }

    /// Close every socket and cancel every task. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(runtime) = self.detach_runtime(None).await {
            runtime.shutdown().await;
            tracing::info!("Transport stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.runtime.lock().await.is_some()
    }

    /// Manual refresh. With a live runtime the poller abandons any in-flight
    /// chain and starts over; otherwise one chain runs inline.
    pub async fn refresh(&self) -> Result<(), TransportError> {
        let trigger = self
            .runtime
            .lock()
            .await
            .as_ref()
            .map(|runtime| runtime.poll_trigger.clone());
        match trigger {
            Some(trigger) => {
                trigger.notify_one();
                Ok(())
            }
            None => poll::poll_once(&self.client, &self.state, self.config.retry_policy())
                .await
                .map(|_| ()),
        }
    }

    pub async fn dismiss_error(&self) {
        self.state.clear_error().await;
    }

    /// Drop collected logs, streams and transcript. Connections stay open.
    pub async fn reset(&self) {
        self.state.reset_data().await;
    }

    pub async fn fetch_pause_state(&self) -> Result<bool, TransportError> {
        let paused = self.client.fetch_break().await?;
        self.state.apply_remote_pause(paused).await;
        Ok(paused)
    }

    fn control_channel(&self, multiplexed_kind: ChannelKind) -> ChannelKind {
        if self.config.multiplexed {
            ChannelKind::Multiplexed
        } else {
            multiplexed_kind
        }
    }

    /// Send `message` on a connected socket and wait until it is written.
    async fn send_on(&self, kind: ChannelKind, message: String) -> Result<(), TransportError> {
        if !self.state.is_connected(kind).await {
            return Err(TransportError::NotConnected(kind));
        }
        let sender = self
            .runtime
            .lock()
            .await
            .as_ref()
            .and_then(|runtime| runtime.outbound.get(&kind).cloned())
            .ok_or(TransportError::NotConnected(kind))?;

        let (outbound, written) = Outbound::new(message);
        sender
            .send(outbound)
            .map_err(|_| TransportError::NotConnected(kind))?;
        written
            .await
            .map_err(|_| TransportError::NotConnected(kind))?
    }

    /// Optimistic toggle. The intent goes over the break socket when it is
    /// open and the write succeeds; otherwise `POST /break` flips the server and `GET /break`
    /// confirms. Returns the value now shown.
    pub async fn toggle_pause(&self) -> Result<bool, TransportError> {
        let intent = self.state.toggle_local_pause().await;
        let channel = self.control_channel(ChannelKind::BreakStatus);

        if self.config.push_enabled {
            let message = encode_pause_intent(self.config.multiplexed, intent);
            match self.send_on(channel, message).await {
                Ok(()) => {
                    tracing::info!(paused = intent, "Pause intent sent");
                    return Ok(intent);
                }
                Err(e) => tracing::debug!(error = %e, "Break socket unavailable, using REST"),
            }
        }

        let confirmed = async {
            self.client.toggle_break().await?;
            self.client.fetch_break().await
        }
        .await;
        match confirmed {
            Ok(paused) => {
                self.state.apply_remote_pause(paused).await;
                self.state.clear_error_for(&self.client.url("/break")).await;
                Ok(paused)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Pause toggle failed");
                self.state.raise_error(e.to_error_state()).await;
                Err(e)
            }
        }
    }

    async fn persist_breakpoints(
        &self,
        config: BreakpointConfig,
    ) -> Result<BreakpointConfig, ControlError> {
        if let Err(e) = self.client.push_breakpoints(&config).await {
            tracing::warn!(error = %e, "Persisting breakpoints failed");
            self.state.raise_error(e.to_error_state()).await;
            return Err(e.into());
        }
        self.state
            .clear_error_for(&self.client.url("/breakpoints"))
            .await;
        Ok(config)
    }

    pub async fn set_breakpoint(
        &self,
        hook: LogLevel,
        enabled: bool,
    ) -> Result<BreakpointConfig, ControlError> {
        let config = self.state.set_breakpoint(hook, enabled).await?;
        self.persist_breakpoints(config).await
    }

    /// Validation failures are returned before any request is made.
    pub async fn set_break_after_turns(
        &self,
        input: &str,
    ) -> Result<BreakpointConfig, ControlError> {
        let config = self.state.set_break_after_turns(input).await?;
        self.persist_breakpoints(config).await
    }

    pub async fn refresh_breakpoints(&self) -> Result<BreakpointConfig, TransportError> {
        let remote = self.client.fetch_breakpoints().await?;
        self.state.apply_remote_breakpoints(remote).await;
        Ok(self.state.breakpoints().await)
    }

    pub async fn send_chat(&self, text: &str) -> Result<(), TransportError> {
        let channel = self.control_channel(ChannelKind::Chat);
        self.send_on(channel, encode_chat(self.config.multiplexed, text))
            .await?;
        self.state
            .record_chat(ChatDirection::Outbound, text.to_string())
            .await;
        Ok(())
    }

    /// Write the current preferences, including live breakpoints, to `path`
    /// or to the file the configuration was loaded from.
    pub async fn save_settings(&self, path: Option<&Path>) -> anyhow::Result<()> {
        let mut settings = self.config.settings();
        let breakpoints = self.state.breakpoints().await;
        settings.breakpoints = enabled_hooks(&breakpoints);
        settings.break_after_turns = breakpoints.break_after_turns;

        let target = path
            .map(Path::to_path_buf)
            .or_else(|| self.config.settings_path.clone())
            .ok_or_else(|| anyhow::anyhow!("No settings path configured"))?;
        settings.save(&target)
    }
}
