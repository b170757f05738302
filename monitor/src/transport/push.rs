//! One reconnecting WebSocket per message class.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use shared_types::ChannelKind;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::dispatch::apply_push_event;
use super::error::TransportError;
use super::frames::parse_frame;
use crate::app_state::MonitorState;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone)]
pub struct PushChannel {
    pub kind: ChannelKind,
    pub url: String,
    pub reconnect_delay: Duration,
    /// Sent once, right after the first successful connect.
    pub greeting: Option<String>,
}

/// A text frame queued for a push socket. `written` resolves once the frame
/// reached the socket, or with `NotConnected` when it was dropped.
#[derive(Debug)]
pub struct Outbound {
    pub text: String,
    written: oneshot::Sender<Result<(), TransportError>>,
}

impl Outbound {
    pub fn new(text: impl Into<String>) -> (Self, oneshot::Receiver<Result<(), TransportError>>) {
        let (written, ack) = oneshot::channel();
        (
            Self {
                text: text.into(),
                written,
            },
            ack,
        )
    }

    fn resolve(self, result: Result<(), TransportError>) {
        // The sender may have given up waiting.
        let _ = self.written.send(result);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelExit {
    Shutdown,
    Closed,
}

pub async fn run_push_channel(
    channel: PushChannel,
    state: MonitorState,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
) {
    let kind = channel.kind;
    let mut greeting = channel.greeting.clone();
    let mut outbound_open = true;

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(channel.url.as_str()) => result,
        };

        match connected {
            Ok((socket, _)) => {
                tracing::info!(channel = %kind, url = %channel.url, "Push channel connected");
                state.set_connected(kind, true).await;
                let exit = pump(
                    kind,
                    socket,
                    &state,
                    greeting.take(),
                    &mut outbound,
                    &mut outbound_open,
                    &cancel,
                )
                .await;
                state.set_connected(kind, false).await;
                if exit == ChannelExit::Shutdown {
                    tracing::info!(channel = %kind, "Push channel closed");
                    break;
                }
                tracing::warn!(
                    channel = %kind,
                    delay_ms = channel.reconnect_delay.as_millis() as u64,
                    "Push channel dropped, reconnecting"
                );
            }
            Err(e) => {
                tracing::warn!(
                    channel = %kind,
                    url = %channel.url,
                    error = %e,
                    delay_ms = channel.reconnect_delay.as_millis() as u64,
                    "Push channel connect failed, retrying"
                );
            }
        }

        let sleep = tokio::time::sleep(channel.reconnect_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = &mut sleep => break,
                msg = outbound.recv(), if outbound_open => match msg {
                    Some(message) => {
                        tracing::warn!(channel = %kind, "Dropping outbound message while disconnected");
                        message.resolve(Err(TransportError::NotConnected(kind)));
                    }
                    None => outbound_open = false,
                },
            }
        }
    }
}

async fn pump(
    kind: ChannelKind,
    socket: Socket,
    state: &MonitorState,
    greeting: Option<String>,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    outbound_open: &mut bool,
    cancel: &CancellationToken,
) -> ChannelExit {
    let (mut sink, mut stream) = socket.split();

    if let Some(greeting) = greeting {
        if let Err(e) = sink.send(Message::Text(greeting)).await {
            tracing::warn!(channel = %kind, error = %e, "Failed to send greeting");
            return ChannelExit::Closed;
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                return ChannelExit::Shutdown;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_text(kind, state, &text).await,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => handle_text(kind, state, &text).await,
                    Err(_) => tracing::warn!(channel = %kind, "Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(channel = %kind, frame = ?frame, "Peer closed push channel");
                    return ChannelExit::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(channel = %kind, error = %e, "Push channel receive error");
                    return ChannelExit::Closed;
                }
                None => return ChannelExit::Closed,
            },
            msg = outbound.recv(), if *outbound_open => match msg {
                Some(message) => {
                    let text = message.text.clone();
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::warn!(channel = %kind, error = %e, "Push channel send error");
                        message.resolve(Err(TransportError::NotConnected(kind)));
                        return ChannelExit::Closed;
                    }
                    message.resolve(Ok(()));
                }
                None => *outbound_open = false,
            },
        }
    }
}

async fn handle_text(kind: ChannelKind, state: &MonitorState, text: &str) {
    match parse_frame(kind, text) {
        Ok(event) => {
            tracing::debug!(channel = %kind, event = ?event, "Push frame");
            apply_push_event(state, kind.path(), event).await;
        }
        Err(e) => {
            tracing::warn!(channel = %kind, error = %e, "Dropping push frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::BreakpointConfig;

    #[tokio::test]
    async fn message_queued_while_down_is_rejected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, rx) = mpsc::unbounded_channel();
        let (message, ack) = Outbound::new("hello");
        tx.send(message).unwrap();

        let cancel = CancellationToken::new();
        let channel = PushChannel {
            kind: ChannelKind::Chat,
            url: format!("ws://{addr}/ws/chat"),
            reconnect_delay: Duration::from_millis(20),
            greeting: None,
        };
        let state = MonitorState::new(false, BreakpointConfig::default());
        let task = tokio::spawn(run_push_channel(channel, state.clone(), rx, cancel.clone()));

        let result = tokio::time::timeout(Duration::from_secs(5), ack)
            .await
            .expect("ack in time")
            .expect("ack sent");
        assert!(matches!(
            result,
            Err(TransportError::NotConnected(ChannelKind::Chat))
        ));
        assert!(!state.is_connected(ChannelKind::Chat).await);

        cancel.cancel();
        task.await.unwrap();
    }
}
