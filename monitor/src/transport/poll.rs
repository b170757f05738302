//! Periodic `/spans` poll with retry and manual refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::error::TransportError;
use super::rest::RestClient;
use super::retry::{retry_with_backoff, RetryPolicy};
use crate::app_state::{IngestMode, MonitorState};

/// One attempt chain: fetch after the latest id, append, then refresh the
/// pause and breakpoint state. Exhaustion leaves one error in the state.
pub async fn poll_once(
    client: &RestClient,
    state: &MonitorState,
    policy: RetryPolicy,
) -> Result<usize, TransportError> {
    let latest = state.latest_id().await;
    let after_id = latest.as_deref();
    let endpoint = client.url("/spans");

    let fetched =
        retry_with_backoff(policy, &endpoint, move || client.fetch_spans(after_id)).await;
    let spans = match fetched {
        Ok(spans) => spans,
        Err(e) => {
            tracing::error!(endpoint = %endpoint, error = %e, "Polling /spans failed");
            state.raise_error(e.to_error_state()).await;
            return Err(e);
        }
    };

    let added = state.ingest_spans(spans, IngestMode::Append).await;
    state.clear_error_for(&endpoint).await;
    if added > 0 {
        tracing::debug!(added, "Poll appended logs");
    }

    sync_control_state(client, state).await;
    Ok(added)
}

/// Best effort: servers without the control endpoints are tolerated.
pub async fn sync_control_state(client: &RestClient, state: &MonitorState) {
    match client.fetch_break().await {
        Ok(paused) => state.apply_remote_pause(paused).await,
        Err(e) => tracing::debug!(error = %e, "Pause state unavailable"),
    }
    match client.fetch_breakpoints().await {
        Ok(config) => state.apply_remote_breakpoints(config).await,
        Err(e) => tracing::debug!(error = %e, "Breakpoint configuration unavailable"),
    }
}

async fn wait_interval(interval: Option<Duration>) {
    match interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => std::future::pending().await,
    }
}

/// At most one chain is in flight. A manual trigger abandons it and starts
/// a fresh one; an abandoned chain never touches the state.
pub async fn run_poller(
    client: RestClient,
    state: MonitorState,
    policy: RetryPolicy,
    interval: Option<Duration>,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
) {
    'outer: loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = trigger.notified() => tracing::debug!("Manual refresh"),
            _ = wait_interval(interval) => {}
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'outer,
                _ = trigger.notified() => {
                    tracing::debug!("Manual refresh abandons in-flight poll");
                    continue;
                }
                _ = poll_once(&client, &state, policy) => break,
            }
        }
    }
}
