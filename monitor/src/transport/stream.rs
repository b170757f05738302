//! Chunked HTTP stream reader for `GET /stream` and `GET /stream/tool`.

use std::time::Duration;

use futures_util::StreamExt;
use shared_types::ChannelKind;
use tokio_util::sync::CancellationToken;

use super::rest::RestClient;
use crate::app_state::{MonitorState, StreamTarget};

/// Decode as much of `carry` as forms complete UTF-8, leaving a split
/// multi-byte sequence in place for the next chunk. Invalid bytes become
/// U+FFFD.
pub fn drain_utf8(carry: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(carry) {
            Ok(text) => {
                out.push_str(text);
                carry.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                match e.error_len() {
                    Some(bad) => {
                        out.push_str(&String::from_utf8_lossy(&carry[..valid + bad]));
                        carry.drain(..valid + bad);
                    }
                    None => {
                        out.push_str(&String::from_utf8_lossy(&carry[..valid]));
                        carry.drain(..valid);
                        return out;
                    }
                }
            }
        }
    }
}

pub async fn run_http_stream(
    client: RestClient,
    kind: ChannelKind,
    target: StreamTarget,
    state: MonitorState,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.open_stream(kind) => result,
        };

        match opened {
            Ok(response) => {
                tracing::info!(channel = %kind, "Stream opened");
                state.set_connected(kind, true).await;
                let mut body = response.bytes_stream();
                let mut carry = Vec::new();
                let shutdown = loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break true,
                        chunk = body.next() => match chunk {
                            Some(Ok(bytes)) => {
                                carry.extend_from_slice(&bytes);
                                let text = drain_utf8(&mut carry);
                                if !text.is_empty() {
                                    state.stream_fragment(target, &text).await;
                                }
                            }
                            Some(Err(e)) => {
                                tracing::warn!(channel = %kind, error = %e, "Stream read failed");
                                break false;
                            }
                            None => {
                                state.stream_close(target).await;
                                break false;
                            }
                        },
                    }
                };
                state.set_connected(kind, false).await;
                if shutdown {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(channel = %kind, error = %e, "Stream open failed, retrying");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_multibyte_sequence_waits_for_next_chunk() {
        let bytes = "héllo".as_bytes();
        let mut carry = bytes[..2].to_vec();
        assert_eq!(drain_utf8(&mut carry), "h");
        assert_eq!(carry.len(), 1);
        carry.extend_from_slice(&bytes[2..]);
        assert_eq!(drain_utf8(&mut carry), "éllo");
        assert!(carry.is_empty());
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        let mut carry = vec![b'a', 0xff, b'b'];
        assert_eq!(drain_utf8(&mut carry), "a\u{fffd}b");
        assert!(carry.is_empty());
    }
}
