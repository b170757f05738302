//! Schwarm monitor - telemetry ingestion and live-state reconciliation
//!
//! This crate turns the spans emitted by an instrumented agent framework
//! into a deduplicated, normalized log, tracks the active run, mirrors the
//! debuggee's pause and breakpoint state and assembles streamed output.
//! Delivery happens over REST polling, per-class WebSockets, a multiplexed
//! WebSocket or chunked HTTP streams, all owned by [`TransportManager`].

pub mod app_state;
pub mod config;
pub mod error;
pub mod normalize;
pub mod stores;
pub mod transport;
pub mod views;

pub use app_state::{IngestMode, MonitorState, StateChange, StreamTarget};
pub use config::{MonitorConfig, Settings};
pub use error::{ControlError, TransportError, ValidationError};
pub use transport::TransportManager;
pub use views::{LogQuery, SortDirection, SortField};
