//! State containers written by the transport manager.
//!
//! Every store here is a plain synchronous struct; [`crate::app_state`]
//! wraps them so that each mutation runs inside one critical section.

pub mod chat;
pub mod log_store;
pub mod pause;
pub mod run_tracker;
pub mod stream_buffer;

pub use chat::ChatState;
pub use log_store::LogStore;
pub use pause::{parse_turn_amount, reconcile, PauseController};
pub use run_tracker::{find_active_run, RunTracker};
pub use stream_buffer::{StreamBuffer, StreamOutcome};
