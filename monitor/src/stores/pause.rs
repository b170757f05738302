//! Pause and breakpoint controller
//!
//! Local edits are applied optimistically and tagged `Local`; values coming
//! from the debuggee are tagged `Remote` and always win. Connection loss
//! leaves the last known value in place.

use shared_types::{BreakpointConfig, LogLevel, PauseOrigin, PauseState};

use crate::error::ValidationError;

/// Decide which pause value survives.
///
/// A remote value always replaces the current one. A local value replaces
/// the current one unless it was recorded before the value it would
/// overwrite, so a stale intent cannot undo a newer confirmation.
pub fn reconcile(current: &PauseState, incoming: PauseState) -> PauseState {
    match incoming.origin {
        PauseOrigin::Remote => incoming,
        PauseOrigin::Local if incoming.recorded_at >= current.recorded_at => incoming,
        PauseOrigin::Local => current.clone(),
    }
}

/// Validate a "break after N turns" edit: ASCII digits only, strictly positive.
pub fn parse_turn_amount(input: &str) -> Result<u32, ValidationError> {
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::NotNumeric(input.to_string()));
    }
    let value = input
        .parse::<u32>()
        .map_err(|_| ValidationError::TooLarge(input.to_string()))?;
    if value == 0 {
        return Err(ValidationError::NotPositive);
    }
    Ok(value)
}

#[derive(Debug)]
pub struct PauseController {
    state: PauseState,
    breakpoints: BreakpointConfig,
}

impl PauseController {
    pub fn new(initial_paused: bool, breakpoints: BreakpointConfig) -> Self {
        Self {
            state: PauseState::local(initial_paused),
            breakpoints,
        }
    }

    pub fn state(&self) -> &PauseState {
        &self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    /// Flip the local value and return the intent to send.
    pub fn toggle(&mut self) -> bool {
        let next = !self.state.paused;
        self.state = PauseState::local(next);
        next
    }

    /// Apply a state through [`reconcile`]. Returns true when the visible
    /// value or its origin changed.
    pub fn apply(&mut self, incoming: PauseState) -> bool {
        let next = reconcile(&self.state, incoming);
        let changed = next.paused != self.state.paused || next.origin != self.state.origin;
        self.state = next;
        changed
    }

    pub fn apply_remote(&mut self, paused: bool) -> bool {
        self.apply(PauseState::remote(paused))
    }

    pub fn breakpoints(&self) -> &BreakpointConfig {
        &self.breakpoints
    }

    pub fn set_breakpoint(&mut self, hook: LogLevel, enabled: bool) -> Result<(), ValidationError> {
        if !hook.is_hook() {
            return Err(ValidationError::NotAHook(hook));
        }
        self.breakpoints.breakpoints.insert(hook, enabled);
        Ok(())
    }

    /// Validate and store a new turn amount. On error nothing changes.
    pub fn set_break_after_turns(&mut self, input: &str) -> Result<u32, ValidationError> {
        let value = parse_turn_amount(input)?;
        self.breakpoints.break_after_turns = value;
        Ok(value)
    }

    /// Overwrite with the configuration reported by the debuggee. Unknown
    /// hooks are ignored and missing hooks keep their local value.
    pub fn apply_remote_breakpoints(&mut self, remote: BreakpointConfig) -> bool {
        let before = self.breakpoints.clone();
        for (hook, enabled) in remote.breakpoints {
            if hook.is_hook() {
                self.breakpoints.breakpoints.insert(hook, enabled);
            }
        }
        if remote.break_after_turns > 0 {
            self.breakpoints.break_after_turns = remote.break_after_turns;
        }
        before != self.breakpoints
    }
}
