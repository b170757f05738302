use chrono::Utc;
use shared_types::{ChatDirection, ChatEntry};

/// Chat-status flag plus the transcript exchanged over the chat channel.
#[derive(Debug, Default)]
pub struct ChatState {
    requested: bool,
    transcript: Vec<ChatEntry>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the flag flipped.
    pub fn set_requested(&mut self, requested: bool) -> bool {
        let changed = self.requested != requested;
        self.requested = requested;
        changed
    }

    pub fn record(&mut self, direction: ChatDirection, text: impl Into<String>) {
        self.transcript.push(ChatEntry {
            direction,
            text: text.into(),
            at: Utc::now(),
        });
    }

    pub fn requested(&self) -> bool {
        self.requested
    }

    pub fn transcript(&self) -> &[ChatEntry] {
        &self.transcript
    }

    pub fn reset(&mut self) {
        self.transcript.clear();
    }
}
