//! Accumulates streamed text fragments into completed messages.

use chrono::Utc;
use shared_types::{CompletedMessage, STREAM_START_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Text was appended to the current buffer.
    Appended,
    /// At least one message was finalized.
    Completed,
    /// Nothing changed.
    Unchanged,
}

#[derive(Debug, Default)]
pub struct StreamBuffer {
    current: String,
    history: Vec<CompletedMessage>,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment verbatim.
    ///
    /// A fragment carrying `##START##` ends the message in progress: text
    /// before the marker still belongs to it, the buffer is finalized and
    /// the remainder after the marker opens the next message.
    pub fn push_fragment(&mut self, fragment: &str) -> StreamOutcome {
        let mut outcome = StreamOutcome::Unchanged;
        let mut rest = fragment;
        while let Some((before, after)) = rest.split_once(STREAM_START_MARKER) {
            self.current.push_str(before);
            if self.finalize() {
                outcome = StreamOutcome::Completed;
            }
            rest = after;
        }
        if !rest.is_empty() {
            self.current.push_str(rest);
            if outcome == StreamOutcome::Unchanged {
                outcome = StreamOutcome::Appended;
            }
        }
        outcome
    }

    /// Close signal. Returns true when a message was recorded.
    pub fn close(&mut self) -> bool {
        self.finalize()
    }

    fn finalize(&mut self) -> bool {
        if self.current.is_empty() {
            return false;
        }
        let content = std::mem::take(&mut self.current);
        self.history.push(CompletedMessage {
            content,
            captured_at: Utc::now(),
        });
        true
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn history(&self) -> &[CompletedMessage] {
        &self.history
    }

    pub fn reset(&mut self) {
        self.current.clear();
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(buffer: &StreamBuffer) -> Vec<&str> {
        buffer.history().iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn close_finalizes_once() {
        let mut buffer = StreamBuffer::new();
        assert_eq!(buffer.push_fragment("Hello "), StreamOutcome::Appended);
        buffer.push_fragment("world");
        assert!(buffer.close());
        assert_eq!(contents(&buffer), vec!["Hello world"]);
        assert_eq!(buffer.current(), "");

        assert!(!buffer.close());
        assert_eq!(buffer.history().len(), 1);
    }

    #[test]
    fn fragments_are_kept_verbatim() {
        let mut buffer = StreamBuffer::new();
        buffer.push_fragment("  two  spaces\n");
        buffer.push_fragment("\t");
        assert_eq!(buffer.current(), "  two  spaces\n\t");
    }

    #[test]
    fn start_marker_ends_previous_message() {
        let mut buffer = StreamBuffer::new();
        buffer.push_fragment("first");
        assert_eq!(
            buffer.push_fragment(" tail##START##second"),
            StreamOutcome::Completed
        );
        assert_eq!(contents(&buffer), vec!["first tail"]);
        assert_eq!(buffer.current(), "second");
    }

    #[test]
    fn bare_start_marker_on_empty_buffer_records_nothing() {
        let mut buffer = StreamBuffer::new();
        assert_eq!(buffer.push_fragment("##START##"), StreamOutcome::Unchanged);
        assert!(buffer.history().is_empty());
        buffer.push_fragment("##START##a##START##b");
        assert_eq!(contents(&buffer), vec!["a"]);
        assert_eq!(buffer.current(), "b");
    }

    #[test]
    fn reset_drops_buffer_and_history() {
        let mut buffer = StreamBuffer::new();
        buffer.push_fragment("x");
        buffer.close();
        buffer.push_fragment("y");
        buffer.reset();
        assert!(buffer.history().is_empty());
        assert_eq!(buffer.current(), "");
    }
}
