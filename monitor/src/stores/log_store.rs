//! Append-only log store
//!
//! Insertion order is the ordering contract: a late log with an earlier
//! timestamp still lands at the end. Callers that need chronological order
//! sort a snapshot themselves.

use std::collections::HashSet;

use shared_types::Log;

#[derive(Debug, Default)]
pub struct LogStore {
    logs: Vec<Log>,
    ids: HashSet<String>,
    latest_id: Option<String>,
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full resync. Repeated identifiers in `logs` keep their first occurrence.
    pub fn replace(&mut self, logs: Vec<Log>) {
        self.logs.clear();
        self.ids.clear();
        for log in logs {
            if self.ids.insert(log.id.clone()) {
                self.logs.push(log);
            }
        }
        self.latest_id = self.logs.last().map(|log| log.id.clone());
    }

    /// Append logs whose identifier has not been seen yet and return them.
    ///
    /// Duplicates are dropped, never merged, including duplicates inside the
    /// same batch. The cursor only moves when something was added.
    pub fn append(&mut self, logs: Vec<Log>) -> &[Log] {
        let start = self.logs.len();
        for log in logs {
            if self.ids.contains(&log.id) {
                tracing::trace!(id = %log.id, "Dropping duplicate log");
                continue;
            }
            self.ids.insert(log.id.clone());
            self.logs.push(log);
        }

        let added = &self.logs[start..];
        if let Some(last) = added.last() {
            self.latest_id = Some(last.id.clone());
        }
        added
    }

    pub fn reset(&mut self) {
        self.logs.clear();
        self.ids.clear();
        self.latest_id = None;
    }

    /// Cursor for incremental `after_id` fetches.
    pub fn latest_id(&self) -> Option<&str> {
        self.latest_id.as_deref()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}
