use shared_types::Log;

/// Identifier of the most recent root entry (empty `parent_id`), scanning
/// from the end.
pub fn find_active_run(logs: &[Log]) -> Option<&str> {
    logs.iter()
        .rev()
        .find(|log| log.is_root())
        .map(|log| log.id.as_str())
}

/// Tracks the active run across incremental batches.
///
/// Known limitation: with several runs interleaving, the most recent root
/// wins and the active run can flip mid-session.
#[derive(Debug, Default)]
pub struct RunTracker {
    active_run: Option<String>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the newly arrived subset. Returns true when the active run changed.
    pub fn observe(&mut self, arrived: &[Log]) -> bool {
        match find_active_run(arrived) {
            Some(id) if self.active_run.as_deref() != Some(id) => {
                self.active_run = Some(id.to_string());
                true
            }
            _ => false,
        }
    }

    /// Recompute from a complete log set after a full resync.
    pub fn rebuild(&mut self, all: &[Log]) -> bool {
        let next = find_active_run(all).map(str::to_string);
        let changed = next != self.active_run;
        self.active_run = next;
        changed
    }

    pub fn reset(&mut self) {
        self.active_run = None;
    }

    pub fn active_run(&self) -> Option<&str> {
        self.active_run.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::LogLevel;

    fn log(id: &str, parent: &str) -> Log {
        Log {
            id: id.to_string(),
            timestamp: String::new(),
            parent_id: parent.to_string(),
            run_id: String::new(),
            level: LogLevel::Info,
            agent: String::new(),
            message: String::new(),
            attributes: Default::default(),
        }
    }

    #[test]
    fn returns_most_recent_root() {
        let logs = vec![log("r1", ""), log("c1", "r1"), log("r2", ""), log("c2", "r2")];
        assert_eq!(find_active_run(&logs), Some("r2"));
    }

    #[test]
    fn none_without_roots() {
        let logs = vec![log("c1", "r1"), log("c2", "r1")];
        assert_eq!(find_active_run(&logs), None);
        assert_eq!(find_active_run(&[]), None);
    }

    #[test]
    fn subset_without_root_keeps_active_run() {
        let mut tracker = RunTracker::new();
        assert!(tracker.observe(&[log("r1", "")]));
        assert!(!tracker.observe(&[log("c1", "r1")]));
        assert_eq!(tracker.active_run(), Some("r1"));

        assert!(tracker.observe(&[log("c2", "r1"), log("r2", "")]));
        assert_eq!(tracker.active_run(), Some("r2"));
    }

    #[test]
    fn rebuild_and_reset() {
        let mut tracker = RunTracker::new();
        tracker.observe(&[log("r1", "")]);
        assert!(tracker.rebuild(&[log("c1", "x")]));
        assert_eq!(tracker.active_run(), None);

        tracker.observe(&[log("r3", "")]);
        tracker.reset();
        assert_eq!(tracker.active_run(), None);
    }
}
