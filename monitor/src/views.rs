//! Read-only projections over log snapshots for the dashboard views.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use chrono::DateTime;
use shared_types::{DashboardSummary, Log, LogLevel};

const TOKEN_COUNTER_KEY: &str = "message.info.token_counter";
const COMPLETION_COST_KEY: &str = "message.info.completion_cost";
const INSTRUCTION_KEY: &str = "instruction";

/// Levels shown in the message-flow view.
pub const FLOW_LEVELS: [LogLevel; 4] = [
    LogLevel::StartTurn,
    LogLevel::Instruct,
    LogLevel::MessageCompletion,
    LogLevel::ToolExecution,
];

fn numeric_attribute(log: &Log, key: &str) -> Option<f64> {
    match log.attributes.get(key)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn summarize(logs: &[Log]) -> DashboardSummary {
    let mut agents = HashSet::new();
    let mut summary = DashboardSummary::default();

    for log in logs {
        agents.insert(log.agent.as_str());
        summary.total_events += 1;

        if log.level == LogLevel::PostMessageCompletion {
            summary.token_usage += numeric_attribute(log, TOKEN_COUNTER_KEY).unwrap_or(0.0);
            summary.cost += numeric_attribute(log, COMPLETION_COST_KEY).unwrap_or(0.0);
        }
    }

    summary.active_agents = agents.len();
    summary.latest_instruction = logs
        .iter()
        .rev()
        .find(|log| log.level == LogLevel::MessageCompletion)
        .and_then(|log| log.attributes.get(INSTRUCTION_KEY))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    summary
}

fn timestamp_millis(log: &Log) -> Option<i64> {
    DateTime::parse_from_rfc3339(&log.timestamp)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Logs relevant to the conversation view, oldest first.
pub fn message_flow(logs: &[Log]) -> Vec<Log> {
    let mut flow: Vec<Log> = logs
        .iter()
        .filter(|log| FLOW_LEVELS.contains(&log.level))
        .cloned()
        .collect();
    flow.sort_by_key(timestamp_millis);
    flow
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Timestamp,
    Level,
    Agent,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Search, level filter and sort applied by the log table.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Case-insensitive substring matched against agent and message.
    pub search: String,
    /// Empty means every level.
    pub levels: BTreeSet<LogLevel>,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
}

impl LogQuery {
    pub fn matches(&self, log: &Log) -> bool {
        let matches_search = self.search.is_empty() || {
            let needle = self.search.to_lowercase();
            log.agent.to_lowercase().contains(&needle)
                || log.message.to_lowercase().contains(&needle)
        };
        let matches_level = self.levels.is_empty() || self.levels.contains(&log.level);
        matches_search && matches_level
    }

    fn compare(&self, a: &Log, b: &Log) -> Ordering {
        let ordering = match self.sort_field {
            SortField::Timestamp => timestamp_millis(a).cmp(&timestamp_millis(b)),
            SortField::Level => a.level.as_str().cmp(b.level.as_str()),
            SortField::Agent => a.agent.cmp(&b.agent),
            SortField::Message => a.message.cmp(&b.message),
        };
        match self.sort_direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }

    pub fn apply(&self, logs: &[Log]) -> Vec<Log> {
        let mut selected: Vec<Log> = logs.iter().filter(|log| self.matches(log)).cloned().collect();
        selected.sort_by(|a, b| self.compare(a, b));
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log(id: &str, agent: &str, level: LogLevel, ts: &str, attrs: serde_json::Value) -> Log {
        Log {
            id: id.to_string(),
            timestamp: ts.to_string(),
            parent_id: String::new(),
            run_id: String::new(),
            level,
            agent: agent.to_string(),
            message: format!("Agent {agent} activity"),
            attributes: attrs.as_object().cloned().unwrap_or_default(),
        }
    }

    fn sample() -> Vec<Log> {
        vec![
            log("1", "System", LogLevel::Info, "2024-01-01T00:00:03.000Z", json!({})),
            log(
                "2",
                "Alice",
                LogLevel::PostMessageCompletion,
                "2024-01-01T00:00:01.000Z",
                json!({"message.info.token_counter": 120, "message.info.completion_cost": "0.5"}),
            ),
            log(
                "3",
                "Bob",
                LogLevel::PostMessageCompletion,
                "2024-01-01T00:00:02.000Z",
                json!({"message.info.token_counter": "30", "message.info.completion_cost": null}),
            ),
            log(
                "4",
                "Alice",
                LogLevel::MessageCompletion,
                "2024-01-01T00:00:04.000Z",
                json!({"instruction": "Be helpful"}),
            ),
        ]
    }

    #[test]
    fn summary_aggregates_tokens_cost_and_agents() {
        let summary = summarize(&sample());
        assert_eq!(summary.active_agents, 3);
        assert_eq!(summary.total_events, 4);
        assert_eq!(summary.token_usage, 150.0);
        assert_eq!(summary.cost, 0.5);
        assert_eq!(summary.latest_instruction.as_deref(), Some("Be helpful"));
    }

    #[test]
    fn summary_of_nothing_is_zero() {
        assert_eq!(summarize(&[]), DashboardSummary::default());
    }

    #[test]
    fn query_filters_by_search_and_level() {
        let query = LogQuery {
            search: "alice".to_string(),
            levels: [LogLevel::MessageCompletion].into_iter().collect(),
            ..LogQuery::default()
        };
        let ids: Vec<_> = query.apply(&sample()).into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["4"]);
    }

    #[test]
    fn default_query_sorts_newest_first() {
        let ids: Vec<_> = LogQuery::default()
            .apply(&sample())
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(ids, vec!["4", "1", "3", "2"]);
    }

    #[test]
    fn sort_by_agent_ascending() {
        let query = LogQuery {
            sort_field: SortField::Agent,
            sort_direction: SortDirection::Asc,
            ..LogQuery::default()
        };
        let agents: Vec<_> = query.apply(&sample()).into_iter().map(|l| l.agent).collect();
        assert_eq!(agents, vec!["Alice", "Alice", "Bob", "System"]);
    }

    #[test]
    fn message_flow_is_chronological_subset() {
        let mut logs = sample();
        logs.push(log("5", "Bob", LogLevel::StartTurn, "2024-01-01T00:00:00.500Z", json!({})));
        let ids: Vec<_> = message_flow(&logs).into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["5", "4"]);
    }
}
