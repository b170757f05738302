use std::path::{Path, PathBuf};

use monitor::{MonitorConfig, StateChange, TransportManager};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "info";

/// Nearest `.env` in `start` or one of its ancestors.
fn find_env_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(".env"))
        .find(|candidate| candidate.is_file())
}

/// Outcome of the `.env` lookup, reported once tracing is up.
enum EnvFile {
    Loaded(PathBuf),
    Failed(PathBuf, dotenvy::Error),
    Missing,
    NoCwd(std::io::Error),
}

fn load_env_file() -> EnvFile {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => return EnvFile::NoCwd(e),
    };
    match find_env_file(&cwd) {
        Some(path) => match dotenvy::from_path(&path) {
            Ok(()) => EnvFile::Loaded(path),
            Err(e) => EnvFile::Failed(path, e),
        },
        None => EnvFile::Missing,
    }
}

fn report_env_file(outcome: &EnvFile) {
    match outcome {
        EnvFile::Loaded(path) => info!(path = %path.display(), "Loaded environment from .env"),
        EnvFile::Failed(path, e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to load .env file"
        ),
        EnvFile::Missing => tracing::debug!("No .env file found; using process environment only"),
        EnvFile::NoCwd(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup")
        }
    }
}

fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn init_tracing() {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(directives.as_deref());
    let json = std::env::var("SCHWARM_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn log_change(change: &StateChange) {
    match change {
        StateChange::LogsAppended { added, latest_id } => {
            info!(added, latest_id = ?latest_id, "Logs appended")
        }
        StateChange::LogsReplaced { total } => info!(total, "Logs replaced"),
        StateChange::ActiveRunChanged(run) => info!(run = ?run, "Active run changed"),
        StateChange::PauseChanged(state) => info!(
            paused = state.paused,
            origin = ?state.origin,
            "Pause state changed"
        ),
        StateChange::BreakpointsChanged(config) => info!(
            break_after_turns = config.break_after_turns,
            enabled = ?monitor::config::enabled_hooks(config),
            "Breakpoints changed"
        ),
        StateChange::StreamUpdated(_) => {}
        StateChange::MessageCompleted(target) => info!(target = ?target, "Streamed message completed"),
        StateChange::ChatRequested(requested) => info!(requested, "Chat status changed"),
        StateChange::ChatMessage(entry) => info!(
            direction = ?entry.direction,
            text = %entry.text,
            "Chat message"
        ),
        StateChange::ConnectionChanged { channel, connected } => {
            info!(channel = %channel, connected, "Connection changed")
        }
        StateChange::ErrorRaised(error) => tracing::error!(
            category = ?error.category,
            endpoint = %error.endpoint,
            "{}",
            error.detail
        ),
        StateChange::ErrorCleared => info!("Error cleared"),
        StateChange::Reset => info!("State reset"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` may set RUST_LOG and SCHWARM_LOG_FORMAT, so it loads first.
    let env_file = load_env_file();
    init_tracing();
    report_env_file(&env_file);

    let config = MonitorConfig::from_env()?;
    info!(
        endpoint = %config.endpoint_url,
        push = config.push_enabled,
        multiplexed = config.multiplexed,
        poll_ms = ?config.poll_interval.map(|d| d.as_millis()),
        "Schwarm monitor starting"
    );

    let manager = TransportManager::from_config(config)?;
    let mut changes = manager.state().subscribe();
    manager.initialize().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
            change = changes.recv() => match change {
                Ok(change) => log_change(&change),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "State change observer lagged")
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Shutting down");
    manager.shutdown().await;
    let summary = manager.state().summary().await;
    info!(
        agents = summary.active_agents,
        events = summary.total_events,
        tokens = summary.token_usage,
        cost = summary.cost,
        "Session summary"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_file_is_found_in_an_ancestor() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join(".env"), "SCHWARM_PUSH_ENABLED=false\n").unwrap();

        assert_eq!(find_env_file(&nested), Some(root.path().join(".env")));
    }

    #[test]
    fn nearest_env_file_wins() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join(".env"), "").unwrap();
        std::fs::write(nested.join(".env"), "").unwrap();

        assert_eq!(find_env_file(&nested), Some(nested.join(".env")));
    }

    #[test]
    fn log_filter_defaults_to_info() {
        assert_eq!(log_filter(None).to_string(), "info");
        assert_eq!(log_filter(Some("monitor=debug")).to_string(), "monitor=debug");
    }
}
