use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shared_types::{BreakpointConfig, LogLevel, DEFAULT_ENDPOINT_URL};

use crate::transport::frames::http_to_ws_url;
use crate::transport::retry::RetryPolicy;

const DEFAULT_SETTINGS_FILE: &str = "schwarm-monitor.toml";

/// Persisted user preferences, stored as TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub endpoint_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_endpoint_url: Option<String>,
    /// Zero disables periodic polling.
    pub poll_interval_ms: u64,
    pub push_enabled: bool,
    pub multiplexed: bool,
    pub stream_over_http: bool,
    pub start_paused: bool,
    /// Hooks with a breakpoint set.
    pub breakpoints: BTreeSet<LogLevel>,
    pub break_after_turns: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            ws_endpoint_url: None,
            poll_interval_ms: 5000,
            push_enabled: true,
            multiplexed: false,
            stream_over_http: false,
            start_paused: false,
            breakpoints: BTreeSet::new(),
            break_after_turns: 1,
        }
    }
}

impl Settings {
    /// Read settings from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("Failed to parse settings {}: {e}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read settings {}: {e}",
                path.display()
            )),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, raw)
            .map_err(|e| anyhow::anyhow!("Failed to write settings {}: {e}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base HTTP endpoint of the instrumented framework.
    pub endpoint_url: String,
    /// WebSocket base; derived from `endpoint_url` when absent.
    pub ws_endpoint_url: Option<String>,
    /// `None` disables the periodic `/spans` poll.
    pub poll_interval: Option<Duration>,
    /// Open the per-class WebSocket channels.
    pub push_enabled: bool,
    /// Use the single `/ws` envelope socket instead of one socket per class.
    pub multiplexed: bool,
    /// Read streams from chunked `GET /stream` and `GET /stream/tool` bodies.
    pub stream_over_http: bool,
    pub retry_base_delay_ms: u64,
    pub max_retries: u32,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    /// Request a pause as soon as the break channel opens.
    pub start_paused: bool,
    pub breakpoints: BreakpointConfig,
    /// Where [`Settings`] were loaded from and are saved to.
    pub settings_path: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_settings(Settings::default())
    }
}

impl MonitorConfig {
    /// The settings file, then `SCHWARM_*` overrides. Loading `.env` into the
    /// process environment is left to the binary.
    pub fn from_env() -> anyhow::Result<Self> {
        let settings_path = PathBuf::from(env_str("SCHWARM_SETTINGS_FILE", DEFAULT_SETTINGS_FILE));
        let settings = Settings::load(&settings_path)?;
        let mut config = Self::from_settings(settings);
        config.settings_path = Some(settings_path);

        config.endpoint_url = env_str("SCHWARM_ENDPOINT_URL", &config.endpoint_url);
        if let Ok(ws) = std::env::var("SCHWARM_WS_ENDPOINT_URL") {
            config.ws_endpoint_url = Some(ws);
        }
        let poll_ms = env_parse(
            "SCHWARM_POLL_INTERVAL_MS",
            config.poll_interval.map_or(0, |d| d.as_millis() as u64),
        )?;
        config.poll_interval = (poll_ms > 0).then(|| Duration::from_millis(poll_ms));
        config.push_enabled = env_parse("SCHWARM_PUSH_ENABLED", config.push_enabled)?;
        config.multiplexed = env_parse("SCHWARM_MULTIPLEXED", config.multiplexed)?;
        config.stream_over_http = env_parse("SCHWARM_STREAM_OVER_HTTP", config.stream_over_http)?;
        config.retry_base_delay_ms =
            env_parse("SCHWARM_RETRY_BASE_DELAY_MS", config.retry_base_delay_ms)?;
        config.max_retries = env_parse("SCHWARM_MAX_RETRIES", config.max_retries)?;
        config.reconnect_delay = Duration::from_millis(env_parse(
            "SCHWARM_RECONNECT_DELAY_MS",
            config.reconnect_delay.as_millis() as u64,
        )?);
        config.request_timeout = Duration::from_millis(env_parse(
            "SCHWARM_REQUEST_TIMEOUT_MS",
            config.request_timeout.as_millis() as u64,
        )?);
        config.start_paused = env_parse("SCHWARM_START_PAUSED", config.start_paused)?;
        if let Ok(raw) = std::env::var("SCHWARM_BREAKPOINTS") {
            let enabled = parse_hook_list(&raw)?;
            for (hook, on) in config.breakpoints.breakpoints.iter_mut() {
                *on = enabled.contains(hook);
            }
        }
        config.breakpoints.break_after_turns = env_parse(
            "SCHWARM_BREAK_AFTER_TURNS",
            config.breakpoints.break_after_turns,
        )?
        .max(1);

        Ok(config)
    }

    pub fn from_settings(settings: Settings) -> Self {
        let mut breakpoints = BreakpointConfig::default();
        for (hook, on) in breakpoints.breakpoints.iter_mut() {
            *on = settings.breakpoints.contains(hook);
        }
        breakpoints.break_after_turns = settings.break_after_turns.max(1);

        Self {
            endpoint_url: settings.endpoint_url,
            ws_endpoint_url: settings.ws_endpoint_url,
            poll_interval: (settings.poll_interval_ms > 0)
                .then(|| Duration::from_millis(settings.poll_interval_ms)),
            push_enabled: settings.push_enabled,
            multiplexed: settings.multiplexed,
            stream_over_http: settings.stream_over_http,
            retry_base_delay_ms: 1000,
            max_retries: 3,
            reconnect_delay: Duration::from_millis(2000),
            request_timeout: Duration::from_millis(10_000),
            start_paused: settings.start_paused,
            breakpoints,
            settings_path: None,
        }
    }

    /// Preferences worth persisting across sessions.
    pub fn settings(&self) -> Settings {
        Settings {
            endpoint_url: self.endpoint_url.clone(),
            ws_endpoint_url: self.ws_endpoint_url.clone(),
            poll_interval_ms: self.poll_interval.map_or(0, |d| d.as_millis() as u64),
            push_enabled: self.push_enabled,
            multiplexed: self.multiplexed,
            stream_over_http: self.stream_over_http,
            start_paused: self.start_paused,
            breakpoints: enabled_hooks(&self.breakpoints),
            break_after_turns: self.breakpoints.break_after_turns,
        }
    }

    /// Base URL with any trailing slash removed.
    pub fn http_base(&self) -> String {
        self.endpoint_url.trim_end_matches('/').to_string()
    }

    pub fn ws_base(&self) -> String {
        match &self.ws_endpoint_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => http_to_ws_url(&self.http_base()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.retry_base_delay_ms,
        }
    }
}

pub fn enabled_hooks(breakpoints: &BreakpointConfig) -> BTreeSet<LogLevel> {
    breakpoints
        .breakpoints
        .iter()
        .filter(|(_, on)| **on)
        .map(|(hook, _)| *hook)
        .collect()
}

/// Parse a comma-separated list of hook names such as `START_TURN,HANDOFF`.
pub fn parse_hook_list(raw: &str) -> anyhow::Result<BTreeSet<LogLevel>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            LogLevel::from_event_type(&name.to_ascii_uppercase())
                .ok_or_else(|| anyhow::anyhow!("Unknown breakpoint hook '{name}'"))
        })
        .collect()
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}
