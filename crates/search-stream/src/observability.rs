use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "search-stream.logs.jsonl";

/// Logging settings read from `SEARCH_STREAM_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    enabled: bool,
    filter: Option<String>,
    /// `(directory, file name)` of the JSONL log; console logging when unset.
    json_file: Option<(PathBuf, String)>,
}

impl LogSettings {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("SEARCH_STREAM_OBSERVABILITY_ENABLED")
            .and_then(|value| parse_bool(&value))
            .unwrap_or(true);
        let filter = lookup("SEARCH_STREAM_LOG_LEVEL").filter(|v| !v.trim().is_empty());
        let json_file = lookup("SEARCH_STREAM_JSON_LOG_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(|raw| split_log_path(PathBuf::from(raw)));
        Self {
            enabled,
            filter,
            json_file,
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        self.filter
            .as_deref()
            .and_then(|level| tracing_subscriber::EnvFilter::try_new(level).ok())
            .or_else(|| tracing_subscriber::EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info"))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_log_path(path: PathBuf) -> (PathBuf, String) {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    (dir, file_name)
}

/// Installs the process-wide `tracing` subscriber once.
///
/// Reads `SEARCH_STREAM_OBSERVABILITY_ENABLED`, `SEARCH_STREAM_LOG_LEVEL`
/// (falling back to `RUST_LOG`) and `SEARCH_STREAM_JSON_LOG_PATH`. Without a
/// log path, compact logs go to stderr.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let settings = LogSettings::from_lookup(|key| std::env::var(key).ok());
        if !settings.enabled {
            return;
        }

        let env_filter = settings.env_filter();
        match settings.json_file {
            Some((dir, file_name)) => {
                let _ = std::fs::create_dir_all(&dir);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(false)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                // stdout carries the answer text in the CLI
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
