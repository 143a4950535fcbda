use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<bool> = OnceCell::new();

const ENABLED_VAR: &str = "LLM_CLIENT_OBSERVABILITY";
const LEVEL_VAR: &str = "LLM_CLIENT_LOG_LEVEL";
const JSON_PATH_VAR: &str = "LLM_CLIENT_JSON_LOG_PATH";
const DEFAULT_JSON_FILE: &str = "llm-client.logs.jsonl";

/// Where log records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    /// Compact human-readable lines on stderr.
    Console,
    /// JSON lines appended to a file.
    JsonFile(PathBuf),
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    /// `EnvFilter` directive string.
    pub filter: String,
    pub output: LogOutput,
}

impl ObservabilityConfig {
    /// Reads `LLM_CLIENT_OBSERVABILITY`, `LLM_CLIENT_LOG_LEVEL` (then
    /// `RUST_LOG`, then `info`) and `LLM_CLIENT_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup(ENABLED_VAR)
            .map(|v| parse_bool_env(&v).unwrap_or(true))
            .unwrap_or(true);
        let filter = [LEVEL_VAR, "RUST_LOG"]
            .into_iter()
            .filter_map(&lookup)
            .find(|directive| EnvFilter::try_new(directive).is_ok())
            .unwrap_or_else(|| "info".to_string());
        let output = lookup(JSON_PATH_VAR)
            .filter(|p| !p.trim().is_empty())
            .map_or(LogOutput::Console, |p| LogOutput::JsonFile(PathBuf::from(p)));
        Self {
            enabled,
            filter,
            output,
        }
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Installs a global `tracing` subscriber configured from the environment.
///
/// Runs at most once per process; later calls return the first result. Returns
/// false when logging is disabled or another subscriber was already set. The
/// library itself never calls this.
pub fn init_observability() -> bool {
    *INIT.get_or_init(|| install(&ObservabilityConfig::from_env()))
}

fn install(config: &ObservabilityConfig) -> bool {
    if !config.enabled {
        return false;
    }
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.output {
        LogOutput::JsonFile(path) => {
            let (dir, file_name) = split_log_path(path);
            if !dir.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(&dir);
            }
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(tracing_appender::rolling::never(dir, file_name));
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
                .is_ok()
        }
        LogOutput::Console => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
                .is_ok()
        }
    }
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_JSON_FILE)
        .to_string();
    (dir, file_name)
}
