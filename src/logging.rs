use crate::config::LoggingConfig;
use anyhow::Result;
use chrono::{Days, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{
    fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

const LOG_FILE_PREFIX: &str = "morphik";
const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Dependencies whose per-request chatter would drown out the service's own
/// query/agent logs. Capped at warn regardless of the configured level.
const QUIET_TARGETS: &[&str] = &["axum", "tower_http", "hyper", "hyper_util", "reqwest", "mio"];

/// Initialise tracing for the server: compact stdout output plus a daily
/// rolling log file. The returned guard owns the file writer's flush
/// thread; hold it for the lifetime of the process.
pub fn init(config: &LoggingConfig) -> Result<(WorkerGuard, PathBuf)> {
    let dir = log_directory(config)?;
    let retention_days = config.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS).max(1);
    prune_stale_logs(&dir, retention_days);

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX));
    let timer = ChronoUtc::new("%Y-%m-%dT%H:%M:%S".to_string());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_timer(timer.clone())
        .with_target(false)
        .with_file(true)
        .with_line_number(true);
    let file_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_timer(timer)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(filter_from(config.level.as_deref()))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing already initialised: {e}"))?;

    Ok((guard, dir))
}

/// An explicit config level pins the service level and overrides RUST_LOG;
/// otherwise RUST_LOG wins, with info as the default.
fn filter_from(level: Option<&str>) -> EnvFilter {
    let mut filter = match level {
        Some(level) => EnvFilter::try_new(format!("morphik={level}"))
            .unwrap_or_else(|_| EnvFilter::new("morphik=info")),
        None => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("morphik=info"))
        }
    };
    for target in QUIET_TARGETS {
        if let Ok(directive) = format!("{target}=warn").parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

fn log_directory(config: &LoggingConfig) -> Result<PathBuf> {
    let dir = match &config.directory {
        Some(configured) => PathBuf::from(configured),
        None => dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".local/share")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("morphik")
            .join("logs"),
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Rolling files are named `morphik.YYYY-MM-DD`. Retention goes by the date
/// in the filename, not mtime, so copied or touched files cannot outlive
/// the window.
fn prune_stale_logs(dir: &Path, retention_days: u64) {
    let Some(cutoff) = Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(retention_days))
    else {
        return;
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(stamp) = name
            .to_str()
            .and_then(|n| n.strip_prefix(LOG_FILE_PREFIX))
            .and_then(|n| n.strip_prefix('.'))
        else {
            continue;
        };
        if let Ok(date) = NaiveDate::parse_from_str(stamp, "%Y-%m-%d") {
            if date < cutoff {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    eprintln!("Failed to remove old log file {:?}: {e}", entry.path());
                }
            }
        }
    }
}
