//! Logging and observability helpers.
//!
//! Logs go to a daily rolling JSON file; stdout belongs to the NDJSON
//! protocol and must never be written to from here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

const LOG_FILE_PREFIX: &str = "pgdesk.log";
const LOG_RETENTION_DAYS: u64 = 14;

pub fn init_tracing(config: &AppConfig) {
    let log_dir = &config.log_dir;
    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!("Failed to create log directory {}: {}", log_dir.display(), e);
    }

    // 1. Clean up old logs
    match cleanup_old_logs(log_dir, LOG_RETENTION_DAYS) {
        Ok(removed) if removed > 0 => eprintln!("Removed {} old log file(s)", removed),
        Ok(_) => {}
        Err(e) => eprintln!("Failed to clean up old logs: {}", e),
    }

    // 2. Setup file appender
    let file_appender: RollingFileAppender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let env_filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER));

    // 3. Setup subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(file_appender)
        .json()
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .try_init();

    // 4. Register panic hook
    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("PANIC: {}", s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("PANIC: {}", s)
        } else {
            "PANIC: unknown cause".to_string()
        };

        tracing::error!(target: "panic", location = %location, message = %msg, "Application panicked");
        previous_hook(panic_info);
    }));

    tracing::info!(log_dir = %log_dir.display(), filter = %config.log_filter, "Tracing initialized");
}

#[derive(Debug, Clone)]
pub struct LogExport {
    pub filename: String,
    pub content: String,
}

fn log_files(log_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with(LOG_FILE_PREFIX))
                    .unwrap_or(false)
        })
        .collect();
    files.sort_by_key(|path| path.file_name().map(|name| name.to_os_string()));
    Ok(files)
}

/// Concatenates every log file, oldest first, under a `===== name =====`
/// header each.
pub fn collect_logs(log_dir: &Path) -> Result<LogExport, String> {
    let files = log_files(log_dir)
        .map_err(|e| format!("Failed to read log directory {}: {}", log_dir.display(), e))?;
    if files.is_empty() {
        return Err("No log files found".to_string());
    }

    let mut content = String::new();
    for path in files {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unknown");
        let data = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read log file {}: {}", path.display(), e))?;

        if !content.is_empty() {
            content.push_str("\n\n");
        }
        content.push_str(&format!("===== {} =====\n", filename));
        content.push_str(&data);
    }

    let filename = format!("pgdesk-logs-{}.log", Local::now().format("%Y%m%d-%H%M%S"));
    Ok(LogExport { filename, content })
}

/// Removes log files last modified more than `retention_days` ago.
/// Returns how many were removed.
fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let retention = Duration::from_secs(retention_days * 24 * 60 * 60);
    let mut removed = 0;

    for path in log_files(log_dir)? {
        let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) else {
            continue;
        };
        let expired = now
            .duration_since(modified)
            .map(|age| age > retention)
            .unwrap_or(false);
        if !expired {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to remove old log file {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_logs_concatenates_in_name_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pgdesk.log.2026-01-02"), "second").unwrap();
        fs::write(dir.path().join("pgdesk.log.2026-01-01"), "first").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "ignored").unwrap();

        let export = collect_logs(dir.path()).unwrap();
        assert!(export.filename.starts_with("pgdesk-logs-"));
        assert!(export.filename.ends_with(".log"));

        let first = export.content.find("===== pgdesk.log.2026-01-01 =====").unwrap();
        let second = export.content.find("===== pgdesk.log.2026-01-02 =====").unwrap();
        assert!(first < second);
        assert!(!export.content.contains("ignored"));
    }

    #[test]
    fn test_collect_logs_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert_eq!(collect_logs(dir.path()).unwrap_err(), "No log files found");
        assert!(collect_logs(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_cleanup_keeps_recent_logs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pgdesk.log.2026-01-01"), "fresh").unwrap();
        fs::write(dir.path().join("notes.log"), "not ours").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS).unwrap(), 0);
        assert!(dir.path().join("pgdesk.log.2026-01-01").exists());
        assert!(dir.path().join("notes.log").exists());
    }
}
