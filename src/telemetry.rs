//! Structured logging for hosts embedding the billing core.
//!
//! Console + rolling daily file output, with a pruning pass so the log
//! directory does not grow without bound. Hosts call [`init`] once at
//! startup and hold the returned guard for the lifetime of the process;
//! dropping it flushes the file appender.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Maximum number of rolled log files kept on disk.
const MAX_LOG_FILES: usize = 14;

/// Prefix for rolled log file names.
const LOG_FILE_PREFIX: &str = "billing";

/// Per-OS data directory for the console's log files.
pub fn log_dir(app_dir_name: &str) -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(app_dir_name).join("logs")
}

/// Prune old log files, keeping only the most recent [`MAX_LOG_FILES`].
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if name.starts_with(LOG_FILE_PREFIX) {
                        let modified = entry
                            .metadata()
                            .ok()
                            .and_then(|m| m.modified().ok())
                            .unwrap_or(std::time::UNIX_EPOCH);
                        log_files.push((path, modified));
                    }
                }
            }
        }
    }

    // Sort newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

/// Initialize structured logging (console + rolling daily file).
///
/// `app_dir_name` is the per-OS data directory name, e.g.
/// `"app.fielddesk.console"`. Returns the appender guard; keep it alive for
/// the lifetime of the host process.
pub fn init(app_dir_name: &str) -> anyhow::Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fielddesk_billing=debug"));

    let dir = log_dir(app_dir_name);
    prune_old_logs(&dir);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_ends_with_app_and_logs() {
        let dir = log_dir("app.fielddesk.console");
        assert!(dir.ends_with(Path::new("app.fielddesk.console").join("logs")));
    }

    #[test]
    fn test_prune_keeps_at_most_the_retention_count() {
        let dir = std::env::temp_dir().join(format!(
            "fielddesk-billing-prune-test-{}",
            uuid::Uuid::new_v4()
        ));
        fs::create_dir_all(&dir).expect("create temp log dir");

        for i in 0..MAX_LOG_FILES + 6 {
            fs::write(dir.join(format!("{LOG_FILE_PREFIX}.2026-01-{i:02}")), b"x")
                .expect("write log file");
        }
        // Unrelated files are left alone.
        fs::write(dir.join("notes.txt"), b"keep me").expect("write unrelated file");

        prune_old_logs(&dir);

        let remaining = fs::read_dir(&dir)
            .expect("read temp log dir")
            .flatten()
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with(LOG_FILE_PREFIX)
            })
            .count();
        assert_eq!(remaining, MAX_LOG_FILES);
        assert!(dir.join("notes.txt").exists());

        fs::remove_dir_all(&dir).expect("cleanup temp log dir");
    }

    #[test]
    fn test_prune_missing_dir_is_a_noop() {
        prune_old_logs(Path::new("/nonexistent/fielddesk-billing-logs"));
    }
}
