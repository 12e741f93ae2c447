// SPDX-License-Identifier: Apache-2.0

//! Diagnostic logging for the preload library.
//!
//! This is the channel audit failures are reported on. It never writes to
//! the audit store itself.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use sqlaudit_core::AuditConfig;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_PREFIX: &str = "sqlaudit.log";

/// Installs the global subscriber unless the host already has one.
pub fn init_tracing(config: &AuditConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("sqlaudit_preload=info,sqlaudit_core=info"));

    let Some(log_dir) = config.log_dir.as_deref() else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_thread_ids(true)
            .with_target(true)
            .compact()
            .try_init();
        return;
    };

    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!("sqlaudit: cannot create log directory {:?}: {}", log_dir, e);
    }

    if let Err(e) = cleanup_old_logs(log_dir, config.log_retention_days) {
        eprintln!("sqlaudit: failed to clean up old logs: {}", e);
    }

    let file_appender: RollingFileAppender =
        tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(file_appender)
        .json()
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .try_init();

    tracing::info!("Tracing initialized. Logs directory: {:?}", log_dir);
}

/// Removes rolled log files whose last modification is older than the window.
///
/// Returns how many files were removed.
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let retention = Duration::from_secs(retention_days * 24 * 60 * 60);
    let mut removed = 0;

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();

        let is_ours = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(LOG_FILE_PREFIX))
            .unwrap_or(false);
        if !is_ours || !path.is_file() {
            continue;
        }

        let age = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());

        if matches!(age, Some(age) if age > retention) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("sqlaudit: failed to remove old log file {:?}: {}", path, e),
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn age(path: &Path, days: u64) {
        let file = File::options().write(true).open(path).unwrap();
        let when = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
        file.set_modified(when).unwrap();
    }

    #[test]
    fn test_cleanup_removes_only_expired_log_files() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join("sqlaudit.log.2026-01-01");
        let fresh = dir.path().join("sqlaudit.log.2026-10-16");
        let foreign = dir.path().join("other.log");

        for path in [&stale, &fresh, &foreign] {
            fs::write(path, "{}\n").unwrap();
        }
        age(&stale, 30);
        age(&foreign, 30);

        let removed = cleanup_old_logs(dir.path(), 14).unwrap();

        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(foreign.exists());
    }

    #[test]
    fn test_cleanup_missing_directory_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(cleanup_old_logs(&dir.path().join("absent"), 14).is_err());
    }
}
