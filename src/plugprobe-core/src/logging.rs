use crate::config::{LogLevel, LoggingConfig};
use crate::paths::AppDirs;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILE: &str = "plugprobe.log";

/// Flushes the background log writer when dropped; hold it for the life of
/// the program.
pub struct LoggingGuard {
    _worker: WorkerGuard,
    log_dir: PathBuf,
    file_prefix: String,
}

impl LoggingGuard {
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Rolled files are named `<prefix>.<YYYY-MM-DD>`.
    pub fn file_prefix(&self) -> &str {
        &self.file_prefix
    }
}

/// Install the global subscriber: a daily rolling file under the log dir,
/// plus stdout when `logging.stdout` is set. `RUST_LOG` overrides the
/// configured level.
pub fn init_logging(config: &LoggingConfig, dirs: &AppDirs) -> Result<LoggingGuard, LoggingError> {
    let log_dir = dirs.log_dir();
    fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDirectory {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let file_prefix = config.file_name.as_deref().unwrap_or(DEFAULT_LOG_FILE);
    let pruned = prune_rotated_logs(log_dir, file_prefix, config.max_log_files.max(1))?;
    let (file, worker) = tracing_appender::non_blocking(rolling::daily(log_dir, file_prefix));

    let builder = fmt()
        .with_env_filter(level_filter(config.level)?)
        .with_target(false)
        .with_thread_names(true)
        .with_ansi(false);
    let installed = if config.stdout {
        builder.with_writer(file.and(io::stdout)).try_init()
    } else {
        builder.with_writer(file).try_init()
    };
    installed.map_err(LoggingError::SubscriberInstall)?;

    if pruned > 0 {
        tracing::debug!(pruned, dir = %log_dir.display(), "Removed old log files");
    }
    Ok(LoggingGuard {
        _worker: worker,
        log_dir: log_dir.to_path_buf(),
        file_prefix: file_prefix.to_string(),
    })
}

fn level_filter(level: LogLevel) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = level.as_filter_directive();
    EnvFilter::try_new(directive).map_err(|source| LoggingError::ParseLevel {
        level: directive.to_string(),
        source,
    })
}

/// Keep the `keep` most recently modified files starting with `prefix`.
/// Returns how many were removed.
fn prune_rotated_logs(dir: &Path, prefix: &str, keep: usize) -> Result<usize, LoggingError> {
    let listing = fs::read_dir(dir).map_err(|source| LoggingError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut rotated: Vec<(SystemTime, PathBuf)> = listing
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(prefix))
        })
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|meta| meta.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .collect();

    // Newest first.
    rotated.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    let stale = rotated.split_off(keep.min(rotated.len()));
    for (_, path) in &stale {
        fs::remove_file(path).map_err(|source| LoggingError::Cleanup {
            path: path.clone(),
            source,
        })?;
    }
    Ok(stale.len())
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse log level {level}: {source}")]
    ParseLevel {
        level: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInstall(Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to list log directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to remove old log file {path}: {source}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn touch(dir: &Path, name: &str, age_secs: u64) {
        let file = fs::File::create(dir.join(name)).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn filter_directive_is_lowercase() {
        assert_eq!(LogLevel::Warn.as_filter_directive(), "warn");
    }

    #[test]
    fn pruning_keeps_the_newest_rotated_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "plugprobe.log.2026-01-01", 30);
        touch(dir.path(), "plugprobe.log.2026-01-02", 20);
        touch(dir.path(), "plugprobe.log.2026-01-03", 10);
        touch(dir.path(), "unrelated.txt", 40);

        let removed = prune_rotated_logs(dir.path(), "plugprobe.log", 2).unwrap();

        assert_eq!(removed, 1);
        assert_eq!(
            names(dir.path()),
            vec![
                "plugprobe.log.2026-01-02",
                "plugprobe.log.2026-01-03",
                "unrelated.txt",
            ]
        );
    }

    #[test]
    fn pruning_under_the_limit_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "debug.log.2026-01-01", 5);
        touch(dir.path(), "plugprobe.log.2026-01-01", 5);

        assert_eq!(prune_rotated_logs(dir.path(), "debug.log", 3).unwrap(), 0);
        assert_eq!(names(dir.path()).len(), 2);
    }
}
