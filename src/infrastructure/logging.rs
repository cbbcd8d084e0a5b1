//! Tracing subscriber setup.

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use super::config::LogLevel;

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. When `log_path` is set, events
/// are appended to that file without ANSI colours; otherwise only the filter
/// is installed and a host application can add its own layers.
///
/// # Errors
///
/// Fails if the log file cannot be opened or a global subscriber is
/// already installed.
pub fn init_logging(level: LogLevel, log_path: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    if let Some(log_path) = log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).wrap_err_with(|| {
                format!("failed to create log directory {}", parent.display())
            })?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .wrap_err_with(|| format!("failed to open log file {}", log_path.display()))?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .try_init()
            .wrap_err("failed to install tracing subscriber")?;

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .try_init()
            .wrap_err("failed to install tracing subscriber")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_logging_creates_log_file_once() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("logs").join("daygram.log");

        init_logging(LogLevel::Debug, Some(&log_path)).unwrap();
        assert!(log_path.exists());

        // A second global subscriber is refused rather than panicking.
        assert!(init_logging(LogLevel::Info, None).is_err());
    }
}
