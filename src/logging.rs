//! Logging configuration for sqlsheet.
//!
//! Logs go to stderr by default so stdout stays free for command output. With
//! `--log-file` they go to a file instead.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes logging to the given file.
///
/// The file is truncated on each run. Falls back to stderr when it cannot be
/// created.
pub fn init_file_logging(log_path: &Path) {
    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(parent) {
            eprintln!("Warning: Could not create log directory: {e}");
            init_stderr_logging();
            return;
        }
    }

    let log_file = match File::create(log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {e}");
            init_stderr_logging();
            return;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(log_file)
        .with_ansi(false)
        .init();
}

/// Initializes logging to stderr.
pub fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Default log file location when `--log-file` is given without a path.
///
/// Uses the XDG state directory on Linux (`~/.local/state/sqlsheet/sqlsheet.log`),
/// falling back to the config directory, then the temp directory.
pub fn default_log_path() -> PathBuf {
    if let Some(state_dir) = dirs::state_dir() {
        return state_dir.join("sqlsheet").join("sqlsheet.log");
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("sqlsheet").join("sqlsheet.log");
    }

    std::env::temp_dir().join("sqlsheet.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_path_is_absolute() {
        let path = default_log_path();
        assert!(path.is_absolute());
        assert!(path.ends_with("sqlsheet.log"));
    }
}
