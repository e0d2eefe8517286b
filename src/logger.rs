//! stderr logging for the command-line tool.
//!
//! Which filter applies, highest first: `-v` flags, then `RUST_LOG`, then
//! `log_level` from the config file.  A filter that fails to parse falls
//! through to the next one.  Thread names are printed so lines from the
//! `merge-N` pool threads can be told apart.

use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Where the level handed to [`init`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSource {
    /// `-v` flags; beats `RUST_LOG`.
    Cli,
    /// `log_level` from the config; `RUST_LOG` beats it.
    Config,
}

/// Install the global subscriber.  Fails if one is already installed.
pub fn init(level: &str, source: LevelSource) -> Result<(), AppError> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = resolve_filter(level, source, rust_log.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}

fn resolve_filter(
    level: &str,
    source: LevelSource,
    rust_log: Option<&str>,
) -> Result<EnvFilter, AppError> {
    let rust_log = rust_log.filter(|v| !v.trim().is_empty());
    let candidates = match source {
        LevelSource::Cli => [Some(level), rust_log],
        LevelSource::Config => [rust_log, Some(level)],
    };

    let mut errors = Vec::new();
    for directives in candidates.into_iter().flatten() {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return Ok(filter),
            Err(e) => errors.push(format!("'{directives}': {e}")),
        }
    }
    Err(AppError::Logger(format!("no usable log filter: {}", errors.join("; "))))
}
