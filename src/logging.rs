//! Diagnostic logging to stderr.
//!
//! Filter precedence: `FILEDB_LOG` (any `EnvFilter` directive string), then
//! the command-line `-v` count when non-zero, then the config file's
//! `log_level`, then `warn`.

use tracing_subscriber::EnvFilter;

use crate::error::{FileDbError, Result};

/// Environment variable holding a filter directive.
pub const LOG_ENV: &str = "FILEDB_LOG";

/// Level selected by a `-v` count.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Build the filter without installing it.
pub fn build_filter(verbosity: u8, config_level: Option<&str>) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }
    let level = match (verbosity, config_level) {
        (0, Some(level)) => level,
        (v, _)           => level_for(v),
    };
    EnvFilter::try_new(level)
        .map_err(|e| FileDbError::Config(format!("invalid log level '{level}': {e}")))
}

/// Install the global subscriber.  Calling this twice is an error.
pub fn init(verbosity: u8, config_level: Option<&str>) -> Result<()> {
    let filter = build_filter(verbosity, config_level)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| FileDbError::Config(format!("logging already initialised: {e}")))
}
