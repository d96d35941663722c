//! Optional TOML configuration.
//!
//! ```toml
//! log_level = "info"
//!
//! [gen]
//! sort_entries         = true
//! container_extensions = ["db"]
//! ```
//!
//! Every key is optional.  Command-line flags override what is set here.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::archive::GenOptions;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// `EnvFilter` directive used when neither `FILEDB_LOG` nor `-v` is given.
    pub log_level: Option<String>,
    pub gen:       GenOptions,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
