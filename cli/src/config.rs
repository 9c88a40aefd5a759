//! CLI configuration file.
//!
//! ```toml
//! log_level = "santa=info,santa_protocol=info"
//! log_format = "pretty"
//!
//! [protocol]
//! max_matching_attempts = 200
//!
//! [protocol.kdf]
//! log_n = 15
//! r = 8
//! p = 1
//! ```
//!
//! Every key is optional.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use santa_protocol::ProtocolConfig;

use crate::logging::LogFormat;

pub const DEFAULT_LOG_LEVEL: &str = "santa=info,santa_protocol=info";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub protocol: ProtocolConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::default(),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
