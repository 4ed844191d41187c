// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration file for the `tb` binary
//!
//! History settings sit at the top level, logging under `[logging]`:
//!
//! ```toml
//! storage-path = "/var/lib/tb"
//!
//! [streaming]
//! silence-threshold-secs = 2.0
//!
//! [logging]
//! log-level = "info"
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tb_history::HistoryConfig;
use tb_logging::LoggingConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TbConfig {
    #[serde(flatten)]
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

impl TbConfig {
    /// Defaults when no file is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: TbConfig = toml::from_str(content)?;
        config.history.validate()?;
        Ok(config)
    }
}
