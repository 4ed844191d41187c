// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging section of the configuration file

use serde::{Deserialize, Serialize};

use crate::{CliLogLevel, CliLoggingArgs, LogFormat};

/// `[logging]` table; command line flags take precedence over it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoggingConfig {
    pub log_level: Option<CliLogLevel>,
    pub log_format: Option<LogFormat>,
    pub log_dir: Option<String>,
}

impl LoggingConfig {
    /// Fill the flags the user did not pass from this config
    pub fn apply_to(&self, args: &mut CliLoggingArgs) {
        if args.log_level.is_none() {
            args.log_level = self.log_level;
        }
        if args.log_format.is_none() {
            args.log_format = self.log_format;
        }
        if args.log_dir.is_none() {
            args.log_dir = self.log_dir.clone();
        }
    }
}
