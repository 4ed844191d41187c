// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration for buffering, streaming detection and archiving

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the Terminal Browser home directory
pub const TB_HOME_ENV: &str = "TB_HOME";

/// Top-level history configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct HistoryConfig {
    /// Custom directory for `.tbhist` files
    /// If not set, uses `TB_HOME` or the platform data directory
    pub storage_path: Option<PathBuf>,

    pub flush: FlushConfig,
    pub streaming: StreamingConfig,
    pub archive: ArchiveConfig,
    pub lifecycle: LifecycleConfig,

    /// Override for TB_HOME (used for testing to avoid environment conflicts)
    #[serde(skip)]
    pub tb_home_override: Option<PathBuf>,
}

/// Output buffer throttling and suspend/resume replay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct FlushConfig {
    /// Flush interval under normal output (~60fps)
    pub base_interval_ms: u64,
    /// Flush interval once more than `moderate_fragments` are pending
    pub moderate_interval_ms: u64,
    /// Flush interval once more than `heavy_fragments` are pending
    pub heavy_interval_ms: u64,
    pub moderate_fragments: usize,
    pub heavy_fragments: usize,
    /// Suspensions at least this long get their replay trimmed
    pub resume_trim_after_secs: u64,
    /// Fragments kept when a long suspension is trimmed
    pub resume_keep_fragments: usize,
    /// Delay between resume and the replay flush
    pub resume_settle_ms: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 16,
            moderate_interval_ms: 50,
            heavy_interval_ms: 100,
            moderate_fragments: 20,
            heavy_fragments: 100,
            resume_trim_after_secs: 10,
            resume_keep_fragments: 20,
            resume_settle_ms: 100,
        }
    }
}

impl FlushConfig {
    pub fn resume_trim_after(&self) -> Duration {
        Duration::from_secs(self.resume_trim_after_secs)
    }

    pub fn resume_settle(&self) -> Duration {
        Duration::from_millis(self.resume_settle_ms)
    }
}

/// Streaming pause detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct StreamingConfig {
    /// Silence (seconds) after which the stream counts as paused
    pub silence_threshold_secs: f64,
    /// How often the detector is consulted, 500..=1000 ms
    pub check_interval_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            silence_threshold_secs: 3.0,
            check_interval_ms: 1000,
        }
    }
}

impl StreamingConfig {
    pub fn silence_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.silence_threshold_secs.max(0.0))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Archive triggers and auto-archive thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ArchiveConfig {
    /// Archive-before-clear is skipped when the grid holds this many rows or fewer
    pub min_rows_before_clear: usize,
    /// Archive the grid when a clear-screen sequence is flushed
    pub archive_on_clear_sequence: bool,
    pub auto_archive_enabled: bool,
    /// Row count at which the oldest rows are archived and dropped
    pub auto_archive_threshold: usize,
    /// Rows left in the grid after an auto-archive
    pub auto_archive_keep_lines: usize,
    pub auto_archive_check_secs: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            min_rows_before_clear: 3,
            archive_on_clear_sequence: true,
            auto_archive_enabled: true,
            auto_archive_threshold: 9500,
            auto_archive_keep_lines: 5000,
            auto_archive_check_secs: 5,
        }
    }
}

impl ArchiveConfig {
    pub fn auto_archive_check(&self) -> Duration {
        Duration::from_secs(self.auto_archive_check_secs)
    }
}

/// Host activity notifications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct LifecycleConfig {
    /// An inactive notification only suspends after this long without a
    /// matching active notification
    pub suspend_delay_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            suspend_delay_ms: 500,
        }
    }
}

impl LifecycleConfig {
    pub fn suspend_delay(&self) -> Duration {
        Duration::from_millis(self.suspend_delay_ms)
    }
}

impl HistoryConfig {
    /// Load configuration from a TOML file, then validate it
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HistoryConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn with_silence_threshold(mut self, seconds: f64) -> Self {
        self.streaming.silence_threshold_secs = seconds;
        self
    }

    pub fn with_auto_archive(mut self, threshold: usize, keep_lines: usize) -> Self {
        self.archive.auto_archive_enabled = true;
        self.archive.auto_archive_threshold = threshold;
        self.archive.auto_archive_keep_lines = keep_lines;
        self
    }

    pub fn without_auto_archive(mut self) -> Self {
        self.archive.auto_archive_enabled = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.streaming.silence_threshold_secs > 0.0) {
            return Err(Error::Config(format!(
                "silence-threshold-secs must be positive, got {}",
                self.streaming.silence_threshold_secs
            )));
        }
        if !(500..=1000).contains(&self.streaming.check_interval_ms) {
            return Err(Error::Config(format!(
                "check-interval-ms must be between 500 and 1000, got {}",
                self.streaming.check_interval_ms
            )));
        }
        if self.archive.auto_archive_keep_lines >= self.archive.auto_archive_threshold {
            return Err(Error::Config(format!(
                "auto-archive-keep-lines ({}) must be below auto-archive-threshold ({})",
                self.archive.auto_archive_keep_lines, self.archive.auto_archive_threshold
            )));
        }
        if self.flush.base_interval_ms == 0 {
            return Err(Error::Config("base-interval-ms must be non-zero".into()));
        }
        Ok(())
    }

    /// Get the history storage directory
    /// Precedence: storage_path > TB_HOME > dirs::data_dir
    pub fn storage_dir(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.storage_path {
            return Ok(custom_path.clone());
        }

        if let Some(tb_home_override) = &self.tb_home_override {
            return Ok(tb_home_override.join("history"));
        }
        if let Ok(tb_home) = std::env::var(TB_HOME_ENV) {
            return Ok(PathBuf::from(tb_home).join("history"));
        }

        let base_dir = dirs::data_dir()
            .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?;
        Ok(base_dir.join("terminal-browser").join("history"))
    }
}
