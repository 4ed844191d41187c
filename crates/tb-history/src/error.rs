// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the history core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for history operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by archive, import/export and session operations.
///
/// Hot-path code (ingest, flush, streaming detection) never returns these;
/// it logs and degrades instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt history archive {path}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("Archive rejected: {0}")]
    InvalidArchive(String),

    #[error("Invalid session id {0:?}: must be non-empty without path separators")]
    InvalidSessionId(String),

    #[error("History file not found: {0}")]
    NotFound(PathBuf),

    #[error("Archive index {index} out of range ({count} archives)")]
    ArchiveIndex { index: usize, count: usize },

    #[error("Nothing to archive: {0}")]
    NothingToArchive(String),

    #[error("Filtered index cache inconsistent: {0}")]
    CacheInconsistency(String),

    #[error("Emulator rejected input: {0}")]
    Emulator(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background archive worker failed: {0}")]
    Worker(String),
}

impl Error {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptArchive {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from reading a damaged or incompatible file.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::CorruptArchive { .. })
    }
}
