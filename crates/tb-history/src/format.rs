// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// On-disk format of .tbhist history files
//
// A history file is one gzip stream containing a single JSON document.
// The whole document is rewritten on every save; readers check the version
// tag before trusting anything else in it.

use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

/// Current history file format version
pub const FORMAT_VERSION: &str = "1.0";

/// File extension for history files
pub const HISTORY_EXTENSION: &str = "tbhist";

const MARKER_RULE: &str = "|||||||||||||||||||||||||||||||||||||||||||||||||||||||||";

/// Colors of the first cell of an archived row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellColors {
    pub fg: String,
    pub bg: String,
}

impl Default for CellColors {
    fn default() -> Self {
        Self {
            fg: "default".to_string(),
            bg: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Content,
    StreamingMarker,
}

/// Streaming state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Stopped,
    Resumed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Stopped => write!(f, "stopped"),
            EventKind::Resumed => write!(f, "resumed"),
        }
    }
}

/// A transition recorded by the streaming detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Local>,
    /// Silence observed (stopped) or pause length that just ended (resumed)
    pub gap_seconds: f64,
}

/// One archived row, either grid content or a streaming marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineEntry {
    pub row: usize,
    pub kind: LineKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<CellColors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker_kind: Option<EventKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_seconds: Option<f64>,
}

impl LineEntry {
    pub fn content(row: usize, content: impl Into<String>, colors: Option<CellColors>) -> Self {
        Self {
            row,
            kind: LineKind::Content,
            content: content.into(),
            colors,
            marker_kind: None,
            gap_seconds: None,
        }
    }

    pub fn marker(row: usize, event: &StreamingEvent) -> Self {
        Self {
            row,
            kind: LineKind::StreamingMarker,
            content: marker_text(event.kind, Some(event.gap_seconds), event.timestamp),
            colors: None,
            marker_kind: Some(event.kind),
            gap_seconds: Some(event.gap_seconds),
        }
    }

    pub fn is_marker(&self) -> bool {
        self.kind == LineKind::StreamingMarker
    }
}

/// Human-readable block written for a streaming marker line
pub fn marker_text(kind: EventKind, gap_seconds: Option<f64>, at: DateTime<Local>) -> String {
    let time_str = at.format("%Y-%m-%d %H:%M:%S");
    match kind {
        EventKind::Stopped => {
            let gap = gap_seconds
                .map(|g| format!("{:.1}s", g))
                .unwrap_or_else(|| "unknown".to_string());
            format!(
                "{rule}\nStreaming paused ({gap} gap detected)\n   Stopped at: {time_str}\n{rule}",
                rule = MARKER_RULE
            )
        }
        EventKind::Resumed => format!(
            "{rule}\nStreaming resumed\n   Resumed at: {time_str}\n{rule}",
            rule = MARKER_RULE
        ),
    }
}

/// One archive action over a contiguous row range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub timestamp: DateTime<Local>,
    /// `"start-end"`, or `"auto-archive-N-lines"` for threshold archives
    pub row_range: String,
    pub command_context: String,
    pub lines: Vec<LineEntry>,
    #[serde(default)]
    pub line_count: usize,
}

impl ArchiveRecord {
    pub fn new(
        timestamp: DateTime<Local>,
        lines: Vec<LineEntry>,
        row_range: impl Into<String>,
        command_context: impl Into<String>,
    ) -> Self {
        let line_count = lines.len();
        Self {
            timestamp,
            row_range: row_range.into(),
            command_context: command_context.into(),
            lines,
            line_count,
        }
    }

    pub fn content_lines(&self) -> impl Iterator<Item = &LineEntry> {
        self.lines.iter().filter(|l| !l.is_marker())
    }

    pub fn marker_lines(&self) -> impl Iterator<Item = &LineEntry> {
        self.lines.iter().filter(|l| l.is_marker())
    }

    /// Row numbers must be strictly increasing
    pub(crate) fn check_rows(&self) -> std::result::Result<(), String> {
        for pair in self.lines.windows(2) {
            if pair[1].row <= pair[0].row {
                return Err(format!(
                    "archive {} has row {} after row {}",
                    self.row_range, pair[1].row, pair[0].row
                ));
            }
        }
        Ok(())
    }
}

pub fn format_row_range(start: usize, end: usize) -> String {
    format!("{}-{}", start, end)
}

/// Parse a `"start-end"` row range. Non-positional ranges yield `None`.
pub fn parse_row_range(range: &str) -> Option<(usize, usize)> {
    let (start, end) = range.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

/// Complete contents of one session's history file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryFile {
    pub version: String,
    pub session_id: String,
    pub created_at: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Local>>,
    #[serde(default)]
    pub total_archives: usize,
    pub archives: Vec<ArchiveRecord>,
    #[serde(default)]
    pub streaming_events: Vec<StreamingEvent>,
}

#[derive(Deserialize)]
struct VersionHeader {
    version: String,
}

impl HistoryFile {
    pub fn new(session_id: impl Into<String>, created_at: DateTime<Local>) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            session_id: session_id.into(),
            created_at,
            last_updated: None,
            total_archives: 0,
            archives: Vec::new(),
            streaming_events: Vec::new(),
        }
    }

    /// Append a record, keeping archives in timestamp order. Returns the
    /// position it was inserted at.
    pub fn push_archive(&mut self, record: ArchiveRecord) -> usize {
        let at = self.archives.partition_point(|a| a.timestamp <= record.timestamp);
        self.archives.insert(at, record);
        self.total_archives = self.archives.len();
        at
    }

    pub fn total_lines(&self) -> usize {
        self.archives.iter().map(|a| a.lines.len()).sum()
    }

    /// Serialize to compact JSON and gzip it
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, self)?;
        encoder.flush()?;
        Ok(encoder.finish()?)
    }

    /// Decompress and parse; `path` is only used to label errors
    pub fn decode(bytes: &[u8], path: &Path) -> Result<Self> {
        let mut json = String::new();
        GzDecoder::new(bytes)
            .read_to_string(&mut json)
            .map_err(|e| Error::corrupt(path, format!("decompression failed: {}", e)))?;

        let header: VersionHeader = serde_json::from_str(&json)
            .map_err(|e| Error::corrupt(path, format!("missing version tag: {}", e)))?;
        if header.version != FORMAT_VERSION {
            return Err(Error::corrupt(
                path,
                format!(
                    "unsupported history version {} (supported: {})",
                    header.version, FORMAT_VERSION
                ),
            ));
        }

        let file: HistoryFile = serde_json::from_str(&json)
            .map_err(|e| Error::corrupt(path, format!("schema mismatch: {}", e)))?;
        for archive in &file.archives {
            archive.check_rows().map_err(|reason| Error::corrupt(path, reason))?;
        }
        Ok(file)
    }
}
