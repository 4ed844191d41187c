// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Per-session history file management
//
// Each session owns exactly one .tbhist file. The store keeps the decoded
// file in memory and rewrites it wholesale on every save, through a temp file
// and a rename so readers never observe a half-written archive.

use crate::error::{Error, Result};
use crate::format::{
    ArchiveRecord, EventKind, HistoryFile, LineEntry, StreamingEvent, HISTORY_EXTENSION,
};
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const EXPORT_RULE_WIDTH: usize = 60;

/// Path of the history file for `session_id` inside `dir`.
///
/// The id becomes part of a file name, so it must not be empty or contain
/// path separators.
pub fn history_path(dir: &Path, session_id: &str) -> Result<PathBuf> {
    if session_id.is_empty() || session_id.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidSessionId(session_id.to_string()));
    }
    Ok(dir.join(format!("terminal_history_{}.{}", session_id, HISTORY_EXTENSION)))
}

/// Human-readable size: `512B`, `1.5KB`, `12.0MB`, `1.25GB`
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Read and decode a history file
pub fn load_file(path: &Path) -> Result<HistoryFile> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    HistoryFile::decode(&bytes, path)
}

/// Which archives an export covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSelection {
    All,
    Index(usize),
}

/// Which lines of the selected archives are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFilter {
    #[default]
    All,
    ContentOnly,
    MarkersOnly,
}

impl ExportFilter {
    fn includes(self, line: &LineEntry) -> bool {
        match self {
            ExportFilter::All => true,
            ExportFilter::ContentOnly => !line.is_marker(),
            ExportFilter::MarkersOnly => line.is_marker(),
        }
    }
}

/// Summary of one history file on disk
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryFileInfo {
    pub path: PathBuf,
    pub session_id: String,
    pub created_at: DateTime<Local>,
    pub size: u64,
    pub archives_count: usize,
}

/// Summaries of every history file in `dir`, newest first.
///
/// Files that cannot be decoded are skipped with a warning. A missing
/// directory yields an empty list.
pub fn list_history_files(dir: &Path) -> Result<Vec<HistoryFileInfo>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut infos = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(HISTORY_EXTENSION) {
            continue;
        }
        let info = fs::metadata(&path)
            .map_err(Error::from)
            .and_then(|meta| Ok((meta.len(), load_file(&path)?)));
        match info {
            Ok((size, file)) => infos.push(HistoryFileInfo {
                session_id: file.session_id,
                created_at: file.created_at,
                archives_count: file.archives.len(),
                size,
                path,
            }),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable history file"),
        }
    }
    infos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(infos)
}

/// Row number for marker lines appended after `lines`
fn next_row(lines: &[LineEntry]) -> usize {
    lines.last().map_or(0, |l| l.row + 1)
}

/// One session's history file, decoded in memory
#[derive(Debug)]
pub struct HistoryStore {
    dir: PathBuf,
    path: PathBuf,
    file: HistoryFile,
}

impl HistoryStore {
    /// Open the session's file, or start an empty one if none exists yet.
    ///
    /// Nothing is written until the first save. A corrupt existing file is an
    /// error and is left untouched.
    pub fn create_or_open(dir: &Path, session_id: &str, now: DateTime<Local>) -> Result<Self> {
        let path = history_path(dir, session_id)?;
        let file = match load_file(&path) {
            Ok(file) => {
                debug!(path = %path.display(), archives = file.archives.len(), "Opened history file");
                file
            }
            Err(Error::NotFound(_)) => HistoryFile::new(session_id, now),
            Err(e) => return Err(e),
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.file.session_id
    }

    pub fn file(&self) -> &HistoryFile {
        &self.file
    }

    pub fn archives(&self) -> &[ArchiveRecord] {
        &self.file.archives
    }

    pub fn archive(&self, index: usize) -> Result<&ArchiveRecord> {
        self.file.archives.get(index).ok_or(Error::ArchiveIndex {
            index,
            count: self.file.archives.len(),
        })
    }

    /// Append one archive and persist the whole file.
    ///
    /// `events` are streaming transitions not yet persisted; they are added
    /// to the event log and rendered as marker lines after the content. On a
    /// failed write the in-memory file is rolled back to what is on disk.
    pub fn append_archive(
        &mut self,
        mut lines: Vec<LineEntry>,
        row_range: &str,
        command_context: &str,
        events: Vec<StreamingEvent>,
        at: DateTime<Local>,
    ) -> Result<&ArchiveRecord> {
        if lines.is_empty() && events.is_empty() {
            return Err(Error::NothingToArchive(format!("no lines in {}", row_range)));
        }

        let base = next_row(&lines);
        lines.extend(
            events
                .iter()
                .enumerate()
                .map(|(i, event)| LineEntry::marker(base + i, event)),
        );

        let events_before = self.file.streaming_events.len();
        let updated_before = self.file.last_updated;
        let record = ArchiveRecord::new(at, lines, row_range, command_context);
        // Anything written here must load again
        record.check_rows().map_err(Error::InvalidArchive)?;
        let line_count = record.line_count;
        let index = self.file.push_archive(record);
        self.file.streaming_events.extend(events);
        self.file.last_updated = Some(at);

        if let Err(e) = self.save() {
            self.file.archives.remove(index);
            self.file.total_archives = self.file.archives.len();
            self.file.streaming_events.truncate(events_before);
            self.file.last_updated = updated_before;
            return Err(e);
        }

        info!(
            session_id = %self.file.session_id,
            row_range,
            lines = line_count,
            archives = self.file.archives.len(),
            "Archived output"
        );
        self.archive(index)
    }

    /// Record a streaming transition on its own.
    ///
    /// The marker line goes at the end of the newest archive, or into a
    /// marker-only archive when none exists yet.
    pub fn append_streaming_marker(
        &mut self,
        kind: EventKind,
        timestamp: DateTime<Local>,
        gap_seconds: f64,
    ) -> Result<()> {
        let event = StreamingEvent {
            kind,
            timestamp,
            gap_seconds,
        };

        let Some(last) = self.file.archives.last_mut() else {
            self.append_archive(Vec::new(), "0-0", "streaming_marker", vec![event], timestamp)?;
            return Ok(());
        };

        last.lines.push(LineEntry::marker(next_row(&last.lines), &event));
        last.line_count = last.lines.len();
        self.file.streaming_events.push(event);
        self.file.last_updated = Some(timestamp);

        if let Err(e) = self.save() {
            if let Some(last) = self.file.archives.last_mut() {
                last.lines.pop();
                last.line_count = last.lines.len();
            }
            self.file.streaming_events.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Re-read the file from disk
    pub fn load(&mut self) -> Result<&HistoryFile> {
        self.file = load_file(&self.path)?;
        Ok(&self.file)
    }

    /// Write the in-memory file atomically
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let bytes = self.file.encode()?;

        let temp = self.path.with_extension("tmp");
        fs::write(&temp, &bytes)?;
        if let Err(e) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        debug!(path = %self.path.display(), bytes = bytes.len(), "Saved history file");
        Ok(())
    }

    /// Remove the file; `Ok(false)` if it did not exist. The in-memory file
    /// is reset either way.
    pub fn delete(&mut self, now: DateTime<Local>) -> Result<bool> {
        let session_id = self.file.session_id.clone();
        self.file = HistoryFile::new(session_id, now);
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Deleted history file");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Size of the file on disk, 0 if it has not been written
    pub fn file_size(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Render archives as headered plain text
    pub fn export_plaintext(&self, selection: ArchiveSelection, filter: ExportFilter) -> Result<String> {
        export_plaintext(&self.file, selection, filter)
    }

    /// Validate and return a history file from elsewhere
    pub fn import(path: &Path) -> Result<HistoryFile> {
        let file = load_file(path)?;
        info!(
            path = %path.display(),
            session_id = %file.session_id,
            archives = file.archives.len(),
            "Imported history file"
        );
        Ok(file)
    }

    /// Import a file and append its archives and events to this session.
    ///
    /// Returns the number of archives added.
    pub fn merge_import(&mut self, path: &Path, now: DateTime<Local>) -> Result<usize> {
        let imported = Self::import(path)?;
        let added = imported.archives.len();
        if added == 0 && imported.streaming_events.is_empty() {
            return Ok(0);
        }

        let previous = self.file.clone();
        for record in imported.archives {
            self.file.push_archive(record);
        }
        self.file.streaming_events.extend(imported.streaming_events);
        self.file.last_updated = Some(now);

        if let Err(e) = self.save() {
            self.file = previous;
            return Err(e);
        }
        Ok(added)
    }
}

/// Render archives of `file` as headered plain text
pub fn export_plaintext(
    file: &HistoryFile,
    selection: ArchiveSelection,
    filter: ExportFilter,
) -> Result<String> {
    let archives: &[ArchiveRecord] = match selection {
        ArchiveSelection::All => &file.archives,
        ArchiveSelection::Index(index) => {
            let count = file.archives.len();
            let Some(one) = file.archives.get(index) else {
                return Err(Error::ArchiveIndex { index, count });
            };
            std::slice::from_ref(one)
        }
    };

    let rule = "=".repeat(EXPORT_RULE_WIDTH);
    let mut out = String::new();
    for archive in archives {
        // Writing to a String cannot fail
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Terminal Browser - Archived Output");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Timestamp: {}", archive.timestamp.to_rfc3339());
        let _ = writeln!(out, "Row Range: {}", archive.row_range);
        let _ = writeln!(out, "Command: {}", archive.command_context);
        let _ = writeln!(out, "{}", rule);
        out.push('\n');
        for line in archive.lines.iter().filter(|l| filter.includes(l)) {
            out.push_str(&line.content);
            out.push('\n');
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::CellColors;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 1, 12, 0, secs).unwrap()
    }

    fn store(dir: &TempDir) -> HistoryStore {
        HistoryStore::create_or_open(dir.path(), "s1", at(0)).unwrap()
    }

    fn red_line(row: usize, text: &str) -> LineEntry {
        LineEntry::content(
            row,
            text,
            Some(CellColors {
                fg: "red".into(),
                bg: "default".into(),
            }),
        )
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0B");
        assert_eq!(format_file_size(1023), "1023B");
        assert_eq!(format_file_size(1536), "1.5KB");
        assert_eq!(format_file_size(12 * 1024 * 1024), "12.0MB");
        assert_eq!(format_file_size(1024 * 1024 * 1024 + 256 * 1024 * 1024), "1.25GB");
    }

    #[test]
    fn test_open_does_not_write() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(!store.path().exists());
        assert_eq!(store.file_size().unwrap(), 0);
        assert!(store.path().ends_with("terminal_history_s1.tbhist"));
    }

    #[test]
    fn test_append_then_reopen() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        let lines = vec![red_line(0, "error: boom"), LineEntry::content(2, "after", None)];
        s.append_archive(lines.clone(), "0-3", "make", vec![], at(1)).unwrap();

        let reopened = HistoryStore::create_or_open(dir.path(), "s1", at(9)).unwrap();
        assert_eq!(reopened.archives().len(), 1);
        assert_eq!(reopened.archives()[0].lines, lines);
        assert_eq!(reopened.file().created_at, at(0));
        assert!(!dir.path().join("terminal_history_s1.tmp").exists());
    }

    #[test]
    fn test_markers_follow_content() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        let events = vec![
            StreamingEvent {
                kind: EventKind::Stopped,
                timestamp: at(4),
                gap_seconds: 4.0,
            },
            StreamingEvent {
                kind: EventKind::Resumed,
                timestamp: at(7),
                gap_seconds: 6.5,
            },
        ];
        let record = s
            .append_archive(vec![LineEntry::content(5, "x", None)], "0-6", "c", events, at(8))
            .unwrap();
        let rows: Vec<usize> = record.lines.iter().map(|l| l.row).collect();
        assert_eq!(rows, vec![5, 6, 7]);
        assert_eq!(record.marker_lines().count(), 2);
        assert_eq!(s.file().streaming_events.len(), 2);
    }

    #[test]
    fn test_empty_archive_rejected() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        let err = s.append_archive(vec![], "0-0", "c", vec![], at(1)).unwrap_err();
        assert!(matches!(err, Error::NothingToArchive(_)));
    }

    #[test]
    fn test_streaming_marker_appends_to_newest_archive() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.append_streaming_marker(EventKind::Stopped, at(1), 3.5).unwrap();
        assert_eq!(s.archives().len(), 1);
        assert_eq!(s.archives()[0].row_range, "0-0");

        s.append_archive(vec![LineEntry::content(0, "a", None)], "0-1", "c", vec![], at(2))
            .unwrap();
        s.append_streaming_marker(EventKind::Resumed, at(3), 1.0).unwrap();
        let newest = &s.load().unwrap().archives[1];
        assert_eq!(newest.lines.len(), 2);
        assert_eq!(newest.line_count, 2);
        assert!(newest.lines[1].is_marker());
        assert_eq!(newest.lines[1].row, 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        assert!(!s.delete(at(1)).unwrap());
        s.append_archive(vec![LineEntry::content(0, "a", None)], "0-1", "c", vec![], at(2))
            .unwrap();
        assert!(s.delete(at(3)).unwrap());
        assert!(!s.path().exists());
        assert!(s.archives().is_empty());
        assert!(!s.delete(at(4)).unwrap());
    }

    #[test]
    fn test_unordered_rows_are_rejected_before_writing() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.append_archive(vec![red_line(0, "kept")], "0-1", "c", vec![], at(1))
            .unwrap();

        let err = s
            .append_archive(
                vec![red_line(3, "three"), red_line(1, "one")],
                "0-4",
                "c",
                vec![],
                at(2),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArchive(ref msg) if msg.contains("row 1 after row 3")));
        assert_eq!(s.archives().len(), 1);

        let reopened = HistoryStore::create_or_open(dir.path(), "s1", at(3)).unwrap();
        assert_eq!(reopened.archives().len(), 1);
        assert_eq!(reopened.archives()[0].lines[0].content, "kept");
    }

    #[test]
    fn test_session_id_cannot_leave_storage_dir() {
        let dir = TempDir::new().unwrap();
        for id in ["../escape", "a/b", "a\\b", ""] {
            let err = HistoryStore::create_or_open(dir.path(), id, at(0)).unwrap_err();
            assert!(matches!(err, Error::InvalidSessionId(_)), "{:?}", id);
        }
        assert!(history_path(dir.path(), "ok-id_1").is_ok());
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        assert!(matches!(s.load(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_corrupt_file_is_left_intact() {
        let dir = TempDir::new().unwrap();
        let path = history_path(dir.path(), "s1").unwrap();
        fs::write(&path, b"garbage").unwrap();
        let err = HistoryStore::create_or_open(dir.path(), "s1", at(0)).unwrap_err();
        assert!(err.is_corrupt());
        assert_eq!(fs::read(&path).unwrap(), b"garbage");
    }

    #[test]
    fn test_export_plaintext() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        let events = vec![StreamingEvent {
            kind: EventKind::Stopped,
            timestamp: at(4),
            gap_seconds: 4.0,
        }];
        s.append_archive(vec![LineEntry::content(0, "hello", None)], "0-1", "echo", events, at(5))
            .unwrap();

        let all = s.export_plaintext(ArchiveSelection::All, ExportFilter::All).unwrap();
        let rule = "=".repeat(60);
        assert!(all.starts_with(&format!("{}\nTerminal Browser - Archived Output\n{}\n", rule, rule)));
        assert!(all.contains("Row Range: 0-1\nCommand: echo\n"));
        assert!(all.contains(&format!("{}\n\nhello\n", rule)));
        assert!(all.contains("Streaming paused (4.0s gap detected)"));

        let content = s.export_plaintext(ArchiveSelection::Index(0), ExportFilter::ContentOnly).unwrap();
        assert!(!content.contains("Streaming paused"));
        let markers = s.export_plaintext(ArchiveSelection::All, ExportFilter::MarkersOnly).unwrap();
        assert!(!markers.contains("hello"));

        assert!(matches!(
            s.export_plaintext(ArchiveSelection::Index(3), ExportFilter::All),
            Err(Error::ArchiveIndex { index: 3, count: 1 })
        ));
    }

    #[test]
    fn test_merge_import() {
        let dir = TempDir::new().unwrap();
        let mut other = HistoryStore::create_or_open(dir.path(), "other", at(0)).unwrap();
        other
            .append_archive(vec![LineEntry::content(0, "imported", None)], "0-1", "x", vec![], at(3))
            .unwrap();

        let mut s = store(&dir);
        s.append_archive(vec![LineEntry::content(0, "mine", None)], "0-1", "y", vec![], at(1))
            .unwrap();
        assert_eq!(s.merge_import(other.path(), at(5)).unwrap(), 1);

        let reloaded = load_file(s.path()).unwrap();
        assert_eq!(reloaded.archives.len(), 2);
        assert_eq!(reloaded.archives[1].lines[0].content, "imported");
        assert_eq!(reloaded.session_id, "s1");
    }

    #[test]
    fn test_list_history_files_skips_broken() {
        let dir = TempDir::new().unwrap();
        for (id, secs) in [("a", 1), ("b", 2)] {
            let mut s = HistoryStore::create_or_open(dir.path(), id, at(secs)).unwrap();
            s.append_archive(vec![LineEntry::content(0, id, None)], "0-1", "c", vec![], at(secs))
                .unwrap();
        }
        fs::write(history_path(dir.path(), "broken").unwrap(), b"nope").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let infos = list_history_files(dir.path()).unwrap();
        let ids: Vec<&str> = infos.iter().map(|i| i.session_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(infos.iter().all(|i| i.archives_count == 1 && i.size > 0));

        assert!(list_history_files(&dir.path().join("missing")).unwrap().is_empty());
    }
}
