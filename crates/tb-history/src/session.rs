// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Per-session controller and the registry that owns controllers
//
// A controller wires one output stream through the buffer into its emulator,
// runs streaming detection and auto-archiving from a periodic tick, and
// exposes the archive, export and navigation operations the UI layer needs.
// Nothing here is global; every piece of state belongs to a controller.

use crate::buffer::{deliver, FlushOutcome, OutputBuffer, PendingText};
use crate::classify::Filter;
use crate::clock::Clock;
use crate::config::HistoryConfig;
use crate::emulator::{extract_lines, Emulator};
use crate::error::{Error, Result};
use crate::format::{format_row_range, ArchiveRecord, LineEntry, StreamingEvent};
use crate::index::{Direction, FilteredIndexCache};
use crate::lifecycle::{LifecycleListener, LifecycleMonitor, LifecycleTransition};
use crate::sanitize::ChunkDecoder;
use crate::store::{ArchiveSelection, ExportFilter, HistoryStore};
use crate::streaming::{StreamState, StreamingDetector};
use crate::worker::{ArchiveRequest, ArchiveSummary, ArchiveWorker};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Escape sequences that wipe the screen or scrollback
const CLEAR_SEQUENCES: [&str; 3] = ["\x1b[2J", "\x1b[3J", "\x1b[H\x1b[J"];

/// Byte offset of the first clear sequence in `text`
fn find_clear_sequence(text: &str) -> Option<usize> {
    CLEAR_SEQUENCES.iter().filter_map(|seq| text.find(seq)).min()
}

/// Split `text` after every `lines`-th newline
fn split_after_lines(text: &str, lines: usize) -> Vec<&str> {
    let mut slices = Vec::new();
    let (mut start, mut seen) = (0, 0);
    for (idx, _) in text.match_indices('\n') {
        seen += 1;
        if seen == lines {
            slices.push(&text[start..=idx]);
            start = idx + 1;
            seen = 0;
        }
    }
    if start < text.len() {
        slices.push(&text[start..]);
    }
    slices
}

/// What one tick did
#[derive(Debug, Default)]
pub struct TickReport {
    /// Text handed to the emulator
    pub flushed: Option<String>,
    pub event: Option<StreamingEvent>,
    pub archived: Option<ArchiveSummary>,
    pub lifecycle: Option<LifecycleTransition>,
}

pub struct SessionController {
    id: String,
    config: HistoryConfig,
    clock: Arc<dyn Clock>,
    buffer: Arc<OutputBuffer>,
    decoder: ChunkDecoder,
    detector: StreamingDetector,
    lifecycle: LifecycleMonitor,
    emulator: Box<dyn Emulator>,
    index: FilteredIndexCache,
    worker: ArchiveWorker,
    last_command: Option<String>,
    last_auto_check: Option<Instant>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("id", &self.id)
            .field("history", &self.worker.path())
            .field("stream", &self.detector.state())
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Open a session, loading its history file if one exists
    pub fn open(
        id: impl Into<String>,
        config: HistoryConfig,
        emulator: Box<dyn Emulator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        if let Some(capacity) = emulator.capacity() {
            let archive = &config.archive;
            if archive.auto_archive_enabled && archive.auto_archive_threshold >= capacity {
                return Err(Error::Config(format!(
                    "auto-archive-threshold ({}) must be below the emulator's capacity of {} rows",
                    archive.auto_archive_threshold, capacity
                )));
            }
        }
        let id = id.into();
        let dir = config.storage_dir()?;
        let store = HistoryStore::create_or_open(&dir, &id, clock.wall())?;
        info!(session_id = %id, path = %store.path().display(), "Session opened");

        Ok(Self {
            buffer: Arc::new(OutputBuffer::new(config.flush.clone())),
            decoder: ChunkDecoder::new(),
            detector: StreamingDetector::new(
                config.streaming.silence_threshold(),
                config.streaming.check_interval(),
            ),
            lifecycle: LifecycleMonitor::new(config.lifecycle.suspend_delay()),
            emulator,
            index: FilteredIndexCache::new(),
            worker: ArchiveWorker::new(store),
            last_command: None,
            last_auto_check: None,
            id,
            config,
            clock,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn history_path(&self) -> &Path {
        self.worker.path()
    }

    /// Shared handle for ingesting from another thread
    pub fn buffer(&self) -> Arc<OutputBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn emulator_mut(&mut self) -> &mut dyn Emulator {
        self.emulator.as_mut()
    }

    pub fn stream_state(&self) -> StreamState {
        self.detector.state()
    }

    pub fn streaming_events(&self) -> &[StreamingEvent] {
        self.detector.events()
    }

    pub fn row_count(&mut self) -> usize {
        self.emulator.row_count()
    }

    /// Command line most recently submitted, used to label archives
    pub fn set_last_command(&mut self, command: impl Into<String>) {
        self.last_command = Some(command.into());
    }

    /// Decode raw bytes from the reader and queue them
    pub fn ingest_bytes(&mut self, bytes: &[u8]) {
        let text = self.decoder.decode(bytes);
        self.buffer.ingest(&text, self.clock.now());
    }

    pub fn ingest_text(&self, text: &str) {
        self.buffer.ingest(text, self.clock.now());
    }

    pub fn notify_inactive(&mut self) {
        self.lifecycle.notify_inactive(self.clock.now());
    }

    pub fn notify_active(&mut self) -> Option<LifecycleTransition> {
        let transition = self.lifecycle.notify_active(self.clock.now())?;
        transition.dispatch(self);
        Some(transition)
    }

    /// One pass of the cooperative scheduler: lifecycle, flush, streaming
    /// detection and the auto-archive check
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let now = self.clock.now();

        if let Some(transition) = self.lifecycle.poll(now) {
            transition.dispatch(self);
            report.lifecycle = Some(transition);
        }

        if self.buffer.is_flush_due(now) {
            report.flushed = self.flush_pending().await;
        }

        if self.detector.is_check_due(now) {
            report.event = self
                .detector
                .check(now, self.clock.wall(), self.buffer.last_activity());
        }

        let auto_due = self
            .last_auto_check
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.archive.auto_archive_check());
        if auto_due {
            self.last_auto_check = Some(now);
            match self.check_auto_archive().await {
                Ok(summary) => report.archived = summary,
                Err(e) => warn!(session_id = %self.id, error = %e, "Auto-archive failed"),
            }
        }

        report
    }

    /// Drain the buffer into the emulator now, archiving first if the
    /// payload clears the screen. Returns the text delivered.
    pub async fn flush_pending(&mut self) -> Option<String> {
        let pending = self.buffer.take_pending()?;
        self.deliver_pending(pending).await
    }

    async fn deliver_pending(&mut self, pending: PendingText) -> Option<String> {
        let clear_at = if self.config.archive.archive_on_clear_sequence
            && !self.emulator.in_alternate_screen()
        {
            find_clear_sequence(&pending.text)
        } else {
            None
        };

        let delivered = match clear_at {
            Some(at) => {
                let (before, after) = pending.text.split_at(at);
                let head = self.deliver_part(&pending, before).await;
                let context = self.last_command.clone().unwrap_or_else(|| "clear".to_string());
                if let Err(e) = self.archive_before_clear(&context).await {
                    warn!(session_id = %self.id, error = %e, "Archive before clear failed");
                }
                let tail = self.deliver_part(&pending, after).await;
                head || tail
            }
            None => self.deliver_part(&pending, &pending.text).await,
        };

        self.index.observe(self.emulator.as_mut());
        delivered.then_some(pending.text)
    }

    /// Lines fed between auto-archive checks, when the emulator's capacity
    /// is bounded. Half the headroom above the threshold leaves room for
    /// lines that wrap.
    fn lines_per_slice(&self) -> Option<usize> {
        let archive = &self.config.archive;
        if !archive.auto_archive_enabled {
            return None;
        }
        let capacity = self.emulator.capacity()?;
        Some((capacity.saturating_sub(archive.auto_archive_threshold) / 2).max(1))
    }

    /// Feed `part` to the emulator, archiving the oldest rows between slices
    /// so a burst never pushes unarchived rows past the emulator's capacity
    async fn deliver_part(&mut self, pending: &PendingText, part: &str) -> bool {
        if part.is_empty() {
            return false;
        }
        let slices = match self.lines_per_slice() {
            Some(lines) => split_after_lines(part, lines),
            None => vec![part],
        };

        let mut delivered = false;
        let last = slices.len() - 1;
        for (idx, slice) in slices.into_iter().enumerate() {
            let piece = PendingText {
                text: slice.to_string(),
                fragments: pending.fragments,
                oldest: pending.oldest,
            };
            delivered |= matches!(
                deliver(self.emulator.as_mut(), piece),
                FlushOutcome::Delivered { .. }
            );
            if idx < last {
                self.index.observe(self.emulator.as_mut());
                if let Err(e) = self.check_auto_archive().await {
                    warn!(session_id = %self.id, error = %e, "Auto-archive during flush failed");
                }
            }
        }
        delivered
    }

    async fn append(&mut self, lines: Vec<LineEntry>, row_range: String, command_context: String) -> Result<ArchiveSummary> {
        let events = self.detector.take_unpersisted();
        let event_count = events.len();
        let request = ArchiveRequest {
            lines,
            row_range,
            command_context,
            events,
            at: self.clock.wall(),
        };
        self.worker.append(request).await.map_err(|e| {
            // Events stay pending for the next archive
            self.detector.restore_unpersisted(event_count);
            e
        })
    }

    /// Archive the whole grid before it is cleared, then drop the archived
    /// rows so a later clear does not archive them again.
    ///
    /// Grids with only a handful of rows are not worth an archive and yield
    /// `Ok(None)`.
    pub async fn archive_before_clear(&mut self, command: &str) -> Result<Option<ArchiveSummary>> {
        let total = self.emulator.row_count();
        if total <= self.config.archive.min_rows_before_clear {
            debug!(session_id = %self.id, rows = total, "Too few rows to archive before clear");
            return Ok(None);
        }
        let lines = extract_lines(self.emulator.as_mut(), 0, total);
        if lines.is_empty() {
            return Ok(None);
        }
        let summary = self
            .append(lines, format_row_range(0, total), format!("before_clear: {}", command))
            .await?;
        self.remove_top_rows(total)?;
        Ok(Some(summary))
    }

    /// Archive rows `0..row`, then drop them from the grid.
    ///
    /// The grid is only touched once the archive is on disk.
    pub async fn archive_and_clear(&mut self, row: usize) -> Result<ArchiveSummary> {
        let row = row.min(self.emulator.row_count());
        let lines = extract_lines(self.emulator.as_mut(), 0, row);
        if lines.is_empty() {
            return Err(Error::NothingToArchive(format!("no content above row {}", row)));
        }
        let context = self
            .last_command
            .clone()
            .unwrap_or_else(|| "manual_archive".to_string());
        let summary = self.append(lines, format_row_range(0, row), context).await?;
        self.remove_top_rows(row)?;
        Ok(summary)
    }

    fn remove_top_rows(&mut self, row: usize) -> Result<usize> {
        let removed = self.emulator.clear_rows_above(row)?;
        self.index.on_rows_removed_from_top(removed);
        debug!(session_id = %self.id, removed, "Removed archived rows from grid");
        Ok(removed)
    }

    /// Archive and drop the oldest rows once the grid reaches the threshold
    pub async fn check_auto_archive(&mut self) -> Result<Option<ArchiveSummary>> {
        let archive = &self.config.archive;
        if !archive.auto_archive_enabled {
            return Ok(None);
        }
        let (threshold, keep) = (archive.auto_archive_threshold, archive.auto_archive_keep_lines);
        let total = self.emulator.row_count();
        if total < threshold {
            return Ok(None);
        }

        let count = total - keep;
        info!(session_id = %self.id, rows = total, archiving = count, "Auto-archiving oldest rows");
        let lines = extract_lines(self.emulator.as_mut(), 0, count);
        if lines.is_empty() {
            // Only blank rows: nothing to keep, still trim the grid
            self.remove_top_rows(count)?;
            return Ok(None);
        }
        let summary = self
            .append(
                lines,
                format!("auto-archive-{}-lines", count),
                "auto_archive".to_string(),
            )
            .await?;
        self.remove_top_rows(count)?;
        Ok(Some(summary))
    }

    /// Formatted size of the history file
    pub async fn get_size(&self) -> Result<String> {
        Ok(crate::store::format_file_size(self.worker.file_size().await?))
    }

    pub async fn list_archives(&self) -> Vec<ArchiveRecord> {
        self.worker.archives().await
    }

    pub async fn get_archive(&self, index: usize) -> Result<ArchiveRecord> {
        self.worker.archive(index).await
    }

    /// Read another history file and return its content lines, oldest
    /// archive first, for splicing into the live view
    pub async fn import_into_session(&self, path: &Path) -> Result<Vec<LineEntry>> {
        let path = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || HistoryStore::import(&path))
            .await
            .map_err(|e| Error::Worker(format!("import task join error: {}", e)))??;
        Ok(file
            .archives
            .into_iter()
            .flat_map(|archive| archive.lines)
            .filter(|line| !line.is_marker())
            .collect())
    }

    /// Append another history file's archives to this session's file
    pub async fn merge_import(&self, path: PathBuf) -> Result<usize> {
        self.worker.merge_import(path, self.clock.wall()).await
    }

    pub async fn export(&self, selection: ArchiveSelection, filter: ExportFilter) -> Result<String> {
        self.worker.export(selection, filter).await
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.index.activate_filter(filter);
    }

    pub fn clear_filter(&mut self) {
        self.index.deactivate_filter();
    }

    pub fn get_filtered_indices(&mut self) -> Vec<usize> {
        self.index.get_indices(self.emulator.as_mut()).to_vec()
    }

    pub fn jump(&mut self, current_row: usize, direction: Direction) -> Option<usize> {
        self.index.jump(self.emulator.as_mut(), current_row, direction)
    }

    pub fn full_filter_scans(&self) -> usize {
        self.index.full_scans()
    }

    /// Flush what is pending and archive the whole grid with any streaming
    /// events not yet persisted
    pub async fn close(mut self) -> Result<Option<ArchiveSummary>> {
        let tail = self.decoder.finish();
        self.ingest_text(&tail);
        // Output held while suspended is archived too, untrimmed
        if let Some(pending) = self.buffer.drain_all() {
            self.deliver_pending(pending).await;
        }

        let total = self.emulator.row_count();
        let lines = extract_lines(self.emulator.as_mut(), 0, total);
        let context = self
            .last_command
            .clone()
            .unwrap_or_else(|| "session_close".to_string());
        let result = self.append(lines, format_row_range(0, total), context).await;
        info!(session_id = %self.id, archived = result.is_ok(), "Session closed");
        match result {
            Ok(summary) => Ok(Some(summary)),
            // Empty grid and no unpersisted events
            Err(Error::NothingToArchive(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove the session's history file after pending writes finish
    pub async fn delete_history(&self) -> Result<bool> {
        self.worker.delete(self.clock.wall()).await
    }
}

impl LifecycleListener for SessionController {
    fn on_suspend(&mut self, _at: Instant) {
        info!(session_id = %self.id, "Session suspended");
        self.buffer.on_suspend();
    }

    fn on_resume(&mut self, at: Instant, elapsed: Duration) {
        let report = self.buffer.on_resume(elapsed, at);
        info!(
            session_id = %self.id,
            away_ms = elapsed.as_millis() as u64,
            restored = report.restored,
            dropped = report.dropped,
            "Session resumed"
        );
    }
}

/// Owner of all live sessions, keyed by session id
pub struct SessionRegistry {
    config: HistoryConfig,
    clock: Arc<dyn Clock>,
    sessions: HashMap<String, SessionController>,
}

impl SessionRegistry {
    pub fn new(config: HistoryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            sessions: HashMap::new(),
        }
    }

    /// Open a session under `id`. If the id is already open, the existing
    /// controller is returned and `emulator` is dropped.
    pub fn open(&mut self, id: &str, emulator: Box<dyn Emulator>) -> Result<&mut SessionController> {
        if !self.sessions.contains_key(id) {
            let controller =
                SessionController::open(id, self.config.clone(), emulator, Arc::clone(&self.clock))?;
            self.sessions.insert(id.to_string(), controller);
        }
        self.get_mut(id)
    }

    /// Open a session under a fresh random id
    pub fn open_new(&mut self, emulator: Box<dyn Emulator>) -> Result<&mut SessionController> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.open(&id, emulator)
    }

    pub fn get(&self, id: &str) -> Result<&SessionController> {
        self.sessions
            .get(id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut SessionController> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Tick every session once
    pub async fn tick_all(&mut self) -> HashMap<String, TickReport> {
        let mut reports = HashMap::with_capacity(self.sessions.len());
        for (id, session) in self.sessions.iter_mut() {
            reports.insert(id.clone(), session.tick().await);
        }
        reports
    }

    /// Remove a session from the registry and close it
    pub async fn close(&mut self, id: &str) -> Result<Option<ArchiveSummary>> {
        let session = self
            .sessions
            .remove(id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))?;
        session.close().await
    }

    pub async fn close_all(&mut self) -> Vec<(String, Result<Option<ArchiveSummary>>)> {
        let mut results = Vec::new();
        for (id, session) in self.sessions.drain() {
            results.push((id, session.close().await));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::LineClass;
    use crate::clock::ManualClock;
    use crate::emulator::{PlainEmulator, VtEmulator};
    use crate::format::EventKind;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> HistoryConfig {
        HistoryConfig::default()
            .with_storage_path(dir.path())
            .without_auto_archive()
    }

    fn session(clock: &ManualClock, config: HistoryConfig) -> SessionController {
        SessionController::open("t1", config, Box::new(PlainEmulator::new()), Arc::new(clock.clone())).unwrap()
    }

    fn numbered(n: usize) -> String {
        (0..n).map(|i| format!("line {}\n", i)).collect()
    }

    #[test]
    fn test_find_clear_sequence() {
        assert_eq!(find_clear_sequence("abc\x1b[2Jdef"), Some(3));
        assert_eq!(find_clear_sequence("\x1b[H\x1b[J"), Some(0));
        assert_eq!(find_clear_sequence("x\x1b[3J\x1b[2J"), Some(1));
        assert_eq!(find_clear_sequence("\x1b[31mred"), None);
    }

    #[tokio::test]
    async fn test_tick_flushes_after_interval() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut s = session(&clock, config(&dir));

        s.ingest_bytes(b"hello\n");
        assert!(s.tick().await.flushed.is_none());
        clock.advance(Duration::from_millis(16));
        assert_eq!(s.tick().await.flushed.as_deref(), Some("hello\n"));
        assert_eq!(s.row_count(), 1);
    }

    #[tokio::test]
    async fn test_streaming_events_are_archived_once() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut s = session(&clock, config(&dir));

        s.ingest_text("first\n");
        for _ in 0..5 {
            clock.advance(Duration::from_secs(1));
            s.tick().await;
        }
        assert_eq!(s.stream_state(), StreamState::Paused);

        s.ingest_text("second\n");
        clock.advance(Duration::from_secs(1));
        let report = s.tick().await;
        assert_eq!(report.event.map(|e| e.kind), Some(EventKind::Resumed));

        let summary = s.archive_and_clear(2).await.unwrap();
        assert_eq!(summary.markers, 2);
        assert_eq!(summary.row_range, "0-2");

        s.ingest_text("third\n");
        clock.advance(Duration::from_secs(1));
        s.tick().await;
        let summary = s.archive_and_clear(1).await.unwrap();
        assert_eq!(summary.markers, 0);
        assert_eq!(s.list_archives().await.len(), 2);
    }

    #[tokio::test]
    async fn test_archive_and_clear_removes_rows() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut s = session(&clock, config(&dir));
        s.set_last_command("make test");
        s.ingest_text(&numbered(10));
        s.flush_pending().await;

        let summary = s.archive_and_clear(4).await.unwrap();
        assert_eq!(summary.line_count, 4);
        assert_eq!(s.row_count(), 6);

        let archive = s.get_archive(0).await.unwrap();
        assert_eq!(archive.command_context, "make test");
        assert_eq!(archive.lines[3].content, "line 3");
        assert!(matches!(s.get_archive(5).await, Err(Error::ArchiveIndex { .. })));
    }

    #[tokio::test]
    async fn test_archive_and_clear_empty_grid() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut s = session(&clock, config(&dir));
        let err = s.archive_and_clear(5).await.unwrap_err();
        assert!(matches!(err, Error::NothingToArchive(_)));
        assert!(!s.history_path().exists());
    }

    #[tokio::test]
    async fn test_clear_sequence_archives_first() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut s = session(&clock, config(&dir));
        s.set_last_command("clear");
        s.ingest_text(&numbered(5));
        s.ingest_text("\x1b[2Jafter\n");
        s.flush_pending().await;

        let archives = s.list_archives().await;
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].command_context, "before_clear: clear");
        assert_eq!(archives[0].row_range, "0-5");
        assert_eq!(archives[0].lines.len(), 5);
    }

    #[tokio::test]
    async fn test_short_grid_not_archived_before_clear() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut s = session(&clock, config(&dir));
        s.ingest_text(&numbered(3));
        s.flush_pending().await;
        assert!(s.archive_before_clear("clear").await.unwrap().is_none());
        assert!(s.list_archives().await.is_empty());
    }

    #[tokio::test]
    async fn test_auto_archive_keeps_tail() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut s = session(&clock, config(&dir).with_auto_archive(20, 5));
        s.ingest_text(&numbered(25));
        s.flush_pending().await;

        let summary = s.check_auto_archive().await.unwrap().unwrap();
        assert_eq!(summary.row_range, "auto-archive-20-lines");
        assert_eq!(summary.line_count, 20);
        assert_eq!(s.row_count(), 5);
        assert!(s.check_auto_archive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_filtered_navigation_survives_archive() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut s = session(&clock, config(&dir));
        s.ingest_text("ok\nerror one\nok\nok\nerror two\nok\n");
        s.flush_pending().await;

        s.set_filter(Filter::classes([LineClass::Error]));
        assert_eq!(s.get_filtered_indices(), vec![1, 4]);
        assert_eq!(s.jump(1, Direction::Next), Some(4));

        s.archive_and_clear(2).await.unwrap();
        assert_eq!(s.get_filtered_indices(), vec![2]);

        s.ingest_text("error three\n");
        s.flush_pending().await;
        assert_eq!(s.get_filtered_indices(), vec![2, 4]);
        assert_eq!(s.full_filter_scans(), 1);
    }

    #[tokio::test]
    async fn test_suspend_resume_through_lifecycle() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut s = session(&clock, config(&dir));

        s.notify_inactive();
        clock.advance(Duration::from_millis(500));
        let report = s.tick().await;
        assert!(matches!(report.lifecycle, Some(LifecycleTransition::Suspend { .. })));

        for i in 0..500 {
            s.ingest_text(&format!("chunk {}\n", i));
        }
        clock.advance(Duration::from_secs(15));
        assert!(s.tick().await.flushed.is_none());

        let resumed = s.notify_active();
        assert!(matches!(resumed, Some(LifecycleTransition::Resume { .. })));
        clock.advance(Duration::from_millis(100));
        let flushed = s.tick().await.flushed.unwrap();
        assert!(flushed.starts_with("chunk 480\n"));
        assert_eq!(s.row_count(), 20);
    }

    #[tokio::test]
    async fn test_close_archives_everything() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut s = session(&clock, config(&dir));
        let path = s.history_path().to_path_buf();
        s.ingest_text("unflushed tail\n");

        let summary = s.close().await.unwrap().unwrap();
        assert_eq!(summary.line_count, 1);
        let file = crate::store::load_file(&path).unwrap();
        assert_eq!(file.archives[0].command_context, "session_close");
        assert_eq!(file.archives[0].lines[0].content, "unflushed tail");
    }

    #[tokio::test]
    async fn test_close_archives_output_held_while_suspended() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut s = session(&clock, config(&dir));
        let path = s.history_path().to_path_buf();
        s.ingest_text("visible\n");
        s.flush_pending().await;

        s.notify_inactive();
        clock.advance(Duration::from_millis(600));
        s.tick().await;
        s.ingest_text("held while suspended\n");

        s.close().await.unwrap().unwrap();
        let file = crate::store::load_file(&path).unwrap();
        let texts: Vec<&str> = file.archives[0].lines.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(texts, vec!["visible", "held while suspended"]);
    }

    #[tokio::test]
    async fn test_repeated_clears_archive_each_row_once() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut s = SessionController::open(
            "clears",
            config(&dir),
            Box::new(VtEmulator::new(24, 80, 1000)),
            Arc::new(clock.clone()),
        )
        .unwrap();

        let first: String = (0..10).map(|i| format!("first {}\r\n", i)).collect();
        s.ingest_text(&format!("{}\x1b[H\x1b[2J\x1b[3J", first));
        s.flush_pending().await;
        assert_eq!(s.row_count(), 0);

        let second: String = (0..5).map(|i| format!("second {}\r\n", i)).collect();
        s.ingest_text(&format!("{}\x1b[H\x1b[2J", second));
        s.flush_pending().await;

        let archives = s.list_archives().await;
        assert_eq!(archives.len(), 2);
        let contents = |i: usize| -> Vec<String> {
            archives[i].lines.iter().map(|l| l.content.clone()).collect()
        };
        assert_eq!(contents(0), (0..10).map(|i| format!("first {}", i)).collect::<Vec<_>>());
        assert_eq!(contents(1), (0..5).map(|i| format!("second {}", i)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_burst_is_archived_before_scrollback_overflows() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let config = HistoryConfig::default()
            .with_storage_path(dir.path())
            .with_auto_archive(150, 50);
        let mut s = SessionController::open(
            "burst",
            config,
            Box::new(VtEmulator::new(5, 40, 200)),
            Arc::new(clock.clone()),
        )
        .unwrap();
        let path = s.history_path().to_path_buf();

        let burst: String = (0..1200).map(|i| format!("line {}\r\n", i)).collect();
        s.ingest_text(&burst);
        s.flush_pending().await;
        assert!(s.row_count() < 150);

        s.close().await.unwrap().unwrap();
        let file = crate::store::load_file(&path).unwrap();
        let archived: Vec<String> = file
            .archives
            .iter()
            .flat_map(|a| a.lines.iter())
            .filter(|l| !l.is_marker())
            .map(|l| l.content.clone())
            .collect();
        let expected: Vec<String> = (0..1200).map(|i| format!("line {}", i)).collect();
        assert_eq!(archived, expected);
        assert!(file.archives.len() > 2);
    }

    #[tokio::test]
    async fn test_open_rejects_threshold_beyond_emulator_capacity() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let config = HistoryConfig::default().with_storage_path(dir.path());
        let err = SessionController::open(
            "small",
            config,
            Box::new(VtEmulator::new(24, 80, 1000)),
            Arc::new(clock.clone()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("capacity of 1024 rows")));
    }

    #[test]
    fn test_split_after_lines() {
        assert_eq!(split_after_lines("a\nb\nc\nd", 2), vec!["a\nb\n", "c\nd"]);
        assert_eq!(split_after_lines("a\nb\n", 2), vec!["a\nb\n"]);
        assert_eq!(split_after_lines("no newline", 3), vec!["no newline"]);
    }

    #[tokio::test]
    async fn test_import_into_session_returns_content() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut other = SessionController::open(
            "other",
            config(&dir),
            Box::new(PlainEmulator::new()),
            Arc::new(clock.clone()),
        )
        .unwrap();
        other.ingest_text("imported a\nimported b\n");
        other.flush_pending().await;
        other.archive_and_clear(2).await.unwrap();

        let s = session(&clock, config(&dir));
        let lines = s.import_into_session(other.history_path()).await.unwrap();
        let texts: Vec<&str> = lines.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(texts, vec!["imported a", "imported b"]);
        assert!(s.list_archives().await.is_empty());
    }

    #[tokio::test]
    async fn test_registry() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let mut registry = SessionRegistry::new(config(&dir), Arc::new(clock.clone()));
        assert!(registry.is_empty());

        registry.open("a", Box::new(PlainEmulator::new())).unwrap().ingest_text("alpha\n");
        let b = registry.open_new(Box::new(PlainEmulator::new())).unwrap().id().to_string();
        assert_eq!(registry.len(), 2);
        assert!(matches!(registry.get("zzz"), Err(Error::UnknownSession(_))));

        clock.advance(Duration::from_millis(20));
        let reports = registry.tick_all().await;
        assert_eq!(reports["a"].flushed.as_deref(), Some("alpha\n"));
        assert!(reports[&b].flushed.is_none());

        assert!(registry.close("a").await.unwrap().is_some());
        assert!(registry.close("a").await.is_err());
        assert_eq!(registry.ids(), vec![b]);
    }
}
