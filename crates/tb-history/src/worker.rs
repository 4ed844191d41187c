// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Background archive writes
//
// File IO for a session runs on the blocking pool while holding the
// session's write lock. The lock guard moves into the blocking task, so a
// write that has started finishes even if the caller stops waiting, and any
// later operation (including delete) queues behind it.

use crate::error::{Error, Result};
use crate::format::{ArchiveRecord, EventKind, HistoryFile, LineEntry, StreamingEvent};
use crate::store::{ArchiveSelection, ExportFilter, HistoryStore};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Everything needed to append one archive
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub lines: Vec<LineEntry>,
    pub row_range: String,
    pub command_context: String,
    pub events: Vec<StreamingEvent>,
    pub at: DateTime<Local>,
}

/// What a completed archive write produced
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveSummary {
    pub row_range: String,
    pub line_count: usize,
    pub markers: usize,
    pub total_archives: usize,
}

/// Serialized access to one session's history store
#[derive(Debug, Clone)]
pub struct ArchiveWorker {
    store: Arc<Mutex<HistoryStore>>,
    path: PathBuf,
}

impl ArchiveWorker {
    pub fn new(store: HistoryStore) -> Self {
        let path = store.path().to_path_buf();
        Self {
            store: Arc::new(Mutex::new(store)),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` on the blocking pool with the write lock held
    async fn run<T, F>(&self, what: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut HistoryStore) -> Result<T> + Send + 'static,
    {
        let mut guard = Arc::clone(&self.store).lock_owned().await;
        tokio::task::spawn_blocking(move || op(&mut guard))
            .await
            .map_err(|e| Error::Worker(format!("{} task join error: {}", what, e)))?
    }

    pub async fn append(&self, request: ArchiveRequest) -> Result<ArchiveSummary> {
        self.run("archive", move |store| {
            let ArchiveRequest {
                lines,
                row_range,
                command_context,
                events,
                at,
            } = request;
            let record = store.append_archive(lines, &row_range, &command_context, events, at)?;
            let line_count = record.line_count;
            let markers = record.marker_lines().count();
            Ok(ArchiveSummary {
                row_range,
                line_count,
                markers,
                total_archives: store.archives().len(),
            })
        })
        .await
    }

    pub async fn append_streaming_marker(
        &self,
        kind: EventKind,
        timestamp: DateTime<Local>,
        gap_seconds: f64,
    ) -> Result<()> {
        self.run("marker", move |store| {
            store.append_streaming_marker(kind, timestamp, gap_seconds)
        })
        .await
    }

    /// Delete the file once any in-flight write has finished
    pub async fn delete(&self, now: DateTime<Local>) -> Result<bool> {
        debug!(path = %self.path.display(), "Delete queued behind pending writes");
        self.run("delete", move |store| store.delete(now)).await
    }

    pub async fn merge_import(&self, path: PathBuf, now: DateTime<Local>) -> Result<usize> {
        self.run("import", move |store| store.merge_import(&path, now)).await
    }

    pub async fn export(&self, selection: ArchiveSelection, filter: ExportFilter) -> Result<String> {
        self.run("export", move |store| store.export_plaintext(selection, filter))
            .await
    }

    pub async fn file_size(&self) -> Result<u64> {
        self.run("size", |store| store.file_size()).await
    }

    pub async fn archives(&self) -> Vec<ArchiveRecord> {
        self.store.lock().await.archives().to_vec()
    }

    pub async fn archive(&self, index: usize) -> Result<ArchiveRecord> {
        self.store.lock().await.archive(index).cloned()
    }

    pub async fn snapshot(&self) -> HistoryFile {
        self.store.lock().await.file().clone()
    }
}
