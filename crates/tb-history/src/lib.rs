// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Terminal Browser history core
//
// Streams output of a long-running process into an emulator grid through a
// throttled, suspend-aware buffer, detects pauses in the stream, archives
// grid content to gzip-compressed .tbhist files and keeps an incremental
// index of rows matching the active filter for fast navigation.

pub mod buffer;
pub mod classify;
pub mod clock;
pub mod config;
pub mod emulator;
pub mod error;
pub mod format;
pub mod index;
pub mod lifecycle;
pub mod reader;
pub mod sanitize;
pub mod session;
pub mod store;
pub mod streaming;
pub mod worker;

// Re-export key types for convenience
pub use buffer::{FlushOutcome, Ingested, OutputBuffer, PendingText, ResumeReport};
pub use classify::{classify, Filter, LineClass};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ArchiveConfig, FlushConfig, HistoryConfig, LifecycleConfig, StreamingConfig, TB_HOME_ENV,
};
pub use emulator::{extract_lines, Emulator, GridRow, PlainEmulator, VtEmulator};
pub use error::{Error, Result};
pub use format::{
    ArchiveRecord, CellColors, EventKind, HistoryFile, LineEntry, LineKind, StreamingEvent,
    FORMAT_VERSION, HISTORY_EXTENSION,
};
pub use index::{Direction, FilteredIndexCache, RowSource};
pub use lifecycle::{LifecycleListener, LifecycleMonitor, LifecycleTransition};
pub use reader::{spawn_reader, ReaderEvent, READ_BUFFER_SIZE};
pub use sanitize::{collapse_newlines, sanitize, ChunkDecoder};
pub use session::{SessionController, SessionRegistry, TickReport};
pub use store::{
    export_plaintext, format_file_size, history_path, list_history_files, load_file,
    ArchiveSelection, ExportFilter, HistoryFileInfo, HistoryStore,
};
pub use streaming::{StreamState, StreamingDetector};
pub use worker::{ArchiveRequest, ArchiveSummary, ArchiveWorker};
