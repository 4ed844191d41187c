// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Output buffer between the reader thread and the emulator
//
// Fragments accumulate until a flush deadline passes. The deadline is armed
// by the first fragment after a flush and its distance adapts to how much is
// pending. While the host is suspended, fragments go to a separate buffer
// that is replayed (possibly trimmed) on resume.

use crate::config::FlushConfig;
use crate::emulator::Emulator;
use crate::sanitize::{collapse_newlines, sanitize};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone)]
struct Fragment {
    text: String,
    received: Instant,
}

#[derive(Debug, Default)]
struct BufferState {
    active: Vec<Fragment>,
    suspended: Option<Vec<Fragment>>,
    flush_due: Option<Instant>,
    last_activity: Option<Instant>,
}

/// Where an ingested chunk ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// Queued for the next flush, due at the given instant
    Queued { flush_due: Instant },
    /// Held in the suspend buffer until resume
    Suspended,
    /// Chunk was empty
    Ignored,
}

/// Outcome of a resume notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResumeReport {
    pub restored: usize,
    pub dropped: usize,
    pub trimmed: bool,
}

/// Outcome of a flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Empty,
    Delivered { bytes: usize, fragments: usize },
    /// The emulator refused the text; it was discarded
    Rejected { bytes: usize },
}

/// Pending output drained by [`OutputBuffer::take_pending`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingText {
    pub text: String,
    pub fragments: usize,
    /// Arrival time of the oldest fragment included
    pub oldest: Instant,
}

/// Thread-safe accumulator for sanitized process output.
///
/// `ingest` and `take_pending` hold the same lock, so a flush never sees a
/// half-appended fragment.
#[derive(Debug)]
pub struct OutputBuffer {
    config: FlushConfig,
    state: Mutex<BufferState>,
}

impl OutputBuffer {
    pub fn new(config: FlushConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BufferState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        // Fragments are plain strings, a poisoned lock still holds usable state
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Flush interval for the given number of pending fragments
    pub fn interval_for(&self, pending: usize) -> Duration {
        let ms = if pending > self.config.heavy_fragments {
            self.config.heavy_interval_ms
        } else if pending > self.config.moderate_fragments {
            self.config.moderate_interval_ms
        } else {
            self.config.base_interval_ms
        };
        Duration::from_millis(ms)
    }

    /// Sanitize and queue a decoded chunk
    pub fn ingest(&self, text: &str, now: Instant) -> Ingested {
        if text.is_empty() {
            return Ingested::Ignored;
        }
        let fragment = Fragment {
            text: sanitize(text).into_owned(),
            received: now,
        };

        let mut state = self.lock();
        state.last_activity = Some(now);

        if let Some(held) = state.suspended.as_mut() {
            held.push(fragment);
            trace!(held = held.len(), "Buffered output while suspended");
            return Ingested::Suspended;
        }

        state.active.push(fragment);
        let interval = self.interval_for(state.active.len());
        let due = *state.flush_due.get_or_insert(now + interval);
        Ingested::Queued { flush_due: due }
    }

    /// Deadline of the next scheduled flush, if one is armed
    pub fn flush_due(&self) -> Option<Instant> {
        self.lock().flush_due
    }

    pub fn is_flush_due(&self, now: Instant) -> bool {
        matches!(self.lock().flush_due, Some(due) if now >= due)
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.lock().last_activity
    }

    pub fn pending_fragments(&self) -> usize {
        self.lock().active.len()
    }

    pub fn suspended_fragments(&self) -> usize {
        self.lock().suspended.as_ref().map_or(0, Vec::len)
    }

    pub fn is_suspended(&self) -> bool {
        self.lock().suspended.is_some()
    }

    /// Drain the active segment, joined and with long newline runs collapsed.
    ///
    /// Disarms the flush deadline. Returns `None` when nothing is pending.
    pub fn take_pending(&self) -> Option<PendingText> {
        let fragments = {
            let mut state = self.lock();
            state.flush_due = None;
            std::mem::take(&mut state.active)
        };
        if fragments.is_empty() {
            return None;
        }

        let count = fragments.len();
        let oldest = fragments.iter().map(|f| f.received).min()?;
        let joined: String = fragments.into_iter().map(|f| f.text).collect();
        Some(PendingText {
            text: collapse_newlines(&joined).into_owned(),
            fragments: count,
            oldest,
        })
    }

    /// Drain everything held, output buffered while suspended included and
    /// untrimmed. The buffer is left active.
    pub fn drain_all(&self) -> Option<PendingText> {
        {
            let mut state = self.lock();
            if let Some(mut held) = state.suspended.take() {
                debug!(held = held.len(), "Draining suspended output");
                held.append(&mut state.active);
                state.active = held;
            }
        }
        self.take_pending()
    }

    /// Hand pending text to the emulator.
    ///
    /// A rejected payload is logged and dropped rather than retried.
    pub fn flush(&self, emulator: &mut dyn Emulator) -> FlushOutcome {
        let Some(pending) = self.take_pending() else {
            return FlushOutcome::Empty;
        };
        deliver(emulator, pending)
    }

    /// Stop flushing and hold all output until resume. Idempotent.
    pub fn on_suspend(&self) {
        let mut state = self.lock();
        if state.suspended.is_some() {
            return;
        }
        let held = std::mem::take(&mut state.active);
        debug!(moved = held.len(), "Output buffer suspended");
        state.suspended = Some(held);
        state.flush_due = None;
    }

    /// Replay held output after a suspension that lasted `elapsed`.
    ///
    /// Long suspensions only keep the most recent fragments. The replay is
    /// scheduled after the settle delay so layout can stabilize first.
    /// Idempotent: resuming an active buffer does nothing.
    pub fn on_resume(&self, elapsed: Duration, now: Instant) -> ResumeReport {
        let mut state = self.lock();
        let Some(mut combined) = state.suspended.take() else {
            return ResumeReport::default();
        };
        combined.append(&mut state.active);

        let mut report = ResumeReport::default();
        if elapsed >= self.config.resume_trim_after() {
            let keep = self.config.resume_keep_fragments;
            if combined.len() > keep {
                report.dropped = combined.len() - keep;
                combined.drain(..report.dropped);
            }
            for fragment in &mut combined {
                let collapsed = collapse_newlines(&fragment.text).into_owned();
                fragment.text = collapsed;
            }
            report.trimmed = true;
        }
        report.restored = combined.len();
        state.active = combined;

        if !state.active.is_empty() {
            state.flush_due = Some(now + self.config.resume_settle());
        }

        debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            restored = report.restored,
            dropped = report.dropped,
            "Output buffer resumed"
        );
        report
    }
}

/// Feed drained text to the emulator, logging a rejection
pub(crate) fn deliver(emulator: &mut dyn Emulator, pending: PendingText) -> FlushOutcome {
    let bytes = pending.text.len();
    match emulator.feed(&pending.text) {
        Ok(()) => {
            trace!(
                bytes,
                fragments = pending.fragments,
                waited_ms = pending.oldest.elapsed().as_millis() as u64,
                "Flushed output"
            );
            FlushOutcome::Delivered {
                bytes,
                fragments: pending.fragments,
            }
        }
        Err(e) => {
            warn!(error = %e, bytes, "Emulator rejected flushed output, discarding");
            FlushOutcome::Rejected { bytes }
        }
    }
}
