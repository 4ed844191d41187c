// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Streaming pause detection
//
// The detector never runs inside ingestion. The ingestion path only stamps
// the last-activity instant on the output buffer; the scheduler tick passes
// that instant to `check`, which decides the state transitions.

use crate::format::{EventKind, StreamingEvent};
use chrono::{DateTime, Local};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No output seen yet
    Idle,
    Active,
    Paused,
}

#[derive(Debug)]
pub struct StreamingDetector {
    threshold: Duration,
    check_interval: Duration,
    state: StreamState,
    /// Activity instant observed at the last check
    seen_activity: Option<Instant>,
    last_check: Option<Instant>,
    events: Vec<StreamingEvent>,
    /// Events before this index are already in a history file
    persisted: usize,
}

impl StreamingDetector {
    pub fn new(threshold: Duration, check_interval: Duration) -> Self {
        Self {
            threshold,
            check_interval,
            state: StreamState::Idle,
            seen_activity: None,
            last_check: None,
            events: Vec::new(),
            persisted: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn events(&self) -> &[StreamingEvent] {
        &self.events
    }

    /// Whether the periodic check interval has passed since the last check
    pub fn is_check_due(&self, now: Instant) -> bool {
        match self.last_check {
            Some(last) => now.saturating_duration_since(last) >= self.check_interval,
            None => true,
        }
    }

    /// Run one detection pass.
    ///
    /// `last_activity` is the most recent ingestion instant. Returns the
    /// event appended by this pass, if any.
    pub fn check(
        &mut self,
        now: Instant,
        wall: DateTime<Local>,
        last_activity: Option<Instant>,
    ) -> Option<StreamingEvent> {
        self.last_check = Some(now);
        let activity = last_activity?;
        let fresh = self.seen_activity.map_or(true, |seen| activity > seen);
        let previous = self.seen_activity;
        self.seen_activity = Some(activity);

        match self.state {
            StreamState::Idle => {
                debug!("Streaming started");
                self.state = StreamState::Active;
                self.check_silence(now, wall, activity)
            }
            StreamState::Active => self.check_silence(now, wall, activity),
            StreamState::Paused if fresh => {
                // Pause ran from the last output before it to this output
                let paused_for = previous
                    .map(|p| activity.saturating_duration_since(p))
                    .unwrap_or_default();
                self.state = StreamState::Active;
                let event = self.record(EventKind::Resumed, wall, paused_for);
                info!(
                    pause_secs = paused_for.as_secs_f64(),
                    "Streaming resumed"
                );
                // Output may already have gone quiet again
                self.check_silence(now, wall, activity);
                Some(event)
            }
            StreamState::Paused => None,
        }
    }

    fn check_silence(
        &mut self,
        now: Instant,
        wall: DateTime<Local>,
        activity: Instant,
    ) -> Option<StreamingEvent> {
        let silence = now.saturating_duration_since(activity);
        if silence < self.threshold {
            return None;
        }
        self.state = StreamState::Paused;
        info!(gap_secs = silence.as_secs_f64(), "Streaming paused");
        Some(self.record(EventKind::Stopped, wall, silence))
    }

    fn record(&mut self, kind: EventKind, wall: DateTime<Local>, gap: Duration) -> StreamingEvent {
        let event = StreamingEvent {
            kind,
            timestamp: wall,
            gap_seconds: gap.as_secs_f64(),
        };
        self.events.push(event.clone());
        event
    }

    /// Events not yet handed to an archive; marks them persisted
    pub fn take_unpersisted(&mut self) -> Vec<StreamingEvent> {
        let fresh = self.events[self.persisted..].to_vec();
        self.persisted = self.events.len();
        fresh
    }

    /// Undo `take_unpersisted` after a failed archive write
    pub fn restore_unpersisted(&mut self, count: usize) {
        self.persisted = self.persisted.saturating_sub(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn detector() -> StreamingDetector {
        StreamingDetector::new(Duration::from_secs(3), Duration::from_secs(1))
    }

    #[test]
    fn test_idle_until_first_output() {
        let mut d = detector();
        let t0 = Instant::now();
        assert_eq!(d.check(t0, Local::now(), None), None);
        assert_eq!(d.state(), StreamState::Idle);
        assert_eq!(d.check(t0, Local::now(), Some(t0)), None);
        assert_eq!(d.state(), StreamState::Active);
    }

    #[test]
    fn test_stop_then_resume_scenario() {
        let mut d = detector();
        let t0 = Instant::now();
        let wall = Local::now();

        // Output at t=0, checks every second
        d.check(t0, wall, Some(t0));
        for s in 1..3 {
            assert_eq!(d.check(t0 + Duration::from_secs(s), wall, Some(t0)), None);
        }

        // The first check at or past the threshold stops the stream
        let stopped = d.check(t0 + Duration::from_secs(3), wall, Some(t0)).unwrap();
        assert_eq!(stopped.kind, EventKind::Stopped);
        assert!((stopped.gap_seconds - 3.0).abs() < 1e-9);
        assert_eq!(d.state(), StreamState::Paused);

        // Still silent, no duplicate stop
        for s in 4..7 {
            assert_eq!(d.check(t0 + Duration::from_secs(s), wall, Some(t0)), None);
        }

        let t_out = t0 + Duration::from_millis(6500);
        let resumed = d.check(t0 + Duration::from_secs(7), wall, Some(t_out)).unwrap();
        assert_eq!(resumed.kind, EventKind::Resumed);
        assert!((resumed.gap_seconds - 6.5).abs() < 1e-9);
        assert_eq!(d.state(), StreamState::Active);

        let kinds: Vec<EventKind> = d.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Stopped, EventKind::Resumed]);
    }

    #[test]
    fn test_late_check_reports_whole_silence() {
        let mut d = detector();
        let t0 = Instant::now();
        let wall = Local::now();

        // Checks at 1.4s steps straddle the threshold
        d.check(t0, wall, Some(t0));
        for ms in [1400, 2800] {
            assert_eq!(d.check(t0 + Duration::from_millis(ms), wall, Some(t0)), None);
        }
        let stopped = d.check(t0 + Duration::from_millis(4200), wall, Some(t0)).unwrap();
        assert!((stopped.gap_seconds - 4.2).abs() < 1e-9);
        assert_eq!(d.events().len(), 1);
    }

    #[test]
    fn test_check_interval() {
        let mut d = detector();
        let t0 = Instant::now();
        assert!(d.is_check_due(t0));
        d.check(t0, Local::now(), None);
        assert!(!d.is_check_due(t0 + Duration::from_millis(999)));
        assert!(d.is_check_due(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_take_unpersisted_hands_out_each_event_once() {
        let mut d = detector();
        let t0 = Instant::now();
        d.check(t0, Local::now(), Some(t0));
        d.check(t0 + Duration::from_secs(3), Local::now(), Some(t0));
        assert_eq!(d.take_unpersisted().len(), 1);
        assert!(d.take_unpersisted().is_empty());

        d.check(t0 + Duration::from_secs(4), Local::now(), Some(t0 + Duration::from_secs(4)));
        let fresh = d.take_unpersisted();
        assert_eq!(fresh.len(), 1);
        d.restore_unpersisted(fresh.len());
        assert_eq!(d.take_unpersisted(), fresh);
    }
}
