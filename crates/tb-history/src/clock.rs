// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Time source shared by the buffer, detector and session controller.
//
// Monotonic instants drive throttling and silence detection; wall-clock
// timestamps only label persisted events and archives.

use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn wall(&self) -> DateTime<Local>;
}

/// Real time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock that only moves when told to. Monotonic and wall time advance together.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualTime>>,
}

#[derive(Debug)]
struct ManualTime {
    now: Instant,
    wall: DateTime<Local>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Local::now())
    }

    pub fn starting_at(wall: DateTime<Local>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualTime {
                now: Instant::now(),
                wall,
            })),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut time = self.lock();
        time.now += by;
        let delta = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        time.wall = time.wall + delta;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualTime> {
        // A poisoned clock still holds a valid timestamp
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.lock().now
    }

    fn wall(&self) -> DateTime<Local> {
        self.lock().wall
    }
}
