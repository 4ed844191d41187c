// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Host suspend/resume notifications
//
// The host reports activity changes as plain notifications. An inactive
// notification only turns into a suspend after the debounce delay, so a quick
// focus flicker never stalls output. The monitor is polled from the session
// tick and hands resulting transitions to a `LifecycleListener`.

use std::time::{Duration, Instant};
use tracing::debug;

/// Receiver of debounced suspend/resume transitions
pub trait LifecycleListener {
    fn on_suspend(&mut self, at: Instant);

    /// `elapsed` is how long the host was away
    fn on_resume(&mut self, at: Instant, elapsed: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleTransition {
    Suspend { at: Instant },
    Resume { at: Instant, elapsed: Duration },
}

impl LifecycleTransition {
    pub fn dispatch(self, listener: &mut dyn LifecycleListener) {
        match self {
            LifecycleTransition::Suspend { at } => listener.on_suspend(at),
            LifecycleTransition::Resume { at, elapsed } => listener.on_resume(at, elapsed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostState {
    Active,
    /// Inactive notification received, suspend not yet committed
    PendingSuspend { since: Instant },
    Suspended { since: Instant },
}

#[derive(Debug)]
pub struct LifecycleMonitor {
    delay: Duration,
    state: HostState,
}

impl LifecycleMonitor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: HostState::Active,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.state, HostState::Suspended { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, HostState::PendingSuspend { .. })
    }

    /// Host went to the background. Repeated notifications keep the first
    /// timestamp.
    pub fn notify_inactive(&mut self, now: Instant) {
        if self.state == HostState::Active {
            debug!(delay_ms = self.delay.as_millis() as u64, "Host inactive, suspend pending");
            self.state = HostState::PendingSuspend { since: now };
        }
    }

    /// Host is back. Cancels a pending suspend or ends a committed one.
    pub fn notify_active(&mut self, now: Instant) -> Option<LifecycleTransition> {
        match self.state {
            HostState::Active => None,
            HostState::PendingSuspend { .. } => {
                debug!("Host active again within debounce window, suspend cancelled");
                self.state = HostState::Active;
                None
            }
            HostState::Suspended { since } => {
                self.state = HostState::Active;
                Some(LifecycleTransition::Resume {
                    at: now,
                    elapsed: now.saturating_duration_since(since),
                })
            }
        }
    }

    /// Commit a pending suspend once the debounce delay has passed
    pub fn poll(&mut self, now: Instant) -> Option<LifecycleTransition> {
        match self.state {
            HostState::PendingSuspend { since } if now.saturating_duration_since(since) >= self.delay => {
                self.state = HostState::Suspended { since };
                Some(LifecycleTransition::Suspend { at: now })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        suspends: usize,
        resumes: Vec<Duration>,
    }

    impl LifecycleListener for Recorder {
        fn on_suspend(&mut self, _at: Instant) {
            self.suspends += 1;
        }

        fn on_resume(&mut self, _at: Instant, elapsed: Duration) {
            self.resumes.push(elapsed);
        }
    }

    fn monitor() -> LifecycleMonitor {
        LifecycleMonitor::new(Duration::from_millis(500))
    }

    #[test]
    fn test_suspend_after_debounce() {
        let mut m = monitor();
        let t0 = Instant::now();
        m.notify_inactive(t0);
        assert_eq!(m.poll(t0 + Duration::from_millis(499)), None);
        assert!(matches!(
            m.poll(t0 + Duration::from_millis(500)),
            Some(LifecycleTransition::Suspend { .. })
        ));
        assert!(m.is_suspended());
        assert_eq!(m.poll(t0 + Duration::from_secs(2)), None);
    }

    #[test]
    fn test_active_within_window_cancels() {
        let mut m = monitor();
        let t0 = Instant::now();
        m.notify_inactive(t0);
        assert_eq!(m.notify_active(t0 + Duration::from_millis(200)), None);
        assert_eq!(m.poll(t0 + Duration::from_secs(1)), None);
        assert!(!m.is_suspended());
    }

    #[test]
    fn test_resume_reports_time_away() {
        let mut m = monitor();
        let mut listener = Recorder::default();
        let t0 = Instant::now();

        m.notify_inactive(t0);
        // Duplicate notification does not restart the window
        m.notify_inactive(t0 + Duration::from_millis(400));
        m.poll(t0 + Duration::from_millis(500))
            .expect("suspend")
            .dispatch(&mut listener);
        m.notify_active(t0 + Duration::from_secs(15))
            .expect("resume")
            .dispatch(&mut listener);

        assert_eq!(listener.suspends, 1);
        assert_eq!(listener.resumes, vec![Duration::from_secs(15)]);
        assert_eq!(m.notify_active(t0 + Duration::from_secs(16)), None);
    }
}
