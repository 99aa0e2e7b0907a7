//! Lifecycle states of an acquisition worker.
//!
//! ```text
//! Idle -> Opened -> Configured -> BuffersAttached -> Capturing -> Stopped -> Closed
//!           |                                                      ^
//!           +---------------- (not eligible) ----------------------+
//!
//! any state before Closed -> Failed -> Closed
//! ```
//!
//! `Failed` ends the run; the worker still closes the device afterwards, which
//! is the only transition out of it.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Lifecycle of one acquisition worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Created, device untouched.
    Idle,
    /// Device nodemap initialised.
    Opened,
    /// Every configuration step succeeded.
    Configured,
    /// The pinned pool is attached to the stream.
    BuffersAttached,
    /// Acquisition started.
    Capturing,
    /// Acquisition ended or was never started.
    Stopped,
    /// Teardown done; terminal.
    Closed,
    /// A fault ended the run; teardown still follows.
    Failed,
}

impl WorkerState {
    /// Whether `next` may follow `self`.
    ///
    /// `Failed` is reachable from every state but `Closed` and itself, and leads only to `Closed`.
    #[must_use]
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        match (self, next) {
            (Closed, _) => false,
            (Failed, Closed) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (Idle, Opened)
            | (Opened, Configured)
            | (Opened, Stopped)
            | (Configured, BuffersAttached)
            | (BuffersAttached, Capturing)
            | (Capturing, Stopped)
            | (Stopped, Closed) => true,
            _ => false,
        }
    }

    /// Lowercase name used in logs and summaries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Opened => "opened",
            WorkerState::Configured => "configured",
            WorkerState::BuffersAttached => "buffers_attached",
            WorkerState::Capturing => "capturing",
            WorkerState::Stopped => "stopped",
            WorkerState::Closed => "closed",
            WorkerState::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refused state change.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid worker transition {from} -> {to}")]
pub struct InvalidTransition {
    /// State the worker was in.
    pub from: WorkerState,
    /// State it was asked to enter.
    pub to: WorkerState,
}

/// Current state plus every state entered so far.
#[derive(Debug, Clone)]
pub struct StateTracker {
    current: WorkerState,
    history: Vec<WorkerState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            current: WorkerState::Idle,
            history: vec![WorkerState::Idle],
        }
    }
}

impl StateTracker {
    /// A tracker in `Idle`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent state.
    #[must_use]
    pub fn current(&self) -> WorkerState {
        self.current
    }

    /// Every state entered, starting with `Idle`.
    #[must_use]
    pub fn history(&self) -> &[WorkerState] {
        &self.history
    }

    /// Enter `next` if the transition is allowed.
    pub fn advance(&mut self, next: WorkerState) -> Result<(), InvalidTransition> {
        if !self.current.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.current,
                to: next,
            });
        }
        debug!(from = %self.current, to = %next, "worker state");
        self.current = next;
        self.history.push(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkerState::*;

    #[test]
    fn happy_path_is_linear() {
        let mut tracker = StateTracker::new();
        for state in [Opened, Configured, BuffersAttached, Capturing, Stopped, Closed] {
            tracker.advance(state).unwrap();
        }
        assert_eq!(tracker.current(), Closed);
        assert_eq!(tracker.history().len(), 7);
    }

    #[test]
    fn ineligible_device_skips_capture() {
        let mut tracker = StateTracker::new();
        tracker.advance(Opened).unwrap();
        tracker.advance(Stopped).unwrap();
        tracker.advance(Closed).unwrap();
        assert!(!tracker.history().contains(&Capturing));
    }

    #[test]
    fn failed_only_leads_to_closed() {
        for state in [Idle, Opened, Configured, BuffersAttached, Capturing, Stopped] {
            assert!(state.can_transition_to(Failed), "{state} -> failed");
        }
        assert!(Failed.can_transition_to(Closed));
        assert!(!Failed.can_transition_to(Capturing));
        assert!(!Closed.can_transition_to(Failed));
    }

    #[test]
    fn skipping_a_state_is_refused() {
        let mut tracker = StateTracker::new();
        tracker.advance(Opened).unwrap();
        assert_eq!(
            tracker.advance(Capturing),
            Err(InvalidTransition {
                from: Opened,
                to: Capturing
            })
        );
        assert_eq!(tracker.current(), Opened);
    }
}
