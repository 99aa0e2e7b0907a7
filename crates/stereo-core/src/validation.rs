//! Multi-stream synchronization check for capture events.
//!
//! A stereo event is only usable when every enabled component arrived and is
//! complete. Components that were not enabled may be absent or present; both
//! are fine. The check is pure and performs no I/O, so it can run on every
//! event of every worker concurrently.

use crate::component::{ComponentKind, StreamTransmitConfig};
use crate::event::{CaptureEvent, PayloadStatus};
use std::fmt;

/// Why one enabled component made the event unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentIssue {
    /// No payload of this kind.
    Missing,
    /// Present but damaged in transit.
    Incomplete { reason: String },
}

/// Diagnostic detail for an event that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteReport {
    /// Frame the report describes.
    pub frame_id: u64,
    /// One entry per offending component.
    pub issues: Vec<(ComponentKind, ComponentIssue)>,
}

impl fmt::Display for IncompleteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {}:", self.frame_id)?;
        for (kind, issue) in &self.issues {
            match issue {
                ComponentIssue::Missing => write!(f, " {kind} missing;")?,
                ComponentIssue::Incomplete { reason } => {
                    write!(f, " {kind} incomplete ({reason});")?;
                }
            }
        }
        Ok(())
    }
}

/// Verdict on one capture event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// Every enabled component is complete.
    Usable,
    /// At least one enabled component is missing or incomplete.
    Incomplete(IncompleteReport),
}

impl Validation {
    /// Every enabled component is present and complete.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Validation::Usable)
    }
}

/// Decide whether `event` carries every component `enabled` asks for.
#[must_use]
pub fn validate(event: &CaptureEvent, enabled: &StreamTransmitConfig) -> Validation {
    let ok = enabled
        .enabled()
        .all(|kind| event.component(kind).is_some_and(|p| p.is_complete()));
    if ok {
        return Validation::Usable;
    }

    let issues = enabled
        .enabled()
        .filter_map(|kind| match event.component(kind) {
            None => Some((kind, ComponentIssue::Missing)),
            Some(p) => match &p.status {
                PayloadStatus::Complete => None,
                PayloadStatus::Incomplete { reason } => Some((
                    kind,
                    ComponentIssue::Incomplete {
                        reason: reason.clone(),
                    },
                )),
            },
        })
        .collect();

    Validation::Incomplete(IncompleteReport {
        frame_id: event.frame_id(),
        issues,
    })
}
