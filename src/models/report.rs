//! Outcome of a single sweep, and its textual rendering.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

use crate::models::policy::RetentionPolicy;

/// An object the sweep removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedObject {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A non-fatal failure recorded during traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepFailure {
    /// Listing a prefix failed; its subtree was skipped.
    Listing { prefix: String, message: String },
    /// Deleting an expired object failed; it was left in place.
    Delete { object: String, message: String },
}

impl fmt::Display for SweepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listing { prefix, message } => {
                write!(f, "ListObjects ERROR prefix={:?}: {}", prefix, message)
            }
            Self::Delete { object, message } => {
                write!(f, "DeleteObject ERROR object={:?}: {}", object, message)
            }
        }
    }
}

/// Something the sweep did, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepEvent {
    Deleted(DeletedObject),
    Failed(SweepFailure),
}

/// Accumulated result of a sweep.
///
/// The sweeper owns the report while traversing; once it hands the report
/// back nothing mutates it again.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub bucket_name: String,
    pub retention_days: u32,
    pub cutoff: DateTime<Utc>,
    events: Vec<SweepEvent>,
    pub listings_issued: u64,
    pub objects_evaluated: u64,
    pub objects_retained: u64,
    pub unknown_age_skipped: u64,
    /// Set when the sweep stopped before the frontier was exhausted.
    pub cancelled: bool,
}

impl SweepReport {
    pub fn new(policy: &RetentionPolicy, cutoff: DateTime<Utc>) -> Self {
        Self {
            bucket_name: policy.bucket_name.clone(),
            retention_days: policy.retention_days,
            cutoff,
            events: Vec::new(),
            listings_issued: 0,
            objects_evaluated: 0,
            objects_retained: 0,
            unknown_age_skipped: 0,
            cancelled: false,
        }
    }

    pub fn record_deletion(&mut self, deleted: DeletedObject) {
        self.events.push(SweepEvent::Deleted(deleted));
    }

    pub fn record_failure(&mut self, failure: SweepFailure) {
        self.events.push(SweepEvent::Failed(failure));
    }

    pub fn deleted(&self) -> impl Iterator<Item = &DeletedObject> {
        self.events.iter().filter_map(|event| match event {
            SweepEvent::Deleted(deleted) => Some(deleted),
            SweepEvent::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &SweepFailure> {
        self.events.iter().filter_map(|event| match event {
            SweepEvent::Failed(failure) => Some(failure),
            SweepEvent::Deleted(_) => None,
        })
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted().count()
    }

    /// `(object name, error)` pairs for every failed delete.
    pub fn per_object_errors(&self) -> impl Iterator<Item = (&str, &str)> {
        self.failures().filter_map(|failure| match failure {
            SweepFailure::Delete { object, message } => Some((object.as_str(), message.as_str())),
            SweepFailure::Listing { .. } => None,
        })
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Total deleted objects: {} (bucket: {}, retention: {} days)",
            self.deleted_count(),
            self.bucket_name,
            self.retention_days
        )
    }

    /// Render the invocation output: one line per deletion or failure in the
    /// order they happened, a cancellation notice if the sweep was
    /// interrupted, then the summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            match event {
                SweepEvent::Deleted(obj) => out.push_str(&format!(
                    "deleting: {} (created: {})\n",
                    obj.name,
                    obj.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
                )),
                SweepEvent::Failed(failure) => {
                    out.push_str(&failure.to_string());
                    out.push('\n');
                }
            }
        }
        if self.cancelled {
            out.push_str("sweep cancelled before completion; partial results follow\n");
        }
        out.push_str(&self.summary_line());
        out.push('\n');
        out
    }
}
