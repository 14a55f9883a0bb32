//! Run report: what a transaction did to each resource

use crate::logging::{Event, Level};
use crate::property::Change;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final state of a resource after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// Every property already matched
    InSync,
    /// At least one property was synced, or the resource was refreshed
    Changed,
    /// Declaration, provider selection, retrieval or sync failed
    Failed,
    /// Not attempted because a dependency failed or was skipped
    Skipped,
    /// Out of sync, but the run was in noop mode
    Noop,
    /// Excluded by the tag filter
    Filtered,
}

impl Status {
    /// Whether dependents of a resource in this state must be skipped
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Status::Failed | Status::Skipped)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::InSync => "in-sync",
            Status::Changed => "changed",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
            Status::Noop => "noop",
            Status::Filtered => "filtered",
        };
        f.write_str(label)
    }
}

/// Counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub in_sync: usize,
    pub changed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub noop: usize,
    pub filtered: usize,
}

impl Summary {
    pub fn add(&mut self, status: Status) {
        match status {
            Status::InSync => self.in_sync += 1,
            Status::Changed => self.changed += 1,
            Status::Failed => self.failed += 1,
            Status::Skipped => self.skipped += 1,
            Status::Noop => self.noop += 1,
            Status::Filtered => self.filtered += 1,
        }
    }

    /// Total number of resources accounted for
    pub fn total(&self) -> usize {
        self.in_sync + self.changed + self.failed + self.skipped + self.noop + self.filtered
    }

    /// Nothing failed or was skipped
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// What happened to one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub resource: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub changes: Vec<Change>,
    #[serde(default)]
    pub refreshed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started: DateTime<Utc>,
    pub duration_secs: f64,
    pub noop: bool,
    pub summary: Summary,
    /// In walk order; rejected declarations come first
    pub outcomes: Vec<ResourceOutcome>,
    /// Events emitted during the run at or above the log's minimum level,
    /// in order
    pub events: Vec<Event>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }

    pub fn outcome(&self, resource: &str) -> Option<&ResourceOutcome> {
        self.outcomes.iter().find(|o| o.resource == resource)
    }

    /// Events at or above `level`
    pub fn events_at_least(&self, level: Level) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.level >= level)
    }
}
