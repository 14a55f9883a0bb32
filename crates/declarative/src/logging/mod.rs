//! Event log - multi-destination structured logging for every decision
//!
//! An [`EventLog`] is created per run, destinations are attached to it, and it
//! is passed by reference to every component that needs to report something.
//! Delivery is synchronous and happens under a single lock, so every
//! destination sees events in the same order, numbered by a global sequence.

mod destination;

pub use destination::{
    ConsoleDestination, Destination, FileDestination, MemoryDestination, MemoryHandle,
    SyslogDestination,
};

use crate::value::ResourceRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

/// Severity of an event, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Notice,
    Warning,
    Err,
    Alert,
    Emerg,
    Crit,
}

impl Level {
    /// All levels in ascending severity
    pub const ALL: [Level; 8] = [
        Level::Debug,
        Level::Info,
        Level::Notice,
        Level::Warning,
        Level::Err,
        Level::Alert,
        Level::Emerg,
        Level::Crit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Notice => "notice",
            Level::Warning => "warning",
            Level::Err => "err",
            Level::Alert => "alert",
            Level::Emerg => "emerg",
            Level::Crit => "crit",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        Level::ALL
            .iter()
            .copied()
            .find(|level| level.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

/// Where an event came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A resource instance; its tags are copied onto the event
    Resource {
        reference: ResourceRef,
        tags: BTreeSet<String>,
    },
    /// An engine component such as "transaction"
    Component(String),
    /// Free text
    Text(String),
}

impl Source {
    pub fn component(name: &str) -> Self {
        Self::Component(name.to_string())
    }

    fn tags(&self) -> BTreeSet<String> {
        match self {
            Self::Resource { tags, .. } => tags.clone(),
            _ => BTreeSet::new(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource { reference, .. } => write!(f, "{}", reference),
            Self::Component(name) => f.write_str(name),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for Source {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<&ResourceRef> for Source {
    fn from(reference: &ResourceRef) -> Self {
        Self::Resource {
            reference: reference.clone(),
            tags: BTreeSet::new(),
        }
    }
}

/// An immutable log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the run's total order
    pub seq: u64,
    pub time: DateTime<Utc>,
    pub level: Level,
    /// Rendered source (`Service[nginx]`, a component name, or free text)
    pub source: String,
    pub message: String,
    pub tags: BTreeSet<String>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.source, self.level, self.message)
    }
}

/// Handle returned by [`EventLog::add_destination`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DestinationId(usize);

struct Inner {
    destinations: Vec<(DestinationId, Box<dyn Destination>)>,
    min_level: Level,
    next_seq: u64,
    next_id: usize,
}

/// Synchronous fan-out of events to every attached destination
pub struct EventLog {
    inner: Mutex<Inner>,
}

impl EventLog {
    /// Create an event log that drops events below `min_level`
    pub fn new(min_level: Level) -> Self {
        Self {
            inner: Mutex::new(Inner {
                destinations: Vec::new(),
                min_level,
                next_seq: 0,
                next_id: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Attach a destination; it receives every subsequent event
    pub fn add_destination(&self, destination: Box<dyn Destination>) -> DestinationId {
        let mut inner = self.lock();
        let id = DestinationId(inner.next_id);
        inner.next_id += 1;
        log::debug!("Adding log destination {}", destination.name());
        inner.destinations.push((id, destination));
        id
    }

    /// Detach and flush a single destination
    pub fn remove_destination(&self, id: DestinationId) -> bool {
        let mut inner = self.lock();
        let Some(pos) = inner.destinations.iter().position(|(d, _)| *d == id) else {
            return false;
        };
        let (_, mut destination) = inner.destinations.remove(pos);
        if let Err(e) = destination.flush() {
            log::warn!("Failed to flush log destination {}: {}", destination.name(), e);
        }
        true
    }

    /// Number of attached destinations
    pub fn destination_count(&self) -> usize {
        self.lock().destinations.len()
    }

    pub fn min_level(&self) -> Level {
        self.lock().min_level
    }

    pub fn set_min_level(&self, level: Level) {
        self.lock().min_level = level;
    }

    /// Record an event.
    ///
    /// Returns the delivered event, or `None` when it was below the minimum
    /// level. Never fails: a destination that cannot be written is reported
    /// to the remaining destinations instead.
    pub fn emit(
        &self,
        level: Level,
        source: impl Into<Source>,
        message: impl Into<String>,
    ) -> Option<Event> {
        let source = source.into();
        let mut inner = self.lock();
        if level < inner.min_level {
            return None;
        }

        let event = Event {
            seq: inner.next_seq,
            time: Utc::now(),
            level,
            source: source.to_string(),
            message: message.into(),
            tags: source.tags(),
        };
        inner.next_seq += 1;

        let mut failures = Vec::new();
        for (id, destination) in inner.destinations.iter_mut() {
            if let Err(e) = destination.write(&event) {
                failures.push((*id, destination.name(), e));
            }
        }

        for (failed_id, name, error) in failures {
            let report = Event {
                seq: inner.next_seq,
                time: Utc::now(),
                level: Level::Err,
                source: "eventlog".to_string(),
                message: format!("Could not write to log destination {}: {}", name, error),
                tags: BTreeSet::new(),
            };
            inner.next_seq += 1;
            for (id, destination) in inner.destinations.iter_mut() {
                if *id != failed_id {
                    let _ = destination.write(&report);
                }
            }
        }

        Some(event)
    }

    pub fn debug(&self, source: impl Into<Source>, message: impl Into<String>) -> Option<Event> {
        self.emit(Level::Debug, source, message)
    }

    pub fn info(&self, source: impl Into<Source>, message: impl Into<String>) -> Option<Event> {
        self.emit(Level::Info, source, message)
    }

    pub fn notice(&self, source: impl Into<Source>, message: impl Into<String>) -> Option<Event> {
        self.emit(Level::Notice, source, message)
    }

    pub fn warning(&self, source: impl Into<Source>, message: impl Into<String>) -> Option<Event> {
        self.emit(Level::Warning, source, message)
    }

    pub fn err(&self, source: impl Into<Source>, message: impl Into<String>) -> Option<Event> {
        self.emit(Level::Err, source, message)
    }

    /// Flush and release every destination.
    ///
    /// Safe to call when nothing is attached.
    pub fn close(&self) {
        let mut inner = self.lock();
        for (_, mut destination) in inner.destinations.drain(..) {
            if let Err(e) = destination.flush() {
                log::warn!("Failed to flush log destination {}: {}", destination.name(), e);
            }
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(Level::Info)
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        self.close();
    }
}
