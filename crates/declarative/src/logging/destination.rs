//! Log destinations: file, console, syslog-equivalent, memory

use super::{Event, Level};
use colored::Colorize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A sink for events
///
/// Each destination formats events its own way. Write errors are returned
/// to the [`EventLog`](super::EventLog), which reports them elsewhere.
pub trait Destination: Send {
    /// Name used when reporting problems with this destination
    fn name(&self) -> String;

    /// Deliver one event
    fn write(&mut self, event: &Event) -> io::Result<()>;

    /// Flush buffered output; called on close
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Appends one line per event to a file.
///
/// The file and any missing parent directories are created on first write.
pub struct FileDestination {
    path: PathBuf,
    file: Option<File>,
}

impl FileDestination {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }

    fn open(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file not open"))
    }
}

impl Destination for FileDestination {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn write(&mut self, event: &Event) -> io::Result<()> {
        let line = format!("{} {}\n", event.time.to_rfc3339(), event);
        let file = self.open()?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Prints events to the terminal, errors and above on stderr
pub struct ConsoleDestination;

impl ConsoleDestination {
    fn colored_level(level: Level) -> colored::ColoredString {
        match level {
            Level::Debug => level.as_str().dimmed(),
            Level::Info => level.as_str().blue(),
            Level::Notice => level.as_str().cyan(),
            Level::Warning => level.as_str().yellow(),
            _ => level.as_str().red().bold(),
        }
    }
}

impl Destination for ConsoleDestination {
    fn name(&self) -> String {
        "console".to_string()
    }

    fn write(&mut self, event: &Event) -> io::Result<()> {
        let line = format!(
            "{}: {}: {}",
            Self::colored_level(event.level),
            event.source,
            event.message
        );
        if event.level >= Level::Err {
            writeln!(io::stderr().lock(), "{}", line)
        } else {
            writeln!(io::stdout().lock(), "{}", line)
        }
    }
}

/// Syslog-equivalent facility.
///
/// Forwards events into the `log` facade, so whichever logger the host
/// process installed (env_logger, a syslog backend, ...) receives them.
pub struct SyslogDestination {
    target: String,
}

impl SyslogDestination {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
        }
    }

    fn facade_level(level: Level) -> log::Level {
        match level {
            Level::Debug => log::Level::Debug,
            Level::Info | Level::Notice => log::Level::Info,
            Level::Warning => log::Level::Warn,
            _ => log::Level::Error,
        }
    }
}

impl Default for SyslogDestination {
    fn default() -> Self {
        Self::new("converge")
    }
}

impl Destination for SyslogDestination {
    fn name(&self) -> String {
        format!("syslog:{}", self.target)
    }

    fn write(&mut self, event: &Event) -> io::Result<()> {
        log::log!(
            target: self.target.as_str(),
            Self::facade_level(event.level),
            "{}: {}",
            event.source,
            event.message
        );
        Ok(())
    }
}

/// Collects events in memory for reports and tests
pub struct MemoryDestination {
    events: Arc<Mutex<Vec<Event>>>,
}

/// Read side of a [`MemoryDestination`]
#[derive(Clone)]
pub struct MemoryHandle {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle for reading collected events back after the destination
    /// has been handed to an [`EventLog`](super::EventLog)
    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            events: Arc::clone(&self.events),
        }
    }
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl Destination for MemoryDestination {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn write(&mut self, event: &Event) -> io::Result<()> {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        Ok(())
    }
}

impl MemoryHandle {
    /// Snapshot of everything collected so far
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
