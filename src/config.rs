//! User settings: `settings.toml` in the config directory

use anyhow::{Context, Result};
use declarative::logging::{ConsoleDestination, FileDestination, SyslogDestination};
use declarative::{EventLog, Facts, Level, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Minimum event level: debug, info, notice, warning, err, ...
    pub log_level: String,
    /// Append events to this file
    pub log_file: Option<String>,
    /// Print events to stderr
    pub console: bool,
    /// Forward events to the process logger
    pub syslog: bool,
    pub noop: bool,
    pub tags: Vec<String>,
    /// Kill commands that run longer than this
    pub command_timeout_secs: Option<u64>,
    pub retry: RetrySettings,
    /// Fact overrides, applied on top of the detected host facts
    pub facts: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "notice".to_string(),
            log_file: None,
            console: true,
            syslog: false,
            noop: false,
            tags: Vec::new(),
            command_timeout_secs: None,
            retry: RetrySettings::default(),
            facts: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl RetrySettings {
    /// Delays must not shrink between attempts
    pub fn validate(&self) -> Result<()> {
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            anyhow::bail!(
                "retry.backoff_factor must be at least 1.0, got {}",
                self.backoff_factor
            );
        }
        Ok(())
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Settings {
    /// Load settings from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        settings
            .retry
            .validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        Ok(settings)
    }

    pub fn level(&self) -> Result<Level> {
        self.log_level
            .parse()
            .map_err(|e: String| anyhow::anyhow!("Invalid log_level: {}", e))
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_file.as_deref().map(crate::paths::expand)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// Host facts with the configured overrides applied
    pub fn facts(&self) -> Facts {
        let mut facts = Facts::from_host();
        facts.merge(&self.facts);
        facts
    }

    /// An event log with the configured destinations attached.
    ///
    /// `verbose` lowers the minimum level by one step per count.
    pub fn event_log(&self, verbose: u8, quiet: bool) -> Result<EventLog> {
        let configured = self.level()?;
        let level = if quiet {
            configured.max(Level::Warning)
        } else {
            match verbose {
                0 => configured,
                1 => configured.min(Level::Info),
                _ => Level::Debug,
            }
        };

        let log = EventLog::new(level);
        if self.console {
            log.add_destination(Box::new(ConsoleDestination));
        }
        if self.syslog {
            log.add_destination(Box::new(SyslogDestination::default()));
        }
        if let Some(path) = self.log_file() {
            log.add_destination(Box::new(FileDestination::new(path)));
        }
        Ok(log)
    }
}
