//! Provider framework.
//!
//! A provider implements one resource type for a class of platforms. Each
//! registered provider is a [`ProviderDescriptor`]: the static metadata
//! the engine uses for selection (confinement rules, `default_for` facts,
//! declared features, command search paths) plus a stateless
//! [`Provider`] behaviour object that does the actual work.
//!
//! Selection ranks candidates and binds the first one whose confinement
//! passes; see [`Registry::select_provider`](crate::Registry::select_provider).

use crate::command::{self, CommandRunner, command_line};
use crate::error::{Error, Result};
use crate::facts::Facts;
use crate::logging::{EventLog, Level, Source};
use crate::value::{Attributes, ResourceRef, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Optional capabilities a provider declares up front
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    /// Can report run state natively
    Status,
    /// Can enable/disable at boot
    Enableable,
    /// Implements [`Provider::refresh`]
    Refreshable,
    /// Its search paths can be scanned for instances
    Discoverable,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Status => "status",
            Self::Enableable => "enableable",
            Self::Refreshable => "refreshable",
            Self::Discoverable => "discoverable",
        };
        f.write_str(name)
    }
}

/// A suitability predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confine {
    /// Fact value must be one of `values` (case-insensitive)
    Fact { name: String, values: Vec<String> },
    /// Path must exist
    Exists(PathBuf),
    /// Command must be locatable
    Command(String),
    /// Static switch
    Boolean(bool),
}

impl Confine {
    pub fn fact(name: &str, values: &[&str]) -> Self {
        Self::Fact {
            name: name.to_string(),
            values: values.iter().map(ToString::to_string).collect(),
        }
    }

    fn passes(&self, descriptor: &ProviderDescriptor, facts: &Facts) -> bool {
        match self {
            Self::Fact { name, values } => fact_matches(facts, name, values),
            Self::Exists(path) => path.exists(),
            Self::Command(name) => descriptor.locate_command(name).is_ok(),
            Self::Boolean(value) => *value,
        }
    }
}

impl fmt::Display for Confine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fact { name, values } => write!(f, "{} in [{}]", name, values.join(", ")),
            Self::Exists(path) => write!(f, "exists {}", path.display()),
            Self::Command(name) => write!(f, "command {}", name),
            Self::Boolean(value) => write!(f, "{}", value),
        }
    }
}

fn fact_matches(facts: &Facts, name: &str, values: &[String]) -> bool {
    facts
        .get(name)
        .is_some_and(|actual| values.iter().any(|v| v.eq_ignore_ascii_case(actual)))
}

/// Selection rank; lower sorts first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rank {
    /// `default_for` matches the facts
    PlatformDefault,
    /// Declared default for its type
    TypeDefault,
    /// Carries confinement rules
    Confined,
    /// No rules at all
    Unconfined,
}

/// Behaviour of a provider.
///
/// Implementations hold no per-resource state; everything they need
/// arrives through the [`ProviderContext`].
pub trait Provider: Send + Sync {
    /// Read the current value of `property` from the system
    fn retrieve(&self, ctx: &ProviderContext<'_>, property: &str) -> Result<Value>;

    /// Bring `property` to `should`
    fn sync(&self, ctx: &ProviderContext<'_>, property: &str, should: &Value) -> Result<()>;

    /// React to a notification from an upstream change.
    ///
    /// Returns whether anything was acted on; `false` leaves the resource
    /// untouched and stops the notification there. Only called when the
    /// descriptor declares [`Feature::Refreshable`].
    fn refresh(&self, ctx: &ProviderContext<'_>) -> Result<bool> {
        Err(Error::Unsupported {
            provider: ctx.descriptor.name.clone(),
            property: "refresh".to_string(),
        })
    }
}

/// A registered provider: selection metadata plus behaviour
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub type_name: String,
    pub name: String,
    pub doc: String,
    confines: Vec<Confine>,
    default_for: Vec<(String, Vec<String>)>,
    type_default: bool,
    features: BTreeSet<Feature>,
    search_paths: Vec<PathBuf>,
    commands: BTreeMap<String, String>,
    behaviour: Arc<dyn Provider>,
}

impl ProviderDescriptor {
    pub fn new(type_name: &str, name: &str, behaviour: impl Provider + 'static) -> Self {
        Self {
            type_name: type_name.to_lowercase(),
            name: name.to_string(),
            doc: String::new(),
            confines: Vec::new(),
            default_for: Vec::new(),
            type_default: false,
            features: BTreeSet::new(),
            search_paths: Vec::new(),
            commands: BTreeMap::new(),
            behaviour: Arc::new(behaviour),
        }
    }

    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = doc.to_string();
        self
    }

    pub fn confine(mut self, rule: Confine) -> Self {
        self.confines.push(rule);
        self
    }

    /// Prefer this provider when `fact` has one of `values`
    pub fn default_for(mut self, fact: &str, values: &[&str]) -> Self {
        self.default_for.push((
            fact.to_string(),
            values.iter().map(ToString::to_string).collect(),
        ));
        self
    }

    pub fn type_default(mut self) -> Self {
        self.type_default = true;
        self
    }

    pub fn feature(mut self, feature: Feature) -> Self {
        self.features.insert(feature);
        self
    }

    pub fn search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_paths.push(dir.into());
        self
    }

    /// Map an alias used by the behaviour to a program name or path
    pub fn command(mut self, alias: &str, program: &str) -> Self {
        self.commands.insert(alias.to_string(), program.to_string());
        self
    }

    pub fn behaviour(&self) -> &dyn Provider {
        self.behaviour.as_ref()
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn features(&self) -> impl Iterator<Item = Feature> + '_ {
        self.features.iter().copied()
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn confines(&self) -> &[Confine] {
        &self.confines
    }

    /// Rank used to order candidates during selection
    pub fn rank(&self, facts: &Facts) -> Rank {
        if self
            .default_for
            .iter()
            .any(|(fact, values)| fact_matches(facts, fact, values))
        {
            Rank::PlatformDefault
        } else if self.type_default {
            Rank::TypeDefault
        } else if !self.confines.is_empty() {
            Rank::Confined
        } else {
            Rank::Unconfined
        }
    }

    /// The first confinement rule that fails, if any
    pub fn failed_confine(&self, facts: &Facts) -> Option<&Confine> {
        self.confines.iter().find(|rule| !rule.passes(self, facts))
    }

    /// Whether every confinement rule passes
    pub fn is_suitable(&self, facts: &Facts) -> bool {
        self.failed_confine(facts).is_none()
    }

    /// Resolve a command alias (or bare name) against the search paths
    pub fn locate_command(&self, name: &str) -> Result<PathBuf> {
        let program = self.commands.get(name).map_or(name, String::as_str);
        command::locate_command(program, &self.search_paths)
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("type_name", &self.type_name)
            .field("name", &self.name)
            .field("confines", &self.confines)
            .field("default_for", &self.default_for)
            .field("type_default", &self.type_default)
            .field("features", &self.features)
            .field("search_paths", &self.search_paths)
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

/// Everything a provider sees while working on one resource
pub struct ProviderContext<'a> {
    pub resource: &'a ResourceRef,
    pub params: &'a Attributes,
    pub tags: &'a BTreeSet<String>,
    pub descriptor: &'a ProviderDescriptor,
    pub facts: &'a Facts,
    pub runner: &'a dyn CommandRunner,
    pub log: &'a EventLog,
}

impl ProviderContext<'_> {
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(Value::as_str)
    }

    /// Boolean parameter; absent or unparseable is false
    pub fn param_bool(&self, name: &str) -> bool {
        self.param(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.descriptor.has_feature(feature)
    }

    pub fn locate_command(&self, name: &str) -> Result<PathBuf> {
        self.descriptor.locate_command(name)
    }

    /// Log source for this resource, tags included
    pub fn source(&self) -> Source {
        Source::Resource {
            reference: self.resource.clone(),
            tags: self.tags.clone(),
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log.emit(Level::Debug, self.source(), message);
    }

    /// Run a command, returning whether it exited successfully
    pub fn execute(&self, program: &Path, args: &[&str]) -> Result<bool> {
        let line = command_line(program, args);
        self.debug(format!("Executing '{}'", line));
        let ok = self.runner.run(program, args)?;
        self.debug(format!(
            "'{}' {}",
            line,
            if ok { "succeeded" } else { "failed" }
        ));
        Ok(ok)
    }

    /// Run a command that must succeed
    pub fn execute_checked(&self, program: &Path, args: &[&str]) -> Result<()> {
        if self.execute(program, args)? {
            Ok(())
        } else {
            Err(Error::CommandFailed {
                command: command_line(program, args),
            })
        }
    }

    /// Run a user-supplied command string through `/bin/sh -c`
    pub fn execute_shell(&self, script: &str) -> Result<bool> {
        self.execute(Path::new("/bin/sh"), &["-c", script])
    }

    /// Generic status fallback: is a process matching `pattern` running?
    pub fn process_running(&self, pattern: &str) -> Result<bool> {
        let pgrep =
            command::locate_command("pgrep", &[]).unwrap_or_else(|_| PathBuf::from("pgrep"));
        self.execute(&pgrep, &["-f", pattern])
    }
}
