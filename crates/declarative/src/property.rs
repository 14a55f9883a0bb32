//! Property model: desired (`should`) versus actual (`is`) state.

use crate::error::Result;
use crate::provider::{Provider, ProviderContext};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Decides whether an actual value satisfies a desired one
#[derive(Clone, Default)]
pub enum Comparator {
    /// Loose equality (`true` matches `"true"`)
    #[default]
    Equality,
    /// `running`/`present` are satisfied by anything that is not
    /// `stopped`/`absent`; other values compare by equality
    Ensure,
    /// Custom predicate called as `(is, should)`
    Custom(Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>),
}

impl Comparator {
    pub fn matches(&self, is: &Value, should: &Value) -> bool {
        match self {
            Self::Equality => is.loosely_eq(should),
            Self::Ensure => match should.as_str() {
                Some("running" | "present") => {
                    !matches!(is.as_str(), Some("stopped" | "absent"))
                }
                _ => is.loosely_eq(should),
            },
            Self::Custom(predicate) => predicate(is, should),
        }
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equality => f.write_str("Equality"),
            Self::Ensure => f.write_str("Ensure"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A property value that was changed on the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub property: String,
    pub from: Option<Value>,
    pub to: Value,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.from {
            Some(from) => write!(
                f,
                "{} changed '{}' to '{}'",
                self.property, from, self.to
            ),
            None => write!(f, "{} set to '{}'", self.property, self.to),
        }
    }
}

/// One managed or checked attribute of a resource instance
#[derive(Debug, Clone)]
pub struct Property {
    name: String,
    should: Option<Value>,
    is: Option<Value>,
    comparator: Comparator,
    changed: bool,
}

impl Property {
    pub fn new(name: &str, should: Option<Value>, comparator: Comparator) -> Self {
        Self {
            name: name.to_string(),
            should,
            is: None,
            comparator,
            changed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn should(&self) -> Option<&Value> {
        self.should.as_ref()
    }

    pub fn is(&self) -> Option<&Value> {
        self.is.as_ref()
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Whether this property has a desired value, as opposed to check-only
    pub fn is_managed(&self) -> bool {
        self.should.is_some()
    }

    pub(crate) fn set_should(&mut self, should: Value) {
        self.should = Some(should);
    }

    /// Fetch the actual value, asking the provider at most once until the
    /// cache is invalidated.
    pub fn retrieve(
        &mut self,
        provider: &dyn Provider,
        ctx: &ProviderContext<'_>,
    ) -> Result<&Value> {
        let value = match self.is.take() {
            Some(cached) => cached,
            None => {
                let fresh = provider.retrieve(ctx, &self.name)?;
                ctx.debug(format!("{} is '{}'", self.name, fresh));
                fresh
            }
        };
        Ok(self.is.insert(value))
    }

    /// Compare the cached actual value against the desired one.
    ///
    /// Check-only properties are always in sync; a managed property that
    /// has not been retrieved is not.
    pub fn is_insync(&self) -> bool {
        match (&self.should, &self.is) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(should), Some(is)) => self.comparator.matches(is, should),
        }
    }

    /// Enact the desired value and invalidate the cached actual value
    pub fn sync(&mut self, provider: &dyn Provider, ctx: &ProviderContext<'_>) -> Result<Change> {
        let Some(should) = self.should.clone() else {
            return Err(crate::Error::validation(
                ctx.resource.to_string(),
                &self.name,
                "cannot sync a property with no desired value",
            ));
        };
        provider.sync(ctx, &self.name, &should)?;
        self.changed = true;
        Ok(Change {
            property: self.name.clone(),
            from: self.is.take(),
            to: should,
        })
    }

    /// Drop the cached actual value
    pub fn invalidate(&mut self) {
        self.is = None;
    }

    /// Prepare for a new pass
    pub fn reset(&mut self) {
        self.is = None;
        self.changed = false;
    }
}
