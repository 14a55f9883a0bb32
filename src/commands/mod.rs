pub mod apply;
pub mod discover;
pub mod facts;
pub mod providers;

use crate::Context;
use crate::config::Settings;
use crate::paths;
use anyhow::{Context as _, Result};
use declarative::{Facts, Registry};
use std::collections::BTreeMap;

/// Settings, facts and registry shared by every command
pub struct Session {
    pub settings: Settings,
    pub facts: Facts,
    pub registry: Registry,
}

impl Session {
    /// Load settings and register the built-in types.
    ///
    /// `facts` overrides win over the settings file, which wins over the
    /// detected host facts.
    pub fn open(ctx: &Context, facts: &BTreeMap<String, String>) -> Result<Self> {
        let path = match &ctx.settings {
            Some(path) => path.clone(),
            None => paths::settings_file()?,
        };
        let settings = Settings::load(&path)?;

        let mut host = settings.facts();
        host.merge(facts);

        let mut registry = Registry::new();
        declarative::builtin::register_all(&mut registry, &host)
            .context("Could not register built-in types")?;

        Ok(Self {
            settings,
            facts: host,
            registry,
        })
    }
}
