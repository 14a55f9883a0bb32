//! Catalog files: an optional `[facts]` table and `[[resource]]` entries.
//!
//! ```toml
//! [facts]
//! operatingsystem = "FreeBSD"
//!
//! [[resource]]
//! type = "file"
//! name = "/usr/local/etc/nginx/nginx.conf"
//! content = "worker_processes 4;\n"
//! notify = "Service[nginx]"
//!
//! [[resource]]
//! type = "service"
//! name = "nginx"
//! ensure = "running"
//! hasstatus = true
//! ```

use anyhow::{Context, Result};
use declarative::{Attributes, Catalog, EventLog, Registry};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
    #[serde(default, rename = "resource")]
    pub resources: Vec<Declaration>,
}

#[derive(Debug, Deserialize)]
pub struct Declaration {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl CatalogFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid catalog {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Declare every resource, in file order.
    ///
    /// Invalid declarations are logged and recorded as rejected by the
    /// catalog; the rest are still declared.
    pub fn into_catalog(self, registry: &Registry, log: &EventLog) -> Catalog {
        let mut catalog = Catalog::new();
        for declaration in self.resources {
            catalog.declare(
                registry,
                &declaration.type_name,
                &declaration.name,
                declaration.attributes,
                log,
            );
        }
        catalog
    }
}
