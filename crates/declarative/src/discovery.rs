//! Auto-discovery of instances from a provider's search paths

use crate::catalog::{Catalog, ResourceId};
use crate::command::is_executable;
use crate::error::{Error, Result};
use crate::logging::{EventLog, Source};
use crate::provider::Feature;
use crate::registry::Registry;
use crate::value::{Attributes, Value};
use std::fs;
use std::path::Path;

/// Names of the executable, non-hidden entries of `dir`, sorted
pub fn executables_in(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            if name.starts_with('.') || !is_executable(&entry.path()) {
                return None;
            }
            Some(name)
        })
        .collect();

    names.sort();
    Ok(names)
}

impl Catalog {
    /// Declare one instance per executable found in the search paths of
    /// `provider`, checking (not managing) its state.
    ///
    /// Missing directories are logged and skipped. Existing instances are
    /// merged into rather than replaced.
    pub fn discover(
        &mut self,
        registry: &Registry,
        type_name: &str,
        provider: &str,
        log: &EventLog,
    ) -> Result<Vec<ResourceId>> {
        let descriptor = registry
            .provider(type_name, provider)
            .ok_or_else(|| Error::NoSuitableProvider {
                resource: format!("{} discovery", type_name),
                tried: vec![provider.to_string()],
            })?;
        let source = Source::component(&format!("{}/{}", type_name, provider));

        if !descriptor.has_feature(Feature::Discoverable) {
            log.debug(source, "Provider does not support discovery");
            return Ok(Vec::new());
        }

        let mut check = vec!["ensure"];
        if descriptor.has_feature(Feature::Enableable) {
            check.push("enable");
        }

        let mut found = Vec::new();
        for dir in descriptor.search_paths() {
            if !dir.is_dir() {
                log.notice(
                    source.clone(),
                    format!("Service path {} does not exist", dir.display()),
                );
                continue;
            }

            for name in executables_in(dir)? {
                let mut attributes = Attributes::new();
                attributes.insert("check".to_string(), Value::from(check.clone()));
                attributes.insert(
                    "path".to_string(),
                    Value::from(dir.display().to_string()),
                );
                attributes.insert("provider".to_string(), Value::from(provider));
                let id = self.create_instance(registry, type_name, &name, attributes)?;
                log.debug(source.clone(), format!("Discovered {}", self.get(id).reference));
                found.push(id);
            }
        }

        Ok(found)
    }
}
