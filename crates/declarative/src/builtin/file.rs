//! The `file` type: plain files and directories on a POSIX filesystem

use crate::error::{Error, Result};
use crate::property::Comparator;
use crate::provider::{Provider, ProviderContext, ProviderDescriptor};
use crate::registry::{ParamSpec, PropertySpec, Registry, TypeDefinition};
use crate::value::{Attributes, ResourceRef, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub(super) fn register(registry: &mut Registry) -> Result<()> {
    registry.define_type(definition())?;
    registry.register_provider(
        ProviderDescriptor::new("file", "posix", PosixFile)
            .doc("Files and directories through the standard library"),
    )?;
    Ok(())
}

fn definition() -> TypeDefinition {
    TypeDefinition::new("file")
        .doc("Manage files and directories")
        .namevar("path")
        .property(
            PropertySpec::new("ensure")
                .allowed(&["present", "file", "directory", "absent"])
                .comparator(Comparator::Ensure),
        )
        .property(PropertySpec::new("content").doc("Exact file contents"))
        .parameter(ParamSpec::new("path").doc("Absolute path; defaults to the title"))
        .validator(absolute_path)
        .autorequire(|resource| {
            // Immediate parent only; undeclared parents are ignored by the graph
            resource
                .param("path")
                .and_then(Value::as_str)
                .and_then(|path| Path::new(path).parent())
                .filter(|parent| parent.parent().is_some())
                .map(|parent| vec![ResourceRef::new("file", &parent.display().to_string())])
                .unwrap_or_default()
        })
}

fn absolute_path(reference: &ResourceRef, attributes: &Attributes) -> Result<()> {
    match attributes.get("path").and_then(Value::as_str) {
        Some(path) if Path::new(path).is_absolute() => Ok(()),
        _ => Err(Error::validation(
            reference.to_string(),
            "path",
            "file paths must be absolute",
        )),
    }
}

struct PosixFile;

impl PosixFile {
    fn path(ctx: &ProviderContext<'_>) -> PathBuf {
        PathBuf::from(ctx.param_str("path").unwrap_or(&ctx.resource.name))
    }

    fn kind(path: &Path) -> Result<&'static str> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => Ok("link"),
            Ok(meta) if meta.is_dir() => Ok("directory"),
            Ok(_) => Ok("file"),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok("absent"),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn remove(path: &Path) -> Result<()> {
        let result = match Self::kind(path)? {
            "absent" => return Ok(()),
            "directory" => fs::remove_dir(path),
            _ => fs::remove_file(path),
        };
        result.map_err(|e| Error::io(path, e))
    }
}

impl Provider for PosixFile {
    fn retrieve(&self, ctx: &ProviderContext<'_>, property: &str) -> Result<Value> {
        let path = Self::path(ctx);
        match property {
            "ensure" => Ok(Value::from(Self::kind(&path)?)),
            "content" => match fs::read_to_string(&path) {
                Ok(content) => Ok(Value::from(content)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(Value::from("absent")),
                Err(e) => Err(Error::io(&path, e)),
            },
            other => Err(Error::Unsupported {
                provider: ctx.descriptor.name.clone(),
                property: other.to_string(),
            }),
        }
    }

    fn sync(&self, ctx: &ProviderContext<'_>, property: &str, should: &Value) -> Result<()> {
        let path = Self::path(ctx);
        match (property, should.as_str()) {
            ("ensure", Some("absent")) => Self::remove(&path),
            ("ensure", Some("directory")) => {
                fs::create_dir_all(&path).map_err(|e| Error::io(&path, e))
            }
            ("ensure", _) => match Self::kind(&path)? {
                "file" => Ok(()),
                "directory" => Err(Error::validation(
                    ctx.resource.to_string(),
                    "ensure",
                    format!("{} is a directory; refusing to replace it with a file", path.display()),
                )),
                kind => {
                    if kind == "link" {
                        ctx.debug(format!("Replacing link {} with a file", path.display()));
                        Self::remove(&path)?;
                    }
                    fs::write(&path, "").map_err(|e| Error::io(&path, e))
                }
            },
            ("content", _) => {
                ctx.debug(format!("Writing {}", path.display()));
                fs::write(&path, should.to_string()).map_err(|e| Error::io(&path, e))
            }
            (other, _) => Err(Error::Unsupported {
                provider: ctx.descriptor.name.clone(),
                property: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::testing::ScriptedRunner;
    use crate::catalog::Catalog;
    use crate::facts::Facts;
    use crate::graph::Graph;
    use crate::logging::{EventLog, Level};
    use crate::report::Status;
    use crate::transaction::Transaction;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        register(&mut registry).unwrap();
        registry
    }

    fn apply(registry: &Registry, catalog: &mut Catalog) -> crate::report::RunReport {
        let facts = Facts::new();
        let runner = ScriptedRunner::default();
        let log = EventLog::new(Level::Debug);
        Transaction::new(registry, &facts, &runner, &log)
            .apply(catalog)
            .unwrap()
    }

    #[test]
    fn test_relative_path_rejected() {
        let registry = registry();
        let mut catalog = Catalog::new();
        let err = catalog
            .create_instance(&registry, "file", "etc/motd", Attributes::new())
            .unwrap_err();
        assert!(err.to_string().contains("must be absolute"));
    }

    #[test]
    fn test_creates_file_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motd");
        let registry = registry();
        let mut catalog = Catalog::new();
        let mut attributes = Attributes::new();
        attributes.insert("ensure".into(), "file".into());
        attributes.insert("content".into(), "welcome\n".into());
        catalog
            .create_instance(&registry, "file", &path.display().to_string(), attributes)
            .unwrap();

        let report = apply(&registry, &mut catalog);
        assert_eq!(report.summary.changed, 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "welcome\n");
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.changes.len(), 2);
        assert_eq!(outcome.changes[0].to_string(), "ensure changed 'absent' to 'file'");

        let again = apply(&registry, &mut catalog);
        assert_eq!(again.summary.in_sync, 1);
    }

    #[test]
    fn test_absent_removes_and_present_accepts_directory() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("stale");
        fs::write(&stale, "old").unwrap();
        let existing = dir.path().join("conf.d");
        fs::create_dir(&existing).unwrap();

        let registry = registry();
        let mut catalog = Catalog::new();
        let mut absent = Attributes::new();
        absent.insert("ensure".into(), "absent".into());
        catalog
            .create_instance(&registry, "file", &stale.display().to_string(), absent)
            .unwrap();
        let mut present = Attributes::new();
        present.insert("ensure".into(), "present".into());
        catalog
            .create_instance(&registry, "file", &existing.display().to_string(), present)
            .unwrap();

        let report = apply(&registry, &mut catalog);
        assert!(!stale.exists());
        assert_eq!(
            report.outcome(&format!("File[{}]", stale.display())).unwrap().status,
            Status::Changed
        );
        assert_eq!(
            report.outcome(&format!("File[{}]", existing.display())).unwrap().status,
            Status::InSync
        );
    }

    #[test]
    fn test_file_over_directory_fails_without_change() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("conf.d");
        fs::create_dir(&existing).unwrap();

        let registry = registry();
        let mut catalog = Catalog::new();
        let mut attributes = Attributes::new();
        attributes.insert("ensure".into(), "file".into());
        catalog
            .create_instance(&registry, "file", &existing.display().to_string(), attributes)
            .unwrap();

        for _ in 0..2 {
            let report = apply(&registry, &mut catalog);
            assert_eq!(report.summary.failed, 1);
            assert_eq!(report.summary.changed, 0);
            assert!(report.outcomes[0].changes.is_empty());
            assert!(report.outcomes[0].error.as_deref().unwrap().contains("is a directory"));
            assert!(existing.is_dir());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_file_replaces_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real");
        fs::write(&target, "keep").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let registry = registry();
        let mut catalog = Catalog::new();
        let mut attributes = Attributes::new();
        attributes.insert("ensure".into(), "file".into());
        catalog
            .create_instance(&registry, "file", &link.display().to_string(), attributes)
            .unwrap();

        let report = apply(&registry, &mut catalog);
        assert_eq!(report.summary.changed, 1);
        assert!(!fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&target).unwrap(), "keep");

        let again = apply(&registry, &mut catalog);
        assert_eq!(again.summary.in_sync, 1);
    }

    #[test]
    fn test_parent_directory_is_autorequired() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("app");
        let child = parent.join("app.conf");

        let registry = registry();
        let mut catalog = Catalog::new();
        let mut child_attrs = Attributes::new();
        child_attrs.insert("content".into(), "port = 80\n".into());
        let child_id = catalog
            .create_instance(&registry, "file", &child.display().to_string(), child_attrs)
            .unwrap();
        let mut parent_attrs = Attributes::new();
        parent_attrs.insert("ensure".into(), "directory".into());
        let parent_id = catalog
            .create_instance(&registry, "file", &parent.display().to_string(), parent_attrs)
            .unwrap();

        let graph = Graph::build(&catalog, &registry);
        assert_eq!(graph.dependencies(child_id), vec![parent_id]);

        let report = apply(&registry, &mut catalog);
        assert_eq!(report.summary.changed, 2);
        assert_eq!(fs::read_to_string(&child).unwrap(), "port = 80\n");
    }

    #[test]
    fn test_missing_parent_fails_with_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("file");
        let registry = registry();
        let mut catalog = Catalog::new();
        let mut attributes = Attributes::new();
        attributes.insert("content".into(), "x".into());
        catalog
            .create_instance(&registry, "file", &path.display().to_string(), attributes)
            .unwrap();

        let report = apply(&registry, &mut catalog);
        assert_eq!(report.summary.failed, 1);
        assert!(report.outcomes[0].error.as_deref().unwrap().contains("IO error"));
    }
}
