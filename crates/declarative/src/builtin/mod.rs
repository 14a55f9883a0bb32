//! Built-in resource types and their providers
//!
//! - `service`: `init`, `systemd` and `base` providers
//! - `file`: `posix` provider

mod file;
mod service;

use crate::error::Result;
use crate::facts::Facts;
use crate::registry::Registry;

/// Define every built-in type and register its providers.
///
/// Facts are consulted once here, e.g. to pick the init script directory.
pub fn register_all(registry: &mut Registry, facts: &Facts) -> Result<()> {
    service::register(registry, facts)?;
    file::register(registry)?;
    Ok(())
}


#[cfg(all(test, unix))]
mod tests {
    use super::testing::{ScriptedRunner, write_script};
    use super::*;
    use crate::catalog::Catalog;
    use crate::facts::{KERNEL, OPERATING_SYSTEM};
    use crate::logging::{EventLog, Level};
    use crate::report::Status;
    use crate::transaction::Transaction;
    use crate::value::{Attributes, Value};
    use std::fs;

    #[test]
    fn test_register_all_twice_is_rejected() {
        let facts = Facts::new().with(KERNEL, "Linux");
        let mut registry = Registry::new();
        register_all(&mut registry, &facts).unwrap();
        assert_eq!(registry.types().count(), 2);
        assert!(register_all(&mut registry, &facts).is_err());
    }

    #[test]
    fn test_file_edit_restarts_service() {
        let temp = tempfile::tempdir().unwrap();
        let init_dir = temp.path().join("init.d");
        fs::create_dir(&init_dir).unwrap();
        write_script(&init_dir.join("nginx"));
        let config = temp.path().join("nginx.conf");

        let facts = Facts::new()
            .with(KERNEL, "FreeBSD")
            .with(OPERATING_SYSTEM, "FreeBSD");
        let mut registry = Registry::new();
        register_all(&mut registry, &facts).unwrap();

        let mut catalog = Catalog::new();
        let mut file = Attributes::new();
        file.insert("ensure".into(), "file".into());
        file.insert("content".into(), "worker_processes 4;\n".into());
        file.insert("notify".into(), "Service[nginx]".into());
        catalog
            .create_instance(&registry, "file", &config.display().to_string(), file)
            .unwrap();

        let mut service = Attributes::new();
        service.insert("ensure".into(), "running".into());
        service.insert("hasstatus".into(), Value::Bool(true));
        service.insert("hasrestart".into(), Value::Bool(true));
        service.insert("path".into(), init_dir.display().to_string().into());
        catalog
            .create_instance(&registry, "service", "nginx", service)
            .unwrap();

        let runner = ScriptedRunner::default();
        let log = EventLog::new(Level::Debug);
        let report = Transaction::new(&registry, &facts, &runner, &log)
            .apply(&mut catalog)
            .unwrap();

        assert_eq!(fs::read_to_string(&config).unwrap(), "worker_processes 4;\n");
        let script = init_dir.join("nginx").display().to_string();
        assert_eq!(
            runner.calls(),
            vec![
                format!("{} status", script),
                format!("{} status", script),
                format!("{} restart", script),
            ]
        );
        let nginx = report.outcome("Service[nginx]").unwrap();
        assert_eq!(nginx.status, Status::Changed);
        assert!(nginx.refreshed);

        let again = Transaction::new(&registry, &facts, &runner, &log)
            .apply(&mut catalog)
            .unwrap();
        assert_eq!(again.summary.changed, 0);
        assert_eq!(again.summary.in_sync, 2);
    }

    #[test]
    fn test_notified_stopped_service_stays_stopped() {
        let temp = tempfile::tempdir().unwrap();
        let config = temp.path().join("batch.conf");

        let facts = Facts::new()
            .with(KERNEL, "FreeBSD")
            .with(OPERATING_SYSTEM, "FreeBSD");
        let mut registry = Registry::new();
        register_all(&mut registry, &facts).unwrap();

        let mut catalog = Catalog::new();
        let mut file = Attributes::new();
        file.insert("content".into(), "jobs = 2\n".into());
        file.insert("notify".into(), "Service[batch]".into());
        catalog
            .create_instance(&registry, "file", &config.display().to_string(), file)
            .unwrap();

        let mut service = Attributes::new();
        service.insert("ensure".into(), "stopped".into());
        service.insert("provider".into(), "base".into());
        service.insert("status".into(), "pidof batch".into());
        service.insert("start".into(), "/usr/local/bin/batch".into());
        catalog
            .create_instance(&registry, "service", "batch", service)
            .unwrap();

        let runner = ScriptedRunner::default();
        runner.answer("pidof batch", false);
        let log = EventLog::new(Level::Debug);
        let report = Transaction::new(&registry, &facts, &runner, &log)
            .apply(&mut catalog)
            .unwrap();

        assert_eq!(
            runner.calls(),
            vec!["/bin/sh -c pidof batch", "/bin/sh -c pidof batch"]
        );
        let batch = report.outcome("Service[batch]").unwrap();
        assert_eq!(batch.status, Status::InSync);
        assert!(!batch.refreshed);
        assert_eq!(report.summary.changed, 1);
    }
}
