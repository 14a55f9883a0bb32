//! Transaction engine: converge a catalog in dependency order.
//!
//! A run builds the relationship graph, binds a provider to every
//! resource, then walks resources in topological order. Each resource
//! is evaluated at most once per walk and refreshed at most once.
//! Failures are isolated to the failing resource and whatever
//! depends on it; the rest of the catalog still converges.

use crate::catalog::{Catalog, Resource, ResourceId};
use crate::command::CommandRunner;
use crate::error::{Error, Result};
use crate::facts::Facts;
use crate::graph::Graph;
use crate::logging::{EventLog, MemoryDestination, Source};
use crate::property::Change;
use crate::provider::{Feature, ProviderContext, ProviderDescriptor};
use crate::registry::Registry;
use crate::report::{ResourceOutcome, RunReport, Status, Summary};
use crate::retry::{RetryCallback, RetryPolicy, with_retry};
use crate::value::Value;
use chrono::Utc;
use rayon::prelude::*;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Options for a run
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Report what would change without changing anything
    pub noop: bool,
    /// Only apply resources carrying one of these tags; empty means all
    pub tags: Vec<String>,
    /// Retry policy for sync and refresh
    pub retry: RetryPolicy,
}

/// One convergence run against a registry and host
pub struct Transaction<'a> {
    registry: &'a Registry,
    facts: &'a Facts,
    runner: &'a dyn CommandRunner,
    log: &'a EventLog,
    options: TransactionOptions,
}

/// Logs retries as warnings on the resource being worked on
struct RetryNotice<'a> {
    log: &'a EventLog,
    source: Source,
}

impl RetryCallback for RetryNotice<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration) {
        self.log.warning(
            self.source.clone(),
            format!(
                "Attempt {}/{} failed: {}; retrying in {:.1}s",
                attempt,
                max_attempts,
                error,
                delay.as_secs_f64()
            ),
        );
    }
}

/// Mutable per-run bookkeeping, indexed by resource id
struct Walk {
    outcomes: Vec<Option<ResourceOutcome>>,
    refresh_pending: Vec<bool>,
    refreshed: Vec<bool>,
}

impl Walk {
    fn new(size: usize) -> Self {
        Self {
            outcomes: vec![None; size],
            refresh_pending: vec![false; size],
            refreshed: vec![false; size],
        }
    }

    fn status(&self, id: ResourceId) -> Option<Status> {
        self.outcomes[id].as_ref().map(|o| o.status)
    }
}

/// Why a resource cannot be attempted, known before the walk starts
enum Blocked {
    Invalid(Error),
    Upstream(String),
}

impl<'a> Transaction<'a> {
    pub fn new(
        registry: &'a Registry,
        facts: &'a Facts,
        runner: &'a dyn CommandRunner,
        log: &'a EventLog,
    ) -> Self {
        Self {
            registry,
            facts,
            runner,
            log,
            options: TransactionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    /// Converge `catalog` and report what happened.
    ///
    /// Returns an error only for structural problems (a dependency cycle),
    /// in which case nothing has been changed on the host. The report's
    /// events are captured behind the log's minimum level, so they hold
    /// exactly what the other destinations received.
    pub fn apply(&self, catalog: &mut Catalog) -> Result<RunReport> {
        let started = Utc::now();
        let clock = Instant::now();
        let capture = MemoryDestination::new();
        let captured = capture.handle();
        let capture_id = self.log.add_destination(Box::new(capture));

        let result = self.run(catalog, clock);
        self.log.remove_destination(capture_id);
        let (summary, outcomes) = result?;

        Ok(RunReport {
            started,
            duration_secs: clock.elapsed().as_secs_f64(),
            noop: self.options.noop,
            summary,
            outcomes,
            events: captured.events(),
        })
    }

    fn run(&self, catalog: &mut Catalog, clock: Instant) -> Result<(Summary, Vec<ResourceOutcome>)> {
        let source = Source::component("transaction");

        let graph = Graph::build(catalog, self.registry);
        let order = match graph.topological_order() {
            Ok(order) => order,
            Err(e) => {
                self.log.err(source, e.to_string());
                return Err(e);
            }
        };

        self.log.info(
            source.clone(),
            format!(
                "Applying {} resources{}",
                catalog.len(),
                if self.options.noop { " in noop mode" } else { "" }
            ),
        );

        for resource in catalog.resources_mut() {
            for property in &mut resource.properties {
                property.reset();
            }
        }

        let registry = self.registry;
        let facts = self.facts;
        let bindings: Vec<Result<&ProviderDescriptor>> = catalog
            .resources()
            .par_iter()
            .map(|resource| registry.select_provider(resource, facts))
            .collect();

        let mut blocked: Vec<Option<Blocked>> = (0..catalog.len()).map(|_| None).collect();
        for dangling in graph.dangling() {
            let resource = &catalog.get(dangling.resource).reference;
            if !dangling.rejected {
                blocked[dangling.resource] = Some(Blocked::Invalid(Error::validation(
                    resource.to_string(),
                    &dangling.metaparam,
                    format!("could not find resource '{}'", dangling.target),
                )));
            } else if matches!(dangling.metaparam.as_str(), "require" | "subscribe") {
                blocked[dangling.resource] = Some(Blocked::Upstream(dangling.target.to_string()));
            } else {
                log::debug!(
                    "Ignoring {} => {} on rejected resource",
                    dangling.metaparam,
                    dangling.target
                );
            }
        }

        let mut walk = Walk::new(catalog.len());
        for &id in &order {
            let outcome = self.visit(id, catalog, &graph, &bindings, &mut blocked, &walk);
            let status = outcome.status;
            walk.outcomes[id] = Some(outcome);

            if walk.refresh_pending[id]
                && matches!(status, Status::InSync | Status::Changed)
                && let Ok(descriptor) = &bindings[id]
            {
                self.refresh(id, descriptor, catalog, &mut walk);
            }

            match walk.status(id) {
                Some(Status::Changed) => self.propagate(id, catalog, &graph, &bindings, &mut walk),
                Some(Status::Noop) => self.report_noop_notifications(id, catalog, &graph),
                _ => {}
            }
        }

        let mut summary = Summary::default();
        let mut outcomes = Vec::with_capacity(catalog.len() + catalog.rejected().len());
        for rejection in catalog.rejected() {
            summary.add(Status::Failed);
            outcomes.push(ResourceOutcome {
                resource: rejection.reference.to_string(),
                status: Status::Failed,
                provider: None,
                changes: Vec::new(),
                refreshed: false,
                error: Some(rejection.message.clone()),
            });
        }
        for &id in &order {
            if let Some(outcome) = walk.outcomes[id].take() {
                summary.add(outcome.status);
                outcomes.push(outcome);
            }
        }

        self.log.notice(
            source,
            format!(
                "Finished catalog run in {:.2} seconds: {} changed, {} failed, {} skipped",
                clock.elapsed().as_secs_f64(),
                summary.changed,
                summary.failed,
                summary.skipped
            ),
        );

        Ok((summary, outcomes))
    }

    fn selected(&self, resource: &Resource) -> bool {
        self.options.tags.is_empty() || self.options.tags.iter().any(|t| resource.is_tagged(t))
    }

    /// Decide and, where possible, enact one resource's normal turn
    fn visit(
        &self,
        id: ResourceId,
        catalog: &mut Catalog,
        graph: &Graph,
        bindings: &[Result<&ProviderDescriptor>],
        blocked: &mut [Option<Blocked>],
        walk: &Walk,
    ) -> ResourceOutcome {
        let resource = catalog.get(id);
        let source = resource.source();
        let mut outcome = ResourceOutcome {
            resource: resource.reference.to_string(),
            status: Status::Failed,
            provider: bindings[id].as_ref().ok().map(|d| d.name.clone()),
            changes: Vec::new(),
            refreshed: false,
            error: None,
        };

        if !self.selected(resource) {
            self.log.debug(source, "Not tagged for this run; skipping");
            outcome.status = Status::Filtered;
            return outcome;
        }

        match blocked[id].take() {
            Some(Blocked::Invalid(e)) => {
                self.log.err(source, e.to_string());
                outcome.error = Some(e.to_string());
                return outcome;
            }
            Some(Blocked::Upstream(target)) => {
                return self.skip(source, outcome, &target);
            }
            None => {}
        }

        let failed_dependency = graph
            .dependencies(id)
            .into_iter()
            .find(|&dep| walk.status(dep).is_some_and(|s| s.blocks_dependents()));
        if let Some(dep) = failed_dependency {
            let name = catalog.get(dep).reference.to_string();
            return self.skip(source, outcome, &name);
        }

        let descriptor = match &bindings[id] {
            Ok(descriptor) => *descriptor,
            Err(e) => {
                self.log.err(source, e.to_string());
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        let (status, changes, error) = self.evaluate(catalog.get_mut(id), descriptor);
        outcome.status = status;
        outcome.changes = changes;
        outcome.error = error;
        outcome
    }

    fn skip(&self, source: Source, mut outcome: ResourceOutcome, dependency: &str) -> ResourceOutcome {
        self.log.warning(
            source,
            format!("Skipping because of failed dependencies: {}", dependency),
        );
        outcome.status = Status::Skipped;
        outcome.error = Some(Error::DependencyFailed(dependency.to_string()).to_string());
        outcome
    }

    /// Retrieve, compare and sync every property of one resource
    fn evaluate(
        &self,
        resource: &mut Resource,
        descriptor: &ProviderDescriptor,
    ) -> (Status, Vec<Change>, Option<String>) {
        let Resource {
            reference,
            parameters,
            properties,
            tags,
            loglevel,
        } = resource;
        let ctx = ProviderContext {
            resource: reference,
            params: parameters,
            tags,
            descriptor,
            facts: self.facts,
            runner: self.runner,
            log: self.log,
        };
        let provider = descriptor.behaviour();
        let source = ctx.source();

        for property in properties.iter_mut() {
            if let Err(e) = property.retrieve(provider, &ctx) {
                let message = format!("Could not retrieve {}: {}", property.name(), e);
                self.log.err(source, message.clone());
                return (Status::Failed, Vec::new(), Some(message));
            }
        }

        let out_of_sync: Vec<usize> = properties
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_insync())
            .map(|(i, _)| i)
            .collect();

        if out_of_sync.is_empty() {
            self.log.debug(source, "Resource is in sync");
            return (Status::InSync, Vec::new(), None);
        }

        if self.options.noop {
            for &index in &out_of_sync {
                let property = &properties[index];
                self.log.notice(
                    source.clone(),
                    format!(
                        "{} is '{}', should be '{}' (noop)",
                        property.name(),
                        display_or_absent(property.is()),
                        display_or_absent(property.should())
                    ),
                );
            }
            return (Status::Noop, Vec::new(), None);
        }

        let notice = RetryNotice {
            log: self.log,
            source: source.clone(),
        };
        let mut changes = Vec::new();
        for index in out_of_sync {
            let property = &mut properties[index];
            match with_retry(&self.options.retry, &notice, || property.sync(provider, &ctx)) {
                Ok(change) => {
                    self.log.emit(*loglevel, source.clone(), change.to_string());
                    changes.push(change);
                }
                Err(e) => {
                    let message = format!("Could not set '{}': {}", property.name(), e);
                    self.log.err(source, message.clone());
                    return (Status::Failed, changes, Some(message));
                }
            }
        }

        (Status::Changed, changes, None)
    }

    /// Refresh a resource that has finished its normal turn
    fn refresh(
        &self,
        id: ResourceId,
        descriptor: &ProviderDescriptor,
        catalog: &mut Catalog,
        walk: &mut Walk,
    ) {
        if walk.refreshed[id] {
            return;
        }
        walk.refreshed[id] = true;
        walk.refresh_pending[id] = false;

        let result = self.refresh_resource(catalog.get_mut(id), descriptor);
        let Some(outcome) = walk.outcomes[id].as_mut() else {
            return;
        };
        match result {
            Ok(Some(changes)) => {
                outcome.status = Status::Changed;
                outcome.refreshed = true;
                outcome.changes.extend(changes);
            }
            Ok(None) => {}
            Err(message) => {
                outcome.status = Status::Failed;
                outcome.error = Some(message);
            }
        }
    }

    /// `None` when the refresh enacted nothing
    fn refresh_resource(
        &self,
        resource: &mut Resource,
        descriptor: &ProviderDescriptor,
    ) -> std::result::Result<Option<Vec<Change>>, String> {
        let Resource {
            reference,
            parameters,
            properties,
            tags,
            loglevel,
        } = resource;
        let ctx = ProviderContext {
            resource: reference,
            params: parameters,
            tags,
            descriptor,
            facts: self.facts,
            runner: self.runner,
            log: self.log,
        };
        let provider = descriptor.behaviour();
        let source = ctx.source();
        let notice = RetryNotice {
            log: self.log,
            source: source.clone(),
        };

        if descriptor.has_feature(Feature::Refreshable) {
            return match with_retry(&self.options.retry, &notice, || provider.refresh(&ctx)) {
                Ok(true) => {
                    self.log.emit(*loglevel, source, "Triggered 'refresh'");
                    Ok(Some(Vec::new()))
                }
                Ok(false) => Ok(None),
                Err(e) => {
                    let message = format!("Could not refresh: {}", e);
                    self.log.err(source, message.clone());
                    Err(message)
                }
            };
        }

        let mut changes = Vec::new();
        for property in properties.iter_mut().filter(|p| p.is_managed()) {
            match with_retry(&self.options.retry, &notice, || property.sync(provider, &ctx)) {
                Ok(change) => {
                    self.log.emit(
                        *loglevel,
                        source.clone(),
                        format!("Refreshed by re-syncing {}", change),
                    );
                    changes.push(change);
                }
                Err(e) => {
                    let message = format!("Could not refresh '{}': {}", property.name(), e);
                    self.log.err(source, message.clone());
                    return Err(message);
                }
            }
        }
        if changes.is_empty() {
            self.log.debug(source, "Nothing to re-sync on refresh");
            return Ok(None);
        }
        Ok(Some(changes))
    }

    /// Deliver refresh signals from a changed resource, following
    /// chains of refreshes breadth-first.
    fn propagate(
        &self,
        from: ResourceId,
        catalog: &mut Catalog,
        graph: &Graph,
        bindings: &[Result<&ProviderDescriptor>],
        walk: &mut Walk,
    ) {
        let mut queue = VecDeque::from([from]);
        while let Some(changed) = queue.pop_front() {
            let origin = catalog.get(changed).reference.to_string();
            for target in graph.notification_targets(changed) {
                if walk.refreshed[target] {
                    continue;
                }
                let source = catalog.get(target).source();
                match walk.status(target) {
                    None => {
                        if !walk.refresh_pending[target] {
                            self.log
                                .info(source, format!("Scheduling refresh from {}", origin));
                            walk.refresh_pending[target] = true;
                        }
                    }
                    Some(Status::InSync | Status::Changed) => {
                        let Ok(descriptor) = &bindings[target] else {
                            continue;
                        };
                        self.log
                            .info(source, format!("Refreshing because {} changed", origin));
                        self.refresh(target, descriptor, catalog, walk);
                        if walk.status(target) == Some(Status::Changed) {
                            queue.push_back(target);
                        }
                    }
                    Some(status) => {
                        self.log.debug(
                            source,
                            format!("Not refreshing {} resource from {}", status, origin),
                        );
                    }
                }
            }
        }
    }

    fn report_noop_notifications(&self, id: ResourceId, catalog: &Catalog, graph: &Graph) {
        let origin = catalog.get(id).reference.to_string();
        for target in graph.notification_targets(id) {
            self.log.notice(
                catalog.get(target).source(),
                format!("Would have triggered 'refresh' from {} (noop)", origin),
            );
        }
    }
}

fn display_or_absent(value: Option<&Value>) -> String {
    value.map_or_else(|| "absent".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::KERNEL;
    use crate::logging::{Level, MemoryHandle};
    use crate::property::Comparator;
    use crate::provider::{Confine, Provider};
    use crate::registry::{ParamSpec, PropertySpec, TypeDefinition};
    use crate::value::Attributes;
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    /// Fake host: service name -> property -> value, plus a call journal
    #[derive(Default)]
    struct Host {
        state: Mutex<HashMap<String, HashMap<String, Value>>>,
        calls: Mutex<Vec<String>>,
        retrieves: Mutex<HashMap<String, usize>>,
        failing: Mutex<HashSet<String>>,
        flaky: Mutex<HashMap<String, u32>>,
    }

    impl Host {
        fn set(&self, name: &str, property: &str, value: &str) {
            self.state
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_default()
                .insert(property.to_string(), Value::from(value));
        }

        fn fail(&self, name: &str) {
            self.failing.lock().unwrap().insert(name.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct MockService(Arc<Host>);

    impl Provider for MockService {
        fn retrieve(&self, ctx: &ProviderContext<'_>, property: &str) -> Result<Value> {
            let name = &ctx.resource.name;
            *self
                .0
                .retrieves
                .lock()
                .unwrap()
                .entry(name.clone())
                .or_default() += 1;
            let state = self.0.state.lock().unwrap();
            Ok(state
                .get(name)
                .and_then(|props| props.get(property))
                .cloned()
                .unwrap_or_else(|| Value::from("stopped")))
        }

        fn sync(&self, ctx: &ProviderContext<'_>, property: &str, should: &Value) -> Result<()> {
            let name = &ctx.resource.name;
            let command = format!("sync {} {}={}", name, property, should);
            if self.0.failing.lock().unwrap().contains(name) {
                return Err(Error::CommandFailed { command });
            }
            if let Some(remaining) = self.0.flaky.lock().unwrap().get_mut(name)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(Error::CommandFailed { command });
            }
            self.0.calls.lock().unwrap().push(command);
            self.0.set(name, property, &should.to_string());
            Ok(())
        }

        fn refresh(&self, ctx: &ProviderContext<'_>) -> Result<bool> {
            if self.retrieve(ctx, "ensure")?.as_str() != Some("running") {
                return Ok(false);
            }
            self.0
                .calls
                .lock()
                .unwrap()
                .push(format!("refresh {}", ctx.resource.name));
            Ok(true)
        }
    }

    struct NoCommands;

    impl CommandRunner for NoCommands {
        fn run(&self, program: &Path, _args: &[&str]) -> Result<bool> {
            panic!("unexpected command {}", program.display());
        }
    }

    fn service_type() -> TypeDefinition {
        TypeDefinition::new("service")
            .property(
                PropertySpec::new("ensure")
                    .allowed(&["running", "stopped"])
                    .comparator(Comparator::Ensure),
            )
            .property(PropertySpec::new("enable").allowed(&["true", "false"]))
            .parameter(ParamSpec::new("name"))
    }

    fn registry(host: &Arc<Host>, refreshable: bool) -> Registry {
        let mut registry = Registry::new();
        registry.define_type(service_type()).unwrap();
        let mut descriptor = ProviderDescriptor::new("service", "mock", MockService(host.clone()));
        if refreshable {
            descriptor = descriptor.feature(Feature::Refreshable);
        }
        registry.register_provider(descriptor).unwrap();
        registry
    }

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    fn memory_log() -> (EventLog, MemoryHandle) {
        let log = EventLog::new(Level::Debug);
        let memory = MemoryDestination::new();
        let handle = memory.handle();
        log.add_destination(Box::new(memory));
        (log, handle)
    }

    fn apply(
        registry: &Registry,
        catalog: &mut Catalog,
        log: &EventLog,
        options: TransactionOptions,
    ) -> Result<RunReport> {
        let facts = Facts::new();
        Transaction::new(registry, &facts, &NoCommands, log)
            .with_options(options)
            .apply(catalog)
    }

    fn status_of(report: &RunReport, resource: &str) -> Status {
        report.outcome(resource).map(|o| o.status).unwrap()
    }

    #[test]
    fn test_converges_and_is_idempotent() {
        let host = Arc::new(Host::default());
        host.set("sshd", "ensure", "running");
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        for name in ["nginx", "sshd", "cron"] {
            catalog
                .create_instance(&registry, "service", name, attrs(&[("ensure", "running")]))
                .unwrap();
        }

        let first = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        assert_eq!(first.summary.changed, 2);
        assert_eq!(first.summary.in_sync, 1);
        assert!(first.is_success());
        assert_eq!(
            host.calls(),
            vec!["sync nginx ensure=running", "sync cron ensure=running"]
        );
        for name in ["nginx", "sshd", "cron"] {
            assert_eq!(host.retrieves.lock().unwrap()[name], 1);
        }

        let second = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        assert_eq!(second.summary.changed, 0);
        assert_eq!(second.summary.in_sync, 3);
        assert_eq!(host.calls().len(), 2);
    }

    #[test]
    fn test_dependencies_run_first() {
        let host = Arc::new(Host::default());
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(
                &registry,
                "service",
                "app",
                attrs(&[("ensure", "running"), ("require", "Service[db]")]),
            )
            .unwrap();
        catalog
            .create_instance(&registry, "service", "db", attrs(&[("ensure", "running")]))
            .unwrap();

        let report = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        assert_eq!(
            host.calls(),
            vec!["sync db ensure=running", "sync app ensure=running"]
        );
        let order: Vec<&str> = report.outcomes.iter().map(|o| o.resource.as_str()).collect();
        assert_eq!(order, vec!["Service[db]", "Service[app]"]);
    }

    #[test]
    fn test_cycle_aborts_before_any_change() {
        let host = Arc::new(Host::default());
        let registry = registry(&host, true);
        let (log, events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(&registry, "service", "free", attrs(&[("ensure", "running")]))
            .unwrap();
        catalog
            .create_instance(
                &registry,
                "service",
                "a",
                attrs(&[("ensure", "running"), ("require", "Service[b]")]),
            )
            .unwrap();
        catalog
            .create_instance(
                &registry,
                "service",
                "b",
                attrs(&[("ensure", "running"), ("require", "Service[a]")]),
            )
            .unwrap();

        let err = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { .. }));
        assert!(host.calls().is_empty());
        assert!(host.retrieves.lock().unwrap().is_empty());
        assert!(
            events
                .events()
                .iter()
                .any(|e| e.level == Level::Err && e.message.contains("dependency cycle"))
        );
    }

    #[test]
    fn test_failure_skips_dependents_only() {
        let host = Arc::new(Host::default());
        host.fail("db");
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(&registry, "service", "db", attrs(&[("ensure", "running")]))
            .unwrap();
        catalog
            .create_instance(
                &registry,
                "service",
                "app",
                attrs(&[("ensure", "running"), ("require", "Service[db]")]),
            )
            .unwrap();
        catalog
            .create_instance(
                &registry,
                "service",
                "worker",
                attrs(&[("ensure", "running"), ("require", "Service[app]")]),
            )
            .unwrap();
        catalog
            .create_instance(&registry, "service", "cron", attrs(&[("ensure", "running")]))
            .unwrap();

        let report = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        assert_eq!(status_of(&report, "Service[db]"), Status::Failed);
        assert_eq!(status_of(&report, "Service[app]"), Status::Skipped);
        assert_eq!(status_of(&report, "Service[worker]"), Status::Skipped);
        assert_eq!(status_of(&report, "Service[cron]"), Status::Changed);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 2);
        assert_eq!(host.calls(), vec!["sync cron ensure=running"]);
        assert!(!host.retrieves.lock().unwrap().contains_key("app"));

        let warnings: Vec<_> = report
            .events
            .iter()
            .filter(|e| e.level == Level::Warning)
            .collect();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].source, "Service[app]");
        assert!(warnings[0].message.contains("Service[db]"));
    }

    #[test]
    fn test_no_suitable_provider() {
        let mut registry = Registry::new();
        registry.define_type(service_type()).unwrap();
        registry
            .register_provider(
                ProviderDescriptor::new("service", "launchd", MockService(Arc::default()))
                    .confine(Confine::fact(KERNEL, &["Darwin"])),
            )
            .unwrap();
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(&registry, "service", "nginx", attrs(&[("ensure", "running")]))
            .unwrap();

        let facts = Facts::new().with(KERNEL, "Linux");
        let report = Transaction::new(&registry, &facts, &NoCommands, &log)
            .apply(&mut catalog)
            .unwrap();
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.changed, 0);
        let outcome = report.outcome("Service[nginx]").unwrap();
        assert!(outcome.provider.is_none());
        assert!(
            outcome
                .error
                .as_deref()
                .unwrap()
                .contains("no suitable provider")
        );
        assert!(report.events_at_least(Level::Err).count() >= 1);
    }

    #[test]
    fn test_subscriber_already_in_sync_is_refreshed() {
        let host = Arc::new(Host::default());
        host.set("nginx", "ensure", "running");
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(
                &registry,
                "service",
                "nginx",
                attrs(&[("ensure", "running"), ("subscribe", "Service[config]")]),
            )
            .unwrap();
        catalog
            .create_instance(&registry, "service", "config", attrs(&[("ensure", "running")]))
            .unwrap();

        let report = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        assert_eq!(
            host.calls(),
            vec!["sync config ensure=running", "refresh nginx"]
        );
        let nginx = report.outcome("Service[nginx]").unwrap();
        assert_eq!(nginx.status, Status::Changed);
        assert!(nginx.refreshed);
        assert_eq!(report.summary.changed, 2);
    }

    #[test]
    fn test_pending_target_refreshed_after_its_turn() {
        let host = Arc::new(Host::default());
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(
                &registry,
                "service",
                "config",
                attrs(&[("ensure", "running"), ("notify", "Service[nginx]")]),
            )
            .unwrap();
        catalog
            .create_instance(&registry, "service", "nginx", attrs(&[("ensure", "running")]))
            .unwrap();

        apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        assert_eq!(
            host.calls(),
            vec![
                "sync config ensure=running",
                "sync nginx ensure=running",
                "refresh nginx"
            ]
        );
    }

    #[test]
    fn test_refresh_resyncs_without_refresh_support() {
        let host = Arc::new(Host::default());
        host.set("nginx", "ensure", "running");
        let registry = registry(&host, false);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(
                &registry,
                "service",
                "nginx",
                attrs(&[("ensure", "running"), ("subscribe", "Service[config]")]),
            )
            .unwrap();
        catalog
            .create_instance(&registry, "service", "config", attrs(&[("ensure", "running")]))
            .unwrap();

        let report = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        assert_eq!(
            host.calls(),
            vec!["sync config ensure=running", "sync nginx ensure=running"]
        );
        assert!(report.outcome("Service[nginx]").unwrap().refreshed);
    }

    #[test]
    fn test_report_events_follow_log_level() {
        let host = Arc::new(Host::default());
        host.set("sshd", "ensure", "running");
        let registry = registry(&host, true);
        let log = EventLog::new(Level::Notice);

        let mut catalog = Catalog::new();
        for name in ["sshd", "cron"] {
            catalog
                .create_instance(&registry, "service", name, attrs(&[("ensure", "running")]))
                .unwrap();
        }

        let report = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        assert!(report.events.iter().all(|e| e.level >= Level::Notice));
        assert!(
            report
                .events
                .iter()
                .any(|e| e.message == "ensure changed 'stopped' to 'running'")
        );
        assert!(!report.events.iter().any(|e| e.message == "Resource is in sync"));
    }

    #[test]
    fn test_refresh_of_stopped_target_is_not_a_change() {
        let host = Arc::new(Host::default());
        host.set("monitor", "ensure", "running");
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(
                &registry,
                "service",
                "config",
                attrs(&[("ensure", "running"), ("notify", "Service[nginx]")]),
            )
            .unwrap();
        catalog
            .create_instance(
                &registry,
                "service",
                "nginx",
                attrs(&[("ensure", "stopped"), ("notify", "Service[monitor]")]),
            )
            .unwrap();
        catalog
            .create_instance(&registry, "service", "monitor", attrs(&[("ensure", "running")]))
            .unwrap();

        let report = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        assert_eq!(host.calls(), vec!["sync config ensure=running"]);
        let nginx = report.outcome("Service[nginx]").unwrap();
        assert_eq!(nginx.status, Status::InSync);
        assert!(!nginx.refreshed);
        assert_eq!(status_of(&report, "Service[monitor]"), Status::InSync);
        assert_eq!(report.summary.changed, 1);
    }

    #[test]
    fn test_refresh_with_nothing_to_resync_does_not_propagate() {
        let host = Arc::new(Host::default());
        host.set("nginx", "ensure", "running");
        let registry = registry(&host, false);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(
                &registry,
                "service",
                "config",
                attrs(&[("ensure", "running"), ("notify", "Service[audit]")]),
            )
            .unwrap();
        catalog
            .create_instance(
                &registry,
                "service",
                "audit",
                attrs(&[("check", "ensure"), ("notify", "Service[nginx]")]),
            )
            .unwrap();
        catalog
            .create_instance(&registry, "service", "nginx", attrs(&[("ensure", "running")]))
            .unwrap();

        let report = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        assert_eq!(host.calls(), vec!["sync config ensure=running"]);
        assert_eq!(status_of(&report, "Service[audit]"), Status::InSync);
        assert!(!report.outcome("Service[audit]").unwrap().refreshed);
        assert!(!report.outcome("Service[nginx]").unwrap().refreshed);
        assert_eq!(report.summary.changed, 1);
    }

    #[test]
    fn test_refresh_at_most_once_and_chains() {
        let host = Arc::new(Host::default());
        host.set("nginx", "ensure", "running");
        host.set("monitor", "ensure", "running");
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(
                &registry,
                "service",
                "nginx",
                attrs(&[("ensure", "running"), ("notify", "Service[monitor]")]),
            )
            .unwrap();
        catalog
            .create_instance(&registry, "service", "monitor", attrs(&[("ensure", "running")]))
            .unwrap();
        let mut both = Attributes::new();
        both.insert("ensure".into(), "running".into());
        both.insert(
            "notify".into(),
            Value::from(vec!["Service[nginx]", "Service[monitor]"]),
        );
        catalog
            .create_instance(&registry, "service", "config", both)
            .unwrap();

        apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        let calls = host.calls();
        assert_eq!(calls[0], "sync config ensure=running");
        assert_eq!(calls.iter().filter(|c| *c == "refresh nginx").count(), 1);
        assert_eq!(calls.iter().filter(|c| *c == "refresh monitor").count(), 1);
    }

    #[test]
    fn test_failed_target_not_refreshed() {
        let host = Arc::new(Host::default());
        host.fail("nginx");
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(
                &registry,
                "service",
                "config",
                attrs(&[("ensure", "running"), ("notify", "Service[nginx]")]),
            )
            .unwrap();
        catalog
            .create_instance(&registry, "service", "nginx", attrs(&[("ensure", "running")]))
            .unwrap();

        let report = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        assert_eq!(host.calls(), vec!["sync config ensure=running"]);
        assert_eq!(status_of(&report, "Service[nginx]"), Status::Failed);
    }

    #[test]
    fn test_noop_changes_nothing() {
        let host = Arc::new(Host::default());
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(
                &registry,
                "service",
                "config",
                attrs(&[("ensure", "running"), ("notify", "Service[nginx]")]),
            )
            .unwrap();
        catalog
            .create_instance(&registry, "service", "nginx", attrs(&[("ensure", "stopped")]))
            .unwrap();

        let options = TransactionOptions {
            noop: true,
            ..Default::default()
        };
        let report = apply(&registry, &mut catalog, &log, options).unwrap();
        assert!(host.calls().is_empty());
        assert_eq!(report.summary.noop, 1);
        assert_eq!(report.summary.in_sync, 1);
        assert!(report.noop);
        assert!(
            report
                .events
                .iter()
                .any(|e| e.message == "ensure is 'stopped', should be 'running' (noop)")
        );
        assert!(
            report
                .events
                .iter()
                .any(|e| e.source == "Service[nginx]" && e.message.contains("Would have triggered"))
        );
    }

    #[test]
    fn test_tag_filter() {
        let host = Arc::new(Host::default());
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        let mut web = attrs(&[("ensure", "running")]);
        web.insert("tag".into(), Value::from(vec!["web"]));
        catalog
            .create_instance(&registry, "service", "nginx", web.clone())
            .unwrap();
        catalog
            .create_instance(&registry, "service", "db", attrs(&[("ensure", "running")]))
            .unwrap();
        web.insert("require".into(), Value::from("Service[db]"));
        catalog
            .create_instance(&registry, "service", "app", web)
            .unwrap();

        let options = TransactionOptions {
            tags: vec!["web".to_string()],
            ..Default::default()
        };
        let report = apply(&registry, &mut catalog, &log, options).unwrap();
        assert_eq!(status_of(&report, "Service[db]"), Status::Filtered);
        assert_eq!(status_of(&report, "Service[app]"), Status::Changed);
        assert_eq!(report.summary.filtered, 1);
        assert_eq!(
            host.calls(),
            vec!["sync nginx ensure=running", "sync app ensure=running"]
        );
    }

    #[test]
    fn test_retry_recovers_transient_failure() {
        let host = Arc::new(Host::default());
        host.flaky.lock().unwrap().insert("nginx".to_string(), 2);
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(&registry, "service", "nginx", attrs(&[("ensure", "running")]))
            .unwrap();

        let options = TransactionOptions {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                backoff_factor: 1.0,
                max_delay: Duration::from_millis(2),
            },
            ..Default::default()
        };
        let report = apply(&registry, &mut catalog, &log, options).unwrap();
        assert_eq!(status_of(&report, "Service[nginx]"), Status::Changed);
        assert_eq!(
            report
                .events
                .iter()
                .filter(|e| e.level == Level::Warning && e.message.starts_with("Attempt"))
                .count(),
            2
        );
    }

    #[test]
    fn test_unknown_reference_fails_referrer() {
        let host = Arc::new(Host::default());
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(
                &registry,
                "service",
                "app",
                attrs(&[("ensure", "running"), ("require", "Service[ghost]")]),
            )
            .unwrap();
        catalog
            .create_instance(
                &registry,
                "service",
                "worker",
                attrs(&[("ensure", "running"), ("require", "Service[app]")]),
            )
            .unwrap();

        let report = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        let app = report.outcome("Service[app]").unwrap();
        assert_eq!(app.status, Status::Failed);
        assert!(app.error.as_deref().unwrap().contains("Service[ghost]"));
        assert_eq!(status_of(&report, "Service[worker]"), Status::Skipped);
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_rejected_declaration_skips_dependents() {
        let host = Arc::new(Host::default());
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog.declare(
            &registry,
            "service",
            "db",
            attrs(&[("ensure", "sideways")]),
            &log,
        );
        catalog.declare(
            &registry,
            "service",
            "app",
            attrs(&[("ensure", "running"), ("require", "Service[db]")]),
            &log,
        );

        let report = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        assert_eq!(report.outcomes[0].resource, "Service[db]");
        assert_eq!(report.outcomes[0].status, Status::Failed);
        assert_eq!(status_of(&report, "Service[app]"), Status::Skipped);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 1);
    }

    #[test]
    fn test_change_events_use_resource_loglevel() {
        let host = Arc::new(Host::default());
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        catalog
            .create_instance(
                &registry,
                "service",
                "quiet",
                attrs(&[("ensure", "running"), ("loglevel", "info")]),
            )
            .unwrap();
        catalog
            .create_instance(&registry, "service", "loud", attrs(&[("ensure", "running")]))
            .unwrap();

        let report = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        let change_level = |source: &str| {
            report
                .events
                .iter()
                .find(|e| e.source == source && e.message.starts_with("ensure changed"))
                .map(|e| e.level)
        };
        assert_eq!(change_level("Service[quiet]"), Some(Level::Info));
        assert_eq!(change_level("Service[loud]"), Some(Level::Notice));
    }

    #[test]
    fn test_destinations_see_identical_order() {
        let host = Arc::new(Host::default());
        host.fail("db");
        let registry = registry(&host, true);
        let log = EventLog::new(Level::Debug);
        let first = MemoryDestination::new();
        let first_events = first.handle();
        let second = MemoryDestination::new();
        let second_events = second.handle();
        log.add_destination(Box::new(first));
        log.add_destination(Box::new(second));

        let mut catalog = Catalog::new();
        for (name, extra) in [("db", None), ("app", Some("Service[db]")), ("cron", None)] {
            let mut attributes = attrs(&[("ensure", "running")]);
            if let Some(dep) = extra {
                attributes.insert("require".into(), dep.into());
            }
            catalog
                .create_instance(&registry, "service", name, attributes)
                .unwrap();
        }

        let report = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        let first_events = first_events.events();
        assert!(!first_events.is_empty());
        assert_eq!(first_events, second_events.events());
        assert_eq!(first_events, report.events);
        assert!(first_events.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[test]
    fn test_tags_copied_onto_events() {
        let host = Arc::new(Host::default());
        let registry = registry(&host, true);
        let (log, _events) = memory_log();

        let mut catalog = Catalog::new();
        let mut attributes = attrs(&[("ensure", "running")]);
        attributes.insert("tag".into(), Value::from(vec!["web"]));
        catalog
            .create_instance(&registry, "service", "nginx", attributes)
            .unwrap();

        let report = apply(&registry, &mut catalog, &log, TransactionOptions::default()).unwrap();
        let change = report
            .events
            .iter()
            .find(|e| e.source == "Service[nginx]" && e.level == Level::Notice)
            .unwrap();
        assert!(change.tags.contains("web"));
        assert!(change.tags.contains("service"));
        assert!(change.tags.contains("nginx"));
    }
}
