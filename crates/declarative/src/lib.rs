//! # Declarative
//!
//! A declarative configuration engine: describe what a system should look
//! like, and converge it there.
//!
//! ## Core Concepts
//!
//! - **Type**: a kind of thing to manage (`service`, `file`) with
//!   properties (observable and changeable state) and parameters
//!   (instructions to the provider)
//! - **Provider**: one way of managing a type on some platforms, chosen per
//!   instance from confinement rules and platform defaults
//! - **Catalog**: the declared instances and their relationships
//! - **Transaction**: walks the catalog in dependency order, syncing every
//!   property that is out of sync and delivering refresh notifications
//! - **EventLog**: every decision is logged to all attached destinations
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{Catalog, EventLog, Facts, Level, Registry, SystemRunner, Transaction};
//!
//! let facts = Facts::from_host();
//! let mut registry = Registry::new();
//! declarative::builtin::register_all(&mut registry, &facts)?;
//!
//! let log = EventLog::new(Level::Notice);
//! log.add_destination(Box::new(declarative::logging::ConsoleDestination));
//!
//! let mut catalog = Catalog::new();
//! let mut attributes = declarative::Attributes::new();
//! attributes.insert("ensure".into(), "running".into());
//! catalog.declare(&registry, "service", "sshd", attributes, &log);
//!
//! let runner = SystemRunner::new();
//! let report = Transaction::new(&registry, &facts, &runner, &log).apply(&mut catalog)?;
//! assert!(report.is_success());
//! ```
//!
//! ## Seams
//!
//! - [`Provider`]: per-type system behaviour
//! - [`CommandRunner`]: how external commands are executed
//! - [`Destination`]: where events end up
//! - [`RetryCallback`]: observes retried operations

pub mod builtin;
pub mod catalog;
pub mod command;
pub mod discovery;
pub mod error;
pub mod facts;
pub mod graph;
pub mod logging;
pub mod property;
pub mod provider;
pub mod registry;
pub mod report;
pub mod retry;
pub mod transaction;
pub mod value;

// Re-export main types at crate root
pub use catalog::{Catalog, Rejection, Resource, ResourceId};
pub use command::{CommandRunner, SystemRunner};
pub use error::{Error, ErrorCategory, Result};
pub use facts::Facts;
pub use graph::Graph;
pub use logging::{Destination, Event, EventLog, Level, Source};
pub use property::{Change, Comparator, Property};
pub use provider::{Confine, Feature, Provider, ProviderContext, ProviderDescriptor};
pub use registry::{ParamSpec, PropertySpec, Registry, TypeDefinition};
pub use report::{ResourceOutcome, RunReport, Status, Summary};
pub use retry::{RetryCallback, RetryPolicy};
pub use transaction::{Transaction, TransactionOptions};
pub use value::{Attributes, ResourceRef, Value};
