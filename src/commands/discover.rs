use anyhow::Result;
use declarative::{Catalog, Resource, SystemRunner, Transaction, TransactionOptions};
use std::collections::BTreeMap;

use crate::Context;
use crate::cli::DiscoverArgs;
use crate::commands::Session;
use crate::ui;

pub fn run(ctx: &Context, args: DiscoverArgs) -> Result<()> {
    let session = Session::open(ctx, &BTreeMap::new())?;
    let log = session.settings.event_log(ctx.verbose, ctx.quiet)?;

    let mut catalog = Catalog::new();
    let found = catalog.discover(&session.registry, &args.type_name, &args.provider, &log)?;
    if found.is_empty() {
        ui::info(&format!(
            "No {} instances found by provider '{}'",
            args.type_name, args.provider
        ));
        return Ok(());
    }

    // Discovered properties are check-only, so this never changes anything
    let runner = SystemRunner::new();
    let report = Transaction::new(&session.registry, &session.facts, &runner, &log)
        .with_options(TransactionOptions {
            noop: true,
            ..TransactionOptions::default()
        })
        .apply(&mut catalog)?;

    ui::header(&format!("{} instances ({})", args.type_name, args.provider));
    for resource in catalog.resources() {
        println!("  {:<24} {}", resource.reference.name, describe(resource));
    }
    for outcome in report.outcomes.iter().filter(|o| o.error.is_some()) {
        ui::warn(&format!(
            "{}: {}",
            outcome.resource,
            outcome.error.as_deref().unwrap_or_default()
        ));
    }
    Ok(())
}

/// `ensure=running enable=true`, with `?` for values that could not be read
fn describe(resource: &Resource) -> String {
    resource
        .properties
        .iter()
        .map(|p| {
            let value = p.is().map_or_else(|| "?".to_string(), ToString::to_string);
            format!("{}={}", p.name(), value)
        })
        .collect::<Vec<_>>()
        .join(" ")
}
