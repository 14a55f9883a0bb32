use anyhow::{Context as _, Result};
use declarative::{RunReport, SystemRunner, Transaction, TransactionOptions};
use std::process::ExitCode;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::commands::Session;
use crate::manifest::CatalogFile;
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<ExitCode> {
    let file = CatalogFile::load(&args.catalog)?;
    let session = Session::open(ctx, &file.facts)?;
    let report = apply(&session, file, &args, ctx)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !ctx.quiet {
        ui::print_report(&report);
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn options(session: &Session, args: &ApplyArgs) -> TransactionOptions {
    let settings = &session.settings;
    TransactionOptions {
        noop: args.noop || settings.noop,
        tags: if args.tags.is_empty() {
            settings.tags.clone()
        } else {
            args.tags.clone()
        },
        retry: settings.retry.policy(),
    }
}

fn apply(session: &Session, file: CatalogFile, args: &ApplyArgs, ctx: &Context) -> Result<RunReport> {
    // JSON output owns stdout; events still go to the other destinations
    let mut settings = session.settings.clone();
    if args.json {
        settings.console = false;
    }
    let log = settings.event_log(ctx.verbose, ctx.quiet)?;

    let mut catalog = file.into_catalog(&session.registry, &log);
    log::debug!(
        "Loaded {} resources ({} rejected) from {}",
        catalog.len(),
        catalog.rejected().len(),
        args.catalog.display()
    );

    let runner = match settings.command_timeout() {
        Some(timeout) => SystemRunner::with_timeout(timeout),
        None => SystemRunner::new(),
    };

    let report = Transaction::new(&session.registry, &session.facts, &runner, &log)
        .with_options(options(session, args))
        .apply(&mut catalog)
        .context("Catalog run aborted")?;
    log.close();
    Ok(report)
}
