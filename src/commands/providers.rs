use anyhow::{Result, bail};
use colored::Colorize;
use declarative::{Facts, ProviderDescriptor, Registry};
use std::collections::BTreeMap;

use crate::Context;
use crate::cli::ProvidersArgs;
use crate::commands::Session;
use crate::ui;

pub fn run(ctx: &Context, args: ProvidersArgs) -> Result<()> {
    let session = Session::open(ctx, &BTreeMap::new())?;

    let types: Vec<String> = match &args.type_name {
        Some(name) => {
            if session.registry.get_type(name).is_none() {
                bail!("Unknown resource type '{}'", name);
            }
            vec![name.to_lowercase()]
        }
        None => session.registry.types().map(|t| t.name.clone()).collect(),
    };

    for type_name in types {
        ui::header(&type_name);
        for line in verdicts(&session.registry, &type_name, &session.facts) {
            println!("{}", line);
        }
    }
    Ok(())
}

/// One line per provider in selection order; the one that would be
/// chosen is marked `default`
fn verdicts(registry: &Registry, type_name: &str, facts: &Facts) -> Vec<String> {
    let mut chosen = false;
    registry
        .ranked_providers(type_name, facts)
        .into_iter()
        .map(|descriptor| {
            let verdict = match descriptor.failed_confine(facts) {
                None if !chosen => {
                    chosen = true;
                    "default".green().bold().to_string()
                }
                None => "suitable".green().to_string(),
                Some(rule) => format!("unsuitable: {}", rule).yellow().to_string(),
            };
            format!(
                "  {:<10} {} {}",
                descriptor.name,
                verdict,
                features(descriptor).dimmed()
            )
        })
        .collect()
}

fn features(descriptor: &ProviderDescriptor) -> String {
    let names: Vec<String> = descriptor.features().map(|f| f.to_string()).collect();
    if names.is_empty() {
        String::new()
    } else {
        format!("[{}]", names.join(", "))
    }
}
