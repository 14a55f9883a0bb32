use anyhow::Result;
use std::collections::BTreeMap;

use crate::Context;
use crate::cli::FactsArgs;
use crate::commands::Session;
use crate::ui;

pub fn run(ctx: &Context, args: FactsArgs) -> Result<()> {
    let session = Session::open(ctx, &BTreeMap::new())?;

    if args.json {
        let facts: BTreeMap<&str, &str> = session.facts.iter().collect();
        println!("{}", serde_json::to_string_pretty(&facts)?);
        return Ok(());
    }

    ui::header("Facts");
    for (name, value) in session.facts.iter() {
        ui::kv(name, value);
    }
    Ok(())
}
