use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "converge")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge services and files to their declared state", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Settings file (default: settings.toml in the config directory)
    #[arg(long, global = true, env = "CONVERGE_SETTINGS")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply a catalog to this host
    Apply(ApplyArgs),

    /// Find instances through a provider's search paths and show their state
    Discover(DiscoverArgs),

    /// List providers and whether they are suitable on this host
    Providers(ProvidersArgs),

    /// Show the facts used for provider selection
    Facts(FactsArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Apply
// ============================================================================

#[derive(Parser)]
pub struct ApplyArgs {
    /// Catalog file (TOML)
    pub catalog: PathBuf,

    /// Report what would change without changing anything
    #[arg(short, long)]
    pub noop: bool,

    /// Only apply resources with one of these tags (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

// ============================================================================
// Discover / Providers / Facts
// ============================================================================

#[derive(Parser)]
pub struct DiscoverArgs {
    /// Resource type
    #[arg(long = "type", default_value = "service")]
    pub type_name: String,

    /// Provider whose search paths are scanned
    #[arg(short, long, default_value = "init")]
    pub provider: String,
}

#[derive(Parser)]
pub struct ProvidersArgs {
    /// Only show providers of this type
    #[arg(long = "type")]
    pub type_name: Option<String>,
}

#[derive(Parser)]
pub struct FactsArgs {
    /// Print facts as JSON
    #[arg(long)]
    pub json: bool,
}
