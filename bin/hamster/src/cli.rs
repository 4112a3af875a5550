use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// The configuration file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "Hamster.toml";

/// How listings are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Format {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "hamster")]
#[command(
    author,
    version,
    about = "Deploy and wire up the Hamster protocol contracts"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "HAMSTER_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    ///
    /// Built-in environments are used as-is when the file does not exist.
    #[arg(short, long, global = true, env = "HAMSTER_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a deployment plan against a network.
    Deploy(DeployArgs),
    /// Show which steps of a plan run on a network, and check its references.
    Plan(PlanArgs),
    /// List the configured networks.
    Networks(NetworksArgs),
}

#[derive(Args)]
pub struct DeployArgs {
    /// The network to deploy to.
    #[arg(short, long, env = "HAMSTER_NETWORK", default_value = "development")]
    pub network: String,

    /// A TOML plan file. The built-in Hamster plan is used when omitted.
    #[arg(long, env = "HAMSTER_PLAN")]
    pub plan: Option<PathBuf>,

    /// Directory holding the compiled contract artifacts.
    ///
    /// Overrides the `artifacts` configuration entry.
    #[arg(long, env = "HAMSTER_ARTIFACTS")]
    pub artifacts: Option<PathBuf>,

    /// Where to write the run output.
    ///
    /// If not provided, the output is written to: <deployments>/<network>.json
    #[arg(short, long, env = "HAMSTER_OUTPUT")]
    pub output: Option<PathBuf>,

    /// A previous run output whose contracts are reused instead of redeployed.
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// The 1-based step to start from.
    #[arg(long, default_value_t = 1)]
    pub from_step: usize,

    /// Rehearse the run against an in-memory chain. Nothing is sent or saved.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct PlanArgs {
    /// The network to evaluate step conditions against.
    #[arg(short, long, env = "HAMSTER_NETWORK", default_value = "development")]
    pub network: String,

    /// A TOML plan file. The built-in Hamster plan is used when omitted.
    #[arg(long, env = "HAMSTER_PLAN")]
    pub plan: Option<PathBuf>,

    /// A previous run output whose contracts count as known.
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// The 1-based step to start from.
    #[arg(long, default_value_t = 1)]
    pub from_step: usize,

    #[arg(long, default_value_t = Format::Table)]
    pub format: Format,
}

#[derive(Args)]
pub struct NetworksArgs {
    #[arg(long, default_value_t = Format::Table)]
    pub format: Format,
}
