//! `stampede` CLI subcommands.
//!
//! Provides `run` (execute a scenario) and `init` (generate a starter
//! scenario).

mod init;
mod run;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

/// Load test commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test scenario
    ///
    /// Executes the requests defined in stampede.toml (or the given file)
    /// and writes one CSV row per request to <output-dir>/<timestamp>_results.csv.
    Run(RunArgs),

    /// Generate a starter stampede.toml
    Init {
        /// Overwrite an existing scenario file
        #[arg(long)]
        force: bool,
    },
}

/// Options of `stampede run`. Every flag overrides the scenario file.
#[derive(Debug, Default, clap::Args)]
pub struct RunArgs {
    /// Path to the scenario file (default: discover stampede.toml)
    pub scenario: Option<PathBuf>,

    /// Base URL prepended to every task path
    #[arg(long, env = "STAMPEDE_URL")]
    pub url: Option<String>,

    /// Number of virtual users
    #[arg(long)]
    pub users: Option<u32>,

    /// Test duration in seconds (0 runs until interrupted)
    #[arg(long)]
    pub duration: Option<u64>,

    /// Pause between passes in milliseconds
    #[arg(long)]
    pub think_time: Option<u64>,

    /// Directory for the results file
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Number of concurrent CSV writers
    #[arg(long)]
    pub sink_workers: Option<usize>,

    /// Disable the live terminal view
    #[arg(long)]
    pub no_visualizer: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl Command {
    /// Execute the selected subcommand.
    pub fn execute(self) -> Result<()> {
        match self {
            Command::Run(args) => {
                let runtime = tokio::runtime::Runtime::new()?;
                runtime.block_on(run::execute_run(args))
            },
            Command::Init { force } => init::execute_init(force),
        }
    }
}
