mod args;
mod commands;
pub mod defaults;
mod printing;

use anyhow::Result;
use clap::{Parser, Subcommand};

use args::{ExportArgs, FeasibilityArgs, InitArgs, InspectArgs, SimulateArgs};
use commands::{export, feasibility, init, inspect, simulate};

/// LIgO: synthetic immune receptor repertoire simulator
///
/// Draws receptor sequences from a generative model, implants or selects
/// signal motifs at configured rates, and writes annotated sequence datasets
/// or repertoires.
#[derive(Parser, Debug)]
#[command(name = "ligo")]
#[command(author, version, about = "Simulates immune receptor repertoires with implanted signals", long_about = None)]
struct Cli {
    /// Number of threads to use for parallel processing
    ///
    /// If not specified, defaults to the number of logical CPUs.
    #[arg(short = 't', long, global = true)]
    threads: Option<usize>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter configuration file.
    ///
    /// Creates a JSON configuration with one motif, one signal and one
    /// simulation item that can be edited and passed to `simulate`.
    Init(Box<InitArgs>),

    /// Run a simulation from a configuration file.
    ///
    /// Sequence datasets are written as TSV files; repertoires are stored in
    /// SQLite and exported with a metadata table.
    Simulate(SimulateArgs),

    /// Dry run: report how often each signal occurs naturally.
    ///
    /// Use this before a long rejection-sampling run to check that the
    /// requested signal rates are reachable.
    Feasibility(FeasibilityArgs),

    /// Show the contents of a repertoire store.
    Inspect(InspectArgs),

    /// Export repertoires from a store to TSV files.
    Export(ExportArgs),
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    match cli.command {
        Commands::Init(args) => {
            init::init_config(&args)?;
        }
        Commands::Simulate(args) => {
            simulate::run_simulation(&args)?;
        }
        Commands::Feasibility(args) => {
            feasibility::run_feasibility(&args)?;
        }
        Commands::Inspect(args) => {
            inspect::show_store(&args)?;
        }
        Commands::Export(args) => {
            export::export_store(&args)?;
        }
    }

    Ok(())
}
