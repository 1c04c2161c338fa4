use clap::{Args, ValueEnum};
use ligo_analysis::analysis::DEFAULT_SEQUENCE_COUNT;
use ligo_sim::base::SequenceType;
use ligo_sim::simulation::SimulationStrategyKind;
use std::path::PathBuf;

use crate::defaults;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Implant motifs into signal-free sequences
    Implanting,
    /// Keep only sequences that carry a signal naturally
    RejectionSampling,
}

impl From<Strategy> for SimulationStrategyKind {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Implanting => SimulationStrategyKind::Implanting,
            Strategy::RejectionSampling => SimulationStrategyKind::RejectionSampling,
        }
    }
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Configuration file to write
    #[arg(short, long, default_value = defaults::CONFIG_FILE)]
    pub output: PathBuf,

    /// Overwrite an existing configuration file
    #[arg(long)]
    pub force: bool,

    /// Name of the simulation item
    #[arg(short = 'N', long, default_value = defaults::ITEM_NAME)]
    pub name: String,

    /// Built-in generative model (humanTRA, humanTRB)
    #[arg(short, long, default_value = defaults::MODEL_NAME)]
    pub model: String,

    /// Number of sequences, or of repertoires with --repertoire-size
    #[arg(short = 'n', long, default_value_t = defaults::NUMBER_OF_EXAMPLES)]
    pub number_of_examples: usize,

    /// Sequences per repertoire; simulates repertoires when set
    #[arg(long)]
    pub repertoire_size: Option<usize>,

    /// Alphabet of the simulated sequences (amino_acid, nucleotide)
    #[arg(long, default_value = "amino_acid")]
    pub sequence_type: SequenceType,

    /// Motif seed; `/` marks a gap position
    #[arg(long, default_value = defaults::MOTIF_SEED)]
    pub motif: String,

    /// Minimum gap length for a gapped seed
    #[arg(long, default_value_t = 0)]
    pub min_gap: usize,

    /// Maximum gap length for a gapped seed
    #[arg(long, default_value_t = 0)]
    pub max_gap: usize,

    /// Fraction of sequences that carry the signal
    #[arg(long, default_value_t = defaults::SIGNAL_RATE)]
    pub signal_rate: f64,

    /// How signal-carrying sequences are obtained
    #[arg(long, value_enum, default_value_t = Strategy::Implanting)]
    pub strategy: Strategy,

    /// Sequences drawn from the model per iteration
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Iteration budget per item
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Random seed
    #[arg(long, default_value_t = defaults::SEED)]
    pub seed: u64,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Configuration file
    #[arg(short, long, default_value = defaults::CONFIG_FILE)]
    pub config: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = defaults::OUTPUT_DIR)]
    pub output: PathBuf,

    /// Repertoire store (default: <output>/repertoires.sqlite)
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    /// Replace an existing repertoire store
    #[arg(long)]
    pub force: bool,

    /// Hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct FeasibilityArgs {
    /// Configuration file
    #[arg(short, long, default_value = defaults::CONFIG_FILE)]
    pub config: PathBuf,

    /// Output directory for the report tables
    #[arg(short, long, default_value = defaults::FEASIBILITY_DIR)]
    pub output: PathBuf,

    /// Sequences to draw from each model
    #[arg(short = 'n', long, default_value_t = DEFAULT_SEQUENCE_COUNT)]
    pub sequence_count: usize,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Repertoire store
    #[arg(short, long)]
    pub store: PathBuf,

    /// Print the configuration the store was produced from
    #[arg(long)]
    pub config: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Repertoire store
    #[arg(short, long)]
    pub store: PathBuf,

    /// Output directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// Repertoire identifiers to export (default: all)
    #[arg(short, long, value_delimiter = ',')]
    pub repertoires: Vec<String>,
}
