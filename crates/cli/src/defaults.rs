//! Shared default values for the command line.
//! Used by the clap argument definitions and by the `init` scaffold.

pub const CONFIG_FILE: &str = "ligo.json";
pub const OUTPUT_DIR: &str = "ligo_output";
pub const FEASIBILITY_DIR: &str = "feasibility";
pub const STORE_FILE: &str = "repertoires.sqlite";

// Scaffold
pub const ITEM_NAME: &str = "item1";
pub const MODEL_NAME: &str = "humanTRB";
pub const MOTIF_ID: &str = "motif1";
pub const MOTIF_SEED: &str = "AS/G";
pub const SIGNAL_ID: &str = "signal1";
pub const NUMBER_OF_EXAMPLES: usize = 100;
pub const SIGNAL_RATE: f64 = 0.1;
pub const SEED: u64 = 1;
