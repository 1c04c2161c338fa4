//! Simulation configuration, strategies and the drivers running them.
//!
//! - `configs`: the user-facing configuration and its validation
//! - `strategy`: rejection sampling and implanting
//! - `pgen`: generation probability bins
//! - `implanter`: the per-item driver
//! - `paired`: combining chains into receptors
//! - `engine`: runs all items of a configuration

pub mod configs;
pub mod engine;
pub mod implanter;
pub mod paired;
pub mod pgen;
pub mod strategy;

pub use configs::{
    LigoConfig, SignalConfig, SignalTarget, SimConfig, SimConfigItem, SimulationParams,
};
pub use engine::{Simulation, SimulationOutput, CONFIG_METADATA_KEY};
pub use implanter::{batch_seed, LigoImplanter, Phase};
pub use paired::pair_sequences;
pub use pgen::{PgenBins, PgenQuotas};
pub use strategy::{
    filter_out_illegal_sequences, Implanting, RejectionSampling, SimulationStrategy,
    SimulationStrategyKind, StrategyContext,
};
