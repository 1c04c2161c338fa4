//! Commonly used imports for convenience.
//!
//! # Example
//!
//! ```
//! use ligo_sim::prelude::*;
//!
//! let motif = SeedMotif::new("m1", "AS/G").with_gap(1, 2);
//! assert!(motif.validate(SequenceType::AminoAcid).is_ok());
//! ```

pub use crate::base::{Chain, Receptor, ReceptorSequence, RegionType, SequenceType, NO_SIGNAL};
pub use crate::errors::{self, ConfigError, GenerationError, SimulationError, StorageError};
pub use crate::generative::{GenerativeModel, GenerativeModelConfig, ModelCache, ModelRegistry};
pub use crate::implants::{SeedMotif, Signal, SignalAnnotator, SignalImplanting};
pub use crate::simulation::{
    LigoConfig, LigoImplanter, SignalTarget, SimConfig, SimConfigItem, Simulation,
    SimulationOutput, SimulationParams, SimulationStrategyKind,
};
pub use crate::storage::{Repertoire, RepertoireStore};
