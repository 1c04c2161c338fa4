//! Motifs, signals and everything needed to place them into sequences.
//!
//! - `position`: IMGT-style position labels and position weights
//! - `motif`: seed motifs, instantiation and enumeration
//! - `sequence_implanting`: splicing an instance into one sequence
//! - `signal`: signals and repertoire-level implanting
//! - `annotation`: detecting signals in sequences

pub mod annotation;
pub mod motif;
pub mod position;
pub mod sequence_implanting;
pub mod signal;

pub use annotation::SignalAnnotator;
pub use motif::{MotifInstance, SeedMotif, GAP_MARKER};
pub use position::{
    allowed_positions_for_annotation, positions_for_length, weights_for_annotation,
    weights_for_implanting, ImgtPosition, PositionWeights, UserPositionWeights,
};
pub use sequence_implanting::{GappedMotifImplanting, ImplantRequest};
pub use signal::{ImplantedRepertoire, Signal, SignalImplanting};
