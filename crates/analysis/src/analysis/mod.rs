//! Simulation diagnostics for ligo
//!
//! - Feasibility summary: natural signal frequencies, co-occurrences,
//!   conditional probabilities, p_gen and length distributions per model

pub mod feasibility;

pub use feasibility::{
    FeasibilityError, FeasibilityReport, FeasibilitySummary, DEFAULT_SEQUENCE_COUNT,
};
