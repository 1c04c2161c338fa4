//! # Analysis Crate
//!
//! Diagnostics computed on samples of simulated sequences.

pub mod analysis;

pub use analysis::feasibility;
