//! # Simulation Crate
//!
//! The `sim` crate provides the core of the receptor repertoire simulator:
//! receptor sequences and their annotations, motifs and signal implanting,
//! generative models for background sequences, the simulation drivers and
//! the repertoire store.

pub mod base;
pub mod errors;
pub mod generative;
pub mod implants;
pub mod prelude;
pub mod simulation;
pub mod storage;

pub use base::{Receptor, ReceptorSequence, SequenceType};
