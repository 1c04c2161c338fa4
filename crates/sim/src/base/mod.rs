//! Base types for receptor sequence representation.
//!
//! This module provides sequence types and alphabets, receptor sequences
//! with their typed metadata, and paired receptors.

mod alphabet;
mod sequence;

pub use alphabet::{
    codons_for, nucleotide_index, translate, translate_codon, SequenceType, AMINO_ACIDS,
    NUCLEOTIDES,
};
pub use sequence::{
    normalize_signal_key, Chain, FrameType, ImplantAnnotation, Receptor, ReceptorSequence,
    RegionType, SequenceAnnotation, SequenceMetadata, SignalAnnotation, NO_SIGNAL,
    SIGNAL_KEY_SEPARATOR,
};
