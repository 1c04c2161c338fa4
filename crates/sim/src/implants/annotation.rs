//! Signal annotation: scanning sequences for motif occurrences.
//!
//! Every motif is compiled once into an anchored pattern built from all of
//! its legal instances. A sequence is checked at each allowed start
//! position; occurrences and implant records together determine the
//! [`SignalAnnotation`] written for each signal.

use crate::base::{ReceptorSequence, SequenceType, SignalAnnotation};
use crate::errors::MotifError;
use crate::implants::position::allowed_positions_for_annotation;
use crate::implants::signal::Signal;
use rayon::prelude::*;
use regex::Regex;

#[derive(Debug, Clone)]
struct CompiledMotif {
    pattern: Regex,
}

#[derive(Debug, Clone)]
struct CompiledSignal {
    signal: Signal,
    motifs: Vec<CompiledMotif>,
}

/// Annotates sequences for a fixed set of signals.
#[derive(Debug, Clone)]
pub struct SignalAnnotator {
    sequence_type: SequenceType,
    signals: Vec<CompiledSignal>,
}

impl SignalAnnotator {
    /// Compile detection patterns for every motif of every signal.
    pub fn new(signals: &[Signal], sequence_type: SequenceType) -> Result<Self, MotifError> {
        let signals = signals
            .iter()
            .map(|signal| {
                let motifs = signal
                    .motifs
                    .iter()
                    .map(|motif| {
                        let alternatives = motif.enumerate_all(sequence_type);
                        let source = format!("^(?:{})", alternatives.join("|"));
                        Regex::new(&source)
                            .map(|pattern| CompiledMotif { pattern })
                            .map_err(|e| MotifError::Pattern {
                                motif: motif.identifier.clone(),
                                reason: e.to_string(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CompiledSignal {
                    signal: signal.clone(),
                    motifs,
                })
            })
            .collect::<Result<Vec<_>, MotifError>>()?;

        Ok(Self {
            sequence_type,
            signals,
        })
    }

    pub fn sequence_type(&self) -> SequenceType {
        self.sequence_type
    }

    pub fn signal_ids(&self) -> impl Iterator<Item = &str> {
        self.signals.iter().map(|s| s.signal.id.as_str())
    }

    fn allowed_mask(&self, compiled: &CompiledSignal, sequence: &ReceptorSequence, length: usize) -> Vec<bool> {
        let weights = &compiled.signal.sequence_position_weights;
        if weights.is_empty() {
            return vec![true; length];
        }
        let step = self.sequence_type.letters_per_position();
        match allowed_positions_for_annotation(length / step, sequence.metadata.region_type, weights) {
            Ok(per_position) => (0..length)
                .map(|i| per_position.get(i / step).copied().unwrap_or(false))
                .collect(),
            Err(e) => {
                log::warn!(
                    "Signal {}: cannot compute allowed positions for sequence {}: {e}",
                    compiled.signal.id,
                    sequence.sequence_id
                );
                vec![false; length]
            }
        }
    }

    fn annotate_signal(&self, compiled: &CompiledSignal, sequence: &ReceptorSequence) -> SignalAnnotation {
        let text = sequence.get_sequence(self.sequence_type);
        let length = text.len();
        let mut mask = vec![false; length];

        if compiled.signal.matches_genes(sequence) {
            let allowed = self.allowed_mask(compiled, sequence, length);
            for (start, is_allowed) in allowed.iter().enumerate() {
                if *is_allowed && compiled.motifs.iter().any(|m| m.pattern.is_match(&text[start..])) {
                    mask[start] = true;
                }
            }
        }

        for implant in sequence
            .annotation
            .implants
            .iter()
            .filter(|i| i.signal_id == compiled.signal.id)
        {
            if implant.motif_instance.is_empty() || implant.position >= length {
                log::warn!(
                    "Sequence {}: ignoring malformed implant record for signal {} at position {}",
                    sequence.sequence_id,
                    implant.signal_id,
                    implant.position
                );
                continue;
            }
            mask[implant.position] = true;
        }

        SignalAnnotation::from_mask(&mask)
    }

    /// Return the sequence with fresh annotations for every signal.
    pub fn annotate(&self, mut sequence: ReceptorSequence) -> ReceptorSequence {
        for compiled in &self.signals {
            let annotation = self.annotate_signal(compiled, &sequence);
            sequence.metadata.signals.insert(compiled.signal.id.clone(), annotation);
        }
        sequence
    }

    /// Annotate a batch in parallel, preserving order.
    pub fn annotate_all(&self, sequences: Vec<ReceptorSequence>) -> Vec<ReceptorSequence> {
        sequences.into_par_iter().map(|s| self.annotate(s)).collect()
    }
}
