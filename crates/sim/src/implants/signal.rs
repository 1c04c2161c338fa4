//! Signals and signal-level implanting.

use crate::base::{translate, ImplantAnnotation, ReceptorSequence, SequenceType, SignalAnnotation};
use crate::errors::ImplantError;
use crate::implants::motif::SeedMotif;
use crate::implants::position::UserPositionWeights;
use crate::implants::sequence_implanting::{GappedMotifImplanting, ImplantRequest};
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How a signal is placed into sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SignalImplanting {
    /// Splice a motif instance into an existing signal-free sequence.
    #[default]
    HealthySequence,
    /// Replace whole sequences by motif instances.
    FullSequence,
}

impl fmt::Display for SignalImplanting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HealthySequence => "HealthySequence",
            Self::FullSequence => "FullSequence",
        })
    }
}

impl FromStr for SignalImplanting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HealthySequence" | "healthy_sequence" => Ok(Self::HealthySequence),
            "FullSequence" | "full_sequence" => Ok(Self::FullSequence),
            _ => Err(format!("unknown signal implanting strategy '{s}'")),
        }
    }
}

/// A named immunological feature made of one or more motifs.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub id: String,
    pub motifs: Vec<SeedMotif>,
    pub implanting: SignalImplanting,
    /// Restricts where motifs may be implanted and detected.
    pub sequence_position_weights: UserPositionWeights,
    /// Required V gene (prefix match), if any.
    pub v_call: Option<String>,
    /// Required J gene (prefix match), if any.
    pub j_call: Option<String>,
}

/// Sequences of a repertoire after signal implanting.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplantedRepertoire {
    pub sequences: Vec<ReceptorSequence>,
    pub labels: BTreeMap<String, bool>,
}

fn gene_matches(call: &str, required: Option<&str>) -> bool {
    required.is_none_or(|gene| call.split(',').any(|c| c.trim().starts_with(gene)))
}

impl Signal {
    pub fn new(id: impl Into<String>, motifs: Vec<SeedMotif>) -> Self {
        Self {
            id: id.into(),
            motifs,
            implanting: SignalImplanting::default(),
            sequence_position_weights: UserPositionWeights::new(),
            v_call: None,
            j_call: None,
        }
    }

    pub fn with_implanting(mut self, implanting: SignalImplanting) -> Self {
        self.implanting = implanting;
        self
    }

    pub fn with_position_weights(mut self, weights: UserPositionWeights) -> Self {
        self.sequence_position_weights = weights;
        self
    }

    pub fn with_genes(mut self, v_call: Option<String>, j_call: Option<String>) -> Self {
        self.v_call = v_call;
        self.j_call = j_call;
        self
    }

    pub fn has_gene_constraints(&self) -> bool {
        self.v_call.is_some() || self.j_call.is_some()
    }

    /// Whether the sequence's gene calls satisfy this signal's constraints.
    pub fn matches_genes(&self, sequence: &ReceptorSequence) -> bool {
        gene_matches(&sequence.metadata.v_call, self.v_call.as_deref())
            && gene_matches(&sequence.metadata.j_call, self.j_call.as_deref())
    }

    fn choose_motif<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&SeedMotif, ImplantError> {
        self.motifs.choose(rng).ok_or_else(|| ImplantError::NoMotifs {
            signal: self.id.clone(),
        })
    }

    /// Implant one instance of `motif` (or of a random motif) into `sequence`.
    pub fn implant_in_sequence<R: Rng + ?Sized>(
        &self,
        sequence: &ReceptorSequence,
        motif: Option<&SeedMotif>,
        sequence_type: SequenceType,
        rng: &mut R,
    ) -> Result<ReceptorSequence, ImplantError> {
        let motif = match motif {
            Some(m) => m,
            None => self.choose_motif(rng)?,
        };
        let instance = motif.instantiate(rng, sequence_type);

        match self.implanting {
            SignalImplanting::HealthySequence => GappedMotifImplanting.implant(
                sequence,
                ImplantRequest {
                    signal_id: &self.id,
                    motif_id: &motif.identifier,
                    instance: &instance,
                    position_weights: &self.sequence_position_weights,
                },
                sequence_type,
                rng,
            ),
            SignalImplanting::FullSequence => {
                if instance.is_gapped() {
                    return Err(ImplantError::GappedFullSequence {
                        signal: self.id.clone(),
                        motif: motif.identifier.clone(),
                    });
                }
                if sequence_type == SequenceType::Nucleotide && translate(&instance.instance).is_none() {
                    return Err(ImplantError::UntranslatableFullSequence {
                        signal: self.id.clone(),
                        motif: motif.identifier.clone(),
                        length: instance.instance.len(),
                    });
                }
                let mut replaced = sequence.clone();
                replaced.set_sequence(sequence_type, instance.instance.clone());
                replaced.metadata.duplicate_count = 1;
                replaced.metadata.p_gen = None;
                if let Some(v) = &self.v_call {
                    replaced.metadata.v_call = v.clone();
                }
                if let Some(j) = &self.j_call {
                    replaced.metadata.j_call = j.clone();
                }
                replaced.annotation.implants = vec![ImplantAnnotation {
                    signal_id: self.id.clone(),
                    motif_id: motif.identifier.clone(),
                    motif_instance: instance.instance,
                    position: 0,
                }];
                replaced.metadata.signals.insert(
                    self.id.clone(),
                    SignalAnnotation {
                        present: true,
                        position: None,
                    },
                );
                Ok(replaced)
            }
        }
    }

    /// Implant the signal into `ceil(len * rate)` sequences of a repertoire.
    ///
    /// Sequences that were not chosen are annotated as not containing the
    /// signal unless they already carry it.
    pub fn implant_in_repertoire<R: Rng + ?Sized>(
        &self,
        sequences: &[ReceptorSequence],
        labels: &BTreeMap<String, bool>,
        rate: f64,
        sequence_type: SequenceType,
        rng: &mut R,
    ) -> Result<ImplantedRepertoire, ImplantError> {
        let target = (sequences.len() as f64 * rate).ceil() as usize;
        if target == 0 || !rate.is_finite() || rate < 0.0 {
            return Err(ImplantError::EmptyTarget {
                signal: self.id.clone(),
                rate,
                count: sequences.len(),
            });
        }

        let mut new_sequences = match self.implanting {
            SignalImplanting::FullSequence => self.replace_with_motifs(sequences, target, sequence_type, rng)?,
            SignalImplanting::HealthySequence => self.implant_into_healthy(sequences, target, sequence_type, rng)?,
        };

        for sequence in &mut new_sequences {
            sequence
                .metadata
                .signals
                .entry(self.id.clone())
                .or_insert_with(SignalAnnotation::absent);
        }

        let mut labels = labels.clone();
        labels.insert(self.id.clone(), true);
        Ok(ImplantedRepertoire {
            sequences: new_sequences,
            labels,
        })
    }

    fn replace_with_motifs<R: Rng + ?Sized>(
        &self,
        sequences: &[ReceptorSequence],
        target: usize,
        sequence_type: SequenceType,
        rng: &mut R,
    ) -> Result<Vec<ReceptorSequence>, ImplantError> {
        if let Some(motif) = self.motifs.iter().find(|m| m.is_gapped()) {
            return Err(ImplantError::GappedFullSequence {
                signal: self.id.clone(),
                motif: motif.identifier.clone(),
            });
        }
        if target > sequences.len() {
            return Err(ImplantError::NotEnoughSequences {
                signal: self.id.clone(),
                available: sequences.len(),
                required: target,
            });
        }

        let keep = sequences.len() - target;
        let mut result: Vec<ReceptorSequence> = sequences[..keep].to_vec();
        for (i, template) in sequences[keep..].iter().enumerate() {
            let mut fresh = ReceptorSequence::from_aa(format!("{}_{}_{i}", template.sequence_id, self.id), "");
            fresh.metadata.region_type = template.metadata.region_type;
            fresh.metadata.chain = template.metadata.chain;
            result.push(self.implant_in_sequence(&fresh, None, sequence_type, rng)?);
        }
        result.shuffle(rng);
        Ok(result)
    }

    fn implant_into_healthy<R: Rng + ?Sized>(
        &self,
        sequences: &[ReceptorSequence],
        target: usize,
        sequence_type: SequenceType,
        rng: &mut R,
    ) -> Result<Vec<ReceptorSequence>, ImplantError> {
        let mut candidates: Vec<usize> = (0..sequences.len())
            .filter(|&i| !sequences[i].contains_signal(&self.id))
            .collect();
        if candidates.len() < target {
            return Err(ImplantError::NotEnoughSequences {
                signal: self.id.clone(),
                available: candidates.len(),
                required: target,
            });
        }
        candidates.shuffle(rng);

        let mut result = sequences.to_vec();
        let mut implanted = 0;
        for index in candidates {
            if implanted == target {
                break;
            }
            match self.implant_in_sequence(&sequences[index], None, sequence_type, rng) {
                Ok(new) => {
                    result[index] = new;
                    implanted += 1;
                }
                Err(ImplantError::NoViablePosition { .. } | ImplantError::MotifTooLong { .. }) => {
                    log::warn!(
                        "Signal {}: sequence {} cannot hold the motif, trying another one",
                        self.id,
                        sequences[index].sequence_id
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if implanted < target {
            return Err(ImplantError::NotEnoughSequences {
                signal: self.id.clone(),
                available: implanted,
                required: target,
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{RegionType, SequenceMetadata};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn repertoire(n: usize) -> Vec<ReceptorSequence> {
        (0..n)
            .map(|i| {
                ReceptorSequence::from_aa(format!("seq{i}"), "CASSLGQETQYF").with_metadata(SequenceMetadata {
                    region_type: RegionType::ImgtJunction,
                    v_call: "TRBV20-1*01".into(),
                    j_call: "TRBJ2-5*01".into(),
                    duplicate_count: 1,
                    ..Default::default()
                })
            })
            .collect()
    }

    fn signal() -> Signal {
        Signal::new("s1", vec![SeedMotif::new("m1", "WW")])
    }

    #[test]
    fn test_healthy_repertoire_implanting() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let result = signal()
            .implant_in_repertoire(&repertoire(10), &BTreeMap::new(), 0.3, SequenceType::AminoAcid, &mut rng)
            .unwrap();

        assert_eq!(result.sequences.len(), 10);
        assert_eq!(result.labels.get("s1"), Some(&true));
        let positives = result.sequences.iter().filter(|s| s.contains_signal("s1")).count();
        assert_eq!(positives, 3);
        assert!(result
            .sequences
            .iter()
            .all(|s| s.metadata.signals.contains_key("s1")));
        assert!(result
            .sequences
            .iter()
            .filter(|s| s.contains_signal("s1"))
            .all(|s| s.sequence_aa.contains("WW")));
    }

    #[test]
    fn test_full_sequence_repertoire_implanting() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let signal = signal().with_implanting(SignalImplanting::FullSequence);
        let result = signal
            .implant_in_repertoire(&repertoire(5), &BTreeMap::new(), 0.5, SequenceType::AminoAcid, &mut rng)
            .unwrap();

        assert_eq!(result.sequences.len(), 5);
        let full: Vec<_> = result.sequences.iter().filter(|s| s.sequence_aa == "WW").collect();
        assert_eq!(full.len(), 3);
        assert!(full.iter().all(|s| s.contains_signal("s1") && s.metadata.duplicate_count == 1));
        assert!(full.iter().all(|s| s.metadata.region_type == RegionType::ImgtJunction));
    }

    #[test]
    fn test_full_sequence_rejects_gapped_motifs() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let signal = Signal::new("s1", vec![SeedMotif::new("m1", "W/W").with_gap(0, 1)])
            .with_implanting(SignalImplanting::FullSequence);
        let result =
            signal.implant_in_repertoire(&repertoire(5), &BTreeMap::new(), 0.5, SequenceType::AminoAcid, &mut rng);
        assert!(matches!(result, Err(ImplantError::GappedFullSequence { .. })));
    }

    #[test]
    fn test_full_sequence_nucleotide_needs_reading_frame() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let input = repertoire(1).remove(0);

        let signal = Signal::new("s1", vec![SeedMotif::new("m1", "ACGTA")])
            .with_implanting(SignalImplanting::FullSequence);
        let result = signal.implant_in_sequence(&input, None, SequenceType::Nucleotide, &mut rng);
        assert!(matches!(
            result,
            Err(ImplantError::UntranslatableFullSequence { length: 5, .. })
        ));

        let signal = Signal::new("s1", vec![SeedMotif::new("m1", "TGGTGG")])
            .with_implanting(SignalImplanting::FullSequence);
        let replaced = signal
            .implant_in_sequence(&input, None, SequenceType::Nucleotide, &mut rng)
            .unwrap();
        assert_eq!(replaced.sequence, "TGGTGG");
        assert_eq!(replaced.sequence_aa, "WW");
    }

    #[test]
    fn test_zero_target_fails() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let result = signal().implant_in_repertoire(&repertoire(5), &BTreeMap::new(), 0.0, SequenceType::AminoAcid, &mut rng);
        assert!(matches!(result, Err(ImplantError::EmptyTarget { .. })));

        let result = signal().implant_in_repertoire(&[], &BTreeMap::new(), 0.5, SequenceType::AminoAcid, &mut rng);
        assert!(matches!(result, Err(ImplantError::EmptyTarget { .. })));
    }

    #[test]
    fn test_gene_matching() {
        let seq = &repertoire(1)[0];
        assert!(signal().matches_genes(seq));
        assert!(signal().with_genes(Some("TRBV20".into()), None).matches_genes(seq));
        assert!(!signal().with_genes(Some("TRBV5".into()), None).matches_genes(seq));
        assert!(!signal().with_genes(None, Some("TRBJ1".into())).matches_genes(seq));
    }

    #[test]
    fn test_implant_in_sequence_does_not_touch_input() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let input = repertoire(1).remove(0);
        let new = signal()
            .implant_in_sequence(&input, None, SequenceType::AminoAcid, &mut rng)
            .unwrap();
        assert!(new.sequence_aa.contains("WW"));
        assert!(input.metadata.signals.is_empty());
        assert!(input.annotation.implants.is_empty());
    }
}
