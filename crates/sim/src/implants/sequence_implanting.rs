//! Implanting a motif instance into a single sequence.

use crate::base::{ImplantAnnotation, ReceptorSequence, RegionType, SequenceType, SignalAnnotation};
use crate::errors::ImplantError;
use crate::implants::motif::MotifInstance;
use crate::implants::position::{weights_for_implanting, UserPositionWeights};
use rand::Rng;

/// What to implant and where it came from.
#[derive(Debug, Clone, Copy)]
pub struct ImplantRequest<'a> {
    pub signal_id: &'a str,
    pub motif_id: &'a str,
    pub instance: &'a MotifInstance,
    pub position_weights: &'a UserPositionWeights,
}

/// Splices a (possibly gapped) instance over an existing sequence.
///
/// The letters between the two motif parts are kept from the original
/// sequence, so the sequence length never changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct GappedMotifImplanting;

impl GappedMotifImplanting {
    /// Return a copy of `sequence` with the instance implanted.
    ///
    /// # Errors
    ///
    /// * `MotifTooLong` if the instance does not fit into the sequence.
    /// * `Position` for region types without positional numbering.
    /// * `NoViablePosition` when every position is excluded; the caller
    ///   discards the sequence.
    pub fn implant<R: Rng + ?Sized>(
        &self,
        sequence: &ReceptorSequence,
        request: ImplantRequest<'_>,
        sequence_type: SequenceType,
        rng: &mut R,
    ) -> Result<ReceptorSequence, ImplantError> {
        let region_type = sequence.metadata.region_type;
        if !matches!(region_type, RegionType::ImgtCdr3 | RegionType::ImgtJunction) {
            return Err(crate::errors::PositionError::UnsupportedRegionType(region_type).into());
        }

        let original = sequence.get_sequence(sequence_type);
        let span = request.instance.span();
        if span > original.len() {
            return Err(ImplantError::MotifTooLong {
                motif_length: span,
                sequence_length: original.len(),
            });
        }

        let step = sequence_type.letters_per_position();
        let position_count = original.len() / step;
        let weights = weights_for_implanting(
            position_count,
            region_type,
            request.position_weights,
            span.div_ceil(step),
        )?;
        let position = weights
            .sample(rng)
            .ok_or(ImplantError::NoViablePosition {
                length: original.len(),
            })?
            * step;

        let (left, right) = request.instance.parts();
        let gap_start = position + left.len();
        let gap_end = gap_start + request.instance.gap;
        let tail_start = gap_end + right.map_or(0, str::len);
        if tail_start > original.len() {
            return Err(ImplantError::MotifTooLong {
                motif_length: span,
                sequence_length: original.len() - position,
            });
        }

        let mut spliced = String::with_capacity(original.len());
        spliced.push_str(&original[..position]);
        spliced.push_str(left);
        spliced.push_str(&original[gap_start..gap_end]);
        spliced.push_str(right.unwrap_or(""));
        spliced.push_str(&original[tail_start..]);

        let mut implanted = sequence.clone();
        implanted.set_sequence(sequence_type, spliced);
        implanted.annotation.implants.push(ImplantAnnotation {
            signal_id: request.signal_id.to_string(),
            motif_id: request.motif_id.to_string(),
            motif_instance: request.instance.instance.clone(),
            position,
        });
        implanted.metadata.signals.insert(
            request.signal_id.to_string(),
            SignalAnnotation {
                present: true,
                position: None,
            },
        );
        implanted.metadata.p_gen = None;

        Ok(implanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::SequenceMetadata;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn junction(aa: &str) -> ReceptorSequence {
        ReceptorSequence::from_aa("seq1", aa).with_metadata(SequenceMetadata {
            region_type: RegionType::ImgtJunction,
            duplicate_count: 1,
            ..Default::default()
        })
    }

    fn request<'a>(instance: &'a MotifInstance, weights: &'a UserPositionWeights) -> ImplantRequest<'a> {
        ImplantRequest {
            signal_id: "s1",
            motif_id: "m1",
            instance,
            position_weights: weights,
        }
    }

    #[test]
    fn test_implant_ungapped_contains_motif() {
        let sequence = junction("CASSLGQETQYF");
        let instance = MotifInstance::new("WWW", 0);
        let weights = UserPositionWeights::new();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);

        for _ in 0..20 {
            let new = GappedMotifImplanting
                .implant(&sequence, request(&instance, &weights), SequenceType::AminoAcid, &mut rng)
                .unwrap();
            assert_eq!(new.sequence_aa.len(), sequence.sequence_aa.len());
            assert!(new.sequence_aa.contains("WWW"));
            assert!(new.contains_signal("s1"));
            let implant = &new.annotation.implants[0];
            assert_eq!(&new.sequence_aa[implant.position..implant.position + 3], "WWW");
            assert_eq!(sequence.sequence_aa, "CASSLGQETQYF");
        }
    }

    #[test]
    fn test_implant_gapped_keeps_gap_letters() {
        let sequence = junction("CASSLGQETQYF");
        let instance = MotifInstance::new("W/W", 2);
        let weights = UserPositionWeights::new();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);

        let new = GappedMotifImplanting
            .implant(&sequence, request(&instance, &weights), SequenceType::AminoAcid, &mut rng)
            .unwrap();
        let p = new.annotation.implants[0].position;
        let bytes = new.sequence_aa.as_bytes();
        assert_eq!(bytes[p], b'W');
        assert_eq!(bytes[p + 3], b'W');
        assert_eq!(&new.sequence_aa[p + 1..p + 3], &sequence.sequence_aa[p + 1..p + 3]);
    }

    #[test]
    fn test_implant_motif_too_long() {
        let sequence = junction("CASF");
        let instance = MotifInstance::new("AAAAA", 0);
        let weights = UserPositionWeights::new();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let result =
            GappedMotifImplanting.implant(&sequence, request(&instance, &weights), SequenceType::AminoAcid, &mut rng);
        assert!(matches!(result, Err(ImplantError::MotifTooLong { .. })));
    }

    #[test]
    fn test_implant_no_viable_position() {
        let sequence = junction("CASSLF");
        let instance = MotifInstance::new("AA", 0);
        let mut weights = UserPositionWeights::new();
        weights.insert("118".parse().unwrap(), 1.0);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let result =
            GappedMotifImplanting.implant(&sequence, request(&instance, &weights), SequenceType::AminoAcid, &mut rng);
        assert!(matches!(result, Err(ImplantError::NoViablePosition { .. })));
    }

    #[test]
    fn test_implant_unsupported_region() {
        let mut sequence = junction("CASSLF");
        sequence.metadata.region_type = RegionType::FullSequence;
        let instance = MotifInstance::new("AA", 0);
        let weights = UserPositionWeights::new();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let result =
            GappedMotifImplanting.implant(&sequence, request(&instance, &weights), SequenceType::AminoAcid, &mut rng);
        assert!(matches!(result, Err(ImplantError::Position(_))));
    }

    #[test]
    fn test_implant_nucleotide_at_codon_boundary() {
        let mut sequence = junction("CASSF");
        sequence.sequence = "TGTGCCAGCAGCTTT".into();
        let instance = MotifInstance::new("GGG", 0);
        let weights = UserPositionWeights::new();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);

        let new = GappedMotifImplanting
            .implant(&sequence, request(&instance, &weights), SequenceType::Nucleotide, &mut rng)
            .unwrap();
        let p = new.annotation.implants[0].position;
        assert_eq!(p % 3, 0);
        assert_eq!(&new.sequence[p..p + 3], "GGG");
        assert_eq!(new.sequence_aa.len(), 5);
        assert!(new.sequence_aa.contains('G'));
    }
}
