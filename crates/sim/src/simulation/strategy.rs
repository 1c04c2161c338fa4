//! Strategies turning a raw annotated batch into acceptable sequences.

use crate::base::{ReceptorSequence, SequenceType};
use crate::errors::{ConfigError, ImplantError, SimulationError};
use crate::generative::GenerativeModel;
use crate::implants::{Signal, SignalAnnotator};
use crate::simulation::configs::SimConfigItem;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Caps applied by rejection sampling.
pub const MAX_SIGNALS_PER_SEQUENCE: usize = 2;
pub const MAX_MOTIFS_PER_SEQUENCE: usize = 1;

/// Everything a strategy may consult while processing one batch.
pub struct StrategyContext<'a> {
    /// Remaining sequences needed per signal key.
    pub remaining: &'a BTreeMap<String, usize>,
    pub use_p_gens: bool,
    pub sequence_type: SequenceType,
    pub item: &'a SimConfigItem,
    pub signals: &'a [Signal],
    pub remove_positives_first: bool,
    pub annotator: &'a SignalAnnotator,
    pub model: &'a dyn GenerativeModel,
    pub implanting_scaling_factor: f64,
}

/// Keep sequences that respect the signal caps.
///
/// With `max_signals == 0` only sequences without any signal survive.
/// Otherwise a sequence may carry at most `max_signals` signals, all of them
/// declared by the item, each occurring at most `max_motifs` times.
pub fn filter_out_illegal_sequences(
    sequences: Vec<ReceptorSequence>,
    item_signals: &BTreeSet<String>,
    max_signals: usize,
    max_motifs: usize,
) -> Vec<ReceptorSequence> {
    sequences
        .into_iter()
        .filter(|sequence| {
            let present = sequence.present_signals();
            if max_signals == 0 {
                return present.is_empty();
            }
            present.len() <= max_signals
                && present.iter().all(|id| item_signals.contains(*id))
                && present
                    .iter()
                    .all(|id| sequence.metadata.signals[*id].occurrences() <= max_motifs)
        })
        .collect()
}

pub trait SimulationStrategy {
    fn process_sequences<R: Rng + ?Sized>(
        &self,
        sequences: Vec<ReceptorSequence>,
        ctx: &StrategyContext<'_>,
        rng: &mut R,
    ) -> Result<Vec<ReceptorSequence>, SimulationError>;
}

/// Keep naturally occurring signals, drop everything over the caps.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectionSampling;

impl SimulationStrategy for RejectionSampling {
    fn process_sequences<R: Rng + ?Sized>(
        &self,
        sequences: Vec<ReceptorSequence>,
        ctx: &StrategyContext<'_>,
        _rng: &mut R,
    ) -> Result<Vec<ReceptorSequence>, SimulationError> {
        let total = sequences.len();
        let filtered = filter_out_illegal_sequences(
            sequences,
            &ctx.item.signal_ids(),
            MAX_SIGNALS_PER_SEQUENCE,
            MAX_MOTIFS_PER_SEQUENCE,
        );
        let removed = total - filtered.len();
        if removed > 0 {
            log::info!(
                "{}: removed {removed} out of {total} sequences during rejection sampling for carrying too many signals",
                ctx.item.name
            );
        }
        Ok(filtered)
    }
}

/// Implant signals into signal-free background sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct Implanting;

impl SimulationStrategy for Implanting {
    fn process_sequences<R: Rng + ?Sized>(
        &self,
        sequences: Vec<ReceptorSequence>,
        ctx: &StrategyContext<'_>,
        rng: &mut R,
    ) -> Result<Vec<ReceptorSequence>, SimulationError> {
        let item_signals = ctx.item.signal_ids();
        let mut background = if ctx.remove_positives_first {
            filter_out_illegal_sequences(sequences, &item_signals, 0, 0)
        } else {
            filter_out_illegal_sequences(sequences, &item_signals, 1, 1)
        };

        let mut implanted = Vec::new();
        for signal in ctx.signals.iter().filter(|s| item_signals.contains(&s.id)) {
            let remaining = ctx.remaining.get(&signal.id).copied().unwrap_or(0);
            if remaining == 0 {
                continue;
            }
            let wanted = (remaining as f64 * ctx.implanting_scaling_factor).ceil() as usize;

            let mut rest = Vec::with_capacity(background.len());
            let mut taken = 0;
            for sequence in background {
                if taken == wanted || sequence.signal_count() > 0 || !signal.matches_genes(&sequence) {
                    rest.push(sequence);
                    continue;
                }
                match signal.implant_in_sequence(&sequence, None, ctx.sequence_type, rng) {
                    Ok(new) => {
                        implanted.push(new);
                        taken += 1;
                    }
                    Err(ImplantError::NoViablePosition { .. } | ImplantError::MotifTooLong { .. }) => {
                        rest.push(sequence);
                    }
                    Err(source) => {
                        return Err(SimulationError::Implant {
                            item: ctx.item.name.clone(),
                            signal: signal.id.clone(),
                            source,
                        })
                    }
                }
            }
            log::debug!("{}: implanted {} into {taken} sequences", ctx.item.name, signal.id);
            background = rest;
        }

        let mut implanted = ctx.annotator.annotate_all(implanted);
        if ctx.use_p_gens && !implanted.is_empty() {
            let p_gens = ctx
                .model
                .compute_p_gens(&implanted, ctx.sequence_type)
                .map_err(|source| SimulationError::Generation {
                    item: ctx.item.name.clone(),
                    source,
                })?;
            for (sequence, p_gen) in implanted.iter_mut().zip(p_gens) {
                sequence.metadata.p_gen = Some(p_gen);
            }
        }

        background.extend(implanted);
        Ok(filter_out_illegal_sequences(background, &item_signals, 1, 1))
    }
}

/// The strategy selected in a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SimulationStrategyKind {
    RejectionSampling,
    #[default]
    Implanting,
}

impl SimulationStrategyKind {
    pub fn process_sequences<R: Rng + ?Sized>(
        &self,
        sequences: Vec<ReceptorSequence>,
        ctx: &StrategyContext<'_>,
        rng: &mut R,
    ) -> Result<Vec<ReceptorSequence>, SimulationError> {
        match self {
            Self::RejectionSampling => RejectionSampling.process_sequences(sequences, ctx, rng),
            Self::Implanting => Implanting.process_sequences(sequences, ctx, rng),
        }
    }
}

impl fmt::Display for SimulationStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RejectionSampling => "RejectionSampling",
            Self::Implanting => "Implanting",
        })
    }
}

impl FromStr for SimulationStrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RejectionSampling" | "rejection_sampling" => Ok(Self::RejectionSampling),
            "Implanting" | "implanting" => Ok(Self::Implanting),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{SequenceMetadata, SignalAnnotation};
    use crate::generative::{GenerativeModelConfig, RecombinationModel};
    use crate::implants::SeedMotif;
    use crate::simulation::configs::SignalTarget;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn with_signals(id: &str, signals: &[(&str, &str)]) -> ReceptorSequence {
        let mut seq = ReceptorSequence::from_aa(id, "CASSLGQETQYF").with_metadata(SequenceMetadata {
            duplicate_count: 1,
            ..Default::default()
        });
        for (signal, position) in signals {
            seq.metadata.signals.insert(
                signal.to_string(),
                SignalAnnotation {
                    present: position.contains('1'),
                    position: Some(position.to_string()),
                },
            );
        }
        seq
    }

    fn item() -> SimConfigItem {
        SimConfigItem::new("item1", GenerativeModelConfig::recombination("humanTRB"))
            .with_examples(10)
            .with_signal("s1", SignalTarget::Rate(0.5))
            .with_signal("s2", SignalTarget::Rate(0.2))
    }

    #[test]
    fn test_filter_caps() {
        let ids: BTreeSet<String> = ["s1".to_string(), "s2".to_string()].into();
        let batch = vec![
            with_signals("clean", &[("s1", "m000"), ("s2", "m000")]),
            with_signals("one", &[("s1", "m010"), ("s2", "m000")]),
            with_signals("two", &[("s1", "m010"), ("s2", "m001")]),
            with_signals("twice", &[("s1", "m011")]),
            with_signals("foreign", &[("s3", "m100")]),
        ];

        let kept: Vec<String> = filter_out_illegal_sequences(batch.clone(), &ids, 2, 1)
            .into_iter()
            .map(|s| s.sequence_id)
            .collect();
        assert_eq!(kept, ["clean", "one", "two"]);

        let kept = filter_out_illegal_sequences(batch.clone(), &ids, 1, 1);
        assert_eq!(kept.len(), 2);

        let kept = filter_out_illegal_sequences(batch, &ids, 0, 0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].sequence_id, "clean");
    }

    #[test]
    fn test_rejection_sampling_removes_three_of_ten() {
        let signals = vec![
            Signal::new("s1", vec![SeedMotif::new("m1", "AS")]),
            Signal::new("s2", vec![SeedMotif::new("m2", "GG")]),
        ];
        let annotator = SignalAnnotator::new(&signals, SequenceType::AminoAcid).unwrap();
        let model = RecombinationModel::builtin("humanTRB", true).unwrap();
        let item = item();
        let remaining = BTreeMap::new();
        let ctx = StrategyContext {
            remaining: &remaining,
            use_p_gens: false,
            sequence_type: SequenceType::AminoAcid,
            item: &item,
            signals: &signals,
            remove_positives_first: false,
            annotator: &annotator,
            model: &model,
            implanting_scaling_factor: 1.0,
        };

        let mut batch: Vec<_> = (0..7)
            .map(|i| with_signals(&format!("ok{i}"), &[("s1", "m0100"), ("s2", "m0000")]))
            .collect();
        batch.push(with_signals("double", &[("s1", "m0101")]));
        batch.push(with_signals("double2", &[("s2", "m1001")]));
        batch.push(with_signals("undeclared", &[("s3", "m0010")]));

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let kept = SimulationStrategyKind::RejectionSampling
            .process_sequences(batch, &ctx, &mut rng)
            .unwrap();
        assert_eq!(kept.len(), 7);
        assert!(kept.iter().all(|s| s.sequence_id.starts_with("ok")));
    }

    #[test]
    fn test_rejection_sampling_drops_three_signal_sequences() {
        let signals = vec![
            Signal::new("s1", vec![SeedMotif::new("m1", "AS")]),
            Signal::new("s2", vec![SeedMotif::new("m2", "GG")]),
            Signal::new("s3", vec![SeedMotif::new("m3", "SAR")]),
        ];
        let annotator = SignalAnnotator::new(&signals, SequenceType::AminoAcid).unwrap();
        let model = RecombinationModel::builtin("humanTRB", true).unwrap();
        let item = item().with_signal("s3", SignalTarget::Rate(0.1));
        let remaining = BTreeMap::new();
        let ctx = StrategyContext {
            remaining: &remaining,
            use_p_gens: false,
            sequence_type: SequenceType::AminoAcid,
            item: &item,
            signals: &signals,
            remove_positives_first: false,
            annotator: &annotator,
            model: &model,
            implanting_scaling_factor: 1.0,
        };

        let mut batch: Vec<_> = (0..3)
            .map(|i| {
                with_signals(
                    &format!("triple{i}"),
                    &[("s1", "m0100"), ("s2", "m0010"), ("s3", "m1000")],
                )
            })
            .collect();
        batch.push(with_signals("pair", &[("s1", "m0100"), ("s2", "m0010"), ("s3", "m0000")]));
        batch.extend((0..3).map(|i| with_signals(&format!("single{i}"), &[("s3", "m0001")])));
        batch.extend((0..3).map(|i| {
            with_signals(&format!("none{i}"), &[("s1", "m0000"), ("s2", "m0000"), ("s3", "m0000")])
        }));

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let kept = SimulationStrategyKind::RejectionSampling
            .process_sequences(batch, &ctx, &mut rng)
            .unwrap();
        assert_eq!(kept.len(), 7);
        assert!(kept.iter().all(|s| !s.sequence_id.starts_with("triple")));
        assert!(kept.iter().any(|s| s.sequence_id == "pair"));
    }

    #[test]
    fn test_implanting_fills_remaining_targets() {
        let signals = vec![Signal::new("s1", vec![SeedMotif::new("m1", "WWW")])];
        let annotator = SignalAnnotator::new(&signals, SequenceType::AminoAcid).unwrap();
        let model = RecombinationModel::builtin("humanTRB", true).unwrap();
        let item = SimConfigItem::new("item1", GenerativeModelConfig::recombination("humanTRB"))
            .with_examples(10)
            .with_signal("s1", SignalTarget::Rate(0.3));
        let remaining = BTreeMap::from([("s1".to_string(), 3), ("no_signal".to_string(), 7)]);
        let ctx = StrategyContext {
            remaining: &remaining,
            use_p_gens: true,
            sequence_type: SequenceType::AminoAcid,
            item: &item,
            signals: &signals,
            remove_positives_first: true,
            annotator: &annotator,
            model: &model,
            implanting_scaling_factor: 2.0,
        };

        let batch = annotator.annotate_all((0..20).map(|i| with_signals(&format!("bg{i}"), &[])).collect());
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let processed = Implanting.process_sequences(batch, &ctx, &mut rng).unwrap();

        let with_signal: Vec<_> = processed.iter().filter(|s| s.contains_signal("s1")).collect();
        assert_eq!(with_signal.len(), 6);
        assert!(with_signal.iter().all(|s| s.sequence_aa.contains("WWW")));
        assert!(with_signal.iter().all(|s| s.metadata.p_gen.is_some()));
        assert_eq!(processed.len(), 20);
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!("RejectionSampling".parse::<SimulationStrategyKind>().unwrap(), SimulationStrategyKind::RejectionSampling);
        assert_eq!("Implanting".parse::<SimulationStrategyKind>().unwrap(), SimulationStrategyKind::Implanting);
        assert!(matches!(
            "Magic".parse::<SimulationStrategyKind>(),
            Err(ConfigError::UnknownStrategy(_))
        ));
        assert_eq!(SimulationStrategyKind::RejectionSampling.to_string(), "RejectionSampling");
    }
}
