//! Per-item simulation driver.
//!
//! A [`LigoImplanter`] repeatedly draws background batches from the item's
//! generative model, annotates them, runs the configured strategy and sorts
//! the surviving sequences into per-signal-key pools until every target is
//! met. Sequence datasets are returned in memory; repertoires are written to
//! the store as soon as the pools hold enough sequences for one.

use crate::base::{ReceptorSequence, NO_SIGNAL, SIGNAL_KEY_SEPARATOR};
use crate::errors::SimulationError;
use crate::generative::GenerativeModel;
use crate::implants::{Signal, SignalAnnotator};
use crate::simulation::configs::{SimConfig, SimConfigItem, SimulationParams};
use crate::simulation::pgen::{PgenBins, PgenQuotas};
use crate::simulation::strategy::{SimulationStrategyKind, StrategyContext};
use crate::storage::{Repertoire, RepertoireMetadata, RepertoireStore};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Seed of the batch drawn in `iteration` for an item seeded with `seed`.
pub fn batch_seed(seed: u64, iteration: usize) -> u64 {
    seed.wrapping_mul(1_000_000).wrapping_add(iteration as u64)
}

/// Where the driver currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Generating,
    Annotating,
    Filtering,
    Accumulating,
    Assembling,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Accepted sequences per signal key, with what is still missing.
#[derive(Debug)]
struct Pools {
    remaining: BTreeMap<String, usize>,
    sequences: BTreeMap<String, Vec<ReceptorSequence>>,
    quotas: Option<PgenQuotas>,
}

impl Pools {
    fn new(targets: BTreeMap<String, usize>, bins: Option<PgenBins>) -> Self {
        let quotas = bins.map(|bins| PgenQuotas::new(bins, &targets));
        Self {
            sequences: targets.keys().map(|k| (k.clone(), Vec::new())).collect(),
            remaining: targets,
            quotas,
        }
    }

    fn is_complete(&self) -> bool {
        self.remaining.values().all(|n| *n == 0)
    }

    fn missing(&self) -> usize {
        self.remaining.values().sum()
    }

    fn describe_remaining(&self) -> String {
        self.remaining
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(key, n)| format!("{key}: {n}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Sort a processed batch into the pools.
    ///
    /// With `signals_as_background`, sequences whose key is not wanted may
    /// fill the no-signal pool instead of being dropped.
    fn accept(&mut self, batch: Vec<ReceptorSequence>, signals_as_background: bool) -> usize {
        let mut accepted = 0;
        for sequence in batch {
            let key = sequence.signal_key();
            let slot = if self.remaining.get(&key).is_some_and(|n| *n > 0) {
                key
            } else if signals_as_background
                && key != NO_SIGNAL
                && self.remaining.get(NO_SIGNAL).is_some_and(|n| *n > 0)
            {
                NO_SIGNAL.to_string()
            } else {
                continue;
            };

            if let Some(quotas) = &mut self.quotas {
                if !quotas.try_take(&slot, sequence.metadata.p_gen) {
                    continue;
                }
            }
            if let Some(left) = self.remaining.get_mut(&slot) {
                *left -= 1;
            }
            self.sequences.entry(slot).or_default().push(sequence);
            accepted += 1;
        }
        accepted
    }

    fn can_take(&self, counts: &BTreeMap<String, usize>) -> bool {
        counts
            .iter()
            .all(|(key, n)| self.sequences.get(key).map_or(0, Vec::len) >= *n)
    }

    fn take(&mut self, counts: &BTreeMap<String, usize>) -> Vec<ReceptorSequence> {
        let mut taken = Vec::with_capacity(counts.values().sum());
        for (key, n) in counts {
            if let Some(pool) = self.sequences.get_mut(key) {
                let n = (*n).min(pool.len());
                taken.extend(pool.drain(..n));
            }
        }
        taken
    }

    fn into_sequences(self) -> Vec<ReceptorSequence> {
        self.sequences.into_values().flatten().collect()
    }
}

/// Simulates one item.
pub struct LigoImplanter<'a> {
    item: &'a SimConfigItem,
    sim: &'a SimConfig,
    params: &'a SimulationParams,
    signals: &'a [Signal],
    model: Arc<dyn GenerativeModel>,
    annotator: SignalAnnotator,
    use_p_gens: bool,
    phase: Phase,
    iteration: usize,
}

impl<'a> LigoImplanter<'a> {
    /// `signals` are all declared signals; every one of them is annotated so
    /// sequences carrying a signal foreign to the item can be rejected.
    pub fn new(
        item: &'a SimConfigItem,
        sim: &'a SimConfig,
        params: &'a SimulationParams,
        signals: &'a [Signal],
        model: Arc<dyn GenerativeModel>,
    ) -> Result<Self, SimulationError> {
        let annotator = SignalAnnotator::new(signals, sim.sequence_type)?;
        let wants_p_gens = params.export_p_gens || sim.keep_p_gen_dist;
        let use_p_gens = wants_p_gens && model.can_compute_p_gens();
        if wants_p_gens && !use_p_gens {
            log::warn!(
                "{}: model '{}' cannot compute generation probabilities, they will not be exported or binned",
                item.name,
                model.name()
            );
        }

        Ok(Self {
            item,
            sim,
            params,
            signals,
            model,
            annotator,
            use_p_gens,
            phase: Phase::Init,
            iteration: 0,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Batches drawn so far.
    pub fn iterations(&self) -> usize {
        self.iteration
    }

    pub fn uses_p_gens(&self) -> bool {
        self.use_p_gens
    }

    /// Produce the item's sequence dataset.
    pub fn make_sequences(&mut self) -> Result<Vec<ReceptorSequence>, SimulationError> {
        let result = self.simulate_sequences();
        self.finish(result)
    }

    /// Produce the item's repertoires, persisting each one in `store`.
    pub fn make_repertoires(&mut self, store: &mut RepertoireStore) -> Result<Vec<Repertoire>, SimulationError> {
        let result = self.simulate_repertoires(store);
        self.finish(result)
    }

    fn finish<T>(&mut self, result: Result<T, SimulationError>) -> Result<T, SimulationError> {
        self.phase = if result.is_ok() { Phase::Done } else { Phase::Failed };
        result
    }

    fn simulate_sequences(&mut self) -> Result<Vec<ReceptorSequence>, SimulationError> {
        self.reset();
        let targets = self.item.unit_targets(false)?;
        log::info!(
            "{}: simulating {} sequences from model '{}'",
            self.item.name,
            self.item.number_of_examples,
            self.model.name()
        );

        let mut pools = Pools::new(targets, self.reference_bins()?);
        while !pools.is_complete() {
            self.step(&mut pools)?;
        }

        self.phase = Phase::Assembling;
        let mut sequences = pools.into_sequences();
        sequences.shuffle(&mut Xoshiro256PlusPlus::seed_from_u64(self.item.seed));
        self.strip_unexported_p_gens(&mut sequences);
        log::info!(
            "{}: {} sequences ready after {} iterations",
            self.item.name,
            sequences.len(),
            self.iteration
        );
        Ok(sequences)
    }

    fn simulate_repertoires(&mut self, store: &mut RepertoireStore) -> Result<Vec<Repertoire>, SimulationError> {
        self.reset();
        let per_repertoire = self.item.unit_targets(true)?;
        let count = self.item.number_of_examples;
        let totals = per_repertoire
            .iter()
            .map(|(key, n)| (key.clone(), n * count))
            .collect();
        log::info!(
            "{}: simulating {count} repertoires of {} sequences from model '{}'",
            self.item.name,
            self.item.receptors_in_repertoire_count,
            self.model.name()
        );

        let mut pools = Pools::new(totals, self.reference_bins()?);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.item.seed);
        let mut repertoires = Vec::with_capacity(count);
        loop {
            while repertoires.len() < count && pools.can_take(&per_repertoire) {
                self.phase = Phase::Assembling;
                let mut sequences = pools.take(&per_repertoire);
                sequences.shuffle(&mut rng);
                self.strip_unexported_p_gens(&mut sequences);
                let repertoire = self.store_repertoire(store, repertoires.len(), &sequences)?;
                repertoires.push(repertoire);
            }
            if repertoires.len() == count {
                break;
            }
            self.step(&mut pools)?;
        }
        Ok(repertoires)
    }

    /// p_gens computed only for binning are not part of the output.
    fn strip_unexported_p_gens(&self, sequences: &mut [ReceptorSequence]) {
        if !self.params.export_p_gens {
            sequences.iter_mut().for_each(|s| s.metadata.p_gen = None);
        }
    }

    fn reset(&mut self) {
        self.phase = Phase::Init;
        self.iteration = 0;
    }

    fn store_repertoire(
        &self,
        store: &mut RepertoireStore,
        index: usize,
        sequences: &[ReceptorSequence],
    ) -> Result<Repertoire, SimulationError> {
        let identifier = format!("{}_{index}", self.item.name);
        let item_signals = self.item.signal_ids();
        let labels = self
            .signals
            .iter()
            .map(|s| (s.id.clone(), !self.item.is_noise && item_signals.contains(&s.id)))
            .chain(self.item.immune_events.iter().map(|(k, v)| (k.clone(), *v)))
            .collect();
        let metadata = RepertoireMetadata {
            subject_id: format!("subject_{identifier}"),
            item_name: self.item.name.clone(),
            labels,
            field_list: Vec::new(),
        };
        let signal_ids: Vec<String> = self.signals.iter().map(|s| s.id.clone()).collect();

        let repertoire = store.save(&identifier, metadata, sequences, &signal_ids)?;
        log::info!("{}: stored repertoire {identifier}", self.item.name);
        Ok(repertoire)
    }

    /// Bins of a reference batch, when the p_gen distribution is kept.
    fn reference_bins(&self) -> Result<Option<PgenBins>, SimulationError> {
        if !(self.sim.keep_p_gen_dist && self.use_p_gens && self.sim.p_gen_bin_count > 0) {
            return Ok(None);
        }
        let reference = self
            .model
            .generate_sequences(
                self.params.sequence_batch_size,
                batch_seed(self.item.seed, 0),
                self.sim.sequence_type,
                true,
            )
            .map_err(|source| SimulationError::Generation {
                item: self.item.name.clone(),
                source,
            })?;
        let p_gens: Vec<f64> = reference.iter().filter_map(|s| s.metadata.p_gen).collect();
        let bins = PgenBins::from_reference(&p_gens, self.sim.p_gen_bin_count);
        if bins.is_none() {
            log::warn!(
                "{}: reference batch has no positive generation probabilities, p_gen distribution is not kept",
                self.item.name
            );
        }
        Ok(bins)
    }

    /// Draw, annotate, filter and accumulate one batch.
    fn step(&mut self, pools: &mut Pools) -> Result<(), SimulationError> {
        if self.iteration >= self.params.max_iterations {
            return Err(SimulationError::MaxIterationsReached {
                item: self.item.name.clone(),
                iterations: self.iteration,
                remaining: pools.describe_remaining(),
            });
        }
        self.iteration += 1;
        let seed = batch_seed(self.item.seed, self.iteration);

        self.phase = Phase::Generating;
        let batch = self.generate_batch(seed, &pools.remaining)?;

        self.phase = Phase::Annotating;
        let batch = self.annotator.annotate_all(batch);

        self.phase = Phase::Filtering;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let ctx = StrategyContext {
            remaining: &pools.remaining,
            use_p_gens: self.use_p_gens,
            sequence_type: self.sim.sequence_type,
            item: self.item,
            signals: self.signals,
            remove_positives_first: self.sim.remove_seqs_with_signals,
            annotator: &self.annotator,
            model: self.model.as_ref(),
            implanting_scaling_factor: self.sim.implanting_scaling_factor,
        };
        let processed = self.sim.simulation_strategy.process_sequences(batch, &ctx, &mut rng)?;

        self.phase = Phase::Accumulating;
        let accepted = pools.accept(processed, !self.sim.remove_seqs_with_signals);
        log::debug!(
            "{}: iteration {} accepted {accepted} sequences, {} still missing",
            self.item.name,
            self.iteration,
            pools.missing()
        );
        Ok(())
    }

    fn generate_batch(
        &self,
        seed: u64,
        remaining: &BTreeMap<String, usize>,
    ) -> Result<Vec<ReceptorSequence>, SimulationError> {
        let size = self.params.sequence_batch_size;
        let sequence_type = self.sim.sequence_type;
        let batch = match self.skewed_signal(remaining) {
            Some(signal) => {
                let v_genes: Vec<String> = signal.v_call.iter().cloned().collect();
                let j_genes: Vec<String> = signal.j_call.iter().cloned().collect();
                log::debug!(
                    "{}: iteration {} draws from gene models skewed towards {}",
                    self.item.name,
                    self.iteration,
                    signal.id
                );
                self.model.generate_from_skewed_gene_models(
                    &v_genes,
                    &j_genes,
                    seed,
                    size,
                    sequence_type,
                    self.use_p_gens,
                )
            }
            None => self.model.generate_sequences(size, seed, sequence_type, self.use_p_gens),
        };
        batch.map_err(|source| SimulationError::Generation {
            item: self.item.name.clone(),
            source,
        })
    }

    /// Under rejection sampling every second batch comes from gene models
    /// restricted to a still-needed signal's genes.
    fn skewed_signal(&self, remaining: &BTreeMap<String, usize>) -> Option<&'a Signal> {
        if self.sim.simulation_strategy != SimulationStrategyKind::RejectionSampling
            || self.iteration % 2 != 0
            || !self.model.can_generate_from_skewed_gene_models()
        {
            return None;
        }
        let item_signals = self.item.signal_ids();
        let candidates: Vec<&'a Signal> = self
            .signals
            .iter()
            .filter(|s| item_signals.contains(&s.id) && s.has_gene_constraints())
            .filter(|s| {
                remaining
                    .iter()
                    .any(|(key, n)| *n > 0 && key.split(SIGNAL_KEY_SEPARATOR).any(|id| id == s.id))
            })
            .collect();
        if candidates.is_empty() {
            None
        } else {
            Some(candidates[(self.iteration / 2) % candidates.len()])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::SignalAnnotation;
    use crate::generative::{GenerativeModelConfig, RecombinationModel};
    use crate::implants::SeedMotif;
    use crate::simulation::configs::SignalTarget;

    fn sequence(id: &str, signals: &[&str]) -> ReceptorSequence {
        let mut sequence = ReceptorSequence::from_aa(id, "CASSLGQETQYF");
        for signal in signals {
            sequence
                .metadata
                .signals
                .insert(signal.to_string(), SignalAnnotation::from_mask(&[false, true]));
        }
        sequence
    }

    #[test]
    fn test_batch_seed() {
        assert_eq!(batch_seed(3, 7), 3_000_007);
        assert_eq!(batch_seed(0, 1), 1);
    }

    #[test]
    fn test_pools_accept_and_take() {
        let targets = BTreeMap::from([("s1".to_string(), 2), (NO_SIGNAL.to_string(), 1)]);
        let mut pools = Pools::new(targets, None);
        let batch = vec![
            sequence("a", &["s1"]),
            sequence("b", &[]),
            sequence("c", &[]),
            sequence("d", &["s2"]),
            sequence("e", &["s1"]),
        ];
        assert_eq!(pools.accept(batch, false), 3);
        assert!(pools.is_complete());

        let counts = BTreeMap::from([("s1".to_string(), 1), (NO_SIGNAL.to_string(), 1)]);
        assert!(pools.can_take(&counts));
        assert_eq!(pools.take(&counts).len(), 2);
        assert!(!pools.can_take(&counts));
    }

    #[test]
    fn test_pools_signals_as_background() {
        let targets = BTreeMap::from([(NO_SIGNAL.to_string(), 2)]);
        let mut pools = Pools::new(targets.clone(), None);
        assert_eq!(pools.accept(vec![sequence("a", &["s1"])], false), 0);
        assert_eq!(pools.describe_remaining(), "no_signal: 2");

        let mut pools = Pools::new(targets, None);
        assert_eq!(pools.accept(vec![sequence("a", &["s1"])], true), 1);
        assert_eq!(pools.missing(), 1);
    }

    #[test]
    fn test_make_sequences_reaches_targets() {
        let signals = vec![Signal::new("s1", vec![SeedMotif::new("m1", "WHW")])];
        let item = SimConfigItem::new("item1", GenerativeModelConfig::recombination("humanTRB"))
            .with_examples(20)
            .with_signal("s1", SignalTarget::Rate(0.5))
            .with_seed(7);
        let sim = SimConfig::new(vec![item.clone()]);
        let params = SimulationParams {
            sequence_batch_size: 100,
            max_iterations: 20,
            ..SimulationParams::default()
        };
        let model: Arc<dyn GenerativeModel> = Arc::new(RecombinationModel::builtin("humanTRB", true).unwrap());

        let mut implanter = LigoImplanter::new(&item, &sim, &params, &signals, model).unwrap();
        assert_eq!(implanter.phase(), Phase::Init);
        let sequences = implanter.make_sequences().unwrap();

        assert_eq!(implanter.phase(), Phase::Done);
        assert_eq!(sequences.len(), 20);
        assert_eq!(sequences.iter().filter(|s| s.contains_signal("s1")).count(), 10);
        assert!(!implanter.uses_p_gens());
    }

    #[test]
    fn test_iteration_budget_is_enforced() {
        let signals = vec![Signal::new("s1", vec![SeedMotif::new("m1", "WWWWWWWW")])];
        let item = SimConfigItem::new("hard", GenerativeModelConfig::recombination("humanTRB"))
            .with_examples(10)
            .with_signal("s1", SignalTarget::Rate(1.0));
        let mut sim = SimConfig::new(vec![item.clone()]);
        sim.simulation_strategy = SimulationStrategyKind::RejectionSampling;
        let params = SimulationParams {
            sequence_batch_size: 50,
            max_iterations: 2,
            ..SimulationParams::default()
        };
        let model: Arc<dyn GenerativeModel> = Arc::new(RecombinationModel::builtin("humanTRB", true).unwrap());

        let mut implanter = LigoImplanter::new(&item, &sim, &params, &signals, model).unwrap();
        let err = implanter.make_sequences().unwrap_err();
        assert!(matches!(
            err,
            SimulationError::MaxIterationsReached { iterations: 2, ref remaining, .. } if remaining == "s1: 10"
        ));
        assert_eq!(implanter.phase(), Phase::Failed);
    }
}
