//! Simulation runner.
//!
//! Runs every item of a configuration in parallel, one [`LigoImplanter`] per
//! item, and combines paired items into receptors. Repertoire simulations
//! write into a single SQLite store; each worker opens its own connection.

use crate::base::{Receptor, ReceptorSequence};
use crate::errors::{ConfigError, SimulationError, StorageError};
use crate::generative::{GenerativeModel, ModelCache, ModelRegistry};
use crate::implants::Signal;
use crate::simulation::configs::LigoConfig;
use crate::simulation::implanter::LigoImplanter;
use crate::simulation::paired::pair_sequences;
use crate::storage::{write_receptors, write_sequences, Repertoire, RepertoireStore};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Store metadata key holding the configuration a store was produced from.
pub const CONFIG_METADATA_KEY: &str = "config";

/// Everything a run produced.
#[derive(Debug, Default)]
pub struct SimulationOutput {
    /// Sequence datasets by item name; paired items are not listed here.
    pub sequences: BTreeMap<String, Vec<ReceptorSequence>>,
    /// Receptors by `<item_1>_<item_2>`.
    pub receptors: BTreeMap<String, Vec<Receptor>>,
    pub repertoires: Vec<Repertoire>,
    pub signal_ids: Vec<String>,
}

impl SimulationOutput {
    /// Sequences held in memory, counting both chains of a receptor.
    pub fn sequence_count(&self) -> usize {
        self.sequences.values().map(Vec::len).sum::<usize>()
            + self.receptors.values().map(|r| 2 * r.len()).sum::<usize>()
    }

    /// Write in-memory datasets as TSV files into `dir`.
    pub fn write_tsv(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, StorageError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for (name, sequences) in &self.sequences {
            let path = dir.join(format!("sequences_{name}.tsv"));
            write_sequences(&path, sequences, &self.signal_ids)?;
            written.push(path);
        }
        for (name, receptors) in &self.receptors {
            let path = dir.join(format!("receptors_{name}.tsv"));
            write_receptors(&path, receptors, &self.signal_ids)?;
            written.push(path);
        }
        Ok(written)
    }
}

/// A validated configuration ready to run.
#[derive(Debug)]
pub struct Simulation {
    config: LigoConfig,
    signals: Vec<Signal>,
    registry: ModelRegistry,
    store_path: Option<PathBuf>,
}

impl Simulation {
    pub fn new(config: LigoConfig) -> Result<Self, SimulationError> {
        let signals = config.resolve()?;
        Ok(Self {
            config,
            signals,
            registry: ModelRegistry::with_defaults(),
            store_path: None,
        })
    }

    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// SQLite file receiving repertoires.
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &LigoConfig {
        &self.config
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn run(&self) -> Result<SimulationOutput, SimulationError> {
        self.run_with_progress(|_| {})
    }

    /// Run all items; `on_item_done` is called with each finished item name.
    pub fn run_with_progress<F>(&self, on_item_done: F) -> Result<SimulationOutput, SimulationError>
    where
        F: Fn(&str) + Sync,
    {
        match self.config.params.number_of_processes {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| ConfigError::Invalid(format!("cannot build thread pool: {e}")))?;
                pool.install(|| self.run_items(&on_item_done))
            }
            None => self.run_items(&on_item_done),
        }
    }

    fn load_models(&self) -> Result<Vec<Arc<dyn GenerativeModel>>, SimulationError> {
        let mut cache = ModelCache::new(self.registry.clone());
        let models = self
            .config
            .simulation
            .sim_items
            .iter()
            .map(|item| {
                cache
                    .get_or_load(&item.generative_model)
                    .map(|model| model.item_handle().unwrap_or(model))
                    .map_err(|source| SimulationError::Generation {
                        item: item.name.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("Loaded {} distinct generative models", cache.len());
        Ok(models)
    }

    fn run_items<F>(&self, on_item_done: &F) -> Result<SimulationOutput, SimulationError>
    where
        F: Fn(&str) + Sync,
    {
        let models = self.load_models()?;
        let mut output = SimulationOutput {
            signal_ids: self.signals.iter().map(|s| s.id.clone()).collect(),
            ..SimulationOutput::default()
        };

        if self.config.simulation.is_repertoire {
            output.repertoires = self.run_repertoires(&models, on_item_done)?;
        } else {
            let (sequences, receptors) = self.run_sequences(&models, on_item_done)?;
            output.sequences = sequences;
            output.receptors = receptors;
        }
        Ok(output)
    }

    fn run_repertoires<F>(
        &self,
        models: &[Arc<dyn GenerativeModel>],
        on_item_done: &F,
    ) -> Result<Vec<Repertoire>, SimulationError>
    where
        F: Fn(&str) + Sync,
    {
        let path = self
            .store_path
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("repertoire simulations need a store path".into()))?;
        let store = RepertoireStore::open(path)?;
        store.set_metadata(CONFIG_METADATA_KEY, &self.config.to_json()?)?;

        let sim = &self.config.simulation;
        let per_item = sim
            .sim_items
            .par_iter()
            .zip(models.par_iter())
            .map(|(item, model)| -> Result<_, SimulationError> {
                let mut item_store = RepertoireStore::open(path)?;
                let mut implanter =
                    LigoImplanter::new(item, sim, &self.config.params, &self.signals, Arc::clone(model))?;
                let repertoires = implanter.make_repertoires(&mut item_store)?;
                on_item_done(&item.name);
                Ok(repertoires)
            })
            .collect::<Result<Vec<_>, SimulationError>>()?;

        store.close()?;
        Ok(per_item.into_iter().flatten().collect())
    }

    #[allow(clippy::type_complexity)]
    fn run_sequences<F>(
        &self,
        models: &[Arc<dyn GenerativeModel>],
        on_item_done: &F,
    ) -> Result<
        (
            BTreeMap<String, Vec<ReceptorSequence>>,
            BTreeMap<String, Vec<Receptor>>,
        ),
        SimulationError,
    >
    where
        F: Fn(&str) + Sync,
    {
        let sim = &self.config.simulation;
        let mut sequences = sim
            .sim_items
            .par_iter()
            .zip(models.par_iter())
            .map(|(item, model)| -> Result<_, SimulationError> {
                let mut implanter =
                    LigoImplanter::new(item, sim, &self.config.params, &self.signals, Arc::clone(model))?;
                let sequences = implanter.make_sequences()?;
                on_item_done(&item.name);
                Ok((item.name.clone(), sequences))
            })
            .collect::<Result<BTreeMap<_, _>, SimulationError>>()?;

        let mut receptors = BTreeMap::new();
        for (name_1, name_2) in &sim.paired {
            let mut take = |name: &str| {
                sequences
                    .remove(name)
                    .ok_or_else(|| ConfigError::Invalid(format!("item '{name}' is paired more than once")))
            };
            let chain_1 = take(name_1)?;
            let chain_2 = take(name_2)?;
            let paired = pair_sequences(name_1, chain_1, name_2, chain_2)?;
            log::info!("Paired {} receptors from {name_1} and {name_2}", paired.len());
            receptors.insert(format!("{name_1}_{name_2}"), paired);
        }
        Ok((sequences, receptors))
    }
}
