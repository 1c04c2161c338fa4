//! Background sequence sources.
//!
//! A [`GenerativeModel`] produces batches of receptor sequences, optionally
//! with generation probabilities. Models are built from a
//! [`GenerativeModelConfig`] through a [`ModelRegistry`] that maps type names
//! to factory functions, and shared across simulation items through a
//! [`ModelCache`] that reuses models with the same identity.

mod experimental;
mod recombination;

pub use experimental::ExperimentalImport;
pub use recombination::{GeneSegment, RecombinationModel, RecombinationParameters};

use crate::base::{Chain, ReceptorSequence, RegionType, SequenceType};
use crate::errors::GenerationError;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What makes two model instances interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelIdentity {
    pub kind: &'static str,
    pub source: String,
    pub chain: Option<Chain>,
    pub detail: String,
}

/// A source of background receptor sequences.
pub trait GenerativeModel: Send + Sync + fmt::Debug {
    /// Human readable model name.
    fn name(&self) -> &str;

    fn identity(&self) -> ModelIdentity;

    /// Two models are the same if they would produce the same sequences.
    fn is_same(&self, other: &dyn GenerativeModel) -> bool {
        self.identity() == other.identity()
    }

    fn chain(&self) -> Option<Chain>;

    fn region_type(&self) -> RegionType;

    /// A handle with its own consumption state, for use by one item.
    ///
    /// Models that hand out each stored sequence at most once return a copy
    /// that shares the data but not the position. Stateless models return
    /// `None` and are shared as they are.
    fn item_handle(&self) -> Option<Arc<dyn GenerativeModel>> {
        None
    }

    /// Produce up to `count` sequences. The same seed gives the same batch.
    fn generate_sequences(
        &self,
        count: usize,
        seed: u64,
        sequence_type: SequenceType,
        compute_p_gen: bool,
    ) -> Result<Vec<ReceptorSequence>, GenerationError>;

    fn can_compute_p_gens(&self) -> bool;

    fn compute_p_gen(
        &self,
        sequence: &ReceptorSequence,
        sequence_type: SequenceType,
    ) -> Result<f64, GenerationError>;

    /// Generation probabilities for a batch, computed in parallel.
    fn compute_p_gens(
        &self,
        sequences: &[ReceptorSequence],
        sequence_type: SequenceType,
    ) -> Result<Vec<f64>, GenerationError> {
        sequences
            .par_iter()
            .map(|s| self.compute_p_gen(s, sequence_type))
            .collect()
    }

    fn can_generate_from_skewed_gene_models(&self) -> bool;

    /// Produce sequences using only the given V and J genes.
    ///
    /// Generation probabilities still refer to the unrestricted model.
    fn generate_from_skewed_gene_models(
        &self,
        v_genes: &[String],
        j_genes: &[String],
        seed: u64,
        batch_size: usize,
        sequence_type: SequenceType,
        compute_p_gen: bool,
    ) -> Result<Vec<ReceptorSequence>, GenerationError>;
}

/// Model definition as it appears in a configuration file.
///
/// `type` selects the factory; the remaining keys are handed to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerativeModelConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl GenerativeModelConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: serde_json::Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Config for one of the built-in recombination models.
    pub fn recombination(default_model_name: &str) -> Self {
        Self::new("OLGA").with_param("default_model_name", default_model_name)
    }
}

/// Builds a model from the configuration parameters.
pub type ModelFactory =
    fn(&serde_json::Map<String, serde_json::Value>) -> Result<Arc<dyn GenerativeModel>, GenerationError>;

/// Closed mapping from model type name to factory.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    factories: BTreeMap<&'static str, ModelFactory>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ModelRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every model type shipped in this crate.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("OLGA", RecombinationModel::from_params);
        registry.register("Recombination", RecombinationModel::from_params);
        registry.register("ExperimentalImport", ExperimentalImport::from_params);
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: ModelFactory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub fn build(&self, config: &GenerativeModelConfig) -> Result<Arc<dyn GenerativeModel>, GenerationError> {
        let factory = self
            .factories
            .get(config.kind.as_str())
            .ok_or_else(|| GenerationError::UnknownModel(config.kind.clone()))?;
        factory(&config.params)
    }
}

/// Shares models between simulation items.
///
/// Identical configurations are served without loading; otherwise a newly
/// built model is replaced by an existing one with the same identity.
#[derive(Debug, Default)]
pub struct ModelCache {
    registry: ModelRegistry,
    entries: Vec<(GenerativeModelConfig, Arc<dyn GenerativeModel>)>,
}

impl ModelCache {
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            entries: Vec::new(),
        }
    }

    pub fn get_or_load(&mut self, config: &GenerativeModelConfig) -> Result<Arc<dyn GenerativeModel>, GenerationError> {
        if let Some((_, model)) = self.entries.iter().find(|(c, _)| c == config) {
            return Ok(Arc::clone(model));
        }

        let built = self.registry.build(config)?;
        let model = match self.entries.iter().find(|(_, m)| m.is_same(built.as_ref())) {
            Some((_, existing)) => Arc::clone(existing),
            None => built,
        };
        self.entries.push((config.clone(), Arc::clone(&model)));
        Ok(model)
    }

    /// Number of distinct models held.
    pub fn len(&self) -> usize {
        let mut distinct: Vec<&Arc<dyn GenerativeModel>> = Vec::new();
        for (_, model) in &self.entries {
            if !distinct.iter().any(|m| Arc::ptr_eq(m, model)) {
                distinct.push(model);
            }
        }
        distinct.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
