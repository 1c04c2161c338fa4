//! Simulation configuration.
//!
//! A [`LigoConfig`] is what users write: motifs, signals referencing motifs by
//! id, the simulation definition and run parameters. [`LigoConfig::resolve`]
//! validates everything and turns it into typed [`Signal`]s plus the
//! [`SimConfig`] used by the driver.

use crate::base::{normalize_signal_key, SequenceType, NO_SIGNAL, SIGNAL_KEY_SEPARATOR};
use crate::errors::ConfigError;
use crate::generative::GenerativeModelConfig;
use crate::implants::{SeedMotif, Signal, SignalImplanting, UserPositionWeights};
use crate::simulation::strategy::SimulationStrategyKind;
use crate::storage::{METADATA_FIELDS, POSITION_SUFFIX, SEQUENCE_FIELDS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub const DEFAULT_SEQUENCE_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_IMPLANTING_SCALING_FACTOR: f64 = 1.0;

/// How many sequences should carry a signal key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalTarget {
    /// Absolute number of sequences, written as `{"count": n}`.
    Count { count: usize },
    /// Fraction of the sequences, written as a bare number.
    Rate(f64),
}

impl SignalTarget {
    /// Number of sequences out of `total`; rates round up.
    pub fn resolve(&self, total: usize) -> usize {
        match *self {
            SignalTarget::Rate(rate) => (rate * total as f64).ceil() as usize,
            SignalTarget::Count { count } => count,
        }
    }
}

/// One group of simulated examples sharing a generative model and signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfigItem {
    pub name: String,
    pub generative_model: GenerativeModelConfig,
    #[serde(default = "default_number_of_examples")]
    pub number_of_examples: usize,
    /// Sequences per repertoire; ignored for sequence datasets.
    #[serde(default)]
    pub receptors_in_repertoire_count: usize,
    /// Signal key (`s1` or composite `s1__s2`) to target.
    #[serde(default)]
    pub signals: BTreeMap<String, SignalTarget>,
    /// Events recorded as extra repertoire labels.
    #[serde(default)]
    pub immune_events: BTreeMap<String, bool>,
    #[serde(default)]
    pub is_noise: bool,
    #[serde(default)]
    pub seed: u64,
}

fn default_number_of_examples() -> usize {
    1
}

impl SimConfigItem {
    pub fn new(name: impl Into<String>, generative_model: GenerativeModelConfig) -> Self {
        Self {
            name: name.into(),
            generative_model,
            number_of_examples: 1,
            receptors_in_repertoire_count: 0,
            signals: BTreeMap::new(),
            immune_events: BTreeMap::new(),
            is_noise: false,
            seed: 0,
        }
    }

    pub fn with_examples(mut self, number_of_examples: usize) -> Self {
        self.number_of_examples = number_of_examples;
        self
    }

    pub fn with_repertoire_size(mut self, receptors: usize) -> Self {
        self.receptors_in_repertoire_count = receptors;
        self
    }

    pub fn with_signal(mut self, key: impl Into<String>, target: SignalTarget) -> Self {
        self.signals.insert(key.into(), target);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn as_noise(mut self) -> Self {
        self.is_noise = true;
        self
    }

    /// Every signal id used by this item, composite keys split up.
    pub fn signal_ids(&self) -> BTreeSet<String> {
        self.signals
            .keys()
            .flat_map(|key| key.split(SIGNAL_KEY_SEPARATOR))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Sequences making up one unit: the whole dataset, or one repertoire.
    pub fn unit_size(&self, is_repertoire: bool) -> usize {
        if is_repertoire {
            self.receptors_in_repertoire_count
        } else {
            self.number_of_examples
        }
    }

    /// Per-key sequence counts for one unit, including the no-signal
    /// remainder.
    pub fn unit_targets(&self, is_repertoire: bool) -> Result<BTreeMap<String, usize>, ConfigError> {
        let total = self.unit_size(is_repertoire);
        let mut targets = BTreeMap::new();
        for (key, target) in &self.signals {
            let count = target.resolve(total);
            if count > 0 {
                *targets.entry(normalize_signal_key(key)).or_insert(0) += count;
            }
        }

        let requested: usize = targets.values().sum();
        if requested > total {
            return Err(ConfigError::TargetsExceedTotal {
                item: self.name.clone(),
                requested,
                total,
            });
        }
        if requested < total {
            targets.insert(NO_SIGNAL.to_string(), total - requested);
        }
        Ok(targets)
    }
}

/// Definition of one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub sim_items: Vec<SimConfigItem>,
    #[serde(default)]
    pub is_repertoire: bool,
    /// Item name pairs whose sequences are combined into receptors.
    #[serde(default)]
    pub paired: Vec<(String, String)>,
    #[serde(default)]
    pub sequence_type: SequenceType,
    #[serde(default)]
    pub simulation_strategy: SimulationStrategyKind,
    /// Number of log10 p_gen bins; 0 disables binning.
    #[serde(default)]
    pub p_gen_bin_count: usize,
    #[serde(default)]
    pub keep_p_gen_dist: bool,
    #[serde(default = "default_true")]
    pub remove_seqs_with_signals: bool,
    #[serde(default = "default_scaling_factor")]
    pub implanting_scaling_factor: f64,
}

fn default_true() -> bool {
    true
}

fn default_scaling_factor() -> f64 {
    DEFAULT_IMPLANTING_SCALING_FACTOR
}

impl SimConfig {
    pub fn new(sim_items: Vec<SimConfigItem>) -> Self {
        Self {
            sim_items,
            is_repertoire: false,
            paired: Vec::new(),
            sequence_type: SequenceType::AminoAcid,
            simulation_strategy: SimulationStrategyKind::default(),
            p_gen_bin_count: 0,
            keep_p_gen_dist: false,
            remove_seqs_with_signals: true,
            implanting_scaling_factor: DEFAULT_IMPLANTING_SCALING_FACTOR,
        }
    }

    pub fn item(&self, name: &str) -> Option<&SimConfigItem> {
        self.sim_items.iter().find(|i| i.name == name)
    }

    /// Signal ids used by any item, in sorted order.
    pub fn signal_ids(&self) -> Vec<String> {
        self.sim_items
            .iter()
            .flat_map(SimConfigItem::signal_ids)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Check the simulation against the declared signals.
    pub fn validate(&self, signals: &[Signal]) -> Result<(), ConfigError> {
        if self.sim_items.is_empty() {
            return Err(ConfigError::Invalid("simulation has no sim_items".into()));
        }
        if !(self.implanting_scaling_factor.is_finite() && self.implanting_scaling_factor > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "implanting_scaling_factor must be positive, got {}",
                self.implanting_scaling_factor
            )));
        }

        let mut names = BTreeSet::new();
        for item in &self.sim_items {
            if !names.insert(item.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate sim item name '{}'", item.name)));
            }
            self.validate_item(item, signals)?;
        }

        for (first, second) in &self.paired {
            self.validate_pair(first, second)?;
        }

        if self.keep_p_gen_dist && self.p_gen_bin_count == 0 {
            log::warn!("keep_p_gen_dist is set but p_gen_bin_count is 0, the p_gen distribution will not be kept");
        }
        Ok(())
    }

    fn validate_item(&self, item: &SimConfigItem, signals: &[Signal]) -> Result<(), ConfigError> {
        if item.number_of_examples == 0 {
            return Err(ConfigError::Invalid(format!(
                "item '{}': number_of_examples must be positive",
                item.name
            )));
        }
        if self.is_repertoire && item.receptors_in_repertoire_count == 0 {
            return Err(ConfigError::Invalid(format!(
                "item '{}': receptors_in_repertoire_count must be positive for repertoire simulations",
                item.name
            )));
        }

        for (key, target) in &item.signals {
            if let SignalTarget::Rate(rate) = target {
                if !(0.0..=1.0).contains(rate) {
                    return Err(ConfigError::Invalid(format!(
                        "item '{}': rate {rate} for '{key}' is outside [0, 1]",
                        item.name
                    )));
                }
            }
            let parts: Vec<&str> = key.split(SIGNAL_KEY_SEPARATOR).collect();
            if parts.len() > 1 && self.simulation_strategy == SimulationStrategyKind::Implanting {
                return Err(ConfigError::Invalid(format!(
                    "item '{}': composite signal key '{key}' needs the RejectionSampling strategy",
                    item.name
                )));
            }
            for part in parts {
                if !signals.iter().any(|s| s.id == part) {
                    return Err(ConfigError::UnknownSignal {
                        item: item.name.clone(),
                        signal: part.to_string(),
                    });
                }
            }
        }

        let distinct: BTreeSet<String> = item.signals.keys().map(|k| normalize_signal_key(k)).collect();
        if distinct.len() != item.signals.len() {
            return Err(ConfigError::Invalid(format!(
                "item '{}': signal keys name the same combination twice",
                item.name
            )));
        }

        item.unit_targets(self.is_repertoire).map(|_| ())
    }

    fn validate_pair(&self, first: &str, second: &str) -> Result<(), ConfigError> {
        if self.is_repertoire {
            return Err(ConfigError::Invalid(
                "paired chains are only supported when simulating sequences".into(),
            ));
        }
        let (Some(a), Some(b)) = (self.item(first), self.item(second)) else {
            return Err(ConfigError::Invalid(format!(
                "paired items '{first}' and '{second}' must both be defined"
            )));
        };
        if a.number_of_examples != b.number_of_examples {
            return Err(ConfigError::Invalid(format!(
                "paired items '{first}' and '{second}' produce different numbers of sequences ({} vs {})",
                a.number_of_examples, b.number_of_examples
            )));
        }
        Ok(())
    }
}

/// Run-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    pub sequence_batch_size: usize,
    pub max_iterations: usize,
    /// Compute and export generation probabilities.
    pub export_p_gens: bool,
    /// Worker threads; `None` leaves the global pool untouched.
    pub number_of_processes: Option<usize>,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            sequence_batch_size: DEFAULT_SEQUENCE_BATCH_SIZE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            export_p_gens: false,
            number_of_processes: None,
        }
    }
}

/// Signal as written in a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    pub id: String,
    /// Motif identifiers.
    pub motifs: Vec<String>,
    #[serde(default)]
    pub implanting: SignalImplanting,
    #[serde(default)]
    pub sequence_position_weights: Option<UserPositionWeights>,
    #[serde(default)]
    pub v_call: Option<String>,
    #[serde(default)]
    pub j_call: Option<String>,
}

/// A complete simulation definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LigoConfig {
    pub motifs: Vec<SeedMotif>,
    pub signals: Vec<SignalConfig>,
    pub simulation: SimConfig,
    #[serde(default)]
    pub params: SimulationParams,
}

impl LigoConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate motifs and resolve signal motif references.
    pub fn build_signals(&self) -> Result<Vec<Signal>, ConfigError> {
        let sequence_type = self.simulation.sequence_type;
        let mut motifs = BTreeMap::new();
        for motif in &self.motifs {
            motif.validate(sequence_type)?;
            if motifs.insert(motif.identifier.as_str(), motif).is_some() {
                return Err(ConfigError::Invalid(format!("duplicate motif '{}'", motif.identifier)));
            }
        }

        let mut ids = BTreeSet::new();
        self.signals
            .iter()
            .map(|config| {
                if !ids.insert(config.id.as_str()) {
                    return Err(ConfigError::Invalid(format!("duplicate signal '{}'", config.id)));
                }
                if config.id.contains(SIGNAL_KEY_SEPARATOR) || config.id == NO_SIGNAL {
                    return Err(ConfigError::Invalid(format!("'{}' cannot be used as a signal id", config.id)));
                }
                // signal ids become output columns next to the fixed ones
                if SEQUENCE_FIELDS.contains(&config.id.as_str())
                    || METADATA_FIELDS.contains(&config.id.as_str())
                    || config.id.ends_with(POSITION_SUFFIX)
                {
                    return Err(ConfigError::Invalid(format!(
                        "signal id '{}' collides with an output column name",
                        config.id
                    )));
                }
                let signal_motifs = config
                    .motifs
                    .iter()
                    .map(|id| {
                        motifs
                            .get(id.as_str())
                            .map(|m| (*m).clone())
                            .ok_or_else(|| ConfigError::UnknownMotif {
                                signal: config.id.clone(),
                                motif: id.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if signal_motifs.is_empty() {
                    return Err(ConfigError::Invalid(format!("signal '{}' has no motifs", config.id)));
                }
                if config.implanting == SignalImplanting::FullSequence {
                    if let Some(gapped) = signal_motifs.iter().find(|m| m.is_gapped()) {
                        return Err(ConfigError::Invalid(format!(
                            "signal '{}' uses full-sequence implanting, but motif '{}' is gapped",
                            config.id, gapped.identifier
                        )));
                    }
                    if sequence_type == SequenceType::Nucleotide {
                        if let Some(motif) = signal_motifs.iter().find(|m| m.seed.len() % 3 != 0) {
                            return Err(ConfigError::Invalid(format!(
                                "signal '{}' replaces whole nucleotide sequences, but motif '{}' is not a multiple of three long",
                                config.id, motif.identifier
                            )));
                        }
                    }
                }

                Ok(Signal::new(config.id.clone(), signal_motifs)
                    .with_implanting(config.implanting)
                    .with_position_weights(config.sequence_position_weights.clone().unwrap_or_default())
                    .with_genes(config.v_call.clone(), config.j_call.clone()))
            })
            .collect()
    }

    /// Validate the whole configuration and return the resolved signals.
    pub fn resolve(&self) -> Result<Vec<Signal>, ConfigError> {
        let signals = self.build_signals()?;
        self.simulation.validate(&signals)?;
        if self.params.sequence_batch_size == 0 {
            return Err(ConfigError::Invalid("sequence_batch_size must be positive".into()));
        }
        if self.params.max_iterations == 0 {
            return Err(ConfigError::Invalid("max_iterations must be positive".into()));
        }
        Ok(signals)
    }
}
