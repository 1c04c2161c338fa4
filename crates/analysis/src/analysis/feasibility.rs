//! Feasibility summary
//!
//! A dry run that draws a sample from every distinct generative model of a
//! configuration, annotates it with all declared signals and reports how
//! often the signals occur naturally. Low frequencies make rejection
//! sampling slow, high frequencies make signal-free sequences scarce.

use ligo_sim::base::{ReceptorSequence, SequenceType};
use ligo_sim::errors::{ConfigError, GenerationError, MotifError, StorageError};
use ligo_sim::generative::{GenerativeModel, ModelCache, ModelRegistry};
use ligo_sim::implants::{Signal, SignalAnnotator};
use ligo_sim::simulation::{LigoConfig, PgenBins};
use ligo_sim::storage::write_sequences;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Signals found in fewer sequences than this are reported as rare.
pub const MIN_SIGNAL_FREQUENCY: f64 = 0.001;
/// Signals found in more sequences than this are reported as common.
pub const MAX_SIGNAL_FREQUENCY: f64 = 0.8;
/// Default sample size per model.
pub const DEFAULT_SEQUENCE_COUNT: usize = 100_000;
/// Seed of every feasibility sample.
const SAMPLE_SEED: u64 = 0;

const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Error)]
pub enum FeasibilityError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Motif(#[from] MotifError),

    #[error("model '{model}': {source}")]
    Generation {
        model: String,
        #[source]
        source: GenerationError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalFrequency {
    pub signal: String,
    pub frequency: f64,
}

/// Number of sequences carrying exactly `signal_count` signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CooccurrenceCount {
    pub signal_count: usize,
    pub sequences: usize,
}

/// P(`signal` | `given`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionalProbability {
    pub given: String,
    pub signal: String,
    pub probability: f64,
}

/// One bin of the log10 p_gen histogram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PgenHistogramBin {
    pub log10_low: f64,
    pub log10_high: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LengthCount {
    pub length: usize,
    pub count: usize,
}

/// Diagnostics for one distinct generative model.
#[derive(Debug, Clone, Serialize)]
pub struct FeasibilityReport {
    /// Names of the items sharing the model, joined by `_`.
    pub model_name: String,
    pub sequence_count: usize,
    pub signal_frequencies: Vec<SignalFrequency>,
    pub signal_cooccurrences: Vec<CooccurrenceCount>,
    pub conditional_probabilities: Vec<ConditionalProbability>,
    pub p_gen_histogram: Option<Vec<PgenHistogramBin>>,
    pub length_distribution: Vec<LengthCount>,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub sequences: Vec<ReceptorSequence>,
}

/// Runs the feasibility analysis for a configuration.
#[derive(Debug)]
pub struct FeasibilitySummary {
    config: LigoConfig,
    signals: Vec<Signal>,
    sequence_count: usize,
    registry: ModelRegistry,
}

impl FeasibilitySummary {
    pub fn new(config: LigoConfig, sequence_count: usize) -> Result<Self, FeasibilityError> {
        if sequence_count == 0 {
            return Err(ConfigError::Invalid("sequence_count must be positive".into()).into());
        }
        let signals = config.resolve()?;
        Ok(Self {
            config,
            signals,
            sequence_count,
            registry: ModelRegistry::with_defaults(),
        })
    }

    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Distinct models, named after the items using them.
    pub fn unique_models(&self) -> Result<Vec<(String, Arc<dyn GenerativeModel>)>, FeasibilityError> {
        let mut cache = ModelCache::new(self.registry.clone());
        let mut unique: Vec<(String, Arc<dyn GenerativeModel>)> = Vec::new();
        for item in &self.config.simulation.sim_items {
            let model = cache
                .get_or_load(&item.generative_model)
                .map_err(|source| FeasibilityError::Generation {
                    model: item.name.clone(),
                    source,
                })?;
            match unique.iter_mut().find(|(_, m)| m.is_same(model.as_ref())) {
                Some((name, _)) => *name = format!("{name}_{}", item.name),
                None => unique.push((item.name.clone(), model)),
            }
        }
        Ok(unique)
    }

    /// One report per distinct model, in item order.
    pub fn run(&self) -> Result<Vec<FeasibilityReport>, FeasibilityError> {
        let models = self.unique_models()?;
        models
            .par_iter()
            .map(|(name, model)| self.report(name, model.as_ref()))
            .collect()
    }

    fn wants_p_gens(&self, model: &dyn GenerativeModel) -> bool {
        let sim = &self.config.simulation;
        sim.keep_p_gen_dist && sim.p_gen_bin_count > 0 && model.can_compute_p_gens()
    }

    fn report(&self, name: &str, model: &dyn GenerativeModel) -> Result<FeasibilityReport, FeasibilityError> {
        let sequence_type = self.config.simulation.sequence_type;
        let with_p_gens = self.wants_p_gens(model);
        let sequences = model
            .generate_sequences(self.sequence_count, SAMPLE_SEED, sequence_type, with_p_gens)
            .map_err(|source| FeasibilityError::Generation {
                model: name.to_string(),
                source,
            })?;
        let annotator = SignalAnnotator::new(&self.signals, sequence_type)?;
        let sequences = annotator.annotate_all(sequences);
        log::info!("Generated and annotated {} sequences for model {name}", sequences.len());

        let mut warnings = Vec::new();
        let signal_frequencies = signal_frequencies(&sequences, &self.signals);
        for SignalFrequency { signal, frequency } in &signal_frequencies {
            let found = (frequency * sequences.len() as f64).round();
            if *frequency < MIN_SIGNAL_FREQUENCY {
                warnings.push(format!(
                    "Signal {signal} has very low frequency. It is found in {found} out of {} sequences, \
                     and it might take many iterations to simulate the desired number of signal-containing sequences \
                     if using rejection sampling.",
                    sequences.len()
                ));
            } else if *frequency > MAX_SIGNAL_FREQUENCY {
                warnings.push(format!(
                    "Signal {signal} has very high frequency. It is found in {found} out of {} sequences. \
                     It might take many iterations to simulate sequences that do not contain this signal.",
                    sequences.len()
                ));
            }
        }

        let p_gen_histogram = if with_p_gens {
            warnings.push(
                "This simulation relies on using generation probabilities, which can significantly slow down \
                 the simulation, especially for large dataset sizes."
                    .to_string(),
            );
            p_gen_histogram(&sequences, self.config.simulation.p_gen_bin_count)
        } else {
            None
        };
        for warning in &warnings {
            log::warn!("{name}: {warning}");
        }

        Ok(FeasibilityReport {
            model_name: name.to_string(),
            sequence_count: sequences.len(),
            signal_cooccurrences: signal_cooccurrences(&sequences),
            conditional_probabilities: conditional_probabilities(&sequences, &self.signals),
            length_distribution: length_distribution(&sequences, sequence_type),
            signal_frequencies,
            p_gen_histogram,
            warnings,
            sequences,
        })
    }

    /// Write every report under `dir/<model_name>/` plus `dir/summary.json`.
    pub fn write(&self, reports: &[FeasibilityReport], dir: impl AsRef<Path>) -> Result<PathBuf, FeasibilityError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let signal_ids: Vec<String> = self.signals.iter().map(|s| s.id.clone()).collect();

        for report in reports {
            let model_dir = dir.join(&report.model_name);
            fs::create_dir_all(&model_dir)?;
            write_sequences(model_dir.join("receptors.tsv"), &report.sequences, &signal_ids)?;
            write_table(&model_dir.join("signal_frequencies.tsv"), &report.signal_frequencies)?;
            write_table(&model_dir.join("signal_cooccurrences.tsv"), &report.signal_cooccurrences)?;
            write_table(
                &model_dir.join("signal_conditional_probabilities.tsv"),
                &report.conditional_probabilities,
            )?;
            if let Some(histogram) = &report.p_gen_histogram {
                write_table(&model_dir.join("p_gen_histogram.tsv"), histogram)?;
            }
            write_table(&model_dir.join("sequence_length_distribution.tsv"), &report.length_distribution)?;
        }

        let summary = dir.join(SUMMARY_FILE);
        fs::write(&summary, serde_json::to_string_pretty(reports)?)?;
        Ok(summary)
    }
}

fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), FeasibilityError> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Fraction of sequences carrying each signal.
pub fn signal_frequencies(sequences: &[ReceptorSequence], signals: &[Signal]) -> Vec<SignalFrequency> {
    if sequences.is_empty() {
        return Vec::new();
    }
    signals
        .iter()
        .map(|signal| SignalFrequency {
            signal: signal.id.clone(),
            frequency: sequences.iter().filter(|s| s.contains_signal(&signal.id)).count() as f64
                / sequences.len() as f64,
        })
        .collect()
}

/// How many sequences carry 0, 1, 2, ... signals.
pub fn signal_cooccurrences(sequences: &[ReceptorSequence]) -> Vec<CooccurrenceCount> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for sequence in sequences {
        *counts.entry(sequence.signal_count()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(signal_count, sequences)| CooccurrenceCount {
            signal_count,
            sequences,
        })
        .collect()
}

/// P(j | i) for every ordered pair of signals; zero when `i` never occurs.
pub fn conditional_probabilities(sequences: &[ReceptorSequence], signals: &[Signal]) -> Vec<ConditionalProbability> {
    let mut result = Vec::with_capacity(signals.len() * signals.len());
    for given in signals {
        let with_given: Vec<&ReceptorSequence> =
            sequences.iter().filter(|s| s.contains_signal(&given.id)).collect();
        for signal in signals {
            let both = with_given.iter().filter(|s| s.contains_signal(&signal.id)).count();
            let probability = if with_given.is_empty() {
                0.0
            } else {
                both as f64 / with_given.len() as f64
            };
            result.push(ConditionalProbability {
                given: given.id.clone(),
                signal: signal.id.clone(),
                probability,
            });
        }
    }
    result
}

/// Histogram over log10 p_gen with equal-width bins.
pub fn p_gen_histogram(sequences: &[ReceptorSequence], bin_count: usize) -> Option<Vec<PgenHistogramBin>> {
    let p_gens: Vec<f64> = sequences.iter().filter_map(|s| s.metadata.p_gen).collect();
    let bins = PgenBins::from_reference(&p_gens, bin_count)?;
    let mut counts = vec![0; bins.bin_count()];
    for p_gen in &p_gens {
        counts[bins.bin_of(*p_gen)] += 1;
    }
    let edges = bins.edges();
    Some(
        counts
            .into_iter()
            .enumerate()
            .map(|(i, count)| PgenHistogramBin {
                log10_low: edges[i],
                log10_high: edges[i + 1],
                count,
            })
            .collect(),
    )
}

/// Sequence lengths in the simulated sequence type.
pub fn length_distribution(sequences: &[ReceptorSequence], sequence_type: SequenceType) -> Vec<LengthCount> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for sequence in sequences {
        *counts.entry(sequence.get_sequence(sequence_type).len()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(length, count)| LengthCount { length, count })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ligo_sim::base::SignalAnnotation;
    use ligo_sim::implants::SeedMotif;
    use serde_json::json;
    use tempfile::tempdir;

    fn sequence(aa: &str, signals: &[&str]) -> ReceptorSequence {
        let mut sequence = ReceptorSequence::from_aa(aa, aa);
        for signal in signals {
            sequence
                .metadata
                .signals
                .insert(signal.to_string(), SignalAnnotation::from_mask(&[true]));
        }
        sequence
    }

    fn signals() -> Vec<Signal> {
        vec![
            Signal::new("s1", vec![SeedMotif::new("m1", "AS")]),
            Signal::new("s2", vec![SeedMotif::new("m2", "GG")]),
        ]
    }

    fn config(items: serde_json::Value, keep_p_gen_dist: bool) -> LigoConfig {
        serde_json::from_value(json!({
            "motifs": [{"identifier": "m1", "seed": "CAS"}, {"identifier": "m2", "seed": "WWWW"}],
            "signals": [{"id": "s1", "motifs": ["m1"]}, {"id": "s2", "motifs": ["m2"]}],
            "simulation": {"sim_items": items, "keep_p_gen_dist": keep_p_gen_dist, "p_gen_bin_count": 5}
        }))
        .unwrap()
    }

    #[test]
    fn test_frequencies_and_cooccurrences() {
        let sequences = vec![
            sequence("CASF", &["s1"]),
            sequence("CASGGF", &["s1", "s2"]),
            sequence("CF", &[]),
            sequence("CGGF", &["s2"]),
        ];
        let freqs = signal_frequencies(&sequences, &signals());
        assert_eq!(freqs[0].frequency, 0.5);
        assert_eq!(freqs[1].frequency, 0.5);

        let co = signal_cooccurrences(&sequences);
        assert_eq!(
            co,
            vec![
                CooccurrenceCount { signal_count: 0, sequences: 1 },
                CooccurrenceCount { signal_count: 1, sequences: 2 },
                CooccurrenceCount { signal_count: 2, sequences: 1 },
            ]
        );

        let cond = conditional_probabilities(&sequences, &signals());
        let p = |given: &str, signal: &str| {
            cond.iter()
                .find(|c| c.given == given && c.signal == signal)
                .unwrap()
                .probability
        };
        assert_eq!(p("s1", "s1"), 1.0);
        assert_eq!(p("s1", "s2"), 0.5);
        assert_eq!(p("s2", "s1"), 0.5);

        let lengths = length_distribution(&sequences, SequenceType::AminoAcid);
        assert_eq!(lengths[0], LengthCount { length: 2, count: 1 });
        assert_eq!(lengths.iter().map(|l| l.count).sum::<usize>(), 4);
    }

    #[test]
    fn test_empty_sample() {
        assert!(signal_frequencies(&[], &signals()).is_empty());
        let cond = conditional_probabilities(&[], &signals());
        assert!(cond.iter().all(|c| c.probability == 0.0));
        assert!(p_gen_histogram(&[], 3).is_none());
    }

    #[test]
    fn test_models_are_merged() {
        let summary = FeasibilitySummary::new(
            config(
                json!([
                    {"name": "a", "generative_model": {"type": "OLGA", "default_model_name": "humanTRB"}},
                    {"name": "b", "generative_model": {"type": "OLGA", "default_model_name": "humanTRA"}},
                    {"name": "c", "generative_model": {"type": "Recombination", "default_model_name": "humanTRB"}}
                ]),
                false,
            ),
            10,
        )
        .unwrap();
        let names: Vec<String> = summary.unique_models().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a_c".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_run_reports_warnings() {
        let summary = FeasibilitySummary::new(
            config(
                json!([{"name": "a", "generative_model": {"type": "OLGA", "default_model_name": "humanTRB"}}]),
                false,
            ),
            200,
        )
        .unwrap();
        let reports = summary.run().unwrap();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.sequence_count, 200);
        // most TRB V genes start the junction with CAS
        let s1 = &report.signal_frequencies[0];
        assert!(s1.frequency > 0.5);
        assert_eq!(report.signal_frequencies[1].frequency, 0.0);
        assert!(report.warnings.iter().any(|w| w.contains("Signal s2 has very low frequency")));
        assert!(report.p_gen_histogram.is_none());
        assert_eq!(report.length_distribution.iter().map(|l| l.count).sum::<usize>(), 200);
    }

    #[test]
    fn test_p_gen_histogram_and_files() {
        let summary = FeasibilitySummary::new(
            config(
                json!([{"name": "a", "generative_model": {"type": "OLGA", "default_model_name": "humanTRB"}}]),
                true,
            ),
            50,
        )
        .unwrap();
        let reports = summary.run().unwrap();
        let histogram = reports[0].p_gen_histogram.as_ref().unwrap();
        assert_eq!(histogram.len(), 5);
        assert_eq!(histogram.iter().map(|b| b.count).sum::<usize>(), 50);
        assert!(reports[0].warnings.iter().any(|w| w.contains("generation probabilities")));

        let dir = tempdir().unwrap();
        let summary_path = summary.write(&reports, dir.path()).unwrap();
        assert!(summary_path.ends_with("summary.json"));
        for file in [
            "receptors.tsv",
            "signal_frequencies.tsv",
            "signal_cooccurrences.tsv",
            "signal_conditional_probabilities.tsv",
            "p_gen_histogram.tsv",
            "sequence_length_distribution.tsv",
        ] {
            assert!(dir.path().join("a").join(file).exists(), "{file} missing");
        }
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(summary_path).unwrap()).unwrap();
        assert_eq!(json[0]["model_name"], "a");
    }
}
