//! Probabilistic V(D)J recombination model.
//!
//! A junction is assembled from a V gene (3' deletion), an optional D gene
//! (5' and 3' deletions), a J gene (5' deletion) and random insertions
//! between the segments. Generation probabilities are exact: nucleotide
//! sequences sum over every recombination scenario that produces them,
//! amino acid sequences additionally factorize over codons so that every
//! synonymous nucleotide sequence is counted.

use super::{GenerativeModel, ModelIdentity};
use crate::base::{
    codons_for, nucleotide_index, translate, Chain, FrameType, ReceptorSequence, RegionType,
    SequenceMetadata, SequenceType, NUCLEOTIDES,
};
use crate::errors::GenerationError;
use rand::distr::Distribution;
use rand::{Rng, SeedableRng};
use rand_distr::weighted::WeightedAliasIndex;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const HUMAN_TRB: &str = include_str!("../../models/human_trb.json");
const HUMAN_TRA: &str = include_str!("../../models/human_tra.json");

/// Upper bound on rejected rearrangements per productive sequence.
const MAX_ATTEMPTS_PER_SEQUENCE: usize = 10_000;

/// Germline segment with its usage weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSegment {
    pub name: String,
    /// Junction part of the germline, 5' to 3'.
    pub sequence: String,
    pub usage: f64,
}

/// Model parameters as stored on disk.
///
/// Deletion and insertion distributions are indexed by length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecombinationParameters {
    pub name: String,
    pub chain: Chain,
    pub v_genes: Vec<GeneSegment>,
    #[serde(default)]
    pub d_genes: Vec<GeneSegment>,
    pub j_genes: Vec<GeneSegment>,
    pub v_deletions: Vec<f64>,
    #[serde(default)]
    pub d5_deletions: Vec<f64>,
    #[serde(default)]
    pub d3_deletions: Vec<f64>,
    pub j_deletions: Vec<f64>,
    /// VD insertions, or VJ insertions for chains without a D gene.
    pub vd_insertions: Vec<f64>,
    #[serde(default)]
    pub dj_insertions: Vec<f64>,
    /// Probabilities of A, C, G, T in insertions.
    pub insertion_nucleotides: [f64; 4],
}

fn check_distribution(values: &[f64], what: &str) -> Result<(), GenerationError> {
    if values.is_empty() {
        return Err(GenerationError::InvalidModel(format!("{what} is empty")));
    }
    if values.iter().any(|v| *v < 0.0 || !v.is_finite()) {
        return Err(GenerationError::InvalidModel(format!("{what} contains negative values")));
    }
    if values.iter().sum::<f64>() <= 0.0 {
        return Err(GenerationError::InvalidModel(format!("{what} sums to zero")));
    }
    Ok(())
}

fn normalize(values: &mut [f64]) {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter_mut().for_each(|v| *v /= total);
    }
}

fn check_genes(genes: &[GeneSegment], what: &str) -> Result<usize, GenerationError> {
    check_distribution(&genes.iter().map(|g| g.usage).collect::<Vec<_>>(), what)?;
    if let Some(gene) = genes
        .iter()
        .find(|g| g.sequence.is_empty() || !SequenceType::Nucleotide.is_valid(&g.sequence))
    {
        return Err(GenerationError::InvalidModel(format!(
            "{what}: gene {} has an invalid germline sequence",
            gene.name
        )));
    }
    Ok(genes.iter().map(|g| g.sequence.len()).min().unwrap_or(0))
}

impl RecombinationParameters {
    /// One of the models shipped with the crate (`humanTRB`, `humanTRA`).
    pub fn builtin(name: &str) -> Result<Self, GenerationError> {
        let source = match name {
            "humanTRB" => HUMAN_TRB,
            "humanTRA" => HUMAN_TRA,
            _ => {
                return Err(GenerationError::InvalidModel(format!(
                    "no built-in model named '{name}'"
                )))
            }
        };
        Ok(serde_json::from_str(source)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GenerationError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn has_d_gene(&self) -> bool {
        !self.d_genes.is_empty()
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        let min_v = check_genes(&self.v_genes, "V genes")?;
        let min_j = check_genes(&self.j_genes, "J genes")?;
        check_distribution(&self.v_deletions, "V deletions")?;
        check_distribution(&self.j_deletions, "J deletions")?;
        check_distribution(&self.vd_insertions, "VD insertions")?;
        check_distribution(&self.insertion_nucleotides, "insertion nucleotides")?;

        if self.v_deletions.len() > min_v || self.j_deletions.len() > min_j {
            return Err(GenerationError::InvalidModel(
                "deletions may remove an entire V or J gene".into(),
            ));
        }

        if self.has_d_gene() {
            let min_d = check_genes(&self.d_genes, "D genes")?;
            check_distribution(&self.d5_deletions, "D 5' deletions")?;
            check_distribution(&self.d3_deletions, "D 3' deletions")?;
            check_distribution(&self.dj_insertions, "DJ insertions")?;
            if self.d5_deletions.len() + self.d3_deletions.len() - 2 >= min_d {
                return Err(GenerationError::InvalidModel(
                    "deletions may remove an entire D gene".into(),
                ));
            }
        }
        Ok(())
    }

    fn normalized(mut self) -> Self {
        for genes in [&mut self.v_genes, &mut self.d_genes, &mut self.j_genes] {
            let total: f64 = genes.iter().map(|g| g.usage).sum();
            if total > 0.0 {
                genes.iter_mut().for_each(|g| g.usage /= total);
            }
        }
        for dist in [
            &mut self.v_deletions,
            &mut self.d5_deletions,
            &mut self.d3_deletions,
            &mut self.j_deletions,
            &mut self.vd_insertions,
            &mut self.dj_insertions,
        ] {
            normalize(dist);
        }
        normalize(&mut self.insertion_nucleotides);
        self
    }
}

fn alias(weights: Vec<f64>, what: &str) -> Result<WeightedAliasIndex<f64>, GenerationError> {
    WeightedAliasIndex::new(weights)
        .map_err(|e| GenerationError::InvalidModel(format!("cannot sample {what}: {e}")))
}

#[derive(Debug)]
struct DSamplers {
    gene: WeightedAliasIndex<f64>,
    del5: WeightedAliasIndex<f64>,
    del3: WeightedAliasIndex<f64>,
    dj_insertion: WeightedAliasIndex<f64>,
}

#[derive(Debug)]
struct Samplers {
    v_gene: WeightedAliasIndex<f64>,
    j_gene: WeightedAliasIndex<f64>,
    v_deletion: WeightedAliasIndex<f64>,
    j_deletion: WeightedAliasIndex<f64>,
    vd_insertion: WeightedAliasIndex<f64>,
    nucleotide: WeightedAliasIndex<f64>,
    d: Option<DSamplers>,
}

#[derive(Debug, Deserialize)]
struct RecombinationModelConfig {
    #[serde(default)]
    default_model_name: Option<String>,
    #[serde(default)]
    model_path: Option<PathBuf>,
    #[serde(default)]
    chain: Option<Chain>,
    #[serde(default = "default_productive_only")]
    productive_only: bool,
}

fn default_productive_only() -> bool {
    true
}

/// OLGA-style generative model for T cell receptor junctions.
#[derive(Debug)]
pub struct RecombinationModel {
    params: RecombinationParameters,
    source: String,
    productive_only: bool,
    samplers: Samplers,
    aa_codons: Vec<Vec<[u8; 3]>>,
}

impl RecombinationModel {
    pub fn new(
        params: RecombinationParameters,
        source: impl Into<String>,
        productive_only: bool,
    ) -> Result<Self, GenerationError> {
        params.validate()?;
        let params = params.normalized();

        let d = if params.has_d_gene() {
            Some(DSamplers {
                gene: alias(params.d_genes.iter().map(|g| g.usage).collect(), "D genes")?,
                del5: alias(params.d5_deletions.clone(), "D 5' deletions")?,
                del3: alias(params.d3_deletions.clone(), "D 3' deletions")?,
                dj_insertion: alias(params.dj_insertions.clone(), "DJ insertions")?,
            })
        } else {
            None
        };
        let samplers = Samplers {
            v_gene: alias(params.v_genes.iter().map(|g| g.usage).collect(), "V genes")?,
            j_gene: alias(params.j_genes.iter().map(|g| g.usage).collect(), "J genes")?,
            v_deletion: alias(params.v_deletions.clone(), "V deletions")?,
            j_deletion: alias(params.j_deletions.clone(), "J deletions")?,
            vd_insertion: alias(params.vd_insertions.clone(), "VD insertions")?,
            nucleotide: alias(params.insertion_nucleotides.to_vec(), "insertion nucleotides")?,
            d,
        };
        let aa_codons = (0u8..128).map(codons_for).collect();

        Ok(Self {
            params,
            source: source.into(),
            productive_only,
            samplers,
            aa_codons,
        })
    }

    /// Load one of the built-in models.
    pub fn builtin(name: &str, productive_only: bool) -> Result<Self, GenerationError> {
        Self::new(RecombinationParameters::builtin(name)?, name, productive_only)
    }

    /// Factory used by the model registry.
    pub fn from_params(
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Arc<dyn GenerativeModel>, GenerationError> {
        let config: RecombinationModelConfig =
            serde_json::from_value(serde_json::Value::Object(params.clone()))?;

        let (parameters, source) = match (&config.model_path, &config.default_model_name) {
            (Some(path), _) => (
                RecombinationParameters::from_file(path)?,
                path.display().to_string(),
            ),
            (None, Some(name)) => (RecombinationParameters::builtin(name)?, name.clone()),
            (None, None) => {
                let name = match config.chain {
                    None | Some(Chain::Beta) => "humanTRB",
                    Some(Chain::Alpha) => "humanTRA",
                    Some(other) => {
                        return Err(GenerationError::InvalidModel(format!(
                            "no built-in model for chain {other}"
                        )))
                    }
                };
                (RecombinationParameters::builtin(name)?, name.to_string())
            }
        };

        if let Some(chain) = config.chain.filter(|c| *c != parameters.chain) {
            log::warn!(
                "Model {} describes chain {}, ignoring requested chain {chain}",
                parameters.name,
                parameters.chain
            );
        }

        Ok(Arc::new(Self::new(parameters, source, config.productive_only)?))
    }

    pub fn parameters(&self) -> &RecombinationParameters {
        &self.params
    }

    fn restricted_genes(
        &self,
        genes: &[GeneSegment],
        wanted: &[String],
        what: &str,
    ) -> Result<WeightedAliasIndex<f64>, GenerationError> {
        let weights: Vec<f64> = genes
            .iter()
            .map(|g| {
                if wanted.is_empty() || wanted.iter().any(|w| g.name.starts_with(w.as_str())) {
                    g.usage
                } else {
                    0.0
                }
            })
            .collect();
        if weights.iter().all(|w| *w == 0.0) {
            return Err(GenerationError::InvalidModel(format!(
                "none of the requested {what} genes {wanted:?} are part of model {}",
                self.params.name
            )));
        }
        alias(weights, what)
    }

    fn insert_random<R: Rng + ?Sized>(&self, rng: &mut R, length: usize, out: &mut String) {
        for _ in 0..length {
            out.push(NUCLEOTIDES[self.samplers.nucleotide.sample(rng)] as char);
        }
    }

    /// Sample one rearrangement; returns V index, J index and junction.
    fn sample_rearrangement<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        v_sampler: &WeightedAliasIndex<f64>,
        j_sampler: &WeightedAliasIndex<f64>,
    ) -> (usize, usize, String) {
        let v_index = v_sampler.sample(rng);
        let j_index = j_sampler.sample(rng);
        let v = &self.params.v_genes[v_index].sequence;
        let j = &self.params.j_genes[j_index].sequence;
        let v_kept = v.len() - self.samplers.v_deletion.sample(rng);
        let j_start = self.samplers.j_deletion.sample(rng);

        let mut junction = String::with_capacity(v.len() + j.len() + 24);
        junction.push_str(&v[..v_kept]);
        let first_insertion = self.samplers.vd_insertion.sample(rng);
        self.insert_random(rng, first_insertion, &mut junction);

        if let Some(d) = &self.samplers.d {
            let gene = &self.params.d_genes[d.gene.sample(rng)].sequence;
            let start = d.del5.sample(rng);
            let end = gene.len() - d.del3.sample(rng);
            junction.push_str(&gene[start..end]);
            let second_insertion = d.dj_insertion.sample(rng);
            self.insert_random(rng, second_insertion, &mut junction);
        }

        junction.push_str(&j[j_start..]);
        (v_index, j_index, junction)
    }

    fn generate_with(
        &self,
        v_sampler: &WeightedAliasIndex<f64>,
        j_sampler: &WeightedAliasIndex<f64>,
        count: usize,
        seed: u64,
        sequence_type: SequenceType,
        compute_p_gen: bool,
    ) -> Result<Vec<ReceptorSequence>, GenerationError> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut sequences = Vec::with_capacity(count);

        for index in 0..count {
            let mut attempts = 0;
            let (v_index, j_index, junction, frame_type) = loop {
                attempts += 1;
                let (v_index, j_index, junction) = self.sample_rearrangement(&mut rng, v_sampler, j_sampler);
                let frame_type = frame_type_of(&junction);
                if !self.productive_only || frame_type == FrameType::InFrame {
                    break (v_index, j_index, junction, frame_type);
                }
                if attempts >= MAX_ATTEMPTS_PER_SEQUENCE {
                    return Err(GenerationError::NoProductiveSequence {
                        model: self.params.name.clone(),
                        attempts,
                    });
                }
            };

            sequences.push(ReceptorSequence {
                sequence_id: format!("{}_{seed}_{index}", self.params.name),
                sequence_aa: translate(&junction).unwrap_or_default(),
                sequence: junction,
                metadata: SequenceMetadata {
                    v_call: self.params.v_genes[v_index].name.clone(),
                    j_call: self.params.j_genes[j_index].name.clone(),
                    region_type: RegionType::ImgtJunction,
                    frame_type,
                    chain: Some(self.params.chain),
                    duplicate_count: 1,
                    ..Default::default()
                },
                ..Default::default()
            });
        }

        if compute_p_gen {
            let p_gens = self.compute_p_gens(&sequences, sequence_type)?;
            for (sequence, p_gen) in sequences.iter_mut().zip(p_gens) {
                sequence.metadata.p_gen = Some(p_gen);
            }
        }
        Ok(sequences)
    }

    fn insertion_probability(&self, inserted: &[u8]) -> f64 {
        inserted
            .iter()
            .map(|&b| nucleotide_index(b).map_or(0.0, |i| self.params.insertion_nucleotides[i]))
            .product()
    }

    /// Kept V prefixes: (germline bytes, kept length, probability).
    fn v_choices(&self) -> impl Iterator<Item = (&[u8], usize, f64)> + '_ {
        self.params.v_genes.iter().flat_map(move |gene| {
            self.params
                .v_deletions
                .iter()
                .enumerate()
                .filter(|(_, p)| **p > 0.0)
                .map(move |(deleted, p)| {
                    let bytes = gene.sequence.as_bytes();
                    (&bytes[..bytes.len() - deleted], bytes.len() - deleted, gene.usage * p)
                })
        })
    }

    /// Kept J suffixes: (germline bytes, kept length, probability).
    fn j_choices(&self) -> impl Iterator<Item = (&[u8], usize, f64)> + '_ {
        self.params.j_genes.iter().flat_map(move |gene| {
            self.params
                .j_deletions
                .iter()
                .enumerate()
                .filter(|(_, p)| **p > 0.0)
                .map(move |(deleted, p)| {
                    let bytes = gene.sequence.as_bytes();
                    (&bytes[deleted..], bytes.len() - deleted, gene.usage * p)
                })
        })
    }

    /// Trimmed D segments with their probability.
    fn d_choices(&self) -> Vec<(&[u8], f64)> {
        let mut choices = Vec::new();
        for gene in &self.params.d_genes {
            let bytes = gene.sequence.as_bytes();
            for (del5, p5) in self.params.d5_deletions.iter().enumerate() {
                for (del3, p3) in self.params.d3_deletions.iter().enumerate() {
                    let p = gene.usage * p5 * p3;
                    if p > 0.0 {
                        choices.push((&bytes[del5..bytes.len() - del3], p));
                    }
                }
            }
        }
        choices
    }

    fn vd_insertion(&self, length: usize) -> f64 {
        self.params.vd_insertions.get(length).copied().unwrap_or(0.0)
    }

    fn dj_insertion(&self, length: usize) -> f64 {
        self.params.dj_insertions.get(length).copied().unwrap_or(0.0)
    }

    fn p_gen_nucleotide(&self, sequence: &[u8]) -> f64 {
        let length = sequence.len();
        let d_choices = self.d_choices();
        let j_choices: Vec<_> = self
            .j_choices()
            .filter(|(j, kept, _)| *kept <= length && sequence[length - kept..] == **j)
            .collect();

        let mut total = 0.0;
        for (v, v_kept, p_v) in self.v_choices() {
            if v_kept > length || sequence[..v_kept] != *v {
                continue;
            }
            for &(_, j_kept, p_j) in &j_choices {
                if v_kept + j_kept > length {
                    continue;
                }
                let middle = &sequence[v_kept..length - j_kept];
                if !self.params.has_d_gene() {
                    total += p_v * p_j * self.vd_insertion(middle.len()) * self.insertion_probability(middle);
                    continue;
                }
                for &(d, p_d) in &d_choices {
                    if d.len() > middle.len() {
                        continue;
                    }
                    for first in 0..=middle.len() - d.len() {
                        if middle[first..first + d.len()] != *d {
                            continue;
                        }
                        let second = middle.len() - d.len() - first;
                        let p_ins = self.vd_insertion(first) * self.dj_insertion(second);
                        if p_ins == 0.0 {
                            continue;
                        }
                        total += p_v
                            * p_j
                            * p_d
                            * p_ins
                            * self.insertion_probability(&middle[..first])
                            * self.insertion_probability(&middle[first + d.len()..]);
                    }
                }
            }
        }
        total
    }

    /// Probability that the nucleotides of one codon encode `aa`.
    fn codon_factor(&self, aa: u8, template: &[Option<u8>]) -> f64 {
        let Some(codons) = self.aa_codons.get(usize::from(aa)) else {
            return 0.0;
        };
        codons
            .iter()
            .map(|codon| {
                codon
                    .iter()
                    .zip(template)
                    .map(|(&base, fixed)| match fixed {
                        Some(f) => f64::from(u8::from(*f == base)),
                        None => nucleotide_index(base).map_or(0.0, |i| self.params.insertion_nucleotides[i]),
                    })
                    .product::<f64>()
            })
            .sum()
    }

    fn template_probability(&self, aa: &[u8], template: &[Option<u8>], codons: std::ops::Range<usize>) -> f64 {
        let mut p = 1.0;
        for i in codons {
            p *= self.codon_factor(aa[i], &template[3 * i..3 * i + 3]);
            if p == 0.0 {
                break;
            }
        }
        p
    }

    fn p_gen_amino_acid(&self, aa: &[u8]) -> f64 {
        let codon_count = aa.len();
        let length = 3 * codon_count;
        if codon_count == 0 {
            return 0.0;
        }
        let mut template: Vec<Option<u8>> = vec![None; length];

        let mut v_choices = Vec::new();
        for (v, kept, p) in self.v_choices() {
            if kept > length {
                continue;
            }
            template[..kept].iter_mut().zip(v).for_each(|(t, b)| *t = Some(*b));
            if self.template_probability(aa, &template, 0..kept.div_ceil(3)) > 0.0 {
                v_choices.push((v, kept, p));
            }
            template[..kept].fill(None);
        }

        let mut j_choices = Vec::new();
        for (j, kept, p) in self.j_choices() {
            if kept > length {
                continue;
            }
            template[length - kept..].iter_mut().zip(j).for_each(|(t, b)| *t = Some(*b));
            if self.template_probability(aa, &template, (length - kept) / 3..codon_count) > 0.0 {
                j_choices.push((j, kept, p));
            }
            template[length - kept..].fill(None);
        }

        let d_choices = self.d_choices();
        let mut total = 0.0;
        for &(v, v_kept, p_v) in &v_choices {
            for &(j, j_kept, p_j) in &j_choices {
                if v_kept + j_kept > length {
                    continue;
                }
                template.fill(None);
                template[..v_kept].iter_mut().zip(v).for_each(|(t, b)| *t = Some(*b));
                template[length - j_kept..].iter_mut().zip(j).for_each(|(t, b)| *t = Some(*b));
                let middle = length - v_kept - j_kept;

                if !self.params.has_d_gene() {
                    let p_ins = self.vd_insertion(middle);
                    if p_ins > 0.0 {
                        total += p_v * p_j * p_ins * self.template_probability(aa, &template, 0..codon_count);
                    }
                    continue;
                }

                for &(d, p_d) in &d_choices {
                    if d.len() > middle {
                        continue;
                    }
                    for first in 0..=middle - d.len() {
                        let p_ins = self.vd_insertion(first) * self.dj_insertion(middle - d.len() - first);
                        if p_ins == 0.0 {
                            continue;
                        }
                        let start = v_kept + first;
                        template[start..start + d.len()]
                            .iter_mut()
                            .zip(d)
                            .for_each(|(t, b)| *t = Some(*b));
                        total += p_v * p_j * p_d * p_ins * self.template_probability(aa, &template, 0..codon_count);
                        template[start..start + d.len()].fill(None);
                    }
                }
            }
        }
        total
    }
}

fn frame_type_of(junction: &str) -> FrameType {
    match translate(junction) {
        None => FrameType::OutOfFrame,
        Some(aa) if aa.contains('*') => FrameType::Stop,
        Some(_) => FrameType::InFrame,
    }
}

impl GenerativeModel for RecombinationModel {
    fn name(&self) -> &str {
        &self.params.name
    }

    fn identity(&self) -> ModelIdentity {
        ModelIdentity {
            kind: "Recombination",
            source: self.source.clone(),
            chain: Some(self.params.chain),
            detail: format!("productive_only={}", self.productive_only),
        }
    }

    fn chain(&self) -> Option<Chain> {
        Some(self.params.chain)
    }

    fn region_type(&self) -> RegionType {
        RegionType::ImgtJunction
    }

    fn generate_sequences(
        &self,
        count: usize,
        seed: u64,
        sequence_type: SequenceType,
        compute_p_gen: bool,
    ) -> Result<Vec<ReceptorSequence>, GenerationError> {
        self.generate_with(
            &self.samplers.v_gene,
            &self.samplers.j_gene,
            count,
            seed,
            sequence_type,
            compute_p_gen,
        )
    }

    fn can_compute_p_gens(&self) -> bool {
        true
    }

    fn compute_p_gen(
        &self,
        sequence: &ReceptorSequence,
        sequence_type: SequenceType,
    ) -> Result<f64, GenerationError> {
        let text = sequence.get_sequence(sequence_type).as_bytes();
        Ok(match sequence_type {
            SequenceType::Nucleotide => self.p_gen_nucleotide(text),
            SequenceType::AminoAcid => self.p_gen_amino_acid(text),
        })
    }

    fn can_generate_from_skewed_gene_models(&self) -> bool {
        true
    }

    fn generate_from_skewed_gene_models(
        &self,
        v_genes: &[String],
        j_genes: &[String],
        seed: u64,
        batch_size: usize,
        sequence_type: SequenceType,
        compute_p_gen: bool,
    ) -> Result<Vec<ReceptorSequence>, GenerationError> {
        let v_sampler = self.restricted_genes(&self.params.v_genes, v_genes, "V")?;
        let j_sampler = self.restricted_genes(&self.params.j_genes, j_genes, "J")?;
        self.generate_with(&v_sampler, &j_sampler, batch_size, seed, sequence_type, compute_p_gen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_vj_model() -> RecombinationModel {
        let params = RecombinationParameters {
            name: "tiny".into(),
            chain: Chain::Alpha,
            v_genes: vec![GeneSegment {
                name: "TRAV1*01".into(),
                sequence: "TGT".into(),
                usage: 1.0,
            }],
            d_genes: vec![],
            j_genes: vec![GeneSegment {
                name: "TRAJ1*01".into(),
                sequence: "TTT".into(),
                usage: 1.0,
            }],
            v_deletions: vec![1.0],
            d5_deletions: vec![],
            d3_deletions: vec![],
            j_deletions: vec![1.0],
            vd_insertions: vec![0.5, 0.0, 0.0, 0.5],
            dj_insertions: vec![],
            insertion_nucleotides: [0.25; 4],
        };
        RecombinationModel::new(params, "tiny", false).unwrap()
    }

    fn aa(sequence: &str) -> ReceptorSequence {
        ReceptorSequence::from_aa("x", sequence)
    }

    fn nt(sequence: &str) -> ReceptorSequence {
        let mut seq = ReceptorSequence::from_aa("x", "");
        seq.sequence = sequence.into();
        seq
    }

    #[test]
    fn test_builtin_models_load() {
        let trb = RecombinationModel::builtin("humanTRB", true).unwrap();
        assert_eq!(trb.chain(), Some(Chain::Beta));
        assert!(trb.parameters().has_d_gene());
        let tra = RecombinationModel::builtin("humanTRA", true).unwrap();
        assert!(!tra.parameters().has_d_gene());
        assert!(RecombinationModel::builtin("mouseTRB", true).is_err());
    }

    #[test]
    fn test_exact_p_gen_on_small_model() {
        let model = tiny_vj_model();
        let p = |s: ReceptorSequence, t| model.compute_p_gen(&s, t).unwrap();

        assert!((p(nt("TGTTTT"), SequenceType::Nucleotide) - 0.5).abs() < 1e-12);
        assert!((p(nt("TGTAAATTT"), SequenceType::Nucleotide) - 0.5 / 64.0).abs() < 1e-12);
        assert_eq!(p(nt("TGTAATTT"), SequenceType::Nucleotide), 0.0);

        assert!((p(aa("CF"), SequenceType::AminoAcid) - 0.5).abs() < 1e-12);
        assert!((p(aa("CKF"), SequenceType::AminoAcid) - 0.5 * 2.0 / 64.0).abs() < 1e-12);
        assert_eq!(p(aa("WF"), SequenceType::AminoAcid), 0.0);
    }

    #[test]
    fn test_generation_is_deterministic_and_productive() {
        let model = RecombinationModel::builtin("humanTRB", true).unwrap();
        let a = model.generate_sequences(50, 7, SequenceType::AminoAcid, false).unwrap();
        let b = model.generate_sequences(50, 7, SequenceType::AminoAcid, false).unwrap();
        assert_eq!(a, b);

        for seq in &a {
            assert_eq!(seq.metadata.frame_type, FrameType::InFrame);
            assert!(seq.sequence_aa.starts_with('C'));
            assert!(seq.sequence_aa.ends_with('F'));
            assert!(!seq.sequence_aa.contains('*'));
            assert_eq!(seq.sequence.len(), 3 * seq.sequence_aa.len());
            assert_eq!(seq.metadata.region_type, RegionType::ImgtJunction);
            assert!(seq.metadata.v_call.starts_with("TRBV"));
        }

        let c = model.generate_sequences(50, 8, SequenceType::AminoAcid, false).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_generated_sequences_have_positive_p_gen() {
        let model = RecombinationModel::builtin("humanTRB", true).unwrap();
        let sequences = model.generate_sequences(10, 1, SequenceType::AminoAcid, true).unwrap();
        for seq in &sequences {
            let p_aa = seq.metadata.p_gen.unwrap();
            let p_nt = model.compute_p_gen(seq, SequenceType::Nucleotide).unwrap();
            assert!(p_nt > 0.0);
            assert!(p_aa >= p_nt);
        }
    }

    #[test]
    fn test_skewed_generation() {
        let model = RecombinationModel::builtin("humanTRB", true).unwrap();
        let sequences = model
            .generate_from_skewed_gene_models(&["TRBV20".into()], &[], 3, 30, SequenceType::AminoAcid, true)
            .unwrap();
        assert_eq!(sequences.len(), 30);
        for seq in &sequences {
            assert!(seq.metadata.v_call.starts_with("TRBV20"));
            let unskewed = model.compute_p_gen(seq, SequenceType::AminoAcid).unwrap();
            assert_eq!(seq.metadata.p_gen, Some(unskewed));
        }

        let err = model
            .generate_from_skewed_gene_models(&["TRBV99".into()], &[], 3, 30, SequenceType::AminoAcid, false)
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidModel(_)));
    }

    #[test]
    fn test_factory_respects_chain() {
        let params: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(r#"{"chain": "TRA"}"#).unwrap();
        let model = RecombinationModel::from_params(&params).unwrap();
        assert_eq!(model.name(), "humanTRA");

        let params: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(r#"{"default_model_name": "humanTRB", "chain": "TRA"}"#).unwrap();
        let model = RecombinationModel::from_params(&params).unwrap();
        assert_eq!(model.chain(), Some(Chain::Beta));

        let params: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(r#"{"chain": "IGH"}"#).unwrap();
        assert!(RecombinationModel::from_params(&params).is_err());
    }

    #[test]
    fn test_invalid_parameters() {
        let mut params = RecombinationParameters::builtin("humanTRA").unwrap();
        params.v_deletions = vec![0.1; 40];
        assert!(matches!(params.validate(), Err(GenerationError::InvalidModel(_))));

        let mut params = RecombinationParameters::builtin("humanTRA").unwrap();
        params.insertion_nucleotides = [0.0; 4];
        assert!(params.validate().is_err());
    }
}
