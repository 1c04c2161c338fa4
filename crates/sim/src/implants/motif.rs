//! Seed motifs and their concrete instances.
//!
//! A seed such as `C/AS` describes a two-part motif: the parts are separated
//! by a gap whose length is drawn from `[min_gap, max_gap]`. A Hamming
//! distance distribution controls how many seed letters are substituted.
//! Position indices refer to the seed string itself, so the gap marker
//! occupies an index but is never substituted.

use crate::base::SequenceType;
use crate::errors::MotifError;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Gap marker inside seeds and gapped instances.
pub const GAP_MARKER: char = '/';

/// A concrete realization of a motif.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotifInstance {
    /// Instance letters; gapped instances keep the `/` separator.
    pub instance: String,
    /// Realized gap length.
    pub gap: usize,
}

impl MotifInstance {
    pub fn new(instance: impl Into<String>, gap: usize) -> Self {
        Self {
            instance: instance.into(),
            gap,
        }
    }

    /// Left and optional right part of the instance.
    pub fn parts(&self) -> (&str, Option<&str>) {
        match self.instance.split_once(GAP_MARKER) {
            Some((left, right)) => (left, Some(right)),
            None => (self.instance.as_str(), None),
        }
    }

    /// Number of motif letters, gap excluded.
    pub fn letter_count(&self) -> usize {
        self.instance.chars().filter(|&c| c != GAP_MARKER).count()
    }

    /// Length occupied in a sequence, gap included.
    pub fn span(&self) -> usize {
        self.letter_count() + self.gap
    }

    pub fn is_gapped(&self) -> bool {
        self.instance.contains(GAP_MARKER)
    }
}

impl fmt::Display for MotifInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (gap {})", self.instance, self.gap)
    }
}

/// A motif defined by a seed and its allowed variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedMotif {
    pub identifier: String,
    pub seed: String,
    #[serde(default)]
    pub min_gap: usize,
    #[serde(default)]
    pub max_gap: usize,
    /// Distance -> probability. Unset means the seed is used verbatim.
    #[serde(default)]
    pub hamming_distance_probabilities: Option<BTreeMap<usize, f64>>,
    /// Seed index -> relative selection weight. Unset means uniform.
    #[serde(default)]
    pub position_weights: Option<BTreeMap<usize, f64>>,
    /// Letter -> substitution weight. Unset means uniform over the alphabet.
    #[serde(default)]
    pub alphabet_weights: Option<BTreeMap<char, f64>>,
    /// Never draw the seed letter when substituting a position.
    #[serde(default)]
    pub exclude_original: bool,
}

impl SeedMotif {
    /// Ungapped motif without variation.
    pub fn new(identifier: impl Into<String>, seed: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            seed: seed.into(),
            min_gap: 0,
            max_gap: 0,
            hamming_distance_probabilities: None,
            position_weights: None,
            alphabet_weights: None,
            exclude_original: false,
        }
    }

    pub fn with_gap(mut self, min_gap: usize, max_gap: usize) -> Self {
        self.min_gap = min_gap;
        self.max_gap = max_gap;
        self
    }

    pub fn with_hamming_distances(mut self, probabilities: BTreeMap<usize, f64>) -> Self {
        self.hamming_distance_probabilities = Some(probabilities);
        self
    }

    pub fn with_position_weights(mut self, weights: BTreeMap<usize, f64>) -> Self {
        self.position_weights = Some(weights);
        self
    }

    pub fn with_alphabet_weights(mut self, weights: BTreeMap<char, f64>) -> Self {
        self.alphabet_weights = Some(weights);
        self
    }

    pub fn excluding_original(mut self) -> Self {
        self.exclude_original = true;
        self
    }

    pub fn is_gapped(&self) -> bool {
        self.seed.contains(GAP_MARKER)
    }

    fn error_seed(&self, reason: impl Into<String>) -> MotifError {
        MotifError::InvalidSeed {
            motif: self.identifier.clone(),
            reason: reason.into(),
        }
    }

    fn error_distribution(&self, reason: impl Into<String>) -> MotifError {
        MotifError::InvalidDistribution {
            motif: self.identifier.clone(),
            reason: reason.into(),
        }
    }

    /// Check the seed and its distributions against `sequence_type`.
    pub fn validate(&self, sequence_type: SequenceType) -> Result<(), MotifError> {
        let alphabet = sequence_type.alphabet();

        if self.seed.is_empty() {
            return Err(self.error_seed("seed is empty"));
        }
        let gap_markers = self.seed.matches(GAP_MARKER).count();
        if gap_markers > 1 {
            return Err(self.error_seed("at most one gap marker is allowed"));
        }
        if gap_markers == 1 {
            let (left, right) = self.seed.split_once(GAP_MARKER).unwrap_or_default();
            if left.is_empty() || right.is_empty() {
                return Err(self.error_seed("both sides of the gap must contain letters"));
            }
        }
        if let Some(c) = self
            .seed
            .bytes()
            .find(|b| *b != GAP_MARKER as u8 && !alphabet.contains(b))
        {
            return Err(self.error_seed(format!(
                "letter '{}' is not part of the {sequence_type} alphabet",
                c as char
            )));
        }

        if self.min_gap > self.max_gap || (gap_markers == 0 && self.max_gap > 0) {
            return Err(MotifError::InvalidGap {
                motif: self.identifier.clone(),
                min_gap: self.min_gap,
                max_gap: self.max_gap,
            });
        }

        if let Some(probabilities) = &self.hamming_distance_probabilities {
            if probabilities.values().any(|p| !(0.0..=1.0).contains(p)) {
                return Err(self.error_distribution("Hamming distance probabilities must lie in [0, 1]"));
            }
            let total: f64 = probabilities.values().sum();
            if !(0.99..=1.0 + 1e-9).contains(&total) {
                return Err(self.error_distribution(format!(
                    "Hamming distance probabilities sum to {total}, expected 1"
                )));
            }
            let letters = self.seed.len() - gap_markers;
            if let Some((distance, _)) = probabilities.iter().find(|(d, p)| **d > letters && **p > 0.0) {
                return Err(self.error_distribution(format!(
                    "Hamming distance {distance} exceeds the {letters} seed letters"
                )));
            }
        }

        if let Some(weights) = &self.position_weights {
            if let Some((index, _)) = weights.iter().find(|(i, w)| **i >= self.seed.len() || **w < 0.0) {
                return Err(self.error_distribution(format!(
                    "position weight for index {index} is out of range or negative"
                )));
            }
        }

        if let Some(weights) = &self.alphabet_weights {
            if let Some((letter, _)) = weights
                .iter()
                .find(|(c, w)| !c.is_ascii() || !alphabet.contains(&(**c as u8)) || **w < 0.0)
            {
                return Err(self.error_distribution(format!(
                    "alphabet weight for '{letter}' is invalid for {sequence_type}"
                )));
            }
            if weights.values().all(|w| *w == 0.0) {
                return Err(self.error_distribution("alphabet weights are all zero"));
            }
        }

        Ok(())
    }

    /// Seed indices eligible for substitution with their weights.
    fn eligible_positions(&self) -> Vec<(usize, f64)> {
        self.seed
            .char_indices()
            .filter(|(_, c)| *c != GAP_MARKER)
            .map(|(i, _)| {
                let weight = match &self.position_weights {
                    Some(weights) => weights.get(&i).copied().unwrap_or(0.0),
                    None => 1.0,
                };
                (i, weight)
            })
            .filter(|(_, w)| *w > 0.0)
            .collect()
    }

    /// Substitution letters with weights, in alphabet order.
    fn letter_weights(&self, alphabet: &[u8]) -> Vec<(u8, f64)> {
        alphabet
            .iter()
            .map(|&letter| {
                let weight = match &self.alphabet_weights {
                    Some(weights) => weights.get(&(letter as char)).copied().unwrap_or(0.0),
                    None => 1.0,
                };
                (letter, weight)
            })
            .collect()
    }

    fn sample_distance<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let Some(probabilities) = &self.hamming_distance_probabilities else {
            return 0;
        };
        let (distances, weights): (Vec<usize>, Vec<f64>) =
            probabilities.iter().map(|(d, p)| (*d, *p)).unzip();
        match WeightedIndex::new(&weights) {
            Ok(dist) => distances[dist.sample(rng)],
            Err(_) => 0,
        }
    }

    /// Draw a concrete instance of the motif.
    ///
    /// When fewer positions are eligible than the drawn distance, every
    /// eligible position is substituted.
    pub fn instantiate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        sequence_type: SequenceType,
    ) -> MotifInstance {
        let mut letters: Vec<u8> = self.seed.bytes().collect();
        let distance = self.sample_distance(rng);

        if distance > 0 {
            let mut eligible = self.eligible_positions();
            let letter_weights = self.letter_weights(sequence_type.alphabet());

            for _ in 0..distance.min(eligible.len()) {
                let Ok(pick) = WeightedIndex::new(eligible.iter().map(|(_, w)| *w)) else {
                    break;
                };
                let (index, _) = eligible.swap_remove(pick.sample(rng));

                let original = letters[index];
                let candidates: Vec<(u8, f64)> = letter_weights
                    .iter()
                    .map(|&(l, w)| if self.exclude_original && l == original { (l, 0.0) } else { (l, w) })
                    .collect();
                if let Ok(dist) = WeightedIndex::new(candidates.iter().map(|(_, w)| *w)) {
                    letters[index] = candidates[dist.sample(rng)].0;
                }
            }
        }

        let gap = if self.is_gapped() {
            rng.random_range(self.min_gap..=self.max_gap)
        } else {
            0
        };

        MotifInstance {
            instance: String::from_utf8_lossy(&letters).into_owned(),
            gap,
        }
    }

    /// Every legal instance as a detection pattern.
    ///
    /// Substituted positions become a character class of the letters with
    /// positive weight (`[FT]`) and the gap becomes `.{min,max}`. Patterns
    /// are ordered by distance, then by substituted position combination.
    /// The number of patterns grows combinatorially with the seed length.
    pub fn enumerate_all(&self, sequence_type: SequenceType) -> Vec<String> {
        let distances: Vec<usize> = match &self.hamming_distance_probabilities {
            Some(probabilities) => probabilities
                .iter()
                .filter(|(_, p)| **p > 0.0)
                .map(|(d, _)| *d)
                .collect(),
            None => vec![0],
        };
        let eligible: Vec<usize> = self.eligible_positions().into_iter().map(|(i, _)| i).collect();
        let class: String = {
            let letters: String = self
                .letter_weights(sequence_type.alphabet())
                .into_iter()
                .filter(|(_, w)| *w > 0.0)
                .map(|(l, _)| l as char)
                .collect();
            format!("[{letters}]")
        };
        let gap = format!(".{{{},{}}}", self.min_gap, self.max_gap);

        let mut patterns = Vec::new();
        for distance in distances {
            if distance > eligible.len() {
                continue;
            }
            for combination in combinations(&eligible, distance) {
                let pattern: String = self
                    .seed
                    .char_indices()
                    .map(|(i, c)| {
                        if c == GAP_MARKER {
                            gap.clone()
                        } else if combination.contains(&i) {
                            class.clone()
                        } else {
                            c.to_string()
                        }
                    })
                    .collect();
                patterns.push(pattern);
            }
        }
        patterns
    }
}

/// All `k`-element combinations of `items` in lexicographic order.
fn combinations(items: &[usize], k: usize) -> Vec<Vec<usize>> {
    let mut result = Vec::new();
    let mut current = Vec::with_capacity(k);
    fn recurse(items: &[usize], k: usize, start: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if current.len() == k {
            out.push(current.clone());
            return;
        }
        for i in start..items.len() {
            current.push(items[i]);
            recurse(items, k, i + 1, current, out);
            current.pop();
        }
    }
    recurse(items, k, 0, &mut current, &mut result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn ft_weights() -> BTreeMap<char, f64> {
        let mut weights: BTreeMap<char, f64> = "ACDEGHIKLMNPQRSVWY".chars().map(|c| (c, 0.0)).collect();
        weights.insert('T', 0.5);
        weights.insert('F', 0.5);
        weights
    }

    fn distances(pairs: &[(usize, f64)]) -> BTreeMap<usize, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_instantiate_gapped() {
        let motif = SeedMotif::new("m1", "C/AS")
            .with_gap(1, 2)
            .with_hamming_distances(distances(&[(0, 0.333), (1, 0.333), (2, 0.334)]))
            .with_position_weights([(0, 1.0), (1, 1.0), (2, 0.0), (3, 0.0)].into_iter().collect())
            .with_alphabet_weights(ft_weights());
        motif.validate(SequenceType::AminoAcid).unwrap();

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        for _ in 0..50 {
            let instance = motif.instantiate(&mut rng, SequenceType::AminoAcid);
            assert!(instance.instance.ends_with("/AS"));
            assert_eq!(instance.instance.len(), 4);
            assert!((1..=2).contains(&instance.gap));
            assert!(matches!(instance.instance.as_bytes()[0], b'C' | b'T' | b'F'));
            assert_eq!(instance.parts(), (&instance.instance[..1], Some("AS")));
        }
    }

    #[test]
    fn test_instantiate_ungapped() {
        let motif = SeedMotif::new("m1", "CAS")
            .with_hamming_distances(distances(&[(0, 0.5), (1, 0.5)]))
            .with_position_weights([(0, 1.0), (1, 0.0), (2, 0.0)].into_iter().collect())
            .with_alphabet_weights(ft_weights());
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        for _ in 0..50 {
            let instance = motif.instantiate(&mut rng, SequenceType::AminoAcid);
            assert_eq!(&instance.instance[1..], "AS");
            assert_eq!(instance.gap, 0);
            assert!(!instance.is_gapped());
        }
    }

    #[test]
    fn test_instantiate_distance_matches_distribution() {
        let motif = SeedMotif::new("m1", "CASSL")
            .with_hamming_distances(distances(&[(2, 1.0)]))
            .excluding_original();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        for _ in 0..100 {
            let instance = motif.instantiate(&mut rng, SequenceType::AminoAcid);
            let differences = instance
                .instance
                .bytes()
                .zip(motif.seed.bytes())
                .filter(|(a, b)| a != b)
                .count();
            assert_eq!(differences, 2);
        }
    }

    #[test]
    fn test_instantiate_defaults() {
        let motif = SeedMotif::new("m1", "CAS").with_hamming_distances(distances(&[(0, 0.333), (1, 0.333), (2, 0.334)]));
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let instance = motif.instantiate(&mut rng, SequenceType::AminoAcid);
        assert_eq!(instance.instance.len(), 3);

        let plain = SeedMotif::new("m2", "AA");
        assert_eq!(plain.instantiate(&mut rng, SequenceType::AminoAcid), MotifInstance::new("AA", 0));
    }

    #[test]
    fn test_enumerate_all() {
        let mut motif = SeedMotif::new("m1", "SQ")
            .with_gap(0, 0)
            .with_hamming_distances(distances(&[(0, 0.0), (1, 0.667), (2, 0.333)]))
            .with_position_weights([(0, 1.0), (1, 1.0)].into_iter().collect())
            .with_alphabet_weights(ft_weights());
        assert_eq!(motif.enumerate_all(SequenceType::AminoAcid), ["[FT]Q", "S[FT]", "[FT][FT]"]);

        motif.seed = "S/Q".into();
        motif.max_gap = 1;
        motif.position_weights = Some([(0, 1.0), (1, 1.0), (2, 1.0)].into_iter().collect());
        assert_eq!(
            motif.enumerate_all(SequenceType::AminoAcid),
            ["[FT].{0,1}Q", "S.{0,1}[FT]", "[FT].{0,1}[FT]"]
        );
    }

    #[test]
    fn test_enumerate_plain_seed() {
        let motif = SeedMotif::new("m1", "AA");
        assert_eq!(motif.enumerate_all(SequenceType::AminoAcid), ["AA"]);
    }

    #[test]
    fn test_validate_rejects_bad_definitions() {
        let aa = SequenceType::AminoAcid;
        assert!(SeedMotif::new("m", "").validate(aa).is_err());
        assert!(SeedMotif::new("m", "A/C/D").validate(aa).is_err());
        assert!(SeedMotif::new("m", "/AC").validate(aa).is_err());
        assert!(SeedMotif::new("m", "AZ").validate(aa).is_err());
        assert!(SeedMotif::new("m", "ACGT").validate(SequenceType::Nucleotide).is_ok());
        assert!(matches!(
            SeedMotif::new("m", "A/C").with_gap(3, 1).validate(aa),
            Err(MotifError::InvalidGap { .. })
        ));
        assert!(SeedMotif::new("m", "AC").with_gap(0, 2).validate(aa).is_err());
        assert!(SeedMotif::new("m", "AC")
            .with_hamming_distances(distances(&[(0, 0.5), (1, 0.2)]))
            .validate(aa)
            .is_err());
        assert!(SeedMotif::new("m", "AC")
            .with_hamming_distances(distances(&[(3, 1.0)]))
            .validate(aa)
            .is_err());
    }

    #[test]
    fn test_instance_span() {
        let instance = MotifInstance::new("CA/SS", 2);
        assert_eq!(instance.letter_count(), 4);
        assert_eq!(instance.span(), 6);
        assert_eq!(instance.parts(), ("CA", Some("SS")));
    }
}
