//! Generation probability bins used to keep the background p_gen
//! distribution when sequences are selected for signals.

use std::collections::BTreeMap;

/// Equal-width bins over log10 p_gen, with the share of a reference batch
/// falling into each bin.
#[derive(Debug, Clone, PartialEq)]
pub struct PgenBins {
    low: f64,
    width: f64,
    probabilities: Vec<f64>,
}

impl PgenBins {
    /// Build bins from reference p_gens. Returns `None` when there are no
    /// positive p_gens or no bins requested.
    pub fn from_reference(p_gens: &[f64], bin_count: usize) -> Option<Self> {
        if bin_count == 0 {
            return None;
        }
        let logs: Vec<f64> = p_gens.iter().filter(|p| **p > 0.0).map(|p| p.log10()).collect();
        let mut low = logs.iter().copied().fold(f64::INFINITY, f64::min);
        let mut high = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !low.is_finite() || !high.is_finite() {
            return None;
        }
        if high - low < f64::EPSILON {
            low -= 0.5;
            high += 0.5;
        }

        let mut bins = Self {
            low,
            width: (high - low) / bin_count as f64,
            probabilities: vec![0.0; bin_count],
        };
        for p in p_gens {
            let bin = bins.bin_of(*p);
            bins.probabilities[bin] += 1.0;
        }
        let total = p_gens.len() as f64;
        bins.probabilities.iter_mut().for_each(|p| *p /= total);
        Some(bins)
    }

    pub fn bin_count(&self) -> usize {
        self.probabilities.len()
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// Lower edges of every bin in log10 space, plus the upper edge.
    pub fn edges(&self) -> Vec<f64> {
        (0..=self.bin_count())
            .map(|i| self.low + self.width * i as f64)
            .collect()
    }

    /// Bin of a p_gen; values outside the reference range go to the edge
    /// bins and a zero p_gen to the lowest one.
    pub fn bin_of(&self, p_gen: f64) -> usize {
        if p_gen <= 0.0 || !p_gen.is_finite() {
            return 0;
        }
        let index = ((p_gen.log10() - self.low) / self.width).floor();
        if index < 0.0 {
            0
        } else {
            (index as usize).min(self.bin_count() - 1)
        }
    }

    /// Per-bin quotas for `target` sequences.
    pub fn quotas(&self, target: usize) -> Vec<usize> {
        self.probabilities
            .iter()
            .map(|p| (target as f64 * p).ceil() as usize)
            .collect()
    }
}

/// Remaining per-bin quotas for every signal key.
#[derive(Debug, Clone)]
pub struct PgenQuotas {
    bins: PgenBins,
    quotas: BTreeMap<String, Vec<usize>>,
}

impl PgenQuotas {
    pub fn new(bins: PgenBins, targets: &BTreeMap<String, usize>) -> Self {
        let quotas = targets
            .iter()
            .map(|(key, target)| (key.clone(), bins.quotas(*target)))
            .collect();
        Self { bins, quotas }
    }

    pub fn bins(&self) -> &PgenBins {
        &self.bins
    }

    /// Use one slot of the key's bin for `p_gen`; false if the bin is full.
    pub fn try_take(&mut self, key: &str, p_gen: Option<f64>) -> bool {
        let bin = self.bins.bin_of(p_gen.unwrap_or(0.0));
        match self.quotas.get_mut(key).and_then(|q| q.get_mut(bin)) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}
