//! IMGT-style position labels and position weights.
//!
//! CDR3 positions are numbered 105..=117. Sequences longer than 13 get
//! insertion labels around the centre of the loop (`111.1, 111.2, ...` on the
//! left and `..., 112.2, 112.1` on the right) so that the anchors keep their
//! numbers regardless of length. Junctions add the conserved 104 and 118.

use crate::base::RegionType;
use crate::errors::PositionError;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const CDR3_START: u16 = 105;
const CDR3_END: u16 = 117;
const CDR3_WINDOW: usize = 13;
const LEFT_INSERTION_ANCHOR: u16 = 111;
const RIGHT_INSERTION_ANCHOR: u16 = 112;

/// A canonical position label such as `111` or `112.2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImgtPosition {
    base: u16,
    insertion: u16,
}

impl ImgtPosition {
    pub const fn new(base: u16) -> Self {
        Self { base, insertion: 0 }
    }

    pub const fn with_insertion(base: u16, insertion: u16) -> Self {
        Self { base, insertion }
    }

    pub const fn base(self) -> u16 {
        self.base
    }

    pub const fn insertion(self) -> u16 {
        self.insertion
    }

    // Right-hand insertions count down towards 112.
    fn sort_key(self) -> (u16, u32) {
        let secondary = if self.base == RIGHT_INSERTION_ANCHOR {
            if self.insertion == 0 {
                u32::MAX
            } else {
                u32::MAX - 1 - u32::from(self.insertion)
            }
        } else {
            u32::from(self.insertion)
        };
        (self.base, secondary)
    }
}

impl Ord for ImgtPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for ImgtPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ImgtPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.insertion == 0 {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{}.{}", self.base, self.insertion)
        }
    }
}

impl FromStr for ImgtPosition {
    type Err = PositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PositionError::InvalidLabel(s.to_string());
        let trimmed = s.trim();
        match trimmed.split_once('.') {
            None => trimmed.parse().map(Self::new).map_err(|_| invalid()),
            Some((base, insertion)) => {
                let base = base.parse().map_err(|_| invalid())?;
                let insertion = insertion.parse().map_err(|_| invalid())?;
                Ok(Self::with_insertion(base, insertion))
            }
        }
    }
}

impl TryFrom<String> for ImgtPosition {
    type Error = PositionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ImgtPosition> for String {
    fn from(value: ImgtPosition) -> Self {
        value.to_string()
    }
}

/// User supplied position weights keyed by label.
pub type UserPositionWeights = BTreeMap<ImgtPosition, f64>;

/// Position weights in sequence order.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionWeights {
    entries: Vec<(ImgtPosition, f64)>,
}

impl PositionWeights {
    pub fn positions(&self) -> impl Iterator<Item = ImgtPosition> + '_ {
        self.entries.iter().map(|(p, _)| *p)
    }

    pub fn weights(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|(_, w)| *w)
    }

    pub fn get(&self, index: usize) -> Option<(ImgtPosition, f64)> {
        self.entries.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.weights().sum()
    }

    /// True when every position was excluded.
    pub fn is_empty_mass(&self) -> bool {
        self.total() <= 0.0
    }

    /// Sample a sequence index according to the weights.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        if self.is_empty_mass() {
            return None;
        }
        let dist = WeightedIndex::new(self.weights()).ok()?;
        Some(dist.sample(rng))
    }
}

fn ceil_half(n: usize) -> usize {
    n.div_ceil(2)
}

fn cdr3_positions(length: usize) -> Result<Vec<ImgtPosition>, PositionError> {
    if length < 2 {
        return Err(PositionError::TooShort {
            length,
            region: RegionType::ImgtCdr3,
            minimum: 2,
        });
    }

    let window: Vec<ImgtPosition> = (CDR3_START..=CDR3_END).map(ImgtPosition::new).collect();
    let capped = length.min(CDR3_WINDOW);
    let mut positions: Vec<ImgtPosition> = window[..ceil_half(capped)]
        .iter()
        .chain(&window[window.len() - capped / 2..])
        .copied()
        .collect();

    if length > CDR3_WINDOW {
        let extra = length - CDR3_WINDOW;
        let left = (1..=extra / 2).map(|i| ImgtPosition::with_insertion(LEFT_INSERTION_ANCHOR, i as u16));
        let right = (1..=ceil_half(extra))
            .rev()
            .map(|i| ImgtPosition::with_insertion(RIGHT_INSERTION_ANCHOR, i as u16));
        let at = ceil_half(CDR3_WINDOW);
        positions.splice(at..at, left.chain(right));
    }

    Ok(positions)
}

/// Canonical position labels for a sequence of `length` letters.
///
/// # Errors
///
/// Fails for region types without numbering and for sequences that are too
/// short (CDR3 below 2, junction below 4).
pub fn positions_for_length(
    length: usize,
    region_type: RegionType,
) -> Result<Vec<ImgtPosition>, PositionError> {
    match region_type {
        RegionType::ImgtCdr3 => cdr3_positions(length),
        RegionType::ImgtJunction => {
            if length < 4 {
                return Err(PositionError::TooShort {
                    length,
                    region: region_type,
                    minimum: 4,
                });
            }
            let mut positions = Vec::with_capacity(length);
            positions.push(ImgtPosition::new(104));
            positions.extend(cdr3_positions(length - 2)?);
            positions.push(ImgtPosition::new(118));
            Ok(positions)
        }
        RegionType::FullSequence => Err(PositionError::UnsupportedRegionType(region_type)),
    }
}

fn is_close_to_one(value: f64) -> bool {
    (value - 1.0).abs() <= 1e-8 + 1e-5
}

/// Per-position probabilities for motif annotation.
///
/// Listed labels keep their weight; the remaining mass is spread evenly over
/// the unlisted labels, then everything is renormalized.
pub fn weights_for_annotation(
    length: usize,
    region_type: RegionType,
    user_weights: &UserPositionWeights,
) -> Result<PositionWeights, PositionError> {
    let positions = positions_for_length(length, region_type)?;

    if let Some((label, weight)) = user_weights.iter().find(|(_, w)| **w < 0.0 || !w.is_finite()) {
        return Err(PositionError::InvalidWeights(format!(
            "weight {weight} for position {label} is not a non-negative number"
        )));
    }

    let listed: Vec<Option<f64>> = positions.iter().map(|p| user_weights.get(p).copied()).collect();
    let listed_sum: f64 = listed.iter().flatten().sum();
    let unlisted = listed.iter().filter(|w| w.is_none()).count();

    let fill = if unlisted > 0 {
        let remaining = 1.0 - listed_sum;
        if remaining < -1e-9 {
            return Err(PositionError::InvalidWeights(format!(
                "listed weights sum to {listed_sum:.4}, leaving no mass for {unlisted} other positions"
            )));
        }
        remaining.max(0.0) / unlisted as f64
    } else {
        0.0
    };

    let mut entries: Vec<(ImgtPosition, f64)> = positions
        .into_iter()
        .zip(listed)
        .map(|(p, w)| (p, w.unwrap_or(fill)))
        .collect();

    let total: f64 = entries.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return Err(PositionError::InvalidWeights(format!(
            "all positions of a sequence of length {length} have zero weight"
        )));
    }
    if !is_close_to_one(total) {
        for (_, w) in &mut entries {
            *w /= total;
        }
    }

    Ok(PositionWeights { entries })
}

/// Boolean mask of positions where a motif may be annotated.
pub fn allowed_positions_for_annotation(
    length: usize,
    region_type: RegionType,
    user_weights: &UserPositionWeights,
) -> Result<Vec<bool>, PositionError> {
    Ok(weights_for_annotation(length, region_type, user_weights)?
        .weights()
        .map(|w| w > 0.0)
        .collect())
}

/// Per-position probabilities for implanting a motif of `motif_length`.
///
/// Positions from which the motif would run past the end get zero weight.
/// When nothing is left the zero weights are returned (and a warning logged);
/// the caller discards the sequence.
pub fn weights_for_implanting(
    length: usize,
    region_type: RegionType,
    user_weights: &UserPositionWeights,
    motif_length: usize,
) -> Result<PositionWeights, PositionError> {
    let mut weights = weights_for_annotation(length, region_type, user_weights)?;

    for (index, entry) in weights.entries.iter_mut().enumerate() {
        if index + motif_length > length {
            entry.1 = 0.0;
        }
    }

    let total = weights.total();
    if total <= 0.0 {
        log::warn!(
            "Sequence of length {length} has no allowed positions for a motif of length {motif_length}; it will be discarded"
        );
        return Ok(weights);
    }
    for (_, w) in &mut weights.entries {
        *w /= total;
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn labels(positions: &[ImgtPosition]) -> Vec<String> {
        positions.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_cdr3_positions_short() {
        let p = positions_for_length(5, RegionType::ImgtCdr3).unwrap();
        assert_eq!(labels(&p), ["105", "106", "107", "116", "117"]);

        let p = positions_for_length(2, RegionType::ImgtCdr3).unwrap();
        assert_eq!(labels(&p), ["105", "117"]);
    }

    #[test]
    fn test_cdr3_positions_with_insertions() {
        let p = positions_for_length(16, RegionType::ImgtCdr3).unwrap();
        assert_eq!(
            labels(&p),
            [
                "105", "106", "107", "108", "109", "110", "111", "111.1", "112.2", "112.1", "112",
                "113", "114", "115", "116", "117"
            ]
        );

        let p = positions_for_length(13, RegionType::ImgtCdr3).unwrap();
        assert_eq!(p.len(), 13);
        assert_eq!(p[6].to_string(), "111");
        assert_eq!(p[7].to_string(), "112");
    }

    #[test]
    fn test_junction_positions_length_seven() {
        let p = positions_for_length(7, RegionType::ImgtJunction).unwrap();
        assert_eq!(labels(&p), ["104", "105", "106", "107", "116", "117", "118"]);
        assert_eq!(p.iter().filter(|x| x.base() == 104).count(), 1);
        assert_eq!(p.iter().filter(|x| x.base() == 118).count(), 1);
    }

    #[test]
    fn test_positions_length_and_order_hold_for_all_lengths() {
        for region in [RegionType::ImgtCdr3, RegionType::ImgtJunction] {
            for length in 4..40 {
                let p = positions_for_length(length, region).unwrap();
                assert_eq!(p.len(), length);
                assert!(p.windows(2).all(|w| w[0] < w[1]), "{region} {length}: {p:?}");
            }
        }
    }

    #[test]
    fn test_positions_errors() {
        assert!(matches!(
            positions_for_length(1, RegionType::ImgtCdr3),
            Err(PositionError::TooShort { .. })
        ));
        assert!(matches!(
            positions_for_length(3, RegionType::ImgtJunction),
            Err(PositionError::TooShort { .. })
        ));
        assert!(matches!(
            positions_for_length(10, RegionType::FullSequence),
            Err(PositionError::UnsupportedRegionType(_))
        ));
    }

    #[test]
    fn test_label_parsing() {
        let p: ImgtPosition = "111.2".parse().unwrap();
        assert_eq!(p, ImgtPosition::with_insertion(111, 2));
        assert_eq!("104".parse::<ImgtPosition>().unwrap(), ImgtPosition::new(104));
        assert!("abc".parse::<ImgtPosition>().is_err());
        assert!(ImgtPosition::with_insertion(112, 2) < ImgtPosition::with_insertion(112, 1));
        assert!(ImgtPosition::with_insertion(112, 1) < ImgtPosition::new(112));
        assert!(ImgtPosition::new(111) < ImgtPosition::with_insertion(111, 1));
    }

    #[test]
    fn test_annotation_weights_sum_to_one() {
        let mut user = UserPositionWeights::new();
        user.insert(ImgtPosition::new(105), 0.5);
        for length in 4..30 {
            let w = weights_for_annotation(length, RegionType::ImgtJunction, &user).unwrap();
            assert!((w.total() - 1.0).abs() < 1e-9);
        }

        let w = weights_for_annotation(7, RegionType::ImgtJunction, &user).unwrap();
        assert!((w.get(1).unwrap().1 - 0.5).abs() < 1e-12);
        assert!((w.get(0).unwrap().1 - 0.5 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_annotation_weights_renormalize_full_listing() {
        let user: UserPositionWeights = ["105", "106", "107", "116", "117"]
            .iter()
            .map(|l| (l.parse().unwrap(), 2.0))
            .collect();
        let w = weights_for_annotation(5, RegionType::ImgtCdr3, &user).unwrap();
        assert!(w.weights().all(|x| (x - 0.2).abs() < 1e-12));
    }

    #[test]
    fn test_annotation_weights_invalid() {
        let mut user = UserPositionWeights::new();
        user.insert(ImgtPosition::new(105), 1.5);
        assert!(matches!(
            weights_for_annotation(7, RegionType::ImgtJunction, &user),
            Err(PositionError::InvalidWeights(_))
        ));

        let mut negative = UserPositionWeights::new();
        negative.insert(ImgtPosition::new(105), -0.1);
        assert!(weights_for_annotation(7, RegionType::ImgtJunction, &negative).is_err());
    }

    #[test]
    fn test_allowed_positions() {
        let mut user = UserPositionWeights::new();
        user.insert(ImgtPosition::new(105), 1.0);
        let allowed = allowed_positions_for_annotation(7, RegionType::ImgtJunction, &user).unwrap();
        assert_eq!(allowed, [false, true, false, false, false, false, false]);
    }

    #[test]
    fn test_implanting_weights_zero_tail() {
        let w = weights_for_implanting(7, RegionType::ImgtJunction, &UserPositionWeights::new(), 2)
            .unwrap();
        let weights: Vec<f64> = w.weights().collect();
        assert_eq!(weights[6], 0.0);
        assert!(weights[..6].iter().all(|&x| (x - 1.0 / 6.0).abs() < 1e-12));

        let w = weights_for_implanting(7, RegionType::ImgtJunction, &UserPositionWeights::new(), 3)
            .unwrap();
        assert_eq!(w.weights().filter(|&x| x == 0.0).count(), 2);
    }

    #[test]
    fn test_implanting_weights_all_excluded() {
        let mut user = UserPositionWeights::new();
        user.insert(ImgtPosition::new(118), 1.0);
        let w = weights_for_implanting(7, RegionType::ImgtJunction, &user, 2).unwrap();
        assert!(w.is_empty_mass());

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        assert_eq!(w.sample(&mut rng), None);
    }

    #[test]
    fn test_sample_respects_weights() {
        let mut user = UserPositionWeights::new();
        user.insert(ImgtPosition::new(106), 1.0);
        let w = weights_for_implanting(8, RegionType::ImgtJunction, &user, 2).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        for _ in 0..20 {
            assert_eq!(w.sample(&mut rng), Some(2));
        }
    }
}
