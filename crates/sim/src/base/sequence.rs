//! Receptor sequences and their metadata.
//!
//! A [`ReceptorSequence`] is treated as a value: operations that change it
//! (implanting, annotation) take ownership or clone and return a new value.

use crate::base::SequenceType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Key used for sequences that carry no signal.
pub const NO_SIGNAL: &str = "no_signal";

/// Separator between signal ids in a composite signal key (`s1__s2`).
pub const SIGNAL_KEY_SEPARATOR: &str = "__";

/// Part of the receptor a sequence covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RegionType {
    #[serde(rename = "IMGT_CDR3")]
    ImgtCdr3,
    #[default]
    #[serde(rename = "IMGT_JUNCTION")]
    ImgtJunction,
    #[serde(rename = "FULL_SEQUENCE")]
    FullSequence,
}

impl fmt::Display for RegionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ImgtCdr3 => "IMGT_CDR3",
            Self::ImgtJunction => "IMGT_JUNCTION",
            Self::FullSequence => "FULL_SEQUENCE",
        };
        f.write_str(name)
    }
}

impl FromStr for RegionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IMGT_CDR3" | "CDR3" => Ok(Self::ImgtCdr3),
            "IMGT_JUNCTION" | "JUNCTION" => Ok(Self::ImgtJunction),
            "FULL_SEQUENCE" => Ok(Self::FullSequence),
            _ => Err(format!("unknown region type '{s}'")),
        }
    }
}

/// Receptor chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    #[serde(rename = "TRA", alias = "alpha", alias = "ALPHA")]
    Alpha,
    #[serde(rename = "TRB", alias = "beta", alias = "BETA")]
    Beta,
    #[serde(rename = "TRG", alias = "gamma")]
    Gamma,
    #[serde(rename = "TRD", alias = "delta")]
    Delta,
    #[serde(rename = "IGH", alias = "heavy")]
    Heavy,
    #[serde(rename = "IGK", alias = "kappa")]
    Kappa,
    #[serde(rename = "IGL", alias = "lambda")]
    Lambda,
}

impl Chain {
    /// Locus name as used in gene calls.
    pub const fn locus(self) -> &'static str {
        match self {
            Self::Alpha => "TRA",
            Self::Beta => "TRB",
            Self::Gamma => "TRG",
            Self::Delta => "TRD",
            Self::Heavy => "IGH",
            Self::Kappa => "IGK",
            Self::Lambda => "IGL",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.locus())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TRA" | "ALPHA" | "A" => Ok(Self::Alpha),
            "TRB" | "BETA" | "B" => Ok(Self::Beta),
            "TRG" | "GAMMA" | "G" => Ok(Self::Gamma),
            "TRD" | "DELTA" | "D" => Ok(Self::Delta),
            "IGH" | "HEAVY" | "H" => Ok(Self::Heavy),
            "IGK" | "KAPPA" | "K" => Ok(Self::Kappa),
            "IGL" | "LAMBDA" | "L" => Ok(Self::Lambda),
            _ => Err(format!("unknown chain '{s}'")),
        }
    }
}

/// Reading frame status of a rearrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FrameType {
    #[default]
    #[serde(rename = "IN")]
    InFrame,
    #[serde(rename = "OUT")]
    OutOfFrame,
    #[serde(rename = "STOP")]
    Stop,
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InFrame => "IN",
            Self::OutOfFrame => "OUT",
            Self::Stop => "STOP",
        })
    }
}

impl FromStr for FrameType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IN" | "IN-FRAME" | "PRODUCTIVE" => Ok(Self::InFrame),
            "OUT" | "OUT-OF-FRAME" => Ok(Self::OutOfFrame),
            "STOP" => Ok(Self::Stop),
            _ => Err(format!("unknown frame type '{s}'")),
        }
    }
}

/// Per-signal annotation written by the annotator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SignalAnnotation {
    /// Signal is implanted or detected.
    pub present: bool,
    /// `m` followed by one flag per sequence letter marking motif starts.
    pub position: Option<String>,
}

impl SignalAnnotation {
    /// Annotation for a sequence without the signal.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Build from a per-letter occurrence mask.
    pub fn from_mask(mask: &[bool]) -> Self {
        let present = mask.iter().any(|&m| m);
        let mut position = String::with_capacity(mask.len() + 1);
        position.push('m');
        position.extend(mask.iter().map(|&m| if m { '1' } else { '0' }));
        Self {
            present,
            position: Some(position),
        }
    }

    /// Number of motif occurrences recorded in the position string.
    pub fn occurrences(&self) -> usize {
        match &self.position {
            Some(p) => p.bytes().skip(1).filter(|&b| b == b'1').count(),
            None => usize::from(self.present),
        }
    }
}

/// Provenance of one implanted motif instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplantAnnotation {
    pub signal_id: String,
    pub motif_id: String,
    pub motif_instance: String,
    /// Start position in the implanted representation.
    pub position: usize,
}

/// Implant provenance attached to a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SequenceAnnotation {
    pub implants: Vec<ImplantAnnotation>,
}

/// Metadata carried by every receptor sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SequenceMetadata {
    pub v_call: String,
    pub j_call: String,
    pub region_type: RegionType,
    pub frame_type: FrameType,
    pub chain: Option<Chain>,
    pub duplicate_count: u32,
    /// Generation probability under the background model.
    pub p_gen: Option<f64>,
    /// Typed per-signal annotations keyed by signal id.
    pub signals: BTreeMap<String, SignalAnnotation>,
}

/// A single receptor chain sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReceptorSequence {
    pub sequence_id: String,
    pub sequence_aa: String,
    /// Nucleotide sequence.
    pub sequence: String,
    pub metadata: SequenceMetadata,
    pub annotation: SequenceAnnotation,
}

impl ReceptorSequence {
    /// Create an amino acid sequence with default metadata.
    pub fn from_aa(sequence_id: impl Into<String>, sequence_aa: impl Into<String>) -> Self {
        Self {
            sequence_id: sequence_id.into(),
            sequence_aa: sequence_aa.into(),
            metadata: SequenceMetadata {
                duplicate_count: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Builder-style metadata setter.
    pub fn with_metadata(mut self, metadata: SequenceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The representation used for the given sequence type.
    pub fn get_sequence(&self, sequence_type: SequenceType) -> &str {
        match sequence_type {
            SequenceType::AminoAcid => &self.sequence_aa,
            SequenceType::Nucleotide => &self.sequence,
        }
    }

    /// Replace the representation used for `sequence_type`.
    ///
    /// The other representation no longer matches and is cleared.
    pub fn set_sequence(&mut self, sequence_type: SequenceType, value: String) {
        match sequence_type {
            SequenceType::AminoAcid => {
                self.sequence_aa = value;
                self.sequence.clear();
            }
            SequenceType::Nucleotide => {
                self.sequence_aa = crate::base::translate(&value).unwrap_or_default();
                self.sequence = value;
            }
        }
    }

    /// Returns true if the signal is marked present.
    pub fn contains_signal(&self, signal_id: &str) -> bool {
        self.metadata
            .signals
            .get(signal_id)
            .is_some_and(|s| s.present)
    }

    /// Ids of all signals marked present, in sorted order.
    pub fn present_signals(&self) -> Vec<&str> {
        self.metadata
            .signals
            .iter()
            .filter(|(_, s)| s.present)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Number of distinct signals present.
    pub fn signal_count(&self) -> usize {
        self.metadata.signals.values().filter(|s| s.present).count()
    }

    /// Composite key of the present signals (`s1__s2`), or [`NO_SIGNAL`].
    pub fn signal_key(&self) -> String {
        let present = self.present_signals();
        if present.is_empty() {
            NO_SIGNAL.to_string()
        } else {
            present.join(SIGNAL_KEY_SEPARATOR)
        }
    }
}

/// Normalize a composite key so component order does not matter.
pub fn normalize_signal_key(key: &str) -> String {
    if key == NO_SIGNAL {
        return key.to_string();
    }
    let mut parts: Vec<&str> = key.split(SIGNAL_KEY_SEPARATOR).collect();
    parts.sort_unstable();
    parts.dedup();
    parts.join(SIGNAL_KEY_SEPARATOR)
}

/// A paired receptor built from two chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receptor {
    pub receptor_id: String,
    pub chain_1: ReceptorSequence,
    pub chain_2: ReceptorSequence,
}
