//! Sequence types, alphabets and the standard genetic code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The twenty standard amino acids in one-letter code.
pub const AMINO_ACIDS: &[u8] = b"ACDEFGHIKLMNPQRSTVWY";

/// The four DNA nucleotides.
pub const NUCLEOTIDES: &[u8] = b"ACGT";

/// Which representation of a receptor sequence a component works on.
///
/// Passed explicitly to every component that needs alphabet information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SequenceType {
    #[default]
    AminoAcid,
    Nucleotide,
}

impl SequenceType {
    /// Letters of the alphabet in canonical order.
    pub const fn alphabet(self) -> &'static [u8] {
        match self {
            Self::AminoAcid => AMINO_ACIDS,
            Self::Nucleotide => NUCLEOTIDES,
        }
    }

    /// Number of sequence letters per canonical position.
    pub const fn letters_per_position(self) -> usize {
        match self {
            Self::AminoAcid => 1,
            Self::Nucleotide => 3,
        }
    }

    /// Returns true if every byte of `sequence` is in the alphabet.
    pub fn is_valid(self, sequence: &str) -> bool {
        let alphabet = self.alphabet();
        sequence.bytes().all(|b| alphabet.contains(&b))
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AminoAcid => write!(f, "amino_acid"),
            Self::Nucleotide => write!(f, "nucleotide"),
        }
    }
}

impl FromStr for SequenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "amino_acid" | "aa" | "protein" => Ok(Self::AminoAcid),
            "nucleotide" | "nt" | "dna" => Ok(Self::Nucleotide),
            _ => Err(format!("unknown sequence type '{s}'")),
        }
    }
}

/// Index of a nucleotide byte in [`NUCLEOTIDES`].
#[inline]
pub const fn nucleotide_index(byte: u8) -> Option<usize> {
    match byte {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

// Codon table indexed by 16 * first + 4 * second + third, bases ordered ACGT.
const CODON_TABLE: &[u8; 64] =
    b"KNKNTTTTRSRSIIMIQHQHPPPPRRRRLLLLEDEDAAAAGGGGVVVV*Y*YSSSS*CWCLFLF";

/// Translate a single codon. Returns `None` for non-ACGT input.
#[inline]
pub fn translate_codon(codon: &[u8]) -> Option<u8> {
    if codon.len() != 3 {
        return None;
    }
    let a = nucleotide_index(codon[0])?;
    let b = nucleotide_index(codon[1])?;
    let c = nucleotide_index(codon[2])?;
    Some(CODON_TABLE[16 * a + 4 * b + c])
}

/// Translate an in-frame nucleotide sequence. Stop codons become `*`.
///
/// Returns `None` when the length is not a multiple of three or the input
/// contains non-ACGT characters.
pub fn translate(nucleotides: &str) -> Option<String> {
    let bytes = nucleotides.as_bytes();
    if bytes.len() % 3 != 0 {
        return None;
    }
    bytes
        .chunks_exact(3)
        .map(|codon| translate_codon(codon).map(char::from))
        .collect()
}

/// All codons (as byte triplets) encoding the amino acid `aa`.
pub fn codons_for(aa: u8) -> Vec<[u8; 3]> {
    CODON_TABLE
        .iter()
        .enumerate()
        .filter(|(_, &code)| code == aa)
        .map(|(i, _)| {
            [
                NUCLEOTIDES[i / 16],
                NUCLEOTIDES[(i / 4) % 4],
                NUCLEOTIDES[i % 4],
            ]
        })
        .collect()
}
