//! Combining two simulated chains into paired receptors.

use crate::base::{Receptor, ReceptorSequence};
use crate::errors::ConfigError;

/// Zip the sequences of two items into receptors, position by position.
pub fn pair_sequences(
    name_1: &str,
    chain_1: Vec<ReceptorSequence>,
    name_2: &str,
    chain_2: Vec<ReceptorSequence>,
) -> Result<Vec<Receptor>, ConfigError> {
    if chain_1.len() != chain_2.len() {
        return Err(ConfigError::Invalid(format!(
            "cannot pair '{name_1}' ({} sequences) with '{name_2}' ({} sequences)",
            chain_1.len(),
            chain_2.len()
        )));
    }

    Ok(chain_1
        .into_iter()
        .zip(chain_2)
        .enumerate()
        .map(|(i, (chain_1, chain_2))| Receptor {
            receptor_id: format!("{name_1}_{name_2}_{i}"),
            chain_1,
            chain_2,
        })
        .collect())
}
