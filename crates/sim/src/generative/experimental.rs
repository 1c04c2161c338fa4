//! Replay of imported sequences as a generative model.

use super::{GenerativeModel, ModelIdentity};
use crate::base::{Chain, ReceptorSequence, RegionType, SequenceType, AMINO_ACIDS};
use crate::errors::GenerationError;
use crate::storage::read_sequences;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Deserialize)]
struct ExperimentalImportConfig {
    import_path: PathBuf,
    #[serde(default)]
    region_type: Option<RegionType>,
    #[serde(default)]
    chain: Option<Chain>,
}

/// Hands out imported sequences in file order, each exactly once.
#[derive(Debug)]
pub struct ExperimentalImport {
    name: String,
    source: String,
    sequences: Arc<Vec<ReceptorSequence>>,
    region_type: RegionType,
    chain: Option<Chain>,
    cursor: Mutex<usize>,
}

/// Imported letters must come from the alphabets; `*` marks a stop codon.
fn check_letters(sequence: &ReceptorSequence) -> Result<(), String> {
    if !sequence
        .sequence_aa
        .bytes()
        .all(|b| b == b'*' || AMINO_ACIDS.contains(&b))
    {
        return Err(format!(
            "sequence '{}' has letters outside the amino acid alphabet: {}",
            sequence.sequence_id, sequence.sequence_aa
        ));
    }
    if !SequenceType::Nucleotide.is_valid(&sequence.sequence) {
        return Err(format!(
            "sequence '{}' has letters outside the nucleotide alphabet: {}",
            sequence.sequence_id, sequence.sequence
        ));
    }
    Ok(())
}

impl ExperimentalImport {
    pub fn new(
        name: impl Into<String>,
        sequences: Vec<ReceptorSequence>,
        region_type: RegionType,
        chain: Option<Chain>,
    ) -> Self {
        let name = name.into();
        Self {
            source: name.clone(),
            name,
            sequences: Arc::new(sequences),
            region_type,
            chain,
            cursor: Mutex::new(0),
        }
    }

    /// Load a sequence file written by the storage exporter.
    pub fn from_file(
        path: impl AsRef<Path>,
        region_type: Option<RegionType>,
        chain: Option<Chain>,
    ) -> Result<Self, GenerationError> {
        let path = path.as_ref();
        let mut sequences = read_sequences(path).map_err(|e| {
            GenerationError::InvalidModel(format!("cannot import {}: {e}", path.display()))
        })?;
        if let Some(reason) = sequences.iter().find_map(|s| check_letters(s).err()) {
            return Err(GenerationError::InvalidModel(format!(
                "cannot import {}: {reason}",
                path.display()
            )));
        }

        let region_type = region_type
            .or_else(|| sequences.first().map(|s| s.metadata.region_type))
            .unwrap_or_default();
        let chain = chain.or_else(|| sequences.first().and_then(|s| s.metadata.chain));
        for sequence in &mut sequences {
            sequence.metadata.region_type = region_type;
            if sequence.metadata.chain.is_none() {
                sequence.metadata.chain = chain;
            }
            sequence.metadata.signals.clear();
            sequence.metadata.p_gen = None;
        }
        log::info!("Imported {} sequences from {}", sequences.len(), path.display());

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "experimental_import".to_string());
        Ok(Self {
            source: path.display().to_string(),
            ..Self::new(name, sequences, region_type, chain)
        })
    }

    /// Factory used by the model registry.
    pub fn from_params(
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Arc<dyn GenerativeModel>, GenerationError> {
        let config: ExperimentalImportConfig =
            serde_json::from_value(serde_json::Value::Object(params.clone()))?;
        Ok(Arc::new(Self::from_file(
            &config.import_path,
            config.region_type,
            config.chain,
        )?))
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Number of sequences not yet handed out.
    pub fn remaining(&self) -> usize {
        let cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        self.sequences.len().saturating_sub(*cursor)
    }
}

impl GenerativeModel for ExperimentalImport {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> ModelIdentity {
        ModelIdentity {
            kind: "ExperimentalImport",
            source: self.source.clone(),
            chain: self.chain,
            detail: format!("{} sequences", self.sequences.len()),
        }
    }

    fn chain(&self) -> Option<Chain> {
        self.chain
    }

    fn region_type(&self) -> RegionType {
        self.region_type
    }

    /// Every item replays the file from the start with its own cursor.
    fn item_handle(&self) -> Option<Arc<dyn GenerativeModel>> {
        Some(Arc::new(Self {
            name: self.name.clone(),
            source: self.source.clone(),
            sequences: Arc::clone(&self.sequences),
            region_type: self.region_type,
            chain: self.chain,
            cursor: Mutex::new(0),
        }))
    }

    /// The seed is ignored; successive calls continue where the last ended
    /// and the final batch may be short.
    fn generate_sequences(
        &self,
        count: usize,
        _seed: u64,
        _sequence_type: SequenceType,
        compute_p_gen: bool,
    ) -> Result<Vec<ReceptorSequence>, GenerationError> {
        if compute_p_gen {
            log::warn!(
                "{}: generation probabilities cannot be computed for imported sequences, skipping",
                self.name
            );
        }

        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        if *cursor >= self.sequences.len() {
            return Err(GenerationError::Exhausted {
                model: self.name.clone(),
                available: self.sequences.len(),
            });
        }
        let end = (*cursor + count).min(self.sequences.len());
        let batch = self.sequences[*cursor..end].to_vec();
        *cursor = end;
        Ok(batch)
    }

    fn can_compute_p_gens(&self) -> bool {
        false
    }

    fn compute_p_gen(
        &self,
        _sequence: &ReceptorSequence,
        _sequence_type: SequenceType,
    ) -> Result<f64, GenerationError> {
        Err(GenerationError::Unsupported {
            model: self.name.clone(),
            operation: "generation probabilities".into(),
        })
    }

    fn can_generate_from_skewed_gene_models(&self) -> bool {
        false
    }

    fn generate_from_skewed_gene_models(
        &self,
        _v_genes: &[String],
        _j_genes: &[String],
        _seed: u64,
        _batch_size: usize,
        _sequence_type: SequenceType,
        _compute_p_gen: bool,
    ) -> Result<Vec<ReceptorSequence>, GenerationError> {
        Err(GenerationError::Unsupported {
            model: self.name.clone(),
            operation: "skewed gene generation".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::write_sequences;
    use tempfile::tempdir;

    fn model(n: usize) -> ExperimentalImport {
        let sequences = (0..n)
            .map(|i| ReceptorSequence::from_aa(format!("imp{i}"), "CASSLGF"))
            .collect();
        ExperimentalImport::new("imported", sequences, RegionType::ImgtJunction, Some(Chain::Beta))
    }

    #[test]
    fn test_replay_in_order_then_exhausted() {
        let model = model(5);
        let first = model.generate_sequences(3, 0, SequenceType::AminoAcid, false).unwrap();
        let ids: Vec<_> = first.iter().map(|s| s.sequence_id.as_str()).collect();
        assert_eq!(ids, ["imp0", "imp1", "imp2"]);

        let second = model.generate_sequences(10, 0, SequenceType::AminoAcid, false).unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(model.remaining(), 0);

        let err = model.generate_sequences(10, 0, SequenceType::AminoAcid, false).unwrap_err();
        assert!(matches!(err, GenerationError::Exhausted { available: 5, .. }));
    }

    #[test]
    fn test_no_p_gen_or_skewed_generation() {
        let model = model(2);
        assert!(!model.can_compute_p_gens());
        assert!(!model.can_generate_from_skewed_gene_models());
        let seq = ReceptorSequence::from_aa("x", "CASSF");
        assert!(matches!(
            model.compute_p_gen(&seq, SequenceType::AminoAcid),
            Err(GenerationError::Unsupported { .. })
        ));
        let batch = model.generate_sequences(2, 0, SequenceType::AminoAcid, true).unwrap();
        assert!(batch.iter().all(|s| s.metadata.p_gen.is_none()));
    }

    #[test]
    fn test_factory_reads_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("background.tsv");
        let sequences: Vec<_> = (0..4)
            .map(|i| ReceptorSequence::from_aa(format!("bg{i}"), "CASSQETQYF"))
            .collect();
        write_sequences(&path, &sequences, &[]).unwrap();

        let mut params = serde_json::Map::new();
        params.insert("import_path".into(), path.display().to_string().into());
        params.insert("region_type".into(), "IMGT_CDR3".into());
        let model = ExperimentalImport::from_params(&params).unwrap();

        assert_eq!(model.name(), "background");
        assert_eq!(model.region_type(), RegionType::ImgtCdr3);
        let batch = model.generate_sequences(10, 1, SequenceType::AminoAcid, false).unwrap();
        assert_eq!(batch.len(), 4);
        assert!(batch.iter().all(|s| s.metadata.region_type == RegionType::ImgtCdr3));
    }

    #[test]
    fn test_item_handles_have_own_cursor() {
        let shared = model(4);
        shared.generate_sequences(3, 0, SequenceType::AminoAcid, false).unwrap();

        let first = shared.item_handle().unwrap();
        let second = shared.item_handle().unwrap();
        let a = first.generate_sequences(2, 0, SequenceType::AminoAcid, false).unwrap();
        let b = second.generate_sequences(4, 0, SequenceType::AminoAcid, false).unwrap();
        assert_eq!(a[0].sequence_id, "imp0");
        assert_eq!(b.len(), 4);
        assert_eq!(b[0].sequence_id, "imp0");
        assert_eq!(shared.remaining(), 1);
        assert!(first.is_same(second.as_ref()));
    }

    #[test]
    fn test_import_rejects_foreign_letters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.tsv");
        let sequences = vec![
            ReceptorSequence::from_aa("ok", "CASSF"),
            ReceptorSequence::from_aa("x0", "CASÉSF"),
        ];
        write_sequences(&path, &sequences, &[]).unwrap();

        let err = ExperimentalImport::from_file(&path, None, None).unwrap_err();
        match err {
            GenerationError::InvalidModel(message) => assert!(message.contains("'x0'")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_import_accepts_stop_codons() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stops.tsv");
        write_sequences(&path, &[ReceptorSequence::from_aa("s", "CAS*F")], &[]).unwrap();
        let model = ExperimentalImport::from_file(&path, None, None).unwrap();
        assert_eq!(model.len(), 1);
    }
}
