//! Tab-separated sequence records.
//!
//! Sequence files carry the fixed fields below followed by two columns per
//! signal: `<signal>` (presence flag) and `<signal>_position`. The same
//! layout is read back by [`read_sequences`].

use crate::base::{Chain, FrameType, Receptor, ReceptorSequence, RegionType, SignalAnnotation};
use crate::errors::StorageError;
use crate::storage::repertoire::{Repertoire, RepertoireStore, POSITION_SUFFIX};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Fixed columns of a sequence file, in order.
pub const SEQUENCE_FIELDS: [&str; 10] = [
    "sequence_id",
    "sequence_aa",
    "sequence",
    "v_call",
    "j_call",
    "region_type",
    "frame_type",
    "p_gen",
    "duplicate_count",
    "chain",
];

/// Leading columns of `metadata.tsv`.
pub const METADATA_FIELDS: [&str; 4] = ["filename", "subject_id", "identifier", "item_name"];

/// File listing every exported repertoire.
pub const METADATA_FILE: &str = "metadata.tsv";

fn tsv_writer(path: &Path) -> Result<csv::Writer<File>, StorageError> {
    Ok(WriterBuilder::new().delimiter(b'\t').from_path(path)?)
}

fn header(prefix: &[&str], signal_ids: &[String]) -> Vec<String> {
    prefix
        .iter()
        .chain(SEQUENCE_FIELDS.iter())
        .map(|s| s.to_string())
        .chain(
            signal_ids
                .iter()
                .flat_map(|id| [id.clone(), format!("{id}{POSITION_SUFFIX}")]),
        )
        .collect()
}

fn sequence_fields(sequence: &ReceptorSequence, signal_ids: &[String]) -> Vec<String> {
    let meta = &sequence.metadata;
    let mut fields = vec![
        sequence.sequence_id.clone(),
        sequence.sequence_aa.clone(),
        sequence.sequence.clone(),
        meta.v_call.clone(),
        meta.j_call.clone(),
        meta.region_type.to_string(),
        meta.frame_type.to_string(),
        meta.p_gen.map(|p| format!("{p:e}")).unwrap_or_default(),
        meta.duplicate_count.to_string(),
        meta.chain.map(|c| c.to_string()).unwrap_or_default(),
    ];
    for id in signal_ids {
        let annotation = meta.signals.get(id);
        fields.push(annotation.is_some_and(|a| a.present).to_string());
        fields.push(annotation.and_then(|a| a.position.clone()).unwrap_or_default());
    }
    fields
}

/// Write sequences with one flag and one position column per signal.
pub fn write_sequences(
    path: impl AsRef<Path>,
    sequences: &[ReceptorSequence],
    signal_ids: &[String],
) -> Result<(), StorageError> {
    let mut writer = tsv_writer(path.as_ref())?;
    writer.write_record(header(&[], signal_ids))?;
    for sequence in sequences {
        writer.write_record(sequence_fields(sequence, signal_ids))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write paired receptors, one row per chain, linked by `cell_id`.
pub fn write_receptors(
    path: impl AsRef<Path>,
    receptors: &[Receptor],
    signal_ids: &[String],
) -> Result<(), StorageError> {
    let mut writer = tsv_writer(path.as_ref())?;
    writer.write_record(header(&["cell_id"], signal_ids))?;
    for receptor in receptors {
        for chain in [&receptor.chain_1, &receptor.chain_2] {
            let mut fields = vec![receptor.receptor_id.clone()];
            fields.extend(sequence_fields(chain, signal_ids));
            writer.write_record(fields)?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn parse_flag(value: &str) -> Result<bool, StorageError> {
    match value {
        "true" | "True" | "TRUE" | "1" => Ok(true),
        "false" | "False" | "FALSE" | "0" | "" => Ok(false),
        other => Err(StorageError::Record(format!("invalid flag '{other}'"))),
    }
}

struct Layout {
    fields: BTreeMap<&'static str, usize>,
    signals: Vec<(String, usize, usize)>,
}

impl Layout {
    fn from_header(header: &StringRecord) -> Result<Self, StorageError> {
        let position = |name: &str| header.iter().position(|h| h == name);
        let mut fields = BTreeMap::new();
        for field in ["sequence_id", "sequence_aa"] {
            let index = position(field)
                .ok_or_else(|| StorageError::Record(format!("missing column '{field}'")))?;
            fields.insert(field, index);
        }
        for field in SEQUENCE_FIELDS {
            if let Some(index) = position(field) {
                fields.insert(field, index);
            }
        }

        let signals = header
            .iter()
            .enumerate()
            .filter(|(_, name)| !SEQUENCE_FIELDS.contains(name))
            .filter_map(|(flag, name)| {
                position(&format!("{name}{POSITION_SUFFIX}")).map(|pos| (name.to_string(), flag, pos))
            })
            .collect();

        Ok(Self { fields, signals })
    }

    fn get<'r>(&self, record: &'r StringRecord, field: &str) -> &'r str {
        self.fields
            .get(field)
            .and_then(|&i| record.get(i))
            .unwrap_or("")
    }

    fn sequence(&self, record: &StringRecord) -> Result<ReceptorSequence, StorageError> {
        let bad = |e: String| StorageError::Record(e);
        let mut sequence = ReceptorSequence::from_aa(self.get(record, "sequence_id"), self.get(record, "sequence_aa"));
        sequence.sequence = self.get(record, "sequence").to_string();

        let meta = &mut sequence.metadata;
        meta.v_call = self.get(record, "v_call").to_string();
        meta.j_call = self.get(record, "j_call").to_string();
        if let Some(region) = Some(self.get(record, "region_type")).filter(|s| !s.is_empty()) {
            meta.region_type = region.parse::<RegionType>().map_err(bad)?;
        }
        if let Some(frame) = Some(self.get(record, "frame_type")).filter(|s| !s.is_empty()) {
            meta.frame_type = frame.parse::<FrameType>().map_err(bad)?;
        }
        if let Some(chain) = Some(self.get(record, "chain")).filter(|s| !s.is_empty()) {
            meta.chain = Some(chain.parse::<Chain>().map_err(bad)?);
        }
        if let Some(p_gen) = Some(self.get(record, "p_gen")).filter(|s| !s.is_empty()) {
            meta.p_gen = Some(
                p_gen
                    .parse::<f64>()
                    .map_err(|e| StorageError::Record(format!("invalid p_gen '{p_gen}': {e}")))?,
            );
        }
        if let Some(count) = Some(self.get(record, "duplicate_count")).filter(|s| !s.is_empty()) {
            meta.duplicate_count = count
                .parse()
                .map_err(|e| StorageError::Record(format!("invalid duplicate_count '{count}': {e}")))?;
        }

        for (id, flag, position) in &self.signals {
            let present = parse_flag(record.get(*flag).unwrap_or(""))?;
            let position = record.get(*position).filter(|p| !p.is_empty()).map(str::to_string);
            meta.signals.insert(id.clone(), SignalAnnotation { present, position });
        }
        Ok(sequence)
    }
}

/// Read sequences written by [`write_sequences`] (or any file with at least
/// `sequence_id` and `sequence_aa` columns).
pub fn read_sequences(path: impl AsRef<Path>) -> Result<Vec<ReceptorSequence>, StorageError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(false)
        .from_path(path.as_ref())?;
    let layout = Layout::from_header(reader.headers()?)?;

    reader
        .records()
        .map(|record| layout.sequence(&record?))
        .collect()
}

/// Write the repertoire overview: file name, identifiers and one label
/// column per signal.
pub fn write_metadata(
    path: impl AsRef<Path>,
    repertoires: &[Repertoire],
    signal_ids: &[String],
) -> Result<(), StorageError> {
    let mut writer = tsv_writer(path.as_ref())?;
    let mut head: Vec<String> = METADATA_FIELDS.iter().map(|f| f.to_string()).collect();
    head.extend(signal_ids.iter().cloned());
    writer.write_record(&head)?;

    for repertoire in repertoires {
        let mut fields = vec![
            format!("{}.tsv", repertoire.identifier),
            repertoire.metadata.subject_id.clone(),
            repertoire.identifier.clone(),
            repertoire.metadata.item_name.clone(),
        ];
        fields.extend(
            signal_ids
                .iter()
                .map(|id| repertoire.metadata.labels.get(id).copied().unwrap_or(false).to_string()),
        );
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}

/// Export stored repertoires to `<dir>/<identifier>.tsv` plus
/// `metadata.tsv`. Each repertoire is freed again after writing.
pub fn export_repertoires(
    store: &mut RepertoireStore,
    repertoires: &[Repertoire],
    dir: impl AsRef<Path>,
    signal_ids: &[String],
) -> Result<PathBuf, StorageError> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    for repertoire in repertoires {
        let sequences = store.load(repertoire)?;
        write_sequences(dir.join(format!("{}.tsv", repertoire.identifier)), sequences, signal_ids)?;
        store.free_memory(&repertoire.identifier);
    }
    let metadata = dir.join(METADATA_FILE);
    write_metadata(&metadata, repertoires, signal_ids)?;
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::SequenceMetadata;
    use crate::storage::repertoire::RepertoireMetadata;
    use tempfile::tempdir;

    fn sample() -> Vec<ReceptorSequence> {
        let mut with_signal = ReceptorSequence::from_aa("a", "CASSAAF").with_metadata(SequenceMetadata {
            v_call: "TRBV20-1*01".into(),
            j_call: "TRBJ2-7*01".into(),
            chain: Some(Chain::Beta),
            duplicate_count: 3,
            p_gen: Some(2.5e-11),
            ..Default::default()
        });
        with_signal.sequence = "TGTGCCAGCAGCGCCGCCTTT".into();
        with_signal
            .metadata
            .signals
            .insert("s1".into(), SignalAnnotation::from_mask(&[false, false, false, false, true, false, false]));

        let mut without = ReceptorSequence::from_aa("b", "CASSLF");
        without.metadata.signals.insert("s1".into(), SignalAnnotation::absent());
        vec![with_signal, without]
    }

    #[test]
    fn test_sequences_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seqs.tsv");
        let signals = vec!["s1".to_string()];
        write_sequences(&path, &sample(), &signals).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let first_line = text.lines().next().unwrap();
        assert!(first_line.starts_with("sequence_id\tsequence_aa\tsequence\tv_call"));
        assert!(first_line.ends_with("s1\ts1_position"));

        let read = read_sequences(&path).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].metadata.p_gen, Some(2.5e-11));
        assert_eq!(read[0].metadata.duplicate_count, 3);
        assert_eq!(read[0].metadata.chain, Some(Chain::Beta));
        assert!(read[0].contains_signal("s1"));
        assert_eq!(read[0].metadata.signals["s1"].position.as_deref(), Some("m0000100"));
        assert!(!read[1].contains_signal("s1"));
        assert_eq!(read[1].metadata.p_gen, None);
        assert_eq!(read[1].metadata.region_type, RegionType::ImgtJunction);
    }

    #[test]
    fn test_minimal_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("min.tsv");
        std::fs::write(&path, "sequence_aa\tsequence_id\textra\nCASSF\tx1\tfoo\n").unwrap();
        let read = read_sequences(&path).unwrap();
        assert_eq!(read[0].sequence_aa, "CASSF");
        assert_eq!(read[0].sequence_id, "x1");
        assert!(read[0].metadata.signals.is_empty());

        std::fs::write(&path, "sequence\nACG\n").unwrap();
        assert!(matches!(read_sequences(&path), Err(StorageError::Record(_))));
    }

    #[test]
    fn test_receptors_one_row_per_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("receptors.tsv");
        let seqs = sample();
        let receptors = vec![Receptor {
            receptor_id: "r0".into(),
            chain_1: seqs[0].clone(),
            chain_2: seqs[1].clone(),
        }];
        write_receptors(&path, &receptors, &[]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("r0\ta\t"));
        assert!(lines[2].starts_with("r0\tb\t"));
    }

    #[test]
    fn test_export_repertoires() {
        let dir = tempdir().unwrap();
        let mut store = RepertoireStore::open(dir.path().join("reps.sqlite")).unwrap();
        let signals = vec!["s1".to_string()];
        let metadata = RepertoireMetadata {
            subject_id: "subject_0".into(),
            item_name: "item1".into(),
            labels: BTreeMap::from([("s1".to_string(), true)]),
            field_list: vec![],
        };
        let repertoire = store.save("item1_0", metadata, &sample(), &signals).unwrap();

        let out = dir.path().join("export");
        let metadata_path = export_repertoires(&mut store, &[repertoire], &out, &signals).unwrap();
        assert!(!store.is_loaded("item1_0"));

        let overview = std::fs::read_to_string(metadata_path).unwrap();
        assert!(overview.contains("item1_0.tsv\tsubject_0\titem1_0\titem1\ttrue"));
        assert_eq!(read_sequences(out.join("item1_0.tsv")).unwrap().len(), 2);
    }
}
