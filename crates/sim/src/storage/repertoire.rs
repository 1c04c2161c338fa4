//! Columnar repertoire store.
//!
//! A [`Repertoire`] is a lightweight handle: identifier, metadata and element
//! count. Sequence data lives in the database as one bincode blob per column
//! and is only materialized through [`RepertoireStore::load`]; the loaded
//! data stays cached until [`RepertoireStore::free_memory`] is called.

use crate::base::{
    Chain, FrameType, ReceptorSequence, RegionType, SequenceMetadata, SignalAnnotation,
};
use crate::errors::StorageError;
use crate::storage::database::{Database, DatabaseStats};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Suffix of the column holding a signal's position string.
pub const POSITION_SUFFIX: &str = "_position";

/// One stored column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    Text(Vec<String>),
    Int(Vec<i64>),
    Float(Vec<Option<f64>>),
    Bool(Vec<bool>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Text(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Column::Text(_) => "text",
            Column::Int(_) => "int",
            Column::Float(_) => "float",
            Column::Bool(_) => "bool",
        }
    }
}

/// Repertoire-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepertoireMetadata {
    pub subject_id: String,
    pub item_name: String,
    /// Repertoire label per signal.
    pub labels: BTreeMap<String, bool>,
    /// Names of the stored columns.
    pub field_list: Vec<String>,
}

/// Handle to a stored repertoire.
#[derive(Debug, Clone, PartialEq)]
pub struct Repertoire {
    pub identifier: String,
    pub metadata: RepertoireMetadata,
    pub element_count: usize,
}

/// Split sequences into named columns.
///
/// Signal annotations become a boolean column named after the signal plus a
/// text column with the `_position` suffix.
pub fn to_columns(sequences: &[ReceptorSequence], signal_ids: &[String]) -> BTreeMap<String, Column> {
    fn text(sequences: &[ReceptorSequence], f: impl Fn(&ReceptorSequence) -> String) -> Column {
        Column::Text(sequences.iter().map(f).collect())
    }

    let mut columns = BTreeMap::new();
    columns.insert("sequence_id".into(), text(sequences, |s| s.sequence_id.clone()));
    columns.insert("sequence_aa".into(), text(sequences, |s| s.sequence_aa.clone()));
    columns.insert("sequence".into(), text(sequences, |s| s.sequence.clone()));
    columns.insert("v_call".into(), text(sequences, |s| s.metadata.v_call.clone()));
    columns.insert("j_call".into(), text(sequences, |s| s.metadata.j_call.clone()));
    columns.insert("region_type".into(), text(sequences, |s| s.metadata.region_type.to_string()));
    columns.insert("frame_type".into(), text(sequences, |s| s.metadata.frame_type.to_string()));
    columns.insert(
        "chain".into(),
        text(sequences, |s| s.metadata.chain.map(|c| c.to_string()).unwrap_or_default()),
    );
    columns.insert(
        "duplicate_count".into(),
        Column::Int(sequences.iter().map(|s| i64::from(s.metadata.duplicate_count)).collect()),
    );
    columns.insert(
        "p_gen".into(),
        Column::Float(sequences.iter().map(|s| s.metadata.p_gen).collect()),
    );

    for id in signal_ids {
        columns.insert(
            id.clone(),
            Column::Bool(sequences.iter().map(|s| s.contains_signal(id)).collect()),
        );
        columns.insert(
            format!("{id}{POSITION_SUFFIX}"),
            text(sequences, |s| {
                s.metadata
                    .signals
                    .get(id)
                    .and_then(|a| a.position.clone())
                    .unwrap_or_default()
            }),
        );
    }
    columns
}

fn text_column<'a>(
    columns: &'a BTreeMap<String, Column>,
    name: &str,
) -> Result<&'a [String], StorageError> {
    match columns.get(name) {
        Some(Column::Text(v)) => Ok(v),
        Some(other) => Err(StorageError::Record(format!(
            "column '{name}' has type {}, expected text",
            other.kind()
        ))),
        None => Err(StorageError::Record(format!("missing column '{name}'"))),
    }
}

/// Rebuild sequences from stored columns.
pub fn from_columns(columns: &BTreeMap<String, Column>, count: usize) -> Result<Vec<ReceptorSequence>, StorageError> {
    if let Some((name, column)) = columns.iter().find(|(_, c)| c.len() != count) {
        return Err(StorageError::Record(format!(
            "column '{name}' has {} values, expected {count}",
            column.len()
        )));
    }
    let ids = text_column(columns, "sequence_id")?;
    let aa = text_column(columns, "sequence_aa")?;
    let nt = text_column(columns, "sequence")?;
    let v_calls = text_column(columns, "v_call")?;
    let j_calls = text_column(columns, "j_call")?;
    let regions = text_column(columns, "region_type")?;
    let frames = text_column(columns, "frame_type")?;
    let chains = text_column(columns, "chain")?;
    let counts = match columns.get("duplicate_count") {
        Some(Column::Int(v)) => v.as_slice(),
        _ => return Err(StorageError::Record("missing column 'duplicate_count'".into())),
    };
    let p_gens = match columns.get("p_gen") {
        Some(Column::Float(v)) => v.as_slice(),
        _ => return Err(StorageError::Record("missing column 'p_gen'".into())),
    };

    let signals: Vec<(&String, &[bool], Option<&[String]>)> = columns
        .iter()
        .filter_map(|(name, column)| match column {
            Column::Bool(flags) => {
                let positions = text_column(columns, &format!("{name}{POSITION_SUFFIX}")).ok();
                Some((name, flags.as_slice(), positions))
            }
            _ => None,
        })
        .collect();

    let record = |e: String| StorageError::Record(e);
    (0..count)
        .map(|i| {
            let mut metadata = SequenceMetadata {
                v_call: v_calls[i].clone(),
                j_call: j_calls[i].clone(),
                region_type: regions[i].parse::<RegionType>().map_err(record)?,
                frame_type: frames[i].parse::<FrameType>().map_err(record)?,
                chain: match chains[i].as_str() {
                    "" => None,
                    c => Some(c.parse::<Chain>().map_err(record)?),
                },
                duplicate_count: u32::try_from(counts[i])
                    .map_err(|e| StorageError::Record(e.to_string()))?,
                p_gen: p_gens[i],
                signals: BTreeMap::new(),
            };
            for (name, flags, positions) in &signals {
                let position = positions
                    .map(|p| p[i].clone())
                    .filter(|p| !p.is_empty());
                metadata.signals.insert(
                    (*name).clone(),
                    SignalAnnotation {
                        present: flags[i],
                        position,
                    },
                );
            }
            Ok(ReceptorSequence {
                sequence_id: ids[i].clone(),
                sequence_aa: aa[i].clone(),
                sequence: nt[i].clone(),
                metadata,
                annotation: Default::default(),
            })
        })
        .collect()
}

/// SQLite-backed repertoire store with an explicit in-memory cache.
#[derive(Debug)]
pub struct RepertoireStore {
    db: Database,
    cache: HashMap<String, Vec<ReceptorSequence>>,
}

impl RepertoireStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self {
            db: Database::open(path)?,
            cache: HashMap::new(),
        })
    }

    pub fn path(&self) -> &str {
        self.db.path()
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.db.set_metadata(key, value)
    }

    pub fn metadata(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.db.metadata(key)
    }

    pub fn stats(&self) -> Result<DatabaseStats, StorageError> {
        self.db.stats()
    }

    /// Persist a repertoire in a single transaction.
    pub fn save(
        &mut self,
        identifier: &str,
        metadata: RepertoireMetadata,
        sequences: &[ReceptorSequence],
        signal_ids: &[String],
    ) -> Result<Repertoire, StorageError> {
        let columns = to_columns(sequences, signal_ids);
        let metadata = RepertoireMetadata {
            field_list: columns.keys().cloned().collect(),
            ..metadata
        };
        let labels = serde_json::to_string(&metadata.labels)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let tx = self.db.transaction()?;
        tx.execute(
            "INSERT INTO repertoires (repertoire_id, item_name, subject_id, element_count, labels, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                identifier,
                metadata.item_name,
                metadata.subject_id,
                sequences.len() as i64,
                labels,
                created_at
            ],
        )
        .map_err(|e| StorageError::Insert(e.to_string()))?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO repertoire_columns (repertoire_id, name, kind, data) VALUES (?1, ?2, ?3, ?4)")
                .map_err(|e| StorageError::Insert(e.to_string()))?;
            for (name, column) in &columns {
                let data = bincode::serialize(column)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                stmt.execute(params![identifier, name, column.kind(), data])
                    .map_err(|e| StorageError::Insert(e.to_string()))?;
            }
        }
        tx.commit()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;

        Ok(Repertoire {
            identifier: identifier.to_string(),
            metadata,
            element_count: sequences.len(),
        })
    }

    fn field_list(&self, identifier: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .db
            .connection()
            .prepare("SELECT name FROM repertoire_columns WHERE repertoire_id = ?1 ORDER BY name")?;
        let names = stmt
            .query_map(params![identifier], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn row_to_repertoire(&self, row: (String, String, String, i64, String)) -> Result<Repertoire, StorageError> {
        let (identifier, item_name, subject_id, element_count, labels) = row;
        let labels: BTreeMap<String, bool> = serde_json::from_str(&labels)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let field_list = self.field_list(&identifier)?;
        Ok(Repertoire {
            identifier,
            metadata: RepertoireMetadata {
                subject_id,
                item_name,
                labels,
                field_list,
            },
            element_count: element_count as usize,
        })
    }

    /// Handles for every stored repertoire, ordered by item and identifier.
    pub fn repertoires(&self) -> Result<Vec<Repertoire>, StorageError> {
        let mut stmt = self.db.connection().prepare(
            "SELECT repertoire_id, item_name, subject_id, element_count, labels
             FROM repertoires ORDER BY item_name, created_at, rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|row| self.row_to_repertoire(row)).collect()
    }

    pub fn repertoire(&self, identifier: &str) -> Result<Repertoire, StorageError> {
        let row = self
            .db
            .connection()
            .query_row(
                "SELECT repertoire_id, item_name, subject_id, element_count, labels
                 FROM repertoires WHERE repertoire_id = ?1",
                params![identifier],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(identifier.to_string()))?;
        self.row_to_repertoire(row)
    }

    /// Read every stored column of a repertoire, checking its length.
    pub fn load_columns(&self, repertoire: &Repertoire) -> Result<BTreeMap<String, Column>, StorageError> {
        let mut stmt = self
            .db
            .connection()
            .prepare("SELECT name, data FROM repertoire_columns WHERE repertoire_id = ?1")?;
        let rows = stmt
            .query_map(params![repertoire.identifier], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut columns = BTreeMap::new();
        for (name, data) in rows {
            let column: Column = bincode::deserialize(&data)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            if column.len() != repertoire.element_count {
                return Err(StorageError::Corrupted {
                    repertoire: repertoire.identifier.clone(),
                    column: name,
                    expected: repertoire.element_count,
                    actual: column.len(),
                });
            }
            columns.insert(name, column);
        }
        Ok(columns)
    }

    /// Sequences of a repertoire, loaded from disk on first access.
    pub fn load(&mut self, repertoire: &Repertoire) -> Result<&[ReceptorSequence], StorageError> {
        if !self.cache.contains_key(&repertoire.identifier) {
            let columns = self.load_columns(repertoire)?;
            let sequences = from_columns(&columns, repertoire.element_count)?;
            self.cache.insert(repertoire.identifier.clone(), sequences);
        }
        Ok(self
            .cache
            .get(&repertoire.identifier)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    pub fn is_loaded(&self, identifier: &str) -> bool {
        self.cache.contains_key(identifier)
    }

    /// Drop cached sequence data; the repertoire stays on disk.
    pub fn free_memory(&mut self, identifier: &str) {
        self.cache.remove(identifier);
    }

    /// Checkpoint and close the underlying database.
    pub fn close(self) -> Result<(), StorageError> {
        self.db.close()
    }
}
