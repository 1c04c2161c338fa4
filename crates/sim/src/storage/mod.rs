//! Storage module for persisting simulation results.
//!
//! Repertoires go to a SQLite store with one blob per column; sequence and
//! receptor datasets are written as tab-separated files.

mod database;
pub mod export;
mod repertoire;

pub use database::{Database, DatabaseStats};
pub use export::{
    export_repertoires, read_sequences, write_metadata, write_receptors, write_sequences, METADATA_FIELDS, SEQUENCE_FIELDS,
};
pub use repertoire::{
    from_columns, to_columns, Column, Repertoire, RepertoireMetadata, RepertoireStore, POSITION_SUFFIX,
};
