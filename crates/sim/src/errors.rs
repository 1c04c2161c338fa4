//! Error types for the simulation crate.
//!
//! Each concern gets its own enum so callers can tell configuration problems
//! (fail immediately) apart from exhaustion problems (terminal for one
//! simulation item) and storage problems.

use crate::base::RegionType;
use thiserror::Error;

/// Errors raised while computing canonical positions or position weights.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PositionError {
    /// The region type has no positional numbering scheme.
    #[error("region type {0} does not support positional numbering")]
    UnsupportedRegionType(RegionType),

    /// The sequence is shorter than the numbering scheme allows.
    #[error("sequence of length {length} is too short for {region} numbering (minimum {minimum})")]
    TooShort {
        length: usize,
        region: RegionType,
        minimum: usize,
    },

    /// A position label could not be parsed.
    #[error("invalid position label '{0}'")]
    InvalidLabel(String),

    /// User supplied weights do not admit a probability distribution.
    #[error("invalid position weights: {0}")]
    InvalidWeights(String),
}

/// Errors raised while validating or instantiating motifs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotifError {
    #[error("motif '{motif}': invalid seed: {reason}")]
    InvalidSeed { motif: String, reason: String },

    #[error("motif '{motif}': invalid distribution: {reason}")]
    InvalidDistribution { motif: String, reason: String },

    #[error("motif '{motif}': invalid gap range [{min_gap}, {max_gap}]")]
    InvalidGap {
        motif: String,
        min_gap: usize,
        max_gap: usize,
    },

    #[error("motif '{motif}': could not compile detection pattern: {reason}")]
    Pattern { motif: String, reason: String },
}

/// Errors raised while implanting motifs into sequences or repertoires.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImplantError {
    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(transparent)]
    Motif(#[from] MotifError),

    /// The motif instance does not fit into the target sequence.
    #[error("motif instance of length {motif_length} does not fit into a sequence of length {sequence_length}")]
    MotifTooLong {
        motif_length: usize,
        sequence_length: usize,
    },

    /// Every candidate position was excluded; the caller discards the sequence.
    #[error("no viable implant position in a sequence of length {length}")]
    NoViablePosition { length: usize },

    #[error("signal '{signal}' has no motifs")]
    NoMotifs { signal: String },

    #[error("signal '{signal}': full sequence implanting does not support gapped motif '{motif}'")]
    GappedFullSequence { signal: String, motif: String },

    /// A nucleotide replacement has no reading frame to translate.
    #[error("signal '{signal}': motif '{motif}' instance of length {length} cannot be translated in frame")]
    UntranslatableFullSequence { signal: String, motif: String, length: usize },

    /// A repertoire implanting rate selects no sequence.
    #[error("signal '{signal}': rate {rate} over {count} sequences gives no sequence to implant into")]
    EmptyTarget {
        signal: String,
        rate: f64,
        count: usize,
    },

    #[error("signal '{signal}': only {available} of {required} sequences are free of the signal")]
    NotEnoughSequences {
        signal: String,
        available: usize,
        required: usize,
    },
}

/// Errors raised by generative models.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The replay model has handed out every stored sequence.
    #[error("model '{model}' is exhausted: all {available} imported sequences were already consumed")]
    Exhausted { model: String, available: usize },

    /// The model does not provide the requested capability.
    #[error("model '{model}' does not support {operation}")]
    Unsupported { model: String, operation: String },

    /// No factory is registered under the given name.
    #[error("unknown generative model type '{0}'")]
    UnknownModel(String),

    #[error("invalid model definition: {0}")]
    InvalidModel(String),

    /// Productive-only sampling gave up.
    #[error("model '{model}' produced no productive sequence after {attempts} attempts")]
    NoProductiveSequence { model: String, attempts: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Storage error types.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to database: {0}")]
    Connection(String),

    #[error("failed to initialize database: {0}")]
    Initialization(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("insert failed: {0}")]
    Insert(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("failed to close database: {0}")]
    Close(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("repertoire '{0}' not found")]
    NotFound(String),

    /// A stored column does not match the repertoire element count.
    #[error("repertoire '{repertoire}': column '{column}' has {actual} values, expected {expected}")]
    Corrupted {
        repertoire: String,
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("malformed record: {0}")]
    Record(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Query(e.to_string())
    }
}

/// Errors raised while validating a simulation configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("item '{item}' references unknown signal '{signal}'")]
    UnknownSignal { item: String, signal: String },

    #[error("signal '{signal}' references unknown motif '{motif}'")]
    UnknownMotif { signal: String, motif: String },

    #[error("unknown simulation strategy '{0}'")]
    UnknownStrategy(String),

    /// Signal targets add up to more sequences than the item produces.
    #[error("item '{item}': signal targets require {requested} sequences but only {total} are produced")]
    TargetsExceedTotal {
        item: String,
        requested: usize,
        total: usize,
    },

    #[error(transparent)]
    Motif(#[from] MotifError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Top-level error returned by the simulation driver.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The iteration budget ran out before every target was met.
    #[error(
        "item '{item}': maximum number of iterations ({iterations}) reached with sequences still missing: {remaining}. \
         Signal frequencies may be too low or sequences too short for the motifs; adjust the parameters and rerun"
    )]
    MaxIterationsReached {
        item: String,
        iterations: usize,
        remaining: String,
    },

    #[error("item '{item}': {source}")]
    Generation {
        item: String,
        #[source]
        source: GenerationError,
    },

    #[error("item '{item}', signal '{signal}': {source}")]
    Implant {
        item: String,
        signal: String,
        #[source]
        source: ImplantError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Motif(#[from] MotifError),
}
