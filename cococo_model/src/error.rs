// Error types for checkpoint loading and inference.
//
// `CheckpointError` covers everything that can go wrong turning a directory
// of manifest + shard files into named weight tensors. `CoconetError` covers
// invalid inference input (checked before any tensor work) and wraps
// checkpoint failures. Numeric anomalies inside sampling are not errors; the
// sampler logs and recovers locally.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint file not found: {0}")]
    MissingFile(String),
    #[error("malformed {file}: {source}")]
    Json {
        file: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported dtype {dtype:?} for weight {name}")]
    UnsupportedDtype { name: String, dtype: String },
    #[error("shard data too short for weight {name}: need {needed} bytes, {available} left")]
    ShortShard {
        name: String,
        needed: usize,
        available: usize,
    },
    #[error("missing variable {0}")]
    MissingVariable(String),
    #[error("variable {name} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("invalid model spec: {0}")]
    InvalidSpec(String),
}

#[derive(Debug, Error)]
pub enum CoconetError {
    #[error("invalid sequence: {0}")]
    InvalidSequence(String),
    #[error("temperature must be a positive number, got {0}")]
    InvalidTemperature(f64),
    #[error("pitch {pitch} outside model range {min}..={max}")]
    PitchOutOfRange { pitch: u8, min: u8, max: u8 },
    #[error("instrument {0} outside the model's voices")]
    InvalidInstrument(usize),
    #[error("note ends at step {end}, past the sequence length {num_steps}")]
    StepOutOfRange { end: usize, num_steps: usize },
    #[error("tensor shape mismatch: {0}")]
    Shape(String),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

pub type Result<T> = std::result::Result<T, CoconetError>;
