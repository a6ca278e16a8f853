//! Error taxonomy for the overlay and dataset pipeline.
//!
//! Every variant is fatal for the episode (and, in the binaries, for the run).
//! Degenerate projection geometry is not an error here; see
//! [`crate::projection::ProjectionError`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A task's render environment could not provide calibration.
    #[error("calibration build failed for task {task_id}: {reason}")]
    CalibrationBuild { task_id: usize, reason: String },

    /// Two tasks share a task id or a language description.
    #[error("duplicate task in calibration registry: {0}")]
    DuplicateTask(String),

    /// A stored registry was computed at another resolution.
    #[error("calibration registry was built at {found}x{found}, pipeline expects {expected}x{expected}")]
    ResolutionMismatch { expected: u32, found: u32 },

    /// A video stream and its log do not have the same length.
    #[error("episode {episode}: {stream} has {frames} frames but the log has {rows} rows")]
    FrameCountMismatch {
        episode: String,
        stream: String,
        frames: usize,
        rows: usize,
    },

    /// The task index of a log is not in the task-index map.
    #[error("episode {episode}: task index {task_index} has no entry in the task map")]
    UnknownTaskIndex { episode: String, task_index: i64 },

    /// The task text resolved for an episode was never calibrated.
    #[error("calibration not found for task {task:?}")]
    CalibrationNotFound { task: String },

    /// A log breaks one of the per-episode invariants.
    #[error("inconsistent episode log {episode}: {reason}")]
    InconsistentLog { episode: String, reason: String },

    /// A required column is missing from a parquet file.
    #[error("{path}: missing column {column:?}")]
    MissingColumn { path: PathBuf, column: String },

    /// A column has a type the store cannot read.
    #[error("{path}: column {column:?} has unsupported type {data_type}")]
    UnsupportedColumn {
        path: PathBuf,
        column: String,
        data_type: String,
    },

    /// A frame index past the end of the episode was requested.
    #[error("frame {index} out of range for episode of {len} rows")]
    FrameOutOfRange { index: usize, len: usize },

    /// A record does not match the declared dataset schema.
    #[error("dataset schema mismatch for {field:?}: {reason}")]
    SchemaMismatch { field: String, reason: String },

    /// `save_episode` was called with no frames buffered.
    #[error("no frames were added before saving the episode")]
    EpisodeNotStarted,

    /// The output dataset directory already exists.
    #[error("dataset directory already exists: {0}")]
    DatasetExists(PathBuf),

    /// A task-map line could not be parsed.
    #[error("{path}:{line}: {reason}")]
    TaskMap {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Codec(#[from] xtraj_codec::CodecError),
}

impl PipelineError {
    /// Create an Io error for a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a Json error for a path.
    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// Create an InconsistentLog error.
    pub fn inconsistent_log(episode: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InconsistentLog {
            episode: episode.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
