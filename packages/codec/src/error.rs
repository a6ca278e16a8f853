//! Error types for video codec operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during video encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The ffmpeg process could not be started.
    #[error("failed to start ffmpeg: {0}")]
    FailedToStartFfmpeg(#[source] std::io::Error),

    /// ffmpeg reported an error while processing a file.
    #[error("ffmpeg failed on {path}: {message}")]
    Ffmpeg { path: PathBuf, message: String },

    /// ffmpeg exited with a non-zero status.
    #[error("ffmpeg exited with {status} while processing {path}")]
    FfmpegExit { path: PathBuf, status: String },

    /// I/O error while talking to a backend.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The requested video does not exist in the backend.
    #[error("video not found: {0}")]
    NotFound(PathBuf),

    /// The video has no frames.
    #[error("video has no frames: {0}")]
    EmptyVideo(PathBuf),

    /// Invalid frame dimensions.
    #[error("invalid frame dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// A frame does not match the dimensions of the first frame.
    #[error("frame {index} is {width}x{height}, expected {expected_width}x{expected_height}")]
    FrameSizeMismatch {
        index: usize,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    /// Invalid parameter passed to a backend.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Unsupported pixel format.
    #[error("unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),

    /// Frame conversion error.
    #[error("frame conversion error: {0}")]
    ConversionError(String),
}

impl CodecError {
    /// Create an InvalidParam error with a message.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    /// Create an Ffmpeg error for a path.
    pub fn ffmpeg(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Ffmpeg {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create an Io error for a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
