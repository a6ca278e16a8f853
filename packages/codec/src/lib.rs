//! Video container I/O for xtraj.
//!
//! This crate turns episode video files into ordered RGB frames and back. It is
//! the only place in the workspace that knows about containers and codecs; the
//! rest of the pipeline works on [`image::RgbImage`] frames.
//!
//! Backends:
//!
//! - **ffmpeg** (`ffmpeg` feature, default): drives the `ffmpeg` CLI through
//!   `ffmpeg-sidecar`, raw `rgb24` frames over stdin/stdout
//! - **memory** (always available): an in-process store keyed by path, used by
//!   tests and dry runs
//!
//! # Quick Start (Decoding)
//!
//! ```ignore
//! use xtraj_codec::{FfmpegCodec, VideoDecoder};
//!
//! let codec = FfmpegCodec::new();
//! let video = codec.decode("episode_000000.mp4".as_ref())?;
//! println!("{} frames at {} fps", video.metadata.frame_count, video.metadata.fps);
//! ```
//!
//! # Quick Start (Encoding)
//!
//! ```ignore
//! use xtraj_codec::{Codec, EncoderConfig, FfmpegCodec, VideoEncoder};
//!
//! let config = EncoderConfig::new(30).codec(Codec::H264);
//! FfmpegCodec::new().encode("overlay.mp4".as_ref(), &frames, &config)?;
//! ```
//!
//! # Architecture
//!
//! The crate is built around the [`VideoDecoder`] and [`VideoEncoder`] traits.
//! Each backend implements both, so pipeline code can be written generically and
//! tested without an ffmpeg binary.

mod error;
mod frame;
mod memory;
mod traits;
mod types;

pub use error::CodecError;
pub use frame::{expected_frame_size, DecodedVideo, VideoFrame, VideoMetadata};
pub use memory::MemoryCodec;
pub use traits::{VideoDecoder, VideoEncoder};
pub use types::{Codec, EncoderConfig, EncoderPreset, PixelFormat};

// ffmpeg backend
#[cfg(feature = "ffmpeg")]
mod ffmpeg;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegCodec;
