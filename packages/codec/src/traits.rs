//! Core traits for video encoding/decoding.

use std::path::Path;

use image::RgbImage;

use crate::{CodecError, DecodedVideo, EncoderConfig};

/// Trait for video decoders.
///
/// Implementors read a whole container file and return its frames in
/// presentation order as packed RGB.
///
/// # Example
///
/// ```ignore
/// use xtraj_codec::{FfmpegCodec, VideoDecoder};
///
/// let video = FfmpegCodec::new().decode("episode_000000.mp4".as_ref())?;
/// for frame in &video.frames {
///     // frame.image is an RgbImage
/// }
/// ```
pub trait VideoDecoder: Send + Sync {
    /// Decode every frame of the video at `path`.
    fn decode(&self, path: &Path) -> Result<DecodedVideo, CodecError>;
}

/// Trait for video encoders.
///
/// Implementors write an ordered frame sequence into a container file at the
/// configured frame rate. All frames must share one size.
pub trait VideoEncoder: Send + Sync {
    /// Encode `frames` into a new file at `path`, replacing any existing file.
    fn encode(
        &self,
        path: &Path,
        frames: &[RgbImage],
        config: &EncoderConfig,
    ) -> Result<(), CodecError>;
}
