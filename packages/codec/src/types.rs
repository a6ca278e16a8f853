//! Core types for video encoding/decoding.

use serde::{Deserialize, Serialize};

/// Video codec type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// H.264/AVC codec.
    #[default]
    H264,
    /// H.265/HEVC codec.
    Hevc,
    /// AV1 codec.
    Av1,
}

impl Codec {
    /// Name of the ffmpeg encoder used for this codec.
    #[must_use]
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::Hevc => "libx265",
            Self::Av1 => "libsvtav1",
        }
    }
}

/// Pixel format stored in the output container.
///
/// Frames always travel through the pipeline as packed RGB; this only
/// controls what the encoder writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// YUV 4:2:0 planar, the most widely playable choice.
    #[default]
    Yuv420p,
    /// YUV 4:4:4 planar, no chroma subsampling.
    Yuv444p,
}

impl PixelFormat {
    /// Name ffmpeg uses for this format.
    #[must_use]
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
            Self::Yuv444p => "yuv444p",
        }
    }
}

/// Encoder preset controlling speed/quality tradeoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderPreset {
    /// Fastest encoding, lowest quality.
    Fastest,
    /// Fast encoding.
    Fast,
    /// Medium speed.
    #[default]
    Medium,
    /// Slow encoding, higher quality.
    Slow,
}

impl EncoderPreset {
    /// x264/x265 preset name.
    #[must_use]
    pub fn x26x_name(&self) -> &'static str {
        match self {
            Self::Fastest => "ultrafast",
            Self::Fast => "veryfast",
            Self::Medium => "medium",
            Self::Slow => "slow",
        }
    }
}

/// Configuration for encoding a sequence of frames into a container.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Output frame rate in frames per second.
    pub framerate: u32,
    /// Video codec to use.
    pub codec: Codec,
    /// Encoder preset (speed/quality tradeoff).
    pub preset: EncoderPreset,
    /// Constant rate factor. `None` leaves the encoder default.
    pub crf: Option<u8>,
    /// Pixel format written to the container.
    pub pixel_format: PixelFormat,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            framerate: 30,
            codec: Codec::H264,
            preset: EncoderPreset::Medium,
            crf: None,
            pixel_format: PixelFormat::Yuv420p,
        }
    }
}

impl EncoderConfig {
    /// Create a new encoder configuration with the given frame rate.
    #[must_use]
    pub fn new(framerate: u32) -> Self {
        Self {
            framerate,
            ..Default::default()
        }
    }

    /// Set the codec.
    #[must_use]
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the encoder preset.
    #[must_use]
    pub fn preset(mut self, preset: EncoderPreset) -> Self {
        self.preset = preset;
        self
    }

    /// Set the constant rate factor.
    #[must_use]
    pub fn crf(mut self, crf: u8) -> Self {
        self.crf = Some(crf);
        self
    }

    /// Set the container pixel format.
    #[must_use]
    pub fn pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }
}
