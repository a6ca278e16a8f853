//! Video frame types and conversions.

use image::RgbImage;

use crate::CodecError;

/// A decoded video frame with packed RGB pixels.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Position of the frame in decode order, starting at 0.
    pub index: u64,
    /// Presentation timestamp in microseconds, derived from the stream rate.
    pub timestamp_us: u64,
    /// Pixel data.
    pub image: RgbImage,
}

impl VideoFrame {
    /// Create a new video frame.
    #[must_use]
    pub fn new(index: u64, timestamp_us: u64, image: RgbImage) -> Self {
        Self {
            index,
            timestamp_us,
            image,
        }
    }

    /// Create a frame from packed RGB data.
    pub fn from_rgb(
        width: u32,
        height: u32,
        data: Vec<u8>,
        index: u64,
        timestamp_us: u64,
    ) -> Result<Self, CodecError> {
        let expected = expected_frame_size(width, height);
        if data.len() != expected {
            return Err(CodecError::ConversionError(format!(
                "RGB data size mismatch: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or(CodecError::InvalidDimensions { width, height })?;
        Ok(Self::new(index, timestamp_us, image))
    }

    /// Frame width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Frame height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Stream-level information reported by a decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frame rate the container declares.
    pub fps: f64,
    /// Number of frames actually decoded.
    pub frame_count: usize,
}

/// A fully decoded video.
#[derive(Debug, Clone)]
pub struct DecodedVideo {
    pub metadata: VideoMetadata,
    pub frames: Vec<VideoFrame>,
}

impl DecodedVideo {
    /// Number of decoded frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop frame bookkeeping and keep the images in decode order.
    #[must_use]
    pub fn into_images(self) -> Vec<RgbImage> {
        self.frames.into_iter().map(|frame| frame.image).collect()
    }
}

/// Calculate the packed RGB size of a frame.
#[must_use]
pub fn expected_frame_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Check that all frames share the first frame's dimensions and return them.
pub(crate) fn uniform_dimensions(frames: &[RgbImage]) -> Result<(u32, u32), CodecError> {
    let first = frames
        .first()
        .ok_or_else(|| CodecError::invalid_param("cannot encode an empty frame sequence"))?;
    let (width, height) = first.dimensions();
    if width == 0 || height == 0 {
        return Err(CodecError::InvalidDimensions { width, height });
    }
    for (index, frame) in frames.iter().enumerate() {
        if frame.dimensions() != (width, height) {
            return Err(CodecError::FrameSizeMismatch {
                index,
                width: frame.width(),
                height: frame.height(),
                expected_width: width,
                expected_height: height,
            });
        }
    }
    Ok((width, height))
}

/// Timestamp of frame `index` at `fps`, in microseconds.
pub(crate) fn frame_timestamp_us(index: u64, fps: f64) -> u64 {
    if fps > 0.0 {
        (index as f64 * 1_000_000.0 / fps).round() as u64
    } else {
        0
    }
}
