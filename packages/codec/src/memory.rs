//! In-process video store.
//!
//! `MemoryCodec` keeps encoded videos as plain frame lists keyed by path. It is
//! lossless, so frames read back are byte-identical to what was written.
//! Clones share the same store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::RgbImage;

use crate::frame::{frame_timestamp_us, uniform_dimensions};
use crate::{
    CodecError, DecodedVideo, EncoderConfig, VideoDecoder, VideoEncoder, VideoFrame, VideoMetadata,
};

#[derive(Debug, Clone)]
struct StoredVideo {
    fps: f64,
    frames: Vec<RgbImage>,
}

/// Video backend that stores frames in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCodec {
    videos: Arc<Mutex<BTreeMap<PathBuf, StoredVideo>>>,
}

impl MemoryCodec {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn videos(&self) -> MutexGuard<'_, BTreeMap<PathBuf, StoredVideo>> {
        self.videos.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `frames` under `path` as if they had been recorded at `fps`.
    pub fn insert(&self, path: impl Into<PathBuf>, frames: Vec<RgbImage>, fps: f64) {
        self.videos().insert(path.into(), StoredVideo { fps, frames });
    }

    /// Frames stored under `path`, if any.
    #[must_use]
    pub fn frames(&self, path: &Path) -> Option<Vec<RgbImage>> {
        self.videos().get(path).map(|video| video.frames.clone())
    }

    /// Frame rate stored under `path`, if any.
    #[must_use]
    pub fn fps(&self, path: &Path) -> Option<f64> {
        self.videos().get(path).map(|video| video.fps)
    }

    /// All stored paths in sorted order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.videos().keys().cloned().collect()
    }
}

impl VideoDecoder for MemoryCodec {
    fn decode(&self, path: &Path) -> Result<DecodedVideo, CodecError> {
        let videos = self.videos();
        let video = videos
            .get(path)
            .ok_or_else(|| CodecError::NotFound(path.to_path_buf()))?;
        let (width, height) = video
            .frames
            .first()
            .map(|frame| frame.dimensions())
            .ok_or_else(|| CodecError::EmptyVideo(path.to_path_buf()))?;

        let frames = video
            .frames
            .iter()
            .enumerate()
            .map(|(index, image)| {
                let index = index as u64;
                VideoFrame::new(index, frame_timestamp_us(index, video.fps), image.clone())
            })
            .collect::<Vec<_>>();

        Ok(DecodedVideo {
            metadata: VideoMetadata {
                width,
                height,
                fps: video.fps,
                frame_count: frames.len(),
            },
            frames,
        })
    }
}

impl VideoEncoder for MemoryCodec {
    fn encode(
        &self,
        path: &Path,
        frames: &[RgbImage],
        config: &EncoderConfig,
    ) -> Result<(), CodecError> {
        uniform_dimensions(frames)?;
        if config.framerate == 0 {
            return Err(CodecError::invalid_param("framerate must be positive"));
        }
        self.insert(path, frames.to_vec(), f64::from(config.framerate));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_encode_then_decode() {
        let codec = MemoryCodec::new();
        let frames = (0..3u8)
            .map(|i| RgbImage::from_pixel(4, 2, Rgb([i, i, i])))
            .collect::<Vec<_>>();
        codec
            .encode(Path::new("a.mp4"), &frames, &EncoderConfig::new(20))
            .unwrap();

        let video = codec.decode(Path::new("a.mp4")).unwrap();
        assert_eq!(video.metadata.frame_count, 3);
        assert_eq!(video.metadata.fps, 20.0);
        assert_eq!((video.metadata.width, video.metadata.height), (4, 2));
        assert_eq!(video.frames[2].timestamp_us, 100_000);
        assert_eq!(video.into_images(), frames);
    }

    #[test]
    fn test_clones_share_store() {
        let codec = MemoryCodec::new();
        let other = codec.clone();
        other.insert("b.mp4", vec![RgbImage::new(1, 1)], 30.0);
        assert_eq!(codec.paths(), vec![PathBuf::from("b.mp4")]);
        assert_eq!(codec.fps(Path::new("b.mp4")), Some(30.0));
    }

    #[test]
    fn test_missing_and_empty() {
        let codec = MemoryCodec::new();
        assert!(matches!(
            codec.decode(Path::new("nope.mp4")),
            Err(CodecError::NotFound(_))
        ));
        codec.insert("empty.mp4", Vec::new(), 30.0);
        assert!(matches!(
            codec.decode(Path::new("empty.mp4")),
            Err(CodecError::EmptyVideo(_))
        ));
        assert!(codec
            .encode(Path::new("x.mp4"), &[], &EncoderConfig::default())
            .is_err());
    }
}
