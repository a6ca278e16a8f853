//! Pipeline configuration and dataset directory layout.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use xtraj_codec::{Codec, EncoderConfig};

use crate::error::{PipelineError, Result};
use crate::overlay::OverlayStyle;

/// Third-person camera video key.
pub const MAIN_VIDEO_KEY: &str = "observation.images.image";
/// Wrist camera video key.
pub const WRIST_VIDEO_KEY: &str = "observation.images.wrist_image";
/// Trajectory overlay video key.
pub const OVERLAY_VIDEO_KEY: &str = "observation.images.image_traj";

/// Shared settings for both stages. Every field has a default, so an empty
/// JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Square render and capture resolution.
    pub resolution: u32,
    /// Scene camera the overlay is projected through.
    pub camera: String,
    /// Frame rate of written overlay videos.
    pub overlay_fps: u32,
    pub codec: Codec,
    /// Frame rate declared in the assembled dataset.
    pub dataset_fps: u32,
    pub robot_type: String,
    pub style: OverlayStyle,
    /// Render the frames of an episode on the rayon pool.
    pub parallel_render: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resolution: 256,
            camera: "agentview".to_owned(),
            overlay_fps: 30,
            codec: Codec::H264,
            dataset_fps: 20,
            robot_type: "franka".to_owned(),
            style: OverlayStyle::default(),
            parallel_render: true,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
        serde_json::from_str(&text).map_err(|err| PipelineError::json(path, err))
    }

    /// Load `path` if given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), |path| Self::load(path))
    }

    /// Encoder settings for overlay videos.
    #[must_use]
    pub fn overlay_encoder(&self) -> EncoderConfig {
        EncoderConfig::new(self.overlay_fps).codec(self.codec)
    }

    /// Encoder settings for dataset videos.
    #[must_use]
    pub fn dataset_encoder(&self) -> EncoderConfig {
        EncoderConfig::new(self.dataset_fps).codec(self.codec)
    }
}

/// Directory layout of a raw LeRobot-style capture.
///
/// ```text
/// <root>/meta/tasks.jsonl
/// <root>/data/chunk-000/<stem>.parquet
/// <root>/videos/chunk-000/<video_key>/<stem>.mp4
/// <root>/videos_traj/chunk-000/<video_key>/<stem>.mp4   (overlay output)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
}

const CHUNK: &str = "chunk-000";

impl DatasetLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn tasks_file(&self) -> PathBuf {
        self.root.join("meta").join("tasks.jsonl")
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data").join(CHUNK)
    }

    #[must_use]
    pub fn raw_video_dir(&self, key: &str) -> PathBuf {
        self.root.join("videos").join(CHUNK).join(key)
    }

    #[must_use]
    pub fn overlay_video_dir(&self, key: &str) -> PathBuf {
        self.root.join("videos_traj").join(CHUNK).join(key)
    }

    #[must_use]
    pub fn raw_video(&self, key: &str, stem: &str) -> PathBuf {
        self.raw_video_dir(key).join(format!("{stem}.mp4"))
    }

    #[must_use]
    pub fn overlay_video(&self, key: &str, stem: &str) -> PathBuf {
        self.overlay_video_dir(key).join(format!("{stem}.mp4"))
    }
}
