//! xtraj - trajectory overlays for robot-manipulation episodes.
//!
//! Two stages turn a raw LeRobot-style capture into an annotated dataset:
//!
//! 1. **Overlay**: per task, read the scene camera calibration
//!    ([`CalibrationRegistry`]); per episode, project the end-effector path of
//!    the next 32 rows onto every frame with gripper close/open markers
//!    ([`OverlayRenderer`], [`EpisodeAligner`]) and encode the result.
//! 2. **Assembly**: join the raw, wrist and overlay videos with the state and
//!    action log into a LeRobot v2 dataset ([`DatasetAssembler`],
//!    [`LeRobotWriter`]).
//!
//! Video I/O goes through the [`xtraj_codec`] traits, so both stages run the
//! same against ffmpeg or the in-memory codec.
//!
//! # Example
//!
//! ```no_run
//! use xtraj::{
//!     CalibrationRegistry, EpisodeAligner, OverlayRenderer, SceneBackend, SuiteFile,
//!     TaskIndexMap, TaskResolver,
//! };
//!
//! # fn main() -> xtraj::Result<()> {
//! let suite = SuiteFile::load("libero_10.json")?;
//! let registry = CalibrationRegistry::build(&suite, &SceneBackend, "agentview", 256)?;
//! let tasks = TaskIndexMap::load_jsonl("libero_10/meta/tasks.jsonl")?;
//! let aligner = EpisodeAligner::new(
//!     OverlayRenderer::default(),
//!     TaskResolver::new(&tasks, &registry),
//! );
//! # let _ = aligner;
//! # Ok(())
//! # }
//! ```

pub mod align;
pub mod assemble;
pub mod calibration;
pub mod config;
pub mod dataset;
pub mod episode;
pub mod error;
pub mod overlay;
pub mod projection;
pub mod tasks;

pub use align::{EpisodeAligner, OverlayStage, StageSummary};
pub use assemble::{AssemblyStage, DatasetAssembler};
pub use calibration::{
    CalibrationEntry, CalibrationRegistry, CameraRig, SceneBackend, SimulatorBackend, SuiteFile,
    TaskDefinition, TaskSuite,
};
pub use config::{
    DatasetLayout, PipelineConfig, MAIN_VIDEO_KEY, OVERLAY_VIDEO_KEY, WRIST_VIDEO_KEY,
};
pub use dataset::{
    libero_features, DatasetSummary, DatasetWriter, EpisodeSummary, FeatureSpec, FrameRecord,
    LeRobotOptions, LeRobotWriter,
};
pub use episode::{EpisodeLog, EpisodeRow, EpisodeStore, ParquetEpisodeStore};
pub use error::{PipelineError, Result};
pub use overlay::{CanvasMapping, OverlayPlan, OverlayRenderer, OverlayStyle};
pub use projection::{project, CameraCalibration, Pixel, ProjectionError};
pub use tasks::{TaskIndexMap, TaskResolver};

pub use xtraj_codec;
