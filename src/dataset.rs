//! Multimodal dataset schema and the LeRobot v2 directory writer.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float32Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use xtraj_codec::{EncoderConfig, VideoEncoder};

use crate::config::{MAIN_VIDEO_KEY, OVERLAY_VIDEO_KEY, WRIST_VIDEO_KEY};
use crate::episode::{float_list_array, write_parquet, ACTION_COLUMN, STATE_COLUMN};
use crate::error::{PipelineError, Result};

pub const CODEBASE_VERSION: &str = "v2.1";
/// Episodes per chunk directory.
pub const CHUNKS_SIZE: usize = 1000;

const DATA_PATH: &str = "data/chunk-{episode_chunk:03d}/episode_{episode_index:06d}.parquet";
const VIDEO_PATH: &str =
    "videos/chunk-{episode_chunk:03d}/{video_key}/episode_{episode_index:06d}.mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Video,
    Float32,
    Int64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureNames {
    Axes(Vec<String>),
    Motors { motors: Vec<String> },
}

/// One declared dataset feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    #[serde(skip)]
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<FeatureNames>,
}

impl FeatureSpec {
    #[must_use]
    pub fn video(name: &str, height: usize, width: usize) -> Self {
        Self {
            name: name.to_owned(),
            dtype: DType::Video,
            shape: vec![height, width, 3],
            names: Some(FeatureNames::Axes(strings(&["height", "width", "rgb"]))),
        }
    }

    #[must_use]
    pub fn motors(name: &str, motors: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            dtype: DType::Float32,
            shape: vec![motors.len()],
            names: Some(FeatureNames::Motors {
                motors: strings(motors),
            }),
        }
    }

    fn scalar(name: &str, dtype: DType) -> Self {
        Self {
            name: name.to_owned(),
            dtype,
            shape: vec![1],
            names: None,
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|&v| v.to_owned()).collect()
}

/// The LIBERO trajectory dataset schema at `resolution`×`resolution`.
#[must_use]
pub fn libero_features(resolution: usize) -> Vec<FeatureSpec> {
    vec![
        FeatureSpec::video(MAIN_VIDEO_KEY, resolution, resolution),
        FeatureSpec::video(WRIST_VIDEO_KEY, resolution, resolution),
        FeatureSpec::video(OVERLAY_VIDEO_KEY, resolution, resolution),
        FeatureSpec::motors(
            STATE_COLUMN,
            &["x", "y", "z", "roll", "pitch", "yaw", "gripper", "gripper"],
        ),
        FeatureSpec::motors(
            ACTION_COLUMN,
            &["x", "y", "z", "roll", "pitch", "yaw", "gripper"],
        ),
    ]
}

/// Bookkeeping columns added to every frame.
fn index_features() -> Vec<FeatureSpec> {
    vec![
        FeatureSpec::scalar("timestamp", DType::Float32),
        FeatureSpec::scalar("frame_index", DType::Int64),
        FeatureSpec::scalar("episode_index", DType::Int64),
        FeatureSpec::scalar("index", DType::Int64),
        FeatureSpec::scalar("task_index", DType::Int64),
    ]
}

/// One frame: an image per video feature and a vector per float feature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameRecord {
    pub images: BTreeMap<String, RgbImage>,
    pub values: BTreeMap<String, Vec<f32>>,
}

impl FrameRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn image(mut self, key: &str, image: RgbImage) -> Self {
        self.images.insert(key.to_owned(), image);
        self
    }

    #[must_use]
    pub fn value(mut self, key: &str, value: Vec<f32>) -> Self {
        self.values.insert(key.to_owned(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode_index: usize,
    pub tasks: Vec<String>,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetSummary {
    pub episodes: usize,
    pub frames: usize,
    pub tasks: usize,
}

/// Frame-level sink for a structured dataset.
pub trait DatasetWriter {
    fn features(&self) -> &[FeatureSpec];

    /// Buffer one frame of the current episode under task label `task`.
    fn add_frame(&mut self, record: FrameRecord, task: &str) -> Result<()>;

    /// Flush the buffered frames as one episode.
    fn save_episode(&mut self) -> Result<EpisodeSummary>;

    /// Write dataset-level metadata.
    fn finalize(&mut self) -> Result<DatasetSummary>;
}

/// Options for [`LeRobotWriter::create`].
#[derive(Debug, Clone, PartialEq)]
pub struct LeRobotOptions {
    /// Video settings; the frame rate is also the dataset fps.
    pub encoder: EncoderConfig,
    pub robot_type: String,
    /// Remove an existing dataset directory instead of failing.
    pub overwrite: bool,
}

impl Default for LeRobotOptions {
    fn default() -> Self {
        Self {
            encoder: EncoderConfig::new(20),
            robot_type: "franka".to_owned(),
            overwrite: false,
        }
    }
}

impl LeRobotOptions {
    #[must_use]
    pub fn fps(&self) -> u32 {
        self.encoder.framerate
    }

    #[must_use]
    pub fn encoder(mut self, encoder: EncoderConfig) -> Self {
        self.encoder = encoder;
        self
    }

    #[must_use]
    pub fn robot_type(mut self, robot_type: impl Into<String>) -> Self {
        self.robot_type = robot_type.into();
        self
    }

    #[must_use]
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

#[derive(Serialize)]
struct InfoFile<'a> {
    codebase_version: &'static str,
    robot_type: &'a str,
    total_episodes: usize,
    total_frames: usize,
    total_tasks: usize,
    total_videos: usize,
    total_chunks: usize,
    chunks_size: usize,
    fps: u32,
    splits: BTreeMap<&'static str, String>,
    data_path: &'static str,
    video_path: &'static str,
    features: BTreeMap<&'a str, &'a FeatureSpec>,
}

#[derive(Serialize)]
struct TaskLine<'a> {
    task_index: usize,
    task: &'a str,
}

#[derive(Serialize)]
struct EpisodeStatsLine<'a> {
    episode_index: usize,
    stats: BTreeMap<&'a str, serde_json::Value>,
}

/// Per-channel statistics of one feature over one episode.
#[derive(Debug, Clone, PartialEq)]
struct FeatureStats {
    min: Vec<f64>,
    max: Vec<f64>,
    mean: Vec<f64>,
    std: Vec<f64>,
    /// Frames the statistics cover.
    count: usize,
}

impl FeatureStats {
    /// Images are stored channel-first as `[3, 1, 1]`, everything else flat.
    fn to_json(&self, dtype: DType) -> serde_json::Value {
        let layout = |values: &[f64]| match dtype {
            DType::Video => serde_json::json!(values.iter().map(|v| [[*v]]).collect::<Vec<_>>()),
            DType::Float32 | DType::Int64 => serde_json::json!(values),
        };
        serde_json::json!({
            "min": layout(&self.min),
            "max": layout(&self.max),
            "mean": layout(&self.mean),
            "std": layout(&self.std),
            "count": [self.count],
        })
    }
}

#[derive(Debug, Clone)]
struct StatsAccumulator {
    min: Vec<f64>,
    max: Vec<f64>,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    samples: usize,
    frames: usize,
}

impl StatsAccumulator {
    fn new(width: usize) -> Self {
        Self {
            min: vec![f64::INFINITY; width],
            max: vec![f64::NEG_INFINITY; width],
            sum: vec![0.0; width],
            sum_sq: vec![0.0; width],
            samples: 0,
            frames: 0,
        }
    }

    fn sample(&mut self, values: impl IntoIterator<Item = f64>) {
        for (channel, value) in values.into_iter().enumerate().take(self.sum.len()) {
            self.min[channel] = self.min[channel].min(value);
            self.max[channel] = self.max[channel].max(value);
            self.sum[channel] += value;
            self.sum_sq[channel] += value * value;
        }
        self.samples += 1;
    }

    fn push_values(&mut self, values: impl IntoIterator<Item = f64>) {
        self.sample(values);
        self.frames += 1;
    }

    /// Every pixel is a sample, scaled to `[0, 1]`.
    fn push_image(&mut self, image: &RgbImage) {
        for pixel in image.pixels() {
            self.sample(pixel.0.iter().map(|&c| f64::from(c) / 255.0));
        }
        self.frames += 1;
    }

    fn finish(self) -> FeatureStats {
        let n = self.samples.max(1) as f64;
        let mean = self.sum.iter().map(|sum| sum / n).collect::<Vec<_>>();
        let std = self
            .sum_sq
            .iter()
            .zip(&mean)
            .map(|(sum_sq, mean)| (sum_sq / n - mean * mean).max(0.0).sqrt())
            .collect();
        FeatureStats {
            min: self.min,
            max: self.max,
            mean,
            std,
            count: self.frames,
        }
    }
}

/// Writes a LeRobot v2 dataset directory.
pub struct LeRobotWriter<'a> {
    root: PathBuf,
    options: LeRobotOptions,
    features: Vec<FeatureSpec>,
    encoder: &'a dyn VideoEncoder,
    tasks: Vec<String>,
    episodes: Vec<EpisodeSummary>,
    stats: Vec<BTreeMap<String, FeatureStats>>,
    pending: Vec<(FrameRecord, usize)>,
    total_frames: usize,
}

impl<'a> LeRobotWriter<'a> {
    pub fn create(
        root: impl Into<PathBuf>,
        features: Vec<FeatureSpec>,
        encoder: &'a dyn VideoEncoder,
        options: LeRobotOptions,
    ) -> Result<Self> {
        let root = root.into();
        if root.exists() {
            if !options.overwrite {
                return Err(PipelineError::DatasetExists(root));
            }
            tracing::warn!("removing existing dataset at {}", root.display());
            fs::remove_dir_all(&root).map_err(|err| PipelineError::io(&root, err))?;
        }
        let meta = root.join("meta");
        fs::create_dir_all(&meta).map_err(|err| PipelineError::io(&meta, err))?;

        let reserved = index_features();
        for feature in &features {
            if reserved.iter().any(|r| r.name == feature.name) {
                return Err(PipelineError::SchemaMismatch {
                    field: feature.name.clone(),
                    reason: "name is reserved for index columns".to_owned(),
                });
            }
            if feature.dtype == DType::Int64 {
                return Err(PipelineError::SchemaMismatch {
                    field: feature.name.clone(),
                    reason: "only video and float32 features can be declared".to_owned(),
                });
            }
            if feature.dtype == DType::Video && (feature.shape.len() != 3 || feature.shape[2] != 3)
            {
                return Err(PipelineError::SchemaMismatch {
                    field: feature.name.clone(),
                    reason: format!("video shape must be [height, width, 3], got {:?}", feature.shape),
                });
            }
        }

        tracing::info!(
            "creating dataset at {} ({} fps, {} features)",
            root.display(),
            options.fps(),
            features.len()
        );
        Ok(Self {
            root,
            options,
            features,
            encoder,
            tasks: Vec::new(),
            episodes: Vec::new(),
            stats: Vec::new(),
            pending: Vec::new(),
            total_frames: 0,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an episode file relative to the dataset root.
    #[must_use]
    pub fn data_path(episode_index: usize) -> PathBuf {
        expand_path(DATA_PATH, episode_index, "")
    }

    #[must_use]
    pub fn video_path(key: &str, episode_index: usize) -> PathBuf {
        expand_path(VIDEO_PATH, episode_index, key)
    }

    fn task_index(&mut self, task: &str) -> usize {
        if let Some(index) = self.tasks.iter().position(|t| t == task) {
            return index;
        }
        self.tasks.push(task.to_owned());
        self.tasks.len() - 1
    }

    fn validate(&self, record: &FrameRecord) -> Result<()> {
        let mismatch = |field: &str, reason: String| PipelineError::SchemaMismatch {
            field: field.to_owned(),
            reason,
        };
        for feature in &self.features {
            match feature.dtype {
                DType::Video => {
                    let image = record
                        .images
                        .get(&feature.name)
                        .ok_or_else(|| mismatch(feature.name.as_str(), "missing image".to_owned()))?;
                    let expected = (feature.shape[1] as u64, feature.shape[0] as u64);
                    let found = (u64::from(image.width()), u64::from(image.height()));
                    if expected != found {
                        return Err(mismatch(
                            &feature.name,
                            format!(
                                "image is {}x{}, expected {}x{}",
                                found.0, found.1, expected.0, expected.1
                            ),
                        ));
                    }
                }
                DType::Float32 | DType::Int64 => {
                    let value = record
                        .values
                        .get(&feature.name)
                        .ok_or_else(|| mismatch(feature.name.as_str(), "missing value".to_owned()))?;
                    let width = feature.shape.iter().product::<usize>();
                    if value.len() != width {
                        return Err(mismatch(
                            &feature.name,
                            format!("has {} values, expected {width}", value.len()),
                        ));
                    }
                }
            }
        }
        let declared = |key: &str| self.features.iter().any(|f| f.name == key);
        if let Some(key) = record
            .images
            .keys()
            .chain(record.values.keys())
            .find(|key| !declared(key.as_str()))
        {
            return Err(mismatch(key.as_str(), "not declared in the schema".to_owned()));
        }
        Ok(())
    }

    fn write_frames(&self, episode_index: usize) -> Result<()> {
        let length = self.pending.len();
        let path = self.root.join(Self::data_path(episode_index));

        let mut fields = Vec::new();
        let mut columns: Vec<ArrayRef> = Vec::new();
        for feature in self.features.iter().filter(|f| f.dtype != DType::Video) {
            let rows = self
                .pending
                .iter()
                .map(|(record, _)| record.values[&feature.name].as_slice())
                .collect::<Vec<_>>();
            let width = feature.shape.iter().product::<usize>();
            let column = float_list_array(&rows, width)?;
            fields.push(Field::new(&feature.name, column.data_type().clone(), false));
            columns.push(column);
        }

        let fps = self.options.fps() as f32;
        let timestamps = Float32Array::from_iter_values((0..length).map(|i| i as f32 / fps));
        let frame_index = Int64Array::from_iter_values((0..length).map(|i| i as i64));
        let episode = Int64Array::from_iter_values(std::iter::repeat(episode_index as i64).take(length));
        let index = Int64Array::from_iter_values(
            (0..length).map(|i| (self.total_frames + i) as i64),
        );
        let task_index =
            Int64Array::from_iter_values(self.pending.iter().map(|(_, task)| *task as i64));

        fields.push(Field::new("timestamp", DataType::Float32, false));
        columns.push(Arc::new(timestamps));
        for (name, column) in [
            ("frame_index", frame_index),
            ("episode_index", episode),
            ("index", index),
            ("task_index", task_index),
        ] {
            fields.push(Field::new(name, DataType::Int64, false));
            columns.push(Arc::new(column));
        }

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        write_parquet(&path, &batch)
    }

    /// Statistics of every feature over the buffered episode.
    fn episode_stats(&self, episode_index: usize) -> BTreeMap<String, FeatureStats> {
        let mut stats = BTreeMap::new();
        for feature in &self.features {
            let width = match feature.dtype {
                DType::Video => 3,
                DType::Float32 | DType::Int64 => feature.shape.iter().product(),
            };
            let mut accumulator = StatsAccumulator::new(width);
            for (record, _) in &self.pending {
                match feature.dtype {
                    DType::Video => accumulator.push_image(&record.images[&feature.name]),
                    DType::Float32 | DType::Int64 => accumulator
                        .push_values(record.values[&feature.name].iter().map(|&v| f64::from(v))),
                }
            }
            stats.insert(feature.name.clone(), accumulator.finish());
        }

        let fps = f64::from(self.options.fps());
        for name in ["timestamp", "frame_index", "episode_index", "index", "task_index"] {
            let mut accumulator = StatsAccumulator::new(1);
            for (i, (_, task)) in self.pending.iter().enumerate() {
                let value = match name {
                    "timestamp" => i as f64 / fps,
                    "frame_index" => i as f64,
                    "episode_index" => episode_index as f64,
                    "index" => (self.total_frames + i) as f64,
                    _ => *task as f64,
                };
                accumulator.push_values([value]);
            }
            stats.insert(name.to_owned(), accumulator.finish());
        }
        stats
    }

    fn write_videos(&self, episode_index: usize) -> Result<()> {
        for feature in self.features.iter().filter(|f| f.dtype == DType::Video) {
            let frames = self
                .pending
                .iter()
                .map(|(record, _)| record.images[&feature.name].clone())
                .collect::<Vec<_>>();
            let path = self.root.join(Self::video_path(&feature.name, episode_index));
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
            }
            self.encoder.encode(&path, &frames, &self.options.encoder)?;
        }
        Ok(())
    }

    fn write_meta(&self) -> Result<()> {
        let meta = self.root.join("meta");

        let all_features = self.features.iter().cloned().chain(index_features()).collect::<Vec<_>>();
        let video_count = self.features.iter().filter(|f| f.dtype == DType::Video).count();
        let info = InfoFile {
            codebase_version: CODEBASE_VERSION,
            robot_type: &self.options.robot_type,
            total_episodes: self.episodes.len(),
            total_frames: self.total_frames,
            total_tasks: self.tasks.len(),
            total_videos: self.episodes.len() * video_count,
            total_chunks: self.episodes.len().div_ceil(CHUNKS_SIZE),
            chunks_size: CHUNKS_SIZE,
            fps: self.options.fps(),
            splits: BTreeMap::from([("train", format!("0:{}", self.episodes.len()))]),
            data_path: DATA_PATH,
            video_path: VIDEO_PATH,
            features: all_features.iter().map(|f| (f.name.as_str(), f)).collect(),
        };
        let path = meta.join("info.json");
        let text =
            serde_json::to_string_pretty(&info).map_err(|err| PipelineError::json(&path, err))?;
        fs::write(&path, text).map_err(|err| PipelineError::io(&path, err))?;

        let tasks = self
            .tasks
            .iter()
            .enumerate()
            .map(|(task_index, task)| TaskLine { task_index, task });
        write_jsonl(&meta.join("tasks.jsonl"), tasks)?;
        write_jsonl(&meta.join("episodes.jsonl"), self.episodes.iter())?;

        let dtypes = all_features
            .iter()
            .map(|f| (f.name.as_str(), f.dtype))
            .collect::<BTreeMap<_, _>>();
        let stats = self.stats.iter().enumerate().map(|(episode_index, stats)| EpisodeStatsLine {
            episode_index,
            stats: stats
                .iter()
                .map(|(name, stats)| {
                    let dtype = dtypes.get(name.as_str()).copied().unwrap_or(DType::Float32);
                    (name.as_str(), stats.to_json(dtype))
                })
                .collect(),
        });
        write_jsonl(&meta.join("episodes_stats.jsonl"), stats)
    }
}

fn expand_path(template: &str, episode_index: usize, key: &str) -> PathBuf {
    template
        .replace("{episode_chunk:03d}", &format!("{:03}", episode_index / CHUNKS_SIZE))
        .replace("{episode_index:06d}", &format!("{episode_index:06}"))
        .replace("{video_key}", key)
        .into()
}

fn write_jsonl<T: Serialize>(path: &Path, lines: impl IntoIterator<Item = T>) -> Result<()> {
    let mut text = Vec::new();
    for line in lines {
        serde_json::to_writer(&mut text, &line).map_err(|err| PipelineError::json(path, err))?;
        text.push(b'\n');
    }
    let mut file = fs::File::create(path).map_err(|err| PipelineError::io(path, err))?;
    file.write_all(&text)
        .map_err(|err| PipelineError::io(path, err))
}

impl DatasetWriter for LeRobotWriter<'_> {
    fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    fn add_frame(&mut self, record: FrameRecord, task: &str) -> Result<()> {
        self.validate(&record)?;
        let task_index = self.task_index(task);
        self.pending.push((record, task_index));
        Ok(())
    }

    fn save_episode(&mut self) -> Result<EpisodeSummary> {
        if self.pending.is_empty() {
            return Err(PipelineError::EpisodeNotStarted);
        }
        let episode_index = self.episodes.len();
        self.write_videos(episode_index)?;
        self.write_frames(episode_index)?;
        let stats = self.episode_stats(episode_index);

        let mut tasks = Vec::new();
        for (_, task_index) in &self.pending {
            let task = &self.tasks[*task_index];
            if !tasks.contains(task) {
                tasks.push(task.clone());
            }
        }
        let summary = EpisodeSummary {
            episode_index,
            tasks,
            length: self.pending.len(),
        };
        self.total_frames += summary.length;
        self.pending.clear();
        self.episodes.push(summary.clone());
        self.stats.push(stats);
        tracing::debug!(
            "saved episode {episode_index} ({} frames) to {}",
            summary.length,
            self.root.display()
        );
        Ok(summary)
    }

    fn finalize(&mut self) -> Result<DatasetSummary> {
        if !self.pending.is_empty() {
            tracing::warn!(
                "{} buffered frames were never saved as an episode",
                self.pending.len()
            );
        }
        self.write_meta()?;
        Ok(DatasetSummary {
            episodes: self.episodes.len(),
            frames: self.total_frames,
            tasks: self.tasks.len(),
        })
    }
}
