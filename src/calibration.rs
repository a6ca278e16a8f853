//! Per-task camera calibration.
//!
//! A [`CalibrationRegistry`] is built once per run by instantiating every task
//! of a [`TaskSuite`] in a [`SimulatorBackend`] and reading one named camera.
//! Entries are keyed by the task's language description, which is the join key
//! used by the overlay and dataset stages.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use nalgebra::{Matrix3, Matrix4, Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::projection::CameraCalibration;

/// Camera as declared in a scene: vertical field of view in degrees, world
/// position, and MuJoCo `wxyz` orientation quaternion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneCamera {
    pub fovy: f64,
    pub pos: [f64; 3],
    pub quat: [f64; 4],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDefinition {
    #[serde(default)]
    pub cameras: BTreeMap<String, SceneCamera>,
}

/// One task of a benchmark suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub task_id: usize,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bddl_file: Option<String>,
    #[serde(default)]
    pub scene: SceneDefinition,
}

/// Source of task definitions.
pub trait TaskSuite {
    fn name(&self) -> &str;
    fn tasks(&self) -> &[TaskDefinition];
}

/// Render environment able to place a task's scene and expose its cameras.
pub trait SimulatorBackend {
    fn instantiate<'t>(
        &self,
        task: &'t TaskDefinition,
        resolution: u32,
    ) -> anyhow::Result<Box<dyn CameraRig + 't>>;
}

/// Cameras of one instantiated environment.
pub trait CameraRig {
    fn calibration(&self, camera: &str) -> anyhow::Result<CameraCalibration>;
}

/// Task suite exported to JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteFile {
    pub suite: String,
    pub tasks: Vec<TaskDefinition>,
}

impl SuiteFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
        serde_json::from_str(&text).map_err(|err| PipelineError::json(path, err))
    }
}

impl TaskSuite for SuiteFile {
    fn name(&self) -> &str {
        &self.suite
    }

    fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }
}

/// Evaluates scene cameras with MuJoCo's pinhole model.
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneBackend;

struct SceneRig<'a> {
    task: &'a TaskDefinition,
    resolution: u32,
}

impl SimulatorBackend for SceneBackend {
    fn instantiate<'t>(
        &self,
        task: &'t TaskDefinition,
        resolution: u32,
    ) -> anyhow::Result<Box<dyn CameraRig + 't>> {
        if resolution == 0 {
            bail!("render resolution must be positive");
        }
        Ok(Box::new(SceneRig { task, resolution }))
    }
}

impl CameraRig for SceneRig<'_> {
    fn calibration(&self, camera: &str) -> anyhow::Result<CameraCalibration> {
        let cameras = &self.task.scene.cameras;
        let Some(scene_camera) = cameras.get(camera) else {
            let known = cameras.keys().map(String::as_str).collect::<Vec<_>>();
            bail!("camera {camera:?} not in scene (available: {known:?})");
        };
        let intrinsic = scene_intrinsic(scene_camera.fovy, self.resolution)
            .with_context(|| format!("camera {camera:?}"))?;
        let extrinsic = scene_extrinsic(scene_camera).with_context(|| format!("camera {camera:?}"))?;
        Ok(CameraCalibration::new(intrinsic, extrinsic))
    }
}

/// Square-image intrinsic matrix for a vertical field of view in degrees.
pub fn scene_intrinsic(fovy: f64, resolution: u32) -> anyhow::Result<Matrix3<f64>> {
    if !(fovy > 0.0 && fovy < 180.0) {
        bail!("field of view {fovy} is outside (0, 180) degrees");
    }
    let size = f64::from(resolution);
    let focal = 0.5 * size / (fovy * std::f64::consts::PI / 360.0).tan();
    let center = size / 2.0;
    Ok(Matrix3::new(
        focal, 0.0, center, //
        0.0, focal, center, //
        0.0, 0.0, 1.0,
    ))
}

/// Camera pose in the world with MuJoCo's camera axes converted to a
/// `+z`-forward, `+y`-down optical frame.
pub fn scene_extrinsic(camera: &SceneCamera) -> anyhow::Result<Matrix4<f64>> {
    let [w, x, y, z] = camera.quat;
    let quat = Quaternion::new(w, x, y, z);
    if !(quat.norm() > f64::EPSILON) || !quat.norm().is_finite() {
        bail!("camera orientation {:?} is not a valid quaternion", camera.quat);
    }
    let rotation = UnitQuaternion::from_quaternion(quat).to_rotation_matrix();

    let mut pose = Matrix4::identity();
    pose.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(rotation.matrix());
    pose.fixed_view_mut::<3, 1>(0, 3)
        .copy_from(&Vector3::from(camera.pos));

    let axis_correction = Matrix4::from_diagonal(&nalgebra::Vector4::new(1.0, -1.0, -1.0, 1.0));
    Ok(pose * axis_correction)
}

/// Calibration of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub task_id: usize,
    pub language: String,
    #[serde(flatten)]
    pub calibration: CameraCalibration,
}

/// Immutable task-language to calibration map.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRegistry {
    resolution: u32,
    camera: String,
    entries: BTreeMap<String, CalibrationEntry>,
}

#[derive(Serialize, Deserialize)]
struct RegistryFile {
    resolution: u32,
    camera: String,
    entries: Vec<CalibrationEntry>,
}

impl CalibrationRegistry {
    /// Build a registry from already computed entries.
    pub fn from_entries(
        resolution: u32,
        camera: impl Into<String>,
        entries: impl IntoIterator<Item = CalibrationEntry>,
    ) -> Result<Self> {
        let mut task_ids = BTreeSet::new();
        let mut map = BTreeMap::new();
        for entry in entries {
            if !task_ids.insert(entry.task_id) {
                return Err(PipelineError::DuplicateTask(format!(
                    "task id {}",
                    entry.task_id
                )));
            }
            if map.contains_key(&entry.language) {
                return Err(PipelineError::DuplicateTask(format!(
                    "language {:?}",
                    entry.language
                )));
            }
            map.insert(entry.language.clone(), entry);
        }
        Ok(Self {
            resolution,
            camera: camera.into(),
            entries: map,
        })
    }

    /// Instantiate every task of `suite` and read `camera` at `resolution`.
    pub fn build(
        suite: &dyn TaskSuite,
        backend: &dyn SimulatorBackend,
        camera: &str,
        resolution: u32,
    ) -> Result<Self> {
        let tasks = suite.tasks();
        tracing::info!(
            "building calibration for {} tasks of {} ({camera} at {resolution}x{resolution})",
            tasks.len(),
            suite.name()
        );

        let mut entries = Vec::with_capacity(tasks.len());
        for task in tasks {
            let build_error = |err: anyhow::Error| PipelineError::CalibrationBuild {
                task_id: task.task_id,
                reason: format!("{err:#}"),
            };
            let rig = backend
                .instantiate(task, resolution)
                .map_err(build_error)?;
            let calibration = rig.calibration(camera).map_err(build_error)?;
            tracing::debug!("task {}: {:?}", task.task_id, task.language);
            entries.push(CalibrationEntry {
                task_id: task.task_id,
                language: task.language.clone(),
                calibration,
            });
        }

        Self::from_entries(resolution, camera, entries)
    }

    /// Read a registry saved with [`CalibrationRegistry::save`].
    pub fn load(path: impl AsRef<Path>, expected_resolution: u32) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
        let file: RegistryFile =
            serde_json::from_str(&text).map_err(|err| PipelineError::json(path, err))?;
        if file.resolution != expected_resolution {
            return Err(PipelineError::ResolutionMismatch {
                expected: expected_resolution,
                found: file.resolution,
            });
        }
        Self::from_entries(file.resolution, file.camera, file.entries)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = RegistryFile {
            resolution: self.resolution,
            camera: self.camera.clone(),
            entries: self.entries_by_task_id().into_iter().cloned().collect(),
        };
        let text =
            serde_json::to_string_pretty(&file).map_err(|err| PipelineError::json(path, err))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
        }
        fs::write(path, text).map_err(|err| PipelineError::io(PathBuf::from(path), err))
    }

    /// Entry for a task language description.
    #[must_use]
    pub fn get(&self, language: &str) -> Option<&CalibrationEntry> {
        self.entries.get(language)
    }

    #[must_use]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    #[must_use]
    pub fn camera(&self) -> &str {
        &self.camera
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by task id.
    #[must_use]
    pub fn entries_by_task_id(&self) -> Vec<&CalibrationEntry> {
        let mut entries = self.entries.values().collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.task_id);
        entries
    }
}
