//! Dataset stage: join raw video, wrist video, overlay video and log into
//! dataset episodes.

use image::RgbImage;
use xtraj_codec::VideoDecoder;

use crate::align::{check_frame_count, StageSummary};
use crate::config::{DatasetLayout, MAIN_VIDEO_KEY, OVERLAY_VIDEO_KEY, WRIST_VIDEO_KEY};
use crate::dataset::{DatasetSummary, DatasetWriter, EpisodeSummary, FrameRecord};
use crate::episode::{EpisodeLog, EpisodeStore, ACTION_COLUMN, STATE_COLUMN};
use crate::error::Result;
use crate::tasks::TaskResolver;

/// Converts one episode into dataset records.
#[derive(Debug, Clone, Copy)]
pub struct DatasetAssembler<'a> {
    resolver: TaskResolver<'a>,
}

impl<'a> DatasetAssembler<'a> {
    #[must_use]
    pub fn new(resolver: TaskResolver<'a>) -> Self {
        Self { resolver }
    }

    /// Append every frame of an episode to `writer` and save it.
    ///
    /// All three streams must have one frame per log row; nothing is written
    /// otherwise. The task label must also have a calibration, so the dataset
    /// only contains episodes the overlay stage could render.
    pub fn assemble(
        &self,
        writer: &mut dyn DatasetWriter,
        episode: &str,
        raw: Vec<RgbImage>,
        wrist: Vec<RgbImage>,
        overlay: Vec<RgbImage>,
        log: &EpisodeLog,
    ) -> Result<EpisodeSummary> {
        check_frame_count(episode, MAIN_VIDEO_KEY, raw.len(), log)?;
        check_frame_count(episode, WRIST_VIDEO_KEY, wrist.len(), log)?;
        check_frame_count(episode, OVERLAY_VIDEO_KEY, overlay.len(), log)?;
        let task = self.resolver.resolve(episode, log.task_index())?;

        let frames = raw.into_iter().zip(wrist).zip(overlay).zip(log.rows());
        for (((image, wrist_image), overlay_image), row) in frames {
            let record = FrameRecord::new()
                .image(MAIN_VIDEO_KEY, image)
                .image(WRIST_VIDEO_KEY, wrist_image)
                .image(OVERLAY_VIDEO_KEY, overlay_image)
                .value(STATE_COLUMN, row.state.clone())
                .value(ACTION_COLUMN, row.action.clone());
            writer.add_frame(record, task.text)?;
        }
        writer.save_episode()
    }
}

/// Assembles every logged episode of a raw dataset directory.
pub struct AssemblyStage<'a> {
    assembler: DatasetAssembler<'a>,
    layout: DatasetLayout,
}

impl<'a> AssemblyStage<'a> {
    #[must_use]
    pub fn new(assembler: DatasetAssembler<'a>, layout: DatasetLayout) -> Self {
        Self { assembler, layout }
    }

    /// Assemble all episodes of `store` in stem order and finalize the writer.
    pub fn run(
        &self,
        decoder: &dyn VideoDecoder,
        store: &dyn EpisodeStore,
        writer: &mut dyn DatasetWriter,
    ) -> Result<(StageSummary, DatasetSummary)> {
        let episodes = store.stems()?;
        let mut summary = StageSummary::default();

        for (position, stem) in episodes.iter().enumerate() {
            let log = store.read(stem)?;
            let raw = decoder
                .decode(&self.layout.raw_video(MAIN_VIDEO_KEY, stem))?
                .into_images();
            let wrist = decoder
                .decode(&self.layout.raw_video(WRIST_VIDEO_KEY, stem))?
                .into_images();
            let overlay = decoder
                .decode(&self.layout.overlay_video(MAIN_VIDEO_KEY, stem))?
                .into_images();

            let saved = self
                .assembler
                .assemble(writer, stem, raw, wrist, overlay, &log)?;
            tracing::info!(
                "[{}/{}] {stem} -> episode {} ({} frames, {:?})",
                position + 1,
                episodes.len(),
                saved.episode_index,
                saved.length,
                saved.tasks
            );
            summary.episodes += 1;
            summary.frames += saved.length;
        }

        let dataset = writer.finalize()?;
        Ok((summary, dataset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationEntry, CalibrationRegistry};
    use crate::dataset::{libero_features, FeatureSpec};
    use crate::episode::EpisodeRow;
    use crate::error::PipelineError;
    use crate::projection::CameraCalibration;
    use crate::tasks::{TaskIndexMap, TaskRecord};
    use nalgebra::{Matrix3, Matrix4};

    /// Writer that only records what it was given.
    #[derive(Default)]
    struct RecordingWriter {
        features: Vec<FeatureSpec>,
        frames: Vec<(FrameRecord, String)>,
        saved: usize,
    }

    impl DatasetWriter for RecordingWriter {
        fn features(&self) -> &[FeatureSpec] {
            &self.features
        }

        fn add_frame(&mut self, record: FrameRecord, task: &str) -> Result<()> {
            self.frames.push((record, task.to_owned()));
            Ok(())
        }

        fn save_episode(&mut self) -> Result<EpisodeSummary> {
            self.saved += 1;
            Ok(EpisodeSummary {
                episode_index: self.saved - 1,
                tasks: Vec::new(),
                length: self.frames.len(),
            })
        }

        fn finalize(&mut self) -> Result<DatasetSummary> {
            Ok(DatasetSummary {
                episodes: self.saved,
                frames: self.frames.len(),
                tasks: 1,
            })
        }
    }

    fn fixtures() -> (TaskIndexMap, CalibrationRegistry) {
        let tasks = TaskIndexMap::from_records([TaskRecord {
            task_index: 2,
            task: "turn on the stove".to_owned(),
        }])
        .unwrap();
        let registry = CalibrationRegistry::from_entries(
            64,
            "agentview",
            [CalibrationEntry {
                task_id: 5,
                language: "turn on the stove".to_owned(),
                calibration: CameraCalibration::new(Matrix3::identity(), Matrix4::identity()),
            }],
        )
        .unwrap();
        (tasks, registry)
    }

    fn log(len: usize) -> EpisodeLog {
        let rows = (0..len)
            .map(|i| EpisodeRow {
                state: vec![i as f32; 8],
                action: vec![-(i as f32); 7],
                task_index: 2,
            })
            .collect();
        EpisodeLog::new("episode_000000", rows).unwrap()
    }

    fn frames(len: usize) -> Vec<RgbImage> {
        (0..len).map(|_| RgbImage::new(2, 2)).collect()
    }

    #[test]
    fn test_assemble_episode() {
        let (tasks, registry) = fixtures();
        let assembler = DatasetAssembler::new(TaskResolver::new(&tasks, &registry));
        let mut writer = RecordingWriter {
            features: libero_features(2),
            ..Default::default()
        };
        let summary = assembler
            .assemble(&mut writer, "episode_000000", frames(4), frames(4), frames(4), &log(4))
            .unwrap();
        assert_eq!(summary.length, 4);
        assert_eq!(writer.saved, 1);
        let (record, task) = &writer.frames[3];
        assert_eq!(task, "turn on the stove");
        assert_eq!(record.values[STATE_COLUMN], vec![3.0; 8]);
        assert_eq!(record.values[ACTION_COLUMN], vec![-3.0; 7]);
        assert_eq!(record.images.len(), 3);
    }

    #[test]
    fn test_length_mismatch_writes_nothing() {
        let (tasks, registry) = fixtures();
        let assembler = DatasetAssembler::new(TaskResolver::new(&tasks, &registry));
        let mut writer = RecordingWriter::default();
        let err = assembler
            .assemble(&mut writer, "episode_000000", frames(40), frames(40), frames(39), &log(40))
            .unwrap_err();
        match err {
            PipelineError::FrameCountMismatch {
                stream,
                frames,
                rows,
                ..
            } => {
                assert_eq!(stream, OVERLAY_VIDEO_KEY);
                assert_eq!((frames, rows), (39, 40));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(writer.frames.is_empty());
        assert_eq!(writer.saved, 0);
    }

    /// Both stages over an on-disk log directory with in-memory video.
    mod pipeline {
        use image::{Rgb, RgbImage};
        use nalgebra::{Matrix3, Matrix4};
        use xtraj_codec::{EncoderConfig, MemoryCodec, VideoEncoder};

        use crate::align::{EpisodeAligner, OverlayStage};
        use crate::assemble::{AssemblyStage, DatasetAssembler};
        use crate::calibration::{CalibrationEntry, CalibrationRegistry};
        use crate::config::{DatasetLayout, MAIN_VIDEO_KEY, OVERLAY_VIDEO_KEY, WRIST_VIDEO_KEY};
        use crate::dataset::{libero_features, LeRobotOptions, LeRobotWriter};
        use crate::episode::{EpisodeLog, EpisodeRow, EpisodeStore, ParquetEpisodeStore};
        use crate::error::PipelineError;
        use crate::overlay::{CanvasMapping, GripperTransition, OverlayRenderer, OverlayStyle};
        use crate::projection::CameraCalibration;
        use crate::tasks::{TaskIndexMap, TaskResolver};

        const TASKS: [&str; 2] = [
            "put the black bowl on the plate",
            "turn on the stove and put the moka pot on it",
        ];
        const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
        const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

        fn calibration() -> CameraCalibration {
            let mut extrinsic = Matrix4::identity();
            extrinsic[(2, 3)] = -2.0;
            CameraCalibration::new(
                Matrix3::new(100.0, 0.0, 128.0, 0.0, 100.0, 128.0, 0.0, 0.0, 1.0),
                extrinsic,
            )
        }

        fn registry(task_count: usize) -> CalibrationRegistry {
            let entries = TASKS[..task_count]
                .iter()
                .enumerate()
                .map(|(task_id, language)| CalibrationEntry {
                    task_id,
                    language: (*language).to_owned(),
                    calibration: calibration(),
                });
            CalibrationRegistry::from_entries(256, "agentview", entries).unwrap()
        }

        fn task_map() -> TaskIndexMap {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("tasks.jsonl");
            let lines = TASKS
                .iter()
                .enumerate()
                .map(|(i, task)| format!("{{\"task_index\": {i}, \"task\": \"{task}\"}}\n"))
                .collect::<String>();
            std::fs::write(&path, lines).unwrap();
            TaskIndexMap::load_jsonl(&path).unwrap()
        }

        /// Ten rows moving right and up; the gripper closes at row 5 and opens at row 8.
        fn episode_log(stem: &str, task_index: i64) -> EpisodeLog {
            let rows = (0..10)
                .map(|i| {
                    let gap = if (5..8).contains(&i) { 0.0 } else { 0.04 };
                    EpisodeRow {
                        state: vec![
                            -1.0 + 0.25 * i as f32,
                            0.0625 * i as f32,
                            0.0,
                            0.0,
                            0.0,
                            0.0,
                            gap,
                            0.0,
                        ],
                        action: vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, if gap > 0.0 { -1.0 } else { 1.0 }],
                        task_index,
                    }
                })
                .collect();
            EpisodeLog::new(stem, rows).unwrap()
        }

        fn black_frames(count: usize) -> Vec<RgbImage> {
            (0..count).map(|_| RgbImage::new(256, 256)).collect()
        }

        struct Fixture {
            _dir: tempfile::TempDir,
            layout: DatasetLayout,
            store: ParquetEpisodeStore,
            codec: MemoryCodec,
        }

        fn fixture() -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let layout = DatasetLayout::new(dir.path().join("libero_10"));
            let store = ParquetEpisodeStore::new(layout.data_dir());
            std::fs::create_dir_all(store.dir()).unwrap();
            let codec = MemoryCodec::new();

            for (index, stem) in ["episode_000000", "episode_000001"].iter().enumerate() {
                store.write(&episode_log(stem, index as i64)).unwrap();
                codec.insert(layout.raw_video(MAIN_VIDEO_KEY, stem), black_frames(10), 20.0);
                codec.insert(layout.raw_video(WRIST_VIDEO_KEY, stem), black_frames(10), 20.0);
            }
            Fixture {
                _dir: dir,
                layout,
                store,
                codec,
            }
        }

        fn renderer() -> OverlayRenderer {
            OverlayRenderer::new(OverlayStyle::default().canvas(CanvasMapping::Identity))
        }

        #[test]
        fn test_overlay_then_dataset() {
            let fixture = fixture();
            let (tasks, registry) = (task_map(), registry(2));
            let resolver = TaskResolver::new(&tasks, &registry);

            let stage = OverlayStage::new(
                EpisodeAligner::new(renderer(), resolver).parallel(true),
                fixture.layout.clone(),
                EncoderConfig::new(30),
            );
            let episodes = fixture.store.stems().unwrap();
            let summary = stage
                .run_episodes(&episodes, &fixture.codec, &fixture.codec, &fixture.store)
                .unwrap();
            assert_eq!((summary.episodes, summary.frames), (2, 20));

            let overlay_path = fixture.layout.overlay_video(MAIN_VIDEO_KEY, "episode_000000");
            let overlay = fixture.codec.frames(&overlay_path).unwrap();
            assert_eq!(overlay.len(), 10);
            // Written at the canonical overlay rate, not the 20 fps source rate.
            assert_eq!(fixture.codec.fps(&overlay_path), Some(30.0));

            // Frame 0 sees the whole episode.
            let log = fixture.store.read("episode_000000").unwrap();
            let plan = renderer().plan(&log, 0, &calibration()).unwrap();
            assert_eq!(plan.markers.len(), 2);
            let (close, open) = (plan.markers[0], plan.markers[1]);
            assert_eq!((close.row, close.transition), (5, GripperTransition::Close));
            assert_eq!((open.row, open.transition), (8, GripperTransition::Open));
            let expected = CanvasMapping::Identity.map(calibration().project(&log.end_effector(5).unwrap()).unwrap());
            assert_eq!(close.center, expected);

            assert_eq!(plan.segments.len(), 9);
            assert!(plan
                .segments
                .windows(2)
                .all(|pair| pair[0].color.0[2] < pair[1].color.0[2]));

            let top = |center: crate::overlay::Point| (center.x as u32, (center.y - 5) as u32);
            let (x, y) = top(close.center);
            assert_eq!(*overlay[0].get_pixel(x, y), GREEN);
            let (x, y) = top(open.center);
            assert_eq!(*overlay[0].get_pixel(x, y), BLUE);

            // Frame 6 starts inside the closed span, so only the reopening is marked.
            assert!(overlay[6].pixels().all(|p| *p != GREEN));
            assert!(overlay[6].pixels().any(|p| *p == BLUE));
            assert!(overlay[9].pixels().all(|p| *p == Rgb([0, 0, 0])));

            // Assemble the dataset from raw, wrist and overlay streams.
            let output = fixture.layout.root().with_file_name("libero_10_traj");
            let mut writer = LeRobotWriter::create(
                &output,
                libero_features(256),
                &fixture.codec,
                LeRobotOptions::default(),
            )
            .unwrap();
            let assembly = AssemblyStage::new(DatasetAssembler::new(resolver), fixture.layout.clone());
            let (stage_summary, dataset) = assembly
                .run(&fixture.codec, &fixture.store, &mut writer)
                .unwrap();
            assert_eq!(stage_summary.frames, 20);
            assert_eq!((dataset.episodes, dataset.frames, dataset.tasks), (2, 20, 2));

            assert!(output.join(LeRobotWriter::data_path(1)).is_file());
            let traj = output.join(LeRobotWriter::video_path(OVERLAY_VIDEO_KEY, 0));
            assert_eq!(fixture.codec.frames(&traj).unwrap(), overlay);
            let tasks_jsonl = std::fs::read_to_string(output.join("meta/tasks.jsonl")).unwrap();
            assert!(tasks_jsonl.contains(TASKS[1]));
        }

        #[test]
        fn test_missing_calibration_stops_the_run() {
            let fixture = fixture();
            let (tasks, registry) = (task_map(), registry(1));
            let stage = OverlayStage::new(
                EpisodeAligner::new(renderer(), TaskResolver::new(&tasks, &registry)),
                fixture.layout.clone(),
                EncoderConfig::new(30),
            );
            let episodes = fixture.store.stems().unwrap();
            let err = stage
                .run_episodes(&episodes, &fixture.codec, &fixture.codec, &fixture.store)
                .unwrap_err();
            assert!(matches!(
                err,
                PipelineError::CalibrationNotFound { task } if task == TASKS[1]
            ));
            // The first episode was finished before the failure.
            assert!(fixture
                .codec
                .frames(&fixture.layout.overlay_video(MAIN_VIDEO_KEY, "episode_000000"))
                .is_some());
        }

        #[test]
        fn test_short_overlay_is_rejected() {
            let fixture = fixture();
            let (tasks, registry) = (task_map(), registry(2));
            for stem in ["episode_000000", "episode_000001"] {
                let path = fixture.layout.overlay_video(MAIN_VIDEO_KEY, stem);
                fixture
                    .codec
                    .encode(&path, &black_frames(9), &EncoderConfig::new(30))
                    .unwrap();
            }

            let output = fixture.layout.root().with_file_name("out");
            let mut writer = LeRobotWriter::create(
                &output,
                libero_features(256),
                &fixture.codec,
                LeRobotOptions::default(),
            )
            .unwrap();
            let assembly = AssemblyStage::new(
                DatasetAssembler::new(TaskResolver::new(&tasks, &registry)),
                fixture.layout.clone(),
            );
            let err = assembly
                .run(&fixture.codec, &fixture.store, &mut writer)
                .unwrap_err();
            assert!(matches!(
                err,
                PipelineError::FrameCountMismatch {
                    frames: 9,
                    rows: 10,
                    ..
                }
            ));
            assert!(!output.join("data").exists());
        }
    }
}
