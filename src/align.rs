//! Overlay stage: pair each raw episode video with its log and write the
//! rendered trajectory video.

use image::RgbImage;
use rayon::prelude::*;
use xtraj_codec::{EncoderConfig, VideoDecoder, VideoEncoder};

use crate::config::{DatasetLayout, MAIN_VIDEO_KEY};
use crate::episode::{files_with_extension, EpisodeLog, EpisodeStore};
use crate::error::{PipelineError, Result};
use crate::overlay::OverlayRenderer;
use crate::tasks::TaskResolver;

/// Check that a video stream has one frame per log row.
pub(crate) fn check_frame_count(
    episode: &str,
    stream: &str,
    frames: usize,
    log: &EpisodeLog,
) -> Result<()> {
    if frames != log.len() {
        return Err(PipelineError::FrameCountMismatch {
            episode: episode.to_owned(),
            stream: stream.to_owned(),
            frames,
            rows: log.len(),
        });
    }
    Ok(())
}

/// Renders the overlay of one episode.
#[derive(Debug, Clone, Copy)]
pub struct EpisodeAligner<'a> {
    renderer: OverlayRenderer,
    resolver: TaskResolver<'a>,
    parallel: bool,
}

impl<'a> EpisodeAligner<'a> {
    #[must_use]
    pub fn new(renderer: OverlayRenderer, resolver: TaskResolver<'a>) -> Self {
        Self {
            renderer,
            resolver,
            parallel: false,
        }
    }

    /// Render frames on the rayon pool. Output order is unchanged.
    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Overlay frames for `raw_frames`, one per log row.
    pub fn align(
        &self,
        episode: &str,
        raw_frames: &[RgbImage],
        log: &EpisodeLog,
    ) -> Result<Vec<RgbImage>> {
        check_frame_count(episode, MAIN_VIDEO_KEY, raw_frames.len(), log)?;
        let task = self.resolver.resolve(episode, log.task_index())?;
        tracing::debug!("{episode}: task {} {:?}", task.entry.task_id, task.text);

        let track = self.renderer.track(log, &task.entry.calibration)?;
        let render = |(index, background): (usize, &RgbImage)| {
            self.renderer.render_track(background, &track, index)
        };
        if self.parallel {
            raw_frames.par_iter().enumerate().map(render).collect()
        } else {
            raw_frames.iter().enumerate().map(render).collect()
        }
    }
}

/// Totals of a stage run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSummary {
    pub episodes: usize,
    pub frames: usize,
}

/// Overlays every episode of a raw dataset directory.
pub struct OverlayStage<'a> {
    aligner: EpisodeAligner<'a>,
    layout: DatasetLayout,
    encoder_config: EncoderConfig,
}

impl<'a> OverlayStage<'a> {
    #[must_use]
    pub fn new(aligner: EpisodeAligner<'a>, layout: DatasetLayout, encoder_config: EncoderConfig) -> Self {
        Self {
            aligner,
            layout,
            encoder_config,
        }
    }

    /// Stems of the raw main-camera videos, sorted.
    pub fn episodes(&self) -> Result<Vec<String>> {
        files_with_extension(&self.layout.raw_video_dir(MAIN_VIDEO_KEY), "mp4")
    }

    /// Overlay every raw video found on disk.
    pub fn run(
        &self,
        decoder: &dyn VideoDecoder,
        encoder: &dyn VideoEncoder,
        store: &dyn EpisodeStore,
    ) -> Result<StageSummary> {
        let episodes = self.episodes()?;
        self.run_episodes(&episodes, decoder, encoder, store)
    }

    /// Overlay the given episodes in order, stopping at the first failure.
    pub fn run_episodes(
        &self,
        episodes: &[String],
        decoder: &dyn VideoDecoder,
        encoder: &dyn VideoEncoder,
        store: &dyn EpisodeStore,
    ) -> Result<StageSummary> {
        let mut summary = StageSummary::default();
        for (position, stem) in episodes.iter().enumerate() {
            let input = self.layout.raw_video(MAIN_VIDEO_KEY, stem);
            let video = decoder.decode(&input)?;
            if (video.metadata.fps - f64::from(self.encoder_config.framerate)).abs() > 0.5 {
                tracing::debug!(
                    "{stem}: source is {} fps, overlay is written at {} fps",
                    video.metadata.fps,
                    self.encoder_config.framerate
                );
            }
            let log = store.read(stem)?;
            let frames = self.aligner.align(stem, &video.into_images(), &log)?;

            let output = self.layout.overlay_video(MAIN_VIDEO_KEY, stem);
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
            }
            encoder.encode(&output, &frames, &self.encoder_config)?;

            tracing::info!(
                "[{}/{}] {stem}: {} overlay frames -> {}",
                position + 1,
                episodes.len(),
                frames.len(),
                output.display()
            );
            summary.episodes += 1;
            summary.frames += frames.len();
        }
        Ok(summary)
    }
}
