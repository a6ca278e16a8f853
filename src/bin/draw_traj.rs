//! draw-traj - render end-effector trajectory overlays for a raw dataset.
//!
//! Reads `videos/chunk-000/observation.images.image/*.mp4` and the matching
//! `data/chunk-000/*.parquet` logs, and writes one overlay video per episode
//! to `videos_traj/chunk-000/observation.images.image/`.
//!
//! Usage:
//!   draw-traj --data-dir <dir> (--suite <file> | --calibration <file>) [options]

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use xtraj::xtraj_codec::FfmpegCodec;
use xtraj::{
    CalibrationRegistry, DatasetLayout, EpisodeAligner, OverlayRenderer, OverlayStage,
    ParquetEpisodeStore, PipelineConfig, SceneBackend, SuiteFile, TaskIndexMap, TaskResolver,
};

#[derive(Parser, Debug)]
#[command(version, about = "Burn end-effector trajectories into episode videos")]
struct Args {
    /// Root of the raw LeRobot-style dataset.
    #[arg(long)]
    data_dir: PathBuf,

    /// Task suite JSON used to build the calibration registry.
    #[arg(long)]
    suite: Option<PathBuf>,

    /// Calibration cache. Loaded if it exists, otherwise written after building.
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Pipeline config JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the scene camera.
    #[arg(long)]
    camera: Option<String>,

    /// Render frames one at a time instead of on all cores.
    #[arg(long)]
    sequential: bool,
}

fn registry(args: &Args, config: &PipelineConfig) -> Result<CalibrationRegistry> {
    if let Some(cache) = args.calibration.as_ref().filter(|path| path.exists()) {
        let registry = CalibrationRegistry::load(cache, config.resolution)
            .with_context(|| format!("loading calibration cache {}", cache.display()))?;
        tracing::info!("loaded {} calibrations from {}", registry.len(), cache.display());
        return Ok(registry);
    }

    let Some(suite_path) = &args.suite else {
        bail!("either --suite or an existing --calibration file is required");
    };
    let suite = SuiteFile::load(suite_path)
        .with_context(|| format!("loading task suite {}", suite_path.display()))?;
    let registry =
        CalibrationRegistry::build(&suite, &SceneBackend, &config.camera, config.resolution)?;
    if let Some(cache) = &args.calibration {
        registry.save(cache)?;
        tracing::info!("saved calibration cache to {}", cache.display());
    }
    Ok(registry)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("xtraj=info".parse()?)
                .add_directive("draw_traj=info".parse()?)
                .add_directive("warn".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut config = PipelineConfig::load_or_default(args.config.as_deref())?;
    if let Some(camera) = &args.camera {
        config.camera.clone_from(camera);
    }
    if args.sequential {
        config.parallel_render = false;
    }

    if !FfmpegCodec::is_available() {
        bail!("ffmpeg was not found on PATH");
    }

    let layout = DatasetLayout::new(&args.data_dir);
    let registry = registry(&args, &config)?;
    let tasks_file = layout.tasks_file();
    let tasks = TaskIndexMap::load_jsonl(&tasks_file)
        .with_context(|| format!("loading task map {}", tasks_file.display()))?;

    println!();
    println!("========================================");
    println!("Trajectory overlay");
    println!("========================================");
    println!("Dataset:    {}", args.data_dir.display());
    println!("Camera:     {} at {}x{}", config.camera, config.resolution, config.resolution);
    println!("Tasks:      {} ({} calibrated)", tasks.len(), registry.len());
    println!("Output fps: {}", config.overlay_fps);
    println!("========================================");
    println!();

    let aligner = EpisodeAligner::new(
        OverlayRenderer::new(config.style),
        TaskResolver::new(&tasks, &registry),
    )
    .parallel(config.parallel_render);
    let stage = OverlayStage::new(aligner, layout.clone(), config.overlay_encoder());

    let codec = FfmpegCodec::new();
    let store = ParquetEpisodeStore::new(layout.data_dir());
    let summary = stage.run(&codec, &codec, &store)?;

    tracing::info!(
        "wrote {} overlay videos ({} frames) under {}",
        summary.episodes,
        summary.frames,
        layout.overlay_video_dir(xtraj::MAIN_VIDEO_KEY).display()
    );
    Ok(())
}
