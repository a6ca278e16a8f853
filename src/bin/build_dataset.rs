//! build-dataset - assemble raw videos, overlay videos and logs into a
//! LeRobot v2 dataset.
//!
//! The output is written to `<local-dir>/<raw-dir name>`. Run `draw-traj` on
//! the raw directory first so the overlay videos exist.
//!
//! Usage:
//!   build-dataset --raw-dir <dir> --local-dir <dir> (--suite <file> | --calibration <file>)

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use xtraj::xtraj_codec::FfmpegCodec;
use xtraj::{
    libero_features, AssemblyStage, CalibrationRegistry, DatasetAssembler, DatasetLayout,
    LeRobotOptions, LeRobotWriter, ParquetEpisodeStore, PipelineConfig, SceneBackend, SuiteFile,
    TaskIndexMap, TaskResolver,
};

#[derive(Parser, Debug)]
#[command(version, about = "Build a multimodal LeRobot dataset with trajectory overlays")]
struct Args {
    /// Raw dataset directory (with `videos_traj/` from draw-traj).
    #[arg(long)]
    raw_dir: PathBuf,

    /// Parent directory of the output dataset.
    #[arg(long)]
    local_dir: PathBuf,

    /// Task suite JSON used to build the calibration registry.
    #[arg(long)]
    suite: Option<PathBuf>,

    /// Calibration cache written by draw-traj.
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Pipeline config JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replace an existing output dataset.
    #[arg(long)]
    overwrite: bool,
}

fn registry(args: &Args, config: &PipelineConfig) -> Result<CalibrationRegistry> {
    if let Some(cache) = args.calibration.as_ref().filter(|path| path.exists()) {
        return CalibrationRegistry::load(cache, config.resolution)
            .with_context(|| format!("loading calibration cache {}", cache.display()));
    }
    let Some(suite_path) = &args.suite else {
        bail!("either --suite or an existing --calibration file is required");
    };
    let suite = SuiteFile::load(suite_path)
        .with_context(|| format!("loading task suite {}", suite_path.display()))?;
    Ok(CalibrationRegistry::build(
        &suite,
        &SceneBackend,
        &config.camera,
        config.resolution,
    )?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("xtraj=info".parse()?)
                .add_directive("build_dataset=info".parse()?)
                .add_directive("warn".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = PipelineConfig::load_or_default(args.config.as_deref())?;
    if !FfmpegCodec::is_available() {
        bail!("ffmpeg was not found on PATH");
    }

    let Some(name) = args.raw_dir.file_name() else {
        bail!("--raw-dir {} has no directory name", args.raw_dir.display());
    };
    let output = args.local_dir.join(name);

    let layout = DatasetLayout::new(&args.raw_dir);
    let registry = registry(&args, &config)?;
    let tasks_file = layout.tasks_file();
    let tasks = TaskIndexMap::load_jsonl(&tasks_file)
        .with_context(|| format!("loading task map {}", tasks_file.display()))?;

    println!();
    println!("========================================");
    println!("Dataset assembly");
    println!("========================================");
    println!("Raw:        {}", args.raw_dir.display());
    println!("Output:     {}", output.display());
    println!("Robot:      {} at {} fps", config.robot_type, config.dataset_fps);
    println!("========================================");
    println!();

    let codec = FfmpegCodec::new();
    let options = LeRobotOptions::default()
        .encoder(config.dataset_encoder())
        .robot_type(config.robot_type.as_str())
        .overwrite(args.overwrite);
    let resolution = usize::try_from(config.resolution)?;
    let mut writer = LeRobotWriter::create(&output, libero_features(resolution), &codec, options)?;

    let stage = AssemblyStage::new(
        DatasetAssembler::new(TaskResolver::new(&tasks, &registry)),
        layout.clone(),
    );
    let store = ParquetEpisodeStore::new(layout.data_dir());
    let (_, dataset) = stage.run(&codec, &store, &mut writer)?;

    tracing::info!(
        "dataset at {}: {} episodes, {} frames, {} tasks",
        output.display(),
        dataset.episodes,
        dataset.frames,
        dataset.tasks
    );
    Ok(())
}
