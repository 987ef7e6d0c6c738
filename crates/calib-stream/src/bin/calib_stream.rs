//! calib-stream CLI: run the detection pipeline on a still image or a live
//! (synthetic or replayed) stream.

use calib_stream::chessboard::{ChessboardDetector, ChessboardParams, DetectionMode};
use calib_stream::config::{
    JsonPreferences, MemoryPreferences, PreferenceStore, KEY_GRAYSCALE, KEY_PATTERN, KEY_RESIZE,
};
use calib_stream::convert::frame_from_rgb;
use calib_stream::pipeline::{
    CycleOutcome, PipelineCoordinator, PipelineOptions, PipelineWorker,
};
use calib_stream::sink::{LatestResultSink, PngDirSink, ResultSink};
use calib_stream::source::{
    CaptureHandle, FrameSource, ImageReplay, PooledFrameSource, ReplayOptions,
    SyntheticBoardCamera, SyntheticOptions,
};
use calib_stream::PixelBuffer;
use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "calib-stream")]
#[command(about = "Chessboard detection pipeline for camera calibration capture")]
#[command(version)]
struct Cli {
    /// Log level for the stderr logger.
    #[arg(long, global = true, default_value = "warn")]
    log_level: LevelFilter,

    /// Log through a tracing subscriber (RUST_LOG filter, span timings).
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one pipeline cycle on an image file.
    Detect(DetectArgs),
    /// Run the live pipeline on a synthetic camera or a directory of images.
    Stream(StreamArgs),
}

#[derive(Debug, Clone, Args)]
struct DetectArgs {
    /// Input image.
    image: PathBuf,

    /// Inner corners, "WxH".
    #[arg(long, default_value = "4x5")]
    pattern: String,

    /// Detection resolution, "WxH"; "0x0" keeps the native size.
    #[arg(long, default_value = "0x0")]
    resize: String,

    /// Detect on the colour image instead of grayscale.
    #[arg(long)]
    color: bool,

    /// Sub-pixel refinement and recovery of weak corners.
    #[arg(long)]
    refined: bool,

    /// Write the annotated display bitmap (RGBA) to this PNG.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Args)]
struct StreamArgs {
    /// Preferences file (JSON object with preGrayScaled, prefCalibSize, prefSizeResize).
    #[arg(long)]
    prefs: Option<PathBuf>,

    /// Frames to capture.
    #[arg(long, default_value_t = 60)]
    frames: u64,

    /// Capture rate; 0 captures as fast as possible.
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Replay the images in this directory instead of the synthetic camera.
    #[arg(long)]
    images: Option<PathBuf>,

    /// Write every annotated frame (and its result as JSON) here.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Frame buffers owned by the source.
    #[arg(long, default_value_t = PooledFrameSource::DEFAULT_MAX_FRAMES)]
    max_frames: usize,
}

#[derive(Serialize)]
struct DetectReport {
    image: PathBuf,
    pattern: String,
    width: u32,
    height: u32,
    found: bool,
    corners: Vec<[f32; 2]>,
    elapsed_ms: f64,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match &cli.command {
        Commands::Detect(args) => run_detect(args),
        Commands::Stream(args) => run_stream(args),
    }
}

fn init_logging(cli: &Cli) -> CliResult<()> {
    #[cfg(feature = "tracing")]
    {
        if cli.trace {
            LogTracer::init()?;
            calib_stream::core::init_tracing(false);
            return Ok(());
        }
    }
    calib_stream::core::init_with_level(cli.log_level)?;
    Ok(())
}

fn detector(refined: bool) -> ChessboardDetector {
    let mode = if refined {
        DetectionMode::Refined
    } else {
        DetectionMode::Fast
    };
    ChessboardDetector::new(ChessboardParams::default().with_mode(mode))
}

fn run_detect(args: &DetectArgs) -> CliResult<()> {
    info!("loading image {}", args.image.display());
    let rgb = image::open(&args.image)
        .map_err(|e| -> CliError { format!("failed to open {}: {e}", args.image.display()).into() })?
        .to_rgb8();
    let frame = frame_from_rgb(0, &rgb);

    let source = PooledFrameSource::new(1);
    source
        .writer()
        .publish(frame.width(), frame.height(), frame.format(), frame.data());

    let prefs = MemoryPreferences::new();
    prefs.set_bool(KEY_GRAYSCALE, !args.color);
    prefs.set_string(KEY_PATTERN, args.pattern.as_str());
    prefs.set_string(KEY_RESIZE, args.resize.as_str());

    let display = LatestResultSink::new();
    let mut coordinator = PipelineCoordinator::new(
        Arc::new(source.clone()),
        Arc::new(prefs),
        Box::new(detector(args.refined)),
    )
    .with_sink(display.clone());

    let report = coordinator
        .run_cycle()?
        .ok_or_else(|| -> CliError { "no frame reached the pipeline".into() })?;
    let result = match report.outcome {
        CycleOutcome::Detected(result) => result,
        CycleOutcome::Aborted(err) => return Err(err.into()),
    };

    let (buffer, _) = display
        .latest()
        .ok_or_else(|| -> CliError { "pipeline produced no display buffer".into() })?;
    if let Some(out) = &args.out {
        save_png(&buffer, out)?;
        info!("annotated image written to {}", out.display());
    }

    let (width, height) = buffer.dimensions();
    if args.json {
        let out = DetectReport {
            image: args.image.clone(),
            pattern: args.pattern.clone(),
            width,
            height,
            found: result.found,
            corners: result.corners.iter().map(|p| [p.x, p.y]).collect(),
            elapsed_ms: report.elapsed.as_secs_f64() * 1e3,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if result.found {
        println!("found {} corners ({width}x{height})", result.corners.len());
        for (i, p) in result.corners.iter().enumerate() {
            println!("{i:4} {:9.2} {:9.2}", p.x, p.y);
        }
    } else {
        println!("pattern not found ({width}x{height})");
    }
    Ok(())
}

fn save_png(buffer: &PixelBuffer, path: &Path) -> CliResult<()> {
    buffer.to_rgba8().save(path)?;
    Ok(())
}

fn run_stream(args: &StreamArgs) -> CliResult<()> {
    let options = PipelineOptions {
        max_frames: args.max_frames,
        ..Default::default()
    };
    let source = options.frame_source();

    let prefs: Arc<dyn PreferenceStore> = match &args.prefs {
        Some(path) => Arc::new(JsonPreferences::load(path)?),
        None => Arc::new(MemoryPreferences::new()),
    };
    let config = prefs.snapshot()?;
    info!(
        "pattern {}, grayscale {}, resize {}",
        config.pattern, config.grayscale, config.resize
    );

    let sink: Box<dyn ResultSink> = match &args.out_dir {
        Some(dir) => Box::new(PngDirSink::new(dir)?.with_json(true)),
        None => Box::new(LatestResultSink::new()),
    };
    let mut coordinator = PipelineCoordinator::new(
        Arc::new(source.clone()),
        prefs,
        Box::new(detector(false)),
    );
    coordinator.set_sink(Some(sink));

    let replay_paths = match &args.images {
        Some(dir) => {
            let paths = ImageReplay::list_images(dir)?;
            if paths.is_empty() {
                return Err(format!("no images found in {}", dir.display()).into());
            }
            Some(paths)
        }
        None => None,
    };

    let worker = PipelineWorker::spawn(coordinator, source.signals(), &options)?;
    let camera: CaptureHandle = match replay_paths {
        Some(paths) => {
            let replay = ReplayOptions {
                fps: args.fps,
                looped: false,
                frames: Some(args.frames),
            };
            ImageReplay::spawn(source.writer(), paths, replay)?
        }
        None => {
            let synthetic = SyntheticOptions {
                pattern: config.pattern,
                fps: args.fps,
                frames: Some(args.frames),
                color: !config.grayscale,
                ..Default::default()
            };
            SyntheticBoardCamera::spawn(source.writer(), synthetic)?
        }
    };

    // The worker sees the end of the stream even if capture panicked.
    let published = camera.join();
    let stats = worker.join()?;
    let published = published?;
    info!(
        "captured {published} frames, {} dropped before processing",
        source.dropped_frames()
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
