use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use backdrop::capture::{CaptureSource, WebcamCapture};
use backdrop::composite::{BlurChoice, CompositeRoute, ImageGaussian};
use backdrop::output::{OutputSink, V4L2Output};
use backdrop::pipeline::{
    ControlHandle, FramePipeline, FrameProcessor, ProcMeminfo, ProcessingMode,
};
use backdrop::{PipelineConfig, Rotation};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Camera mounting rotation in degrees (0, 90, 180, 270)
    #[arg(long, default_value_t = 0)]
    rotation: i32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Processing mode at startup: off, blur or virtual-background
    #[arg(short, long, default_value = "blur")]
    mode: ProcessingMode,

    /// Path to the matting model (ONNX file).
    /// Without one every frame passes through unmodified.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Virtual background image; implies --mode virtual-background
    #[arg(long)]
    background: Option<PathBuf>,

    /// Background blur: auto, gaussian or box
    #[arg(long, default_value = "auto")]
    blur: BlurChoice,

    /// Background blur sigma in pixels
    #[arg(long, default_value_t = 10.0)]
    blur_sigma: f32,

    /// Minimum milliseconds between segmentation runs
    #[arg(long, default_value_t = 50)]
    interval_ms: u64,

    /// Consecutive failures before segmentation is suspended
    #[arg(long, default_value_t = 5)]
    failure_threshold: u32,

    /// Seconds segmentation stays suspended after too many failures
    #[arg(long, default_value_t = 2.0)]
    cooldown: f64,

    /// Composite by drawing layers instead of a single blend pass
    #[arg(long)]
    layered: bool,

    /// Show matte visualization (grayscale silhouette) instead of the composite
    #[arg(long)]
    show_matte: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig {
            min_interval: Duration::from_millis(self.interval_ms),
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs_f64(self.cooldown.max(0.0)),
            blur_choice: self.blur,
            show_matte: self.show_matte,
            ..PipelineConfig::default()
        };
        config.blur.sigma = self.blur_sigma;
        if self.layered {
            config.route = CompositeRoute::Layered;
        }
        config
    }
}

/// A line typed on stdin while running.
#[derive(Debug, PartialEq)]
enum Command {
    Mode(ProcessingMode),
    Background(PathBuf),
    ClearBackground,
    Reset,
    Stats,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = words.collect();
        let command = match (word.to_ascii_lowercase().as_str(), rest.as_slice()) {
            ("virtual" | "virtual-background", []) => Self::Mode(ProcessingMode::VirtualBackground),
            ("virtual" | "virtual-background", path) => Self::Background(PathBuf::from(path.join(" "))),
            ("clear", []) => Self::ClearBackground,
            ("reset", []) => Self::Reset,
            ("stats", []) => Self::Stats,
            ("quit" | "exit", []) => Self::Quit,
            (mode, []) => Self::Mode(mode.parse().map_err(|e: String| anyhow!(e))?),
            _ => return Err(anyhow!("unrecognized command: {}", line.trim())),
        };
        Ok(Some(command))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let rotation = Rotation::from_degrees(args.rotation)
        .ok_or_else(|| anyhow!("rotation must be a multiple of 90, got {}", args.rotation))?;

    tracing::info!("backdrop starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Target FPS: {}", args.fps);

    let mut capture = WebcamCapture::new(
        args.input_device,
        args.capture_width,
        args.capture_height,
        args.fps,
        rotation,
    )
    .context("Failed to initialize webcam capture")?;

    let mut output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    let mut pipeline = FramePipeline::builder(args.pipeline_config())
        .platform_blur(Arc::new(ImageGaussian))
        .memory_probe(Box::new(ProcMeminfo))
        .mode(args.mode)
        .build();

    match &args.model {
        Some(model_path) => {
            if let Err(err) = pipeline.initialize(model_path) {
                tracing::error!("Running in passthrough mode: {err}");
            }
        }
        None => tracing::info!("No model given, running in passthrough mode"),
    }

    let control = pipeline.control();
    if let Some(path) = &args.background {
        control
            .set_background_from_path(path)
            .context("Failed to load background image")?;
    }

    let running = Arc::new(AtomicBool::new(true));
    spawn_control_thread(control.clone(), Arc::clone(&running));

    run_pipeline(&mut capture, &mut output, &mut pipeline, &running, args.fps)?;

    control.stop();
    Ok(())
}

fn spawn_control_thread(control: ControlHandle, running: Arc<AtomicBool>) {
    thread::spawn(move || {
        tracing::info!("Commands: off | blur | virtual [image] | clear | reset | stats | quit");
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match Command::parse(&line) {
                Ok(Some(command)) => {
                    if !apply_command(&control, command) {
                        control.stop();
                        running.store(false, Ordering::Release);
                        return;
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!("{err}"),
            }
        }
        tracing::debug!("stdin closed, control commands disabled");
    });
}

/// Returns false once the pipeline should shut down.
fn apply_command(control: &ControlHandle, command: Command) -> bool {
    match command {
        Command::Mode(mode) => control.set_mode(mode),
        Command::Background(path) => {
            if let Err(err) = control.set_background_from_path(&path) {
                tracing::warn!("{err}");
            }
        }
        Command::ClearBackground => control.set_background(None),
        Command::Reset => control.reset_failures(),
        Command::Stats => {
            let stats = control.stats();
            tracing::info!(
                "mode {}: processed {}, skipped {}, passthrough {}, failed {}",
                control.mode(),
                stats.processed,
                stats.skipped,
                stats.passthrough,
                stats.failed
            );
        }
        Command::Quit => return false,
    }
    true
}

fn run_pipeline<C, O, P>(
    capture: &mut C,
    output: &mut O,
    pipeline: &mut P,
    running: &AtomicBool,
    target_fps: u32,
) -> Result<()>
where
    C: CaptureSource,
    O: OutputSink,
    P: FrameProcessor,
{
    let frame_duration = Duration::from_secs_f32(1.0 / target_fps.max(1) as f32);
    let mut frame_count = 0u64;
    let mut total_capture_time = Duration::ZERO;
    let mut total_process_time = Duration::ZERO;
    let mut total_output_time = Duration::ZERO;

    tracing::info!("Starting main pipeline loop");

    while running.load(Ordering::Acquire) {
        let loop_start = Instant::now();

        let capture_start = Instant::now();
        let frame = capture.next_frame().context("Failed to capture frame")?;
        total_capture_time += capture_start.elapsed();

        let process_start = Instant::now();
        let frame = pipeline.on_frame(frame);
        total_process_time += process_start.elapsed();

        let output_start = Instant::now();
        output
            .write_frame(&frame)
            .context("Failed to write frame")?;
        total_output_time += output_start.elapsed();

        frame_count += 1;

        if frame_count % 30 == 0 {
            let avg_capture_ms = total_capture_time.as_secs_f64() * 1000.0 / frame_count as f64;
            let avg_process_ms = total_process_time.as_secs_f64() * 1000.0 / frame_count as f64;
            let avg_output_ms = total_output_time.as_secs_f64() * 1000.0 / frame_count as f64;
            let total_ms = avg_capture_ms + avg_process_ms + avg_output_ms;

            tracing::debug!(
                "Frame {}: capture={:.1}ms, process={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}",
                frame_count,
                avg_capture_ms,
                avg_process_ms,
                avg_output_ms,
                total_ms,
                1000.0 / total_ms
            );
        }

        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            thread::sleep(frame_duration - elapsed);
        }
    }

    tracing::info!("Pipeline loop finished after {} frames", frame_count);
    Ok(())
}
