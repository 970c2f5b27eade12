//! playcast demo recorder
//!
//! Records a synthetic animated surface and a sine tone through the full
//! capture pipeline, then optionally uploads the result.

use std::f32::consts::TAU;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use playcast::capture::{AudioBackend, AudioSource, FrameSurface, PcmBuffer};
use playcast::data::{PixelFormat, RawFrame};
use playcast::{CaptureController, CaptureError, CaptureObserver, Config, EventBus};

struct Args {
    seconds: u64,
    upload: bool,
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }
    let args = parse_args(&args[1..])?;

    let _log_guard = playcast::logging::init_logging()?;
    info!("playcast starting...");

    let mut config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::load()?,
    };
    config.recording.upload_on_stop = args.upload;
    info!(
        "Recording {}x{} @ {} fps for {}s into {:?}",
        config.capture.width,
        config.capture.height,
        config.capture.fps,
        args.seconds,
        config.output_directory()
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(record(config, args))
}

async fn record(config: Config, args: Args) -> Result<()> {
    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, stopping...");
        let _ = stop_tx.send(());
    })?;

    let events = EventBus::new();
    events.set_observer(Arc::new(ConsoleObserver));

    let surface = Arc::new(GradientSurface::new(config.capture.width, config.capture.height));
    let tone = Arc::new(SineSource::new(
        config.capture.audio_backend,
        config.capture.audio_sample_rate,
        config.capture.audio_channels,
    ));
    let mut controller = CaptureController::new(config, surface, events).with_audio_source(tone);

    if !controller.prepare() {
        bail!("capture is not supported on this machine");
    }
    controller.start()?;

    let mut poll = tokio::time::interval(Duration::from_millis(250));
    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = stop_rx.recv() => break,
            _ = poll.tick() => {
                controller.poll().await;
                if !controller.state().is_recording() {
                    match controller.last_error() {
                        Some(e) => bail!("recording ended early: {}", e),
                        None => bail!("recording ended early"),
                    }
                }
            }
        }
    }

    let artifact = controller.stop().await.context("failed to finish recording")?;
    println!(
        "Saved {:?} ({:.2} MB, {:.1}s, {} frames)",
        artifact.path,
        artifact.size_mb(),
        artifact.duration.as_secs_f64(),
        artifact.video_frames
    );

    if !args.upload {
        return Ok(());
    }
    if controller.state() != playcast::State::Uploading {
        warn!("Upload requested but no api_endpoint is configured");
        return Ok(());
    }

    while controller.state() == playcast::State::Uploading {
        tokio::select! {
            _ = stop_rx.recv() => controller.cancel()?,
            _ = poll.tick() => {}
        }
        controller.poll().await;
    }

    match (controller.last_remote(), controller.last_error()) {
        (Some(remote), _) => println!("Uploaded as {}", remote.video_id),
        (None, Some(e)) if e.is_canceled() => println!("Upload skipped: not signed in"),
        (None, Some(e)) if e.is_user_cancellation() => info!("Upload canceled"),
        (None, Some(e)) => error!("Upload failed: {}", e),
        (None, None) => warn!("Upload ended without a result"),
    }

    info!("Shutdown complete");
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args {
        seconds: 10,
        upload: false,
        config: None,
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--seconds" => {
                let value = iter.next().context("--seconds needs a value")?;
                parsed.seconds = value
                    .parse()
                    .with_context(|| format!("invalid --seconds value: {}", value))?;
            }
            "--upload" => parsed.upload = true,
            "--config" => {
                let value = iter.next().context("--config needs a path")?;
                parsed.config = Some(PathBuf::from(value));
            }
            other => bail!("unknown argument: {}", other),
        }
    }
    Ok(parsed)
}

/// Prints lifecycle callbacks to stdout
struct ConsoleObserver;

impl CaptureObserver for ConsoleObserver {
    fn recording_started(&self) {
        println!("Recording...");
    }

    fn recording_stopped(&self) {
        println!("Recording stopped");
    }

    fn upload_did_progress(&self, _artifact_id: uuid::Uuid, progress: f64) {
        println!("Uploading {:.0}%", progress * 100.0);
    }

    fn thumbnail_ready_at_file_path(&self, path: &std::path::Path) {
        println!("Thumbnail {:?}", path);
    }

    fn session_failed(&self, error: &CaptureError) {
        eprintln!("Session failed ({}): {}", error.code(), error);
    }
}

/// Horizontal gradient that scrolls one column per frame
struct GradientSurface {
    width: u32,
    height: u32,
    frame: AtomicU64,
}

impl GradientSurface {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: AtomicU64::new(0),
        }
    }
}

impl FrameSurface for GradientSurface {
    fn grab_frame(&self) -> Option<RawFrame> {
        let offset = self.frame.fetch_add(1, Ordering::Relaxed) as u32;
        let mut data = Vec::with_capacity((self.width * self.height * 4) as usize);
        for _ in 0..self.height {
            for x in 0..self.width {
                let shade = ((x + offset) % 256) as u8;
                data.extend_from_slice(&[shade, 64, 255 - shade, 255]);
            }
        }
        Some(RawFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgba8,
            data,
        })
    }
}

/// 440 Hz tone paced against wall time
struct SineSource {
    backend: AudioBackend,
    sample_rate: u32,
    channels: u16,
    started: Instant,
    produced: AtomicU64,
}

impl SineSource {
    fn new(backend: AudioBackend, sample_rate: u32, channels: u16) -> Self {
        Self {
            backend,
            sample_rate,
            channels,
            started: Instant::now(),
            produced: AtomicU64::new(0),
        }
    }
}

impl AudioSource for SineSource {
    fn backend(&self) -> AudioBackend {
        self.backend
    }

    fn read(&self) -> Option<PcmBuffer> {
        let due = (self.started.elapsed().as_secs_f64() * self.sample_rate as f64) as u64;
        let produced = self.produced.load(Ordering::Relaxed);
        if due <= produced {
            return None;
        }
        self.produced.store(due, Ordering::Relaxed);

        let mut samples = Vec::with_capacity(((due - produced) * self.channels as u64) as usize);
        for n in produced..due {
            let t = n as f32 / self.sample_rate as f32;
            let value = ((t * 440.0 * TAU).sin() * 0.2 * i16::MAX as f32) as i16;
            samples.extend(std::iter::repeat(value).take(self.channels as usize));
        }
        Some(PcmBuffer {
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples,
        })
    }
}

fn print_help() {
    println!("playcast - gameplay recorder demo");
    println!();
    println!("USAGE:");
    println!("    playcast [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help          Print this help message");
    println!("    --seconds <N>       Record for N seconds (default 10, Ctrl+C stops early)");
    println!("    --upload            Upload the recording when it finishes");
    println!("    --config <PATH>     Read configuration from PATH");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG            Set log level (e.g., debug, info, warn)");
    println!("    PLAYCAST_LOG_PATH   Override the log directory");
}
