//! Mirage HUD headless capture harness
//!
//! Runs the render-thread side of the screenshot path against an in-memory
//! render target: draws a moving test pattern into both eye viewports,
//! publishes synthetic camera frames, and drains screenshot requests coming
//! from a periodic trigger thread. Completion notifications are logged.

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use mirage_common::{logging, ScreenshotSource};
use mirage_hud::capture::{SharedVideoOutput, SoftwareDevice, BYTES_PER_PIXEL};
use mirage_hud::config::{self, HudConfig};
use mirage_hud::encoder::JpegFileEncoder;
use mirage_hud::notify::BroadcastNotifier;
use mirage_hud::screenshot::{ScreenshotRequester, ScreenshotService, SubmitOutcome};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Mirage HUD - headless capture harness
#[derive(Parser, Debug)]
#[command(name = "mirage-hud")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Stop after this many frames (0 runs until interrupted)
    #[arg(long, default_value_t = 0)]
    frames: u64,

    /// Target frame rate of the render loop
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Trigger a remote-style snapshot every N seconds
    #[arg(long, value_name = "SECONDS")]
    snapshot_every: Option<u64>,

    /// Take a full-resolution screenshot on the first frame
    #[arg(long)]
    screenshot: bool,

    /// Directory for captured images (overrides the configured one)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Include the overlay in triggered snapshots
    #[arg(long)]
    overlay: bool,

    /// Ignore the live camera; only the recording buffer is captured
    #[arg(long)]
    no_camera: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write logs to the platform log directory
    #[arg(long)]
    log_file: bool,
}

/// Global shutdown flag
static SHUTDOWN_FLAG: std::sync::OnceLock<Arc<AtomicBool>> = std::sync::OnceLock::new();

/// Get the global shutdown flag.
pub fn get_shutdown_flag() -> Arc<AtomicBool> {
    SHUTDOWN_FLAG
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone()
}

/// Request harness shutdown.
pub fn request_shutdown() {
    info!("Shutdown requested");
    get_shutdown_flag().store(true, Ordering::SeqCst);
}

/// Check if shutdown has been requested.
pub fn is_shutdown_requested() -> bool {
    get_shutdown_flag().load(Ordering::SeqCst)
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_file);

    info!("Mirage HUD capture harness starting (pid: {})...", std::process::id());

    setup_signal_handlers();

    let mut config = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };
    if cli.overlay {
        config.display.snapshot_overlay = true;
    }

    let output_dir = match resolve_output_dir(&cli, &config) {
        Ok(dir) => dir,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&cli, &config, output_dir) {
        error!("Harness failed: {}", e);
        std::process::exit(1);
    }

    info!("Mirage HUD capture harness stopped");
}

/// Initialize logging with RUST_LOG env var support.
fn init_logging(log_file: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_file {
        let opened = logging::ensure_log_dir()
            .and_then(|_| File::options().create(true).append(true).open(logging::hud_log_path()));
        match opened {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
                return;
            }
            Err(e) => eprintln!("Warning: cannot open log file, logging to stderr: {}", e),
        }
    }

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn resolve_output_dir(cli: &Cli, config: &HudConfig) -> Result<PathBuf, String> {
    let dir = match &cli.output_dir {
        Some(dir) => dir.clone(),
        None => config::get_output_dir(config).unwrap_or_else(|e| {
            warn!("{}; writing captures to the working directory", e);
            PathBuf::from(".")
        }),
    };
    fs::create_dir_all(&dir)
        .map_err(|e| format!("Failed to create output directory {}: {}", dir.display(), e))?;
    config::validate_directory(&dir)
        .map_err(|e| format!("Output directory {}: {}", dir.display(), e))?;
    Ok(dir)
}

/// Render loop. Runs on the thread that owns the render target.
fn run(cli: &Cli, config: &HudConfig, output_dir: PathBuf) -> Result<(), String> {
    let (width, height) = config.display.stereo_output_size();
    let device = SoftwareDevice::new(width, height);

    let video = Arc::new(SharedVideoOutput::new());
    let notifier = BroadcastNotifier::default();
    spawn_notification_logger(&notifier);

    let mut service = ScreenshotService::new(
        device,
        config,
        output_dir,
        video.clone(),
        Box::new(JpegFileEncoder::new()),
        Arc::new(notifier),
    );
    service
        .initialize_capture_pipeline()
        .map_err(|e| format!("Failed to initialize capture pipeline: {}", e))?;
    info!(
        "Rendering {}x{} at {} fps into {}",
        width,
        height,
        cli.fps,
        service.output_dir().display()
    );

    let requester = service.requester();
    let trigger = cli
        .snapshot_every
        .filter(|secs| *secs > 0)
        .map(|secs| spawn_snapshot_trigger(requester.clone(), Duration::from_secs(secs)));

    if cli.screenshot {
        log_submit(
            "screenshot",
            requester.submit_screenshot(true, true, None, ScreenshotSource::Manual),
        );
    }

    let frame_time = Duration::from_secs_f64(1.0 / cli.fps.max(1) as f64);
    let mut frame: u64 = 0;
    while !is_shutdown_requested() && (cli.frames == 0 || frame < cli.frames) {
        let started = Instant::now();

        draw_test_pattern(service.driver_mut().device_mut(), frame);
        if !cli.no_camera {
            let (cam_width, cam_height) = (
                config.display.cam_input_width,
                config.display.cam_input_height,
            );
            if let Err(e) =
                video.publish_camera_frame(cam_width, cam_height, camera_frame(cam_width, cam_height, frame))
            {
                warn!("Dropping camera frame: {}", e);
            }
        }

        service.step_frame();
        let _ = service.process_pending_screenshots(cli.no_camera);

        frame += 1;
        if let Some(rest) = frame_time.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    info!("Rendered {} frames, shutting down", frame);
    request_shutdown();
    if let Some(handle) = trigger {
        let _ = handle.join();
    }
    // Run a request that arrived during the last frame
    let _ = service.process_pending_screenshots(cli.no_camera);
    service.shutdown_capture_pipeline();
    Ok(())
}

fn log_submit(what: &str, outcome: SubmitOutcome) {
    match outcome {
        SubmitOutcome::Accepted => info!("Queued {}", what),
        SubmitOutcome::Rejected(reason) => warn!("{} skipped: {}", what, reason),
    }
}

/// Periodically asks the render thread for a snapshot, like the MQTT bridge does.
fn spawn_snapshot_trigger(
    requester: ScreenshotRequester,
    every: Duration,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let tick = Duration::from_millis(100);
        let mut next = Instant::now() + every;
        while !is_shutdown_requested() {
            if Instant::now() >= next {
                log_submit("snapshot", requester.trigger_snapshot(None));
                next += every;
            }
            thread::sleep(tick);
        }
    })
}

/// Logs every outbound notification, standing in for the MQTT publisher.
fn spawn_notification_logger(notifier: &BroadcastNotifier) {
    let mut rx = notifier.subscribe();
    thread::spawn(move || loop {
        match rx.blocking_recv() {
            Ok(message) => info!(topic = %message.topic, "Notify: {}", message.payload),
            Err(RecvError::Lagged(skipped)) => warn!("Notification logger skipped {} messages", skipped),
            Err(RecvError::Closed) => break,
        }
    });
}

/// Dark background with a bar sweeping across each eye.
fn draw_test_pattern(device: &mut SoftwareDevice, frame: u64) {
    let eye_width = device.width() / 2;
    let height = device.height();
    if eye_width == 0 || height == 0 {
        return;
    }
    device.clear([16, 16, 24, 255]);

    let bar_width = (eye_width / 16).max(1);
    let x = ((frame * 8) % eye_width as u64) as u32;
    for eye in 0..2 {
        device.fill_rect(eye * eye_width + x, 0, bar_width, height, [0, 220, 120, 255]);
    }
    // Marks the top of the image
    device.fill_rect(0, 0, device.width(), (height / 32).max(1), [220, 60, 40, 255]);
}

/// Synthetic camera frame: a horizontal gradient that drifts with time.
fn camera_frame(width: u32, height: u32, frame: u64) -> Vec<u8> {
    let mut row = Vec::with_capacity(width as usize * BYTES_PER_PIXEL);
    for x in 0..width as u64 {
        let v = ((x * 255 / width.max(1) as u64 + frame) % 256) as u8;
        row.extend_from_slice(&[v, v / 2, 255 - v, 255]);
    }
    row.repeat(height as usize)
}

/// Set up signal handlers for graceful shutdown.
fn setup_signal_handlers() {
    thread::spawn(|| {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                warn!("Signal handling unavailable: {}", e);
                return;
            }
        };
        rt.block_on(wait_for_signal());
        request_shutdown();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigterm), Ok(mut sigint)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        warn!("Failed to install signal handlers");
        std::future::pending::<()>().await;
        return;
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
