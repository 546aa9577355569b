use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use idcapture::{
    CameraBackend, CaptureEvent, CaptureHandle, CapturedImage, EventBus, EventFilter,
    EventReceiver, FacingMode, IdCaptureConfig, KeyAction, KeyboardInputHandler, QualityMetrics,
    Scene, ScriptedFaceDetector, ScriptedLoader, SyntheticCameraBackend,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "idcapture")]
#[command(about = "Guided ID document and face capture from a live camera")]
#[command(version)]
#[command(long_about = "Samples a live camera, scores every frame for document presence, \
exposure, focus and a visible face, counts down and captures automatically once the frame \
is good enough, then waits for the operator to retake or confirm the still image.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "idcapture.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Camera to open first (defaults to the configured facing)
    #[arg(long, value_enum)]
    facing: Option<FacingArg>,

    /// Camera backend
    #[arg(long, value_enum, default_value_t = BackendArg::Synthetic)]
    backend: BackendArg,

    /// Initial synthetic scene
    #[arg(long, value_enum, default_value_t = SceneArg::Document)]
    scene: SceneArg,

    /// Start with no face in front of the scripted face detector
    #[arg(long)]
    no_face: bool,

    /// Start with auto-capture disabled
    #[arg(long)]
    no_auto: bool,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without opening a camera")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FacingArg {
    User,
    Environment,
}

impl From<FacingArg> for FacingMode {
    fn from(arg: FacingArg) -> Self {
        match arg {
            FacingArg::User => FacingMode::User,
            FacingArg::Environment => FacingMode::Environment,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BackendArg {
    Synthetic,
    V4l2,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SceneArg {
    Document,
    Blank,
    Dark,
}

impl From<SceneArg> for Scene {
    fn from(arg: SceneArg) -> Self {
        match arg {
            SceneArg::Document => Scene::Document,
            SceneArg::Blank => Scene::Blank,
            SceneArg::Dark => Scene::Dark,
        }
    }
}

/// Printed to stdout once the operator confirms a capture
#[derive(Serialize)]
struct CaptureSummary<'a> {
    session_id: Uuid,
    facing: FacingMode,
    bytes: usize,
    image: &'a CapturedImage,
    quality: Option<QualityMetrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting idcapture v{}", env!("CARGO_PKG_VERSION"));

    let mut config = IdCaptureConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    if args.no_auto {
        config.countdown.auto_capture = false;
    }

    let synthetic = Arc::new(SyntheticCameraBackend::new(args.scene.into()));
    let backend = select_backend(args.backend, &config, &synthetic)?;

    let detector = Arc::new(ScriptedFaceDetector::new());
    if !args.no_face {
        let (width, height) = config.camera.resolution;
        detector.set_detections(vec![ScriptedFaceDetector::centered_face(width, height)]);
    }
    let loader = ScriptedLoader::new(Arc::clone(&detector)).with_delay(Duration::from_millis(500));

    let event_bus = Arc::new(if args.debug {
        EventBus::with_debug_logging(config.system.event_bus_capacity)
    } else {
        EventBus::new(config.system.event_bus_capacity)
    });
    spawn_event_printer(&event_bus);

    let handle = idcapture::CaptureController::builder()
        .config(config.clone())
        .backend(backend)
        .face_loader(Arc::new(loader))
        .event_bus(Arc::clone(&event_bus))
        .spawn(args.facing.map(Into::into))
        .await
        .context("Failed to start capture session")?;

    let (keyboard, mut actions) = KeyboardInputHandler::new();
    keyboard.start().await?;

    let outcome = drive_session(&handle, &mut actions, &synthetic, &detector, &config).await;

    keyboard.stop().await?;
    handle.close().await;
    handle.join().await.context("Capture session failed")?;

    match outcome? {
        Some(summary) => println!("{}", summary),
        None => info!("Capture session closed without a confirmed image"),
    }
    Ok(())
}

/// Dispatch key actions until the session is confirmed or closed.
///
/// Returns the JSON summary of a confirmed capture.
async fn drive_session(
    handle: &CaptureHandle,
    actions: &mut tokio::sync::mpsc::UnboundedReceiver<KeyAction>,
    synthetic: &SyntheticCameraBackend,
    detector: &ScriptedFaceDetector,
    config: &IdCaptureConfig,
) -> Result<Option<String>> {
    let mut auto_capture = config.countdown.auto_capture;

    loop {
        let action = tokio::select! {
            action = actions.recv() => action,
            _ = tokio::signal::ctrl_c() => Some(KeyAction::Quit),
            _ = wait_for_end(handle) => {
                warn!("Capture session ended unexpectedly");
                return Ok(None);
            }
        };

        let Some(action) = action else {
            return Ok(None);
        };

        let result = match action {
            KeyAction::CaptureManually => handle.capture_manually().await,
            KeyAction::ToggleAutoCapture => {
                auto_capture = !auto_capture;
                handle.set_auto_capture(auto_capture).await
            }
            KeyAction::SwitchFacing => handle.switch_facing().await.map(|facing| {
                debug!("Now using the {} camera", facing);
            }),
            KeyAction::Retake => handle.retake().await,
            KeyAction::Confirm => {
                let status = handle.status().await?;
                match handle.confirm().await {
                    Ok(image) => {
                        let summary = CaptureSummary {
                            session_id: status.session_id,
                            facing: status.facing,
                            bytes: image.len(),
                            image: &image,
                            quality: status.readiness.map(|r| r.quality),
                        };
                        return Ok(Some(serde_json::to_string_pretty(&summary)?));
                    }
                    Err(e) => Err(e),
                }
            }
            KeyAction::CycleScene => {
                let scene = synthetic.scene().next();
                synthetic.set_scene(scene);
                info!("Synthetic scene: {:?}", scene);
                Ok(())
            }
            KeyAction::ToggleFace => {
                if detector.has_detections() {
                    detector.clear();
                    info!("Face removed");
                } else {
                    let (width, height) = config.camera.resolution;
                    detector.set_detections(vec![ScriptedFaceDetector::centered_face(width, height)]);
                    info!("Face shown");
                }
                Ok(())
            }
            KeyAction::Quit => {
                info!("Closing capture session");
                return Ok(None);
            }
        };

        if let Err(e) = result {
            if e.is_fatal() {
                error!("{}", e);
                return Err(e.into());
            }
            warn!("{}", e);
        }
    }
}

async fn wait_for_end(handle: &CaptureHandle) {
    while !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn select_backend(
    choice: BackendArg,
    config: &IdCaptureConfig,
    synthetic: &Arc<SyntheticCameraBackend>,
) -> Result<Arc<dyn CameraBackend>> {
    match choice {
        BackendArg::Synthetic => {
            let backend: Arc<dyn CameraBackend> = synthetic.clone();
            Ok(backend)
        }
        BackendArg::V4l2 => v4l2_backend(config),
    }
}

#[cfg(all(target_os = "linux", feature = "camera"))]
fn v4l2_backend(config: &IdCaptureConfig) -> Result<Arc<dyn CameraBackend>> {
    let backend = idcapture::GstCameraBackend::new(&config.camera)?;
    Ok(Arc::new(backend))
}

#[cfg(not(all(target_os = "linux", feature = "camera")))]
fn v4l2_backend(_config: &IdCaptureConfig) -> Result<Arc<dyn CameraBackend>> {
    anyhow::bail!("The v4l2 backend requires building on Linux with the `camera` feature")
}

/// Echo session events on stderr; raw mode needs explicit carriage returns
fn spawn_event_printer(event_bus: &EventBus) {
    let filter = EventFilter::Custom(|event| !matches!(event, CaptureEvent::SystemError { .. }));
    let mut receiver = EventReceiver::new(event_bus.subscribe(), filter, "console".to_string());

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => eprint!("\r{}\r\n", event.description()),
                Err(idcapture::EventBusError::Lagged { .. }) => continue,
                Err(_) => break,
            }
        }
    });
}

fn init_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("idcapture={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path
                .file_name()
                .context("Log file path has no file name")?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# idcapture configuration file");
    println!("# Every key is optional; environment variables such as");
    println!("# IDCAPTURE_COUNTDOWN__START=5 override the file");
    println!();
    print!("{}", IdCaptureConfig::default().to_toml()?);
    Ok(())
}
