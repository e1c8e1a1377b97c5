//! wildwatchd - motion-gated wildlife detection daemon
//!
//! This daemon:
//! 1. Loads configuration (file, environment, command line)
//! 2. Opens the selected camera, video file or synthetic source
//! 3. Runs the detector only on frames with motion
//! 4. Publishes alerts for confident detections over MQTT (or logs them)
//! 5. Keeps the latest annotated frame available to readers until Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use wildwatch::alert::{AlertTransport, Recipient, SystemClock};
use wildwatch::config::{DetectorSettings, WildwatchConfig};
use wildwatch::detect::{DetectorRegistry, MotionBackend, StubBackend};
use wildwatch::health::{HealthMonitor, ProcHealthProbe};
use wildwatch::ingest::{LocalSourceAdapter, SourceId};
use wildwatch::motion::MotionConfig;
use wildwatch::pipeline::{PipelineLoop, PipelineState};
use wildwatch::transport::MqttTransport;
use wildwatch::{AlertDispatcher, Detection, Frame};

#[derive(Parser, Debug)]
#[command(author, version, about = "Motion-gated wildlife detection daemon")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "WILDWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Source to open at startup: webcam, device:N, /dev/videoN, stub://name or a path.
    #[arg(long)]
    source: Option<String>,

    /// Alert recipient, overriding the configured defaults.
    #[arg(long)]
    recipient: Option<String>,

    /// Upper bound on processed frames per second.
    #[arg(long)]
    max_fps: Option<u32>,

    /// Run the detector on every frame instead of only on motion.
    #[arg(long)]
    no_motion_gate: bool,

    /// Detector backend name.
    #[arg(long)]
    detector: Option<String>,

    /// Print the available detector backends and exit.
    #[arg(long)]
    list_detectors: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = WildwatchConfig::load_with(args.config.as_deref())?;
    if let Some(source) = args.source.as_deref() {
        cfg.source = Some(source.parse::<SourceId>().context("invalid --source")?);
    }
    if let Some(fps) = args.max_fps {
        if fps == 0 {
            return Err(anyhow!("--max-fps must be greater than zero"));
        }
        cfg.pipeline.max_fps = fps;
        cfg.capture.target_fps = fps;
    }
    if args.no_motion_gate {
        cfg.pipeline.motion_gating = false;
    }
    if let Some(name) = args.detector {
        cfg.detector.backend = name;
    }

    let registry = build_registry(&cfg.detector, cfg.motion);
    if args.list_detectors {
        for name in registry.list() {
            println!("{}", name);
        }
        return Ok(());
    }
    let detector = registry.build(&cfg.detector.backend)?;

    let transport: Option<Arc<dyn AlertTransport>> = match &cfg.mqtt {
        Some(mqtt) => match MqttTransport::connect(mqtt) {
            Ok(transport) => Some(Arc::new(transport)),
            Err(e) => {
                log::error!("MQTT transport unavailable, alerts will only be logged: {:#}", e);
                None
            }
        },
        None => None,
    };
    let dispatcher = AlertDispatcher::new(cfg.alert.clone(), transport, Arc::new(SystemClock));

    let state = PipelineState::shared(cfg.default_recipients.clone());
    if let Some(raw) = args.recipient.as_deref() {
        state.set_alert_recipient(Recipient::parse(raw)?);
    }
    match cfg.source.clone() {
        Some(source) => state.select_source(source),
        None => log::warn!("no source configured; waiting for a selection"),
    }

    let pipeline = PipelineLoop::new(
        cfg.pipeline.clone(),
        Arc::clone(&state),
        Box::new(LocalSourceAdapter::new(cfg.capture)),
        detector,
        dispatcher,
    )
    .with_motion(cfg.motion)
    .with_health(HealthMonitor::new(Box::new(ProcHealthProbe::new()), &cfg.health))
    .with_observer(Box::new(log_detections));

    let handle = pipeline.spawn().context("failed to start pipeline thread")?;
    let token = handle.cancellation_token();
    ctrlc::set_handler(move || token.cancel()).context("error setting Ctrl-C handler")?;

    log::info!(
        "wildwatchd running: detector={} recipients={}",
        cfg.detector.backend,
        state
            .active_recipients()
            .iter()
            .map(Recipient::as_str)
            .collect::<Vec<_>>()
            .join(",")
    );
    handle.join()?;
    log::info!("wildwatchd stopped");
    Ok(())
}

fn build_registry(detector: &DetectorSettings, motion: MotionConfig) -> DetectorRegistry {
    let mut registry = DetectorRegistry::new();
    registry.register("motion", move || Ok(Box::new(MotionBackend::new(motion))));
    registry.register("stub", || Ok(Box::new(StubBackend::new())));
    register_tract(&mut registry, detector);
    registry
}

#[cfg(feature = "backend-tract")]
fn register_tract(registry: &mut DetectorRegistry, detector: &DetectorSettings) {
    use wildwatch::detect::TractBackend;

    let settings = detector.clone();
    registry.register("tract", move || {
        let model = settings
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("detector.model_path is required for the tract backend"))?;
        let labels = settings
            .labels_path
            .as_ref()
            .ok_or_else(|| anyhow!("detector.labels_path is required for the tract backend"))?;
        let backend = TractBackend::new(
            model.as_path(),
            labels.as_path(),
            settings.input_width,
            settings.input_height,
        )?
        .with_threshold(settings.confidence_threshold);
        Ok(Box::new(backend))
    });
}

#[cfg(not(feature = "backend-tract"))]
fn register_tract(_registry: &mut DetectorRegistry, _detector: &DetectorSettings) {}

fn log_detections(frame: &Frame, detections: &[Detection]) -> Result<()> {
    for detection in detections {
        log::info!(
            "detected {} ({:.0}%) in {}x{} frame",
            detection.category(),
            detection.confidence() * 100.0,
            frame.width(),
            frame.height()
        );
    }
    Ok(())
}
