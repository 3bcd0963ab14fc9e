use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use plate_pipeline::{doctor as pipeline_doctor, Analyzer, CropStore, PipelineConfig, StorageConfig};
use plate_proto::{DisplayAction, PipelineEvent};
use plate_uplink::{doctor as uplink_doctor, PlateRecognizer, RecognitionClient, UplinkConfig};
use plate_vision::camera::{self, CameraConfig, FrameSource};
use plate_vision::frame::Frame;
use plate_vision::{Classifier, VisionConfig};

#[cfg(feature = "vision-tflite")]
use plate_vision::tflite;

#[derive(Debug, Parser)]
#[command(name = "platewatch", version, about = "platewatch - vehicle & license plate watcher")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Watch the camera until interrupted (or until a replay runs out).
    Run {
        /// Seconds an alert stays on screen before the next queued one.
        #[arg(long, default_value_t = 10)]
        alert_secs: u64,
    },
    /// Push one image through the pipeline and print what comes out.
    Analyze { image: String },
    Vision { #[command(subcommand)] cmd: VisionCmd },
}

#[derive(Debug, Subcommand)]
enum VisionCmd { Inspect }

#[derive(Debug, serde::Deserialize)]
struct Config {
    camera: CameraConfig,
    vision: VisionConfig,
    uplink: UplinkConfig,
    #[serde(default)]
    pipeline: PipelineConfig,
    storage: StorageConfig,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg).await?,
        Command::Run { alert_secs } => run(&cfg, alert_secs).await?,
        Command::Analyze { image } => analyze(&cfg, &image).await?,
        Command::Vision { cmd } => vision_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    uplink_doctor::check_endpoint(&cfg.uplink)?;
    pipeline_doctor::check_crop_dir(&cfg.storage.crop_dir)?;
    pipeline_doctor::check_thresholds(&cfg.pipeline, cfg.vision.input_size)?;

    for p in [&cfg.vision.vehicle_model_path, &cfg.vision.plate_model_path, &cfg.vision.labels_path] {
        if !Path::new(p).is_file() {
            warn!("doctor: missing {}", p);
        }
    }

    if cfg.camera.mode == "replay" {
        let dir = cfg.camera.replay_dir.as_ref().context("camera.replay_dir missing (mode=replay)")?;
        anyhow::ensure!(!camera::replay_files(dir)?.is_empty(), "camera.replay_dir has no images: {}", dir);
    }

    match RecognitionClient::new(&cfg.uplink)?.is_allowed().await {
        Ok(true) => info!("doctor: recognition service access OK"),
        Ok(false) => warn!("doctor: recognition service denies access for these credentials"),
        Err(e) => warn!("doctor: recognition service unreachable: {:#}", e),
    }

    info!("doctor: OK");
    Ok(())
}

async fn vision_cmd(cfg: &Config, cmd: VisionCmd) -> Result<()> {
    match cmd {
        VisionCmd::Inspect => {
            let report = inspect_models(cfg)?;
            print!("{}", report);
            Ok(())
        }
    }
}

async fn run(cfg: &Config, alert_secs: u64) -> Result<()> {
    info!("run: starting");

    let (analyzer, mut rx) = init_analyzer(cfg, cfg.pipeline.clone())?;
    let mut src = FrameSource::open(cfg.camera.clone())?;

    let consumer = {
        let analyzer = analyzer.clone();
        let hold = Duration::from_secs(alert_secs);
        tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                report(&ev);
                if let PipelineEvent::Display(DisplayAction::Show(v)) = &ev {
                    if v.alert {
                        let analyzer = analyzer.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(hold).await;
                            analyzer.dismiss_alert();
                        });
                    }
                }
            }
        })
    };

    let mut frames = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("run: interrupted");
                break;
            }
            next = src.next_frame() => match next {
                Ok(Some(frame)) => {
                    frames += 1;
                    analyzer.on_frame(frame);
                }
                Ok(None) => {
                    info!("run: replay finished");
                    wait_quiet(&analyzer, upload_grace(cfg)).await;
                    break;
                }
                Err(e) => warn!("run: capture failed: {:#}", e),
            }
        }
    }

    analyzer.shutdown().await;
    consumer.abort();
    info!("run: stopped after {} frames", frames);
    Ok(())
}

async fn analyze(cfg: &Config, image: &str) -> Result<()> {
    let jpeg = tokio::fs::read(image).await.with_context(|| format!("read {}", image))?;
    let frame = Frame::from_jpeg(&jpeg, cfg.camera.rotation)?;
    info!("analyze: {} ({}x{})", image, frame.width, frame.height);

    let pipeline = PipelineConfig { enabled: true, settle_ms: 0, ..cfg.pipeline.clone() };
    let (analyzer, mut rx) = init_analyzer(cfg, pipeline)?;
    analyzer.on_frame(frame);

    if !wait_quiet(&analyzer, upload_grace(cfg)).await {
        warn!("analyze: gave up waiting for the pipeline");
    }
    analyzer.shutdown().await;

    while let Ok(ev) = rx.try_recv() {
        report(&ev);
    }
    Ok(())
}

fn upload_grace(cfg: &Config) -> Duration {
    Duration::from_secs(cfg.uplink.timeout_s + 5)
}

/// Waits until no frame is in inference and no upload is outstanding.
async fn wait_quiet(analyzer: &Analyzer, limit: Duration) -> bool {
    let start = Instant::now();
    while analyzer.is_busy() || !analyzer.pending_uploads().is_empty() {
        if start.elapsed() > limit {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    true
}

fn report(ev: &PipelineEvent) {
    let Some(line) = describe(ev) else { return };
    let ts_unix_ms = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    println!("{} {}", ts_unix_ms, line);
}

fn describe(ev: &PipelineEvent) -> Option<String> {
    let line = match ev {
        PipelineEvent::OverlayInvalidate => return None,
        PipelineEvent::Status(s) if s.is_empty() => return None,
        PipelineEvent::Status(s) => format!("status {}", s),
        PipelineEvent::ObjectDetected { label, confidence_percent, detections, frame_seq } => {
            format!("frame={} object={} conf={}% boxes={}", frame_seq, label, confidence_percent, detections.len())
        }
        PipelineEvent::ObjectOfInterest { hide_after } => format!("interest hide_after={}ms", hide_after.as_millis()),
        PipelineEvent::FrameGeometryKnown { width, height, sensor_orientation } => {
            format!("geometry {}x{} orientation={}", width, height, sensor_orientation)
        }
        PipelineEvent::LiveCrop { vehicle, plate } => match plate {
            Some(p) => format!("crop vehicle={}x{} plate={}x{}", vehicle.width(), vehicle.height(), p.width(), p.height()),
            None => format!("crop vehicle={}x{}", vehicle.width(), vehicle.height()),
        },
        PipelineEvent::PlateDetected(v) => format!(
            "plate id={} frame={} number={} alert={} file={}",
            v.id,
            v.frame_seq,
            v.plate_number.as_deref().unwrap_or("-"),
            v.alert,
            v.plate_file.display()
        ),
        PipelineEvent::Display(action) => match action {
            DisplayAction::Show(v) => format!("display show id={} number={}", v.id, v.plate_number.as_deref().unwrap_or("-")),
            DisplayAction::Queued(id) => format!("display queued id={}", id),
            DisplayAction::Dropped(id) => format!("display dropped id={} (duplicate)", id),
            DisplayAction::Discarded(id) => format!("display discarded id={}", id),
        },
    };
    Some(line)
}

// --- init helpers ---
fn init_analyzer(cfg: &Config, pipeline: PipelineConfig) -> Result<(Arc<Analyzer>, UnboundedReceiver<PipelineEvent>)> {
    anyhow::ensure!(
        pipeline.model_input_size == cfg.vision.input_size,
        "pipeline.model_input_size {} != vision.input_size {}",
        pipeline.model_input_size,
        cfg.vision.input_size
    );
    let (vehicle, plate) = init_classifiers(cfg)?;
    let store = CropStore::open(&cfg.storage)?;
    let recognizer: Arc<dyn PlateRecognizer> = Arc::new(RecognitionClient::new(&cfg.uplink)?);
    let (analyzer, rx) = Analyzer::new(pipeline, vehicle, plate, store, recognizer)?;
    Ok((Arc::new(analyzer), rx))
}

#[cfg(feature = "vision-tflite")]
fn init_classifiers(cfg: &Config) -> Result<(Box<dyn Classifier>, Box<dyn Classifier>)> {
    let (vehicle, plate) = tflite::load_models(&cfg.vision)?;
    Ok((Box::new(vehicle), Box::new(plate)))
}

#[cfg(not(feature = "vision-tflite"))]
fn init_classifiers(_cfg: &Config) -> Result<(Box<dyn Classifier>, Box<dyn Classifier>)> {
    anyhow::bail!("vision not available; build with --features vision-tflite")
}

#[cfg(feature = "vision-tflite")]
fn inspect_models(cfg: &Config) -> Result<String> {
    let (mut vehicle, mut plate) = tflite::load_models(&cfg.vision)?;
    Ok(format!("{}{}", vehicle.inspect()?, plate.inspect()?))
}

#[cfg(not(feature = "vision-tflite"))]
fn inspect_models(_cfg: &Config) -> Result<String> {
    anyhow::bail!("vision backend not available; build with --features vision-tflite")
}
