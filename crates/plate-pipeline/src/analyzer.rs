use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use plate_proto::{DetectedVehicle, DisplayAction, PipelineEvent, PlateReading};
use plate_uplink::PlateRecognizer;
use plate_vision::frame::{crop, project, Frame};
use plate_vision::geometry::TransformPair;
use plate_vision::rank::{judge_plate, rank_vehicles, PlateVerdict};
use plate_vision::{Classifier, Detection};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{AlertQueue, CropStore, PipelineConfig, SavedCrops};
use crate::{STATUS_PLATE, STATUS_PLATE_NUMBER, STATUS_VEHICLE};

type SharedClassifier = Arc<Mutex<Box<dyn Classifier>>>;

/// An upload that has started and not yet resolved.
#[derive(Debug, Clone, Copy)]
pub struct PendingUpload {
    pub frame_seq: u64,
    pub started: Instant,
}

/// Per-frame vehicle and plate pipeline.
///
/// `on_frame` never waits: at most one frame is in inference at a time and
/// frames arriving meanwhile are dropped. Uploads run as their own tasks and
/// may finish out of frame order. Everything observable goes out as
/// [`PipelineEvent`]s on the channel returned by [`Analyzer::new`].
pub struct Analyzer {
    shared: Arc<Shared>,
}

struct Shared {
    cfg: PipelineConfig,
    enabled: AtomicBool,
    busy: AtomicBool,
    seq: AtomicU64,
    transform: Mutex<Option<TransformPair>>,
    vehicle_model: SharedClassifier,
    plate_model: SharedClassifier,
    store: CropStore,
    recognizer: Arc<dyn PlateRecognizer>,
    pending: Mutex<HashMap<Uuid, PendingUpload>>,
    screen: Mutex<Screen>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    runtime: Handle,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// Alert queue plus the vehicle the consumer was last told to show. Display
/// decisions are emitted while this is locked so they arrive in decision order.
#[derive(Default)]
struct Screen {
    queue: AlertQueue,
    on_screen: Option<DetectedVehicle>,
}

impl Screen {
    /// Records `next` as displayed; the vehicle it replaces loses its crops.
    fn put(&mut self, next: Option<DetectedVehicle>) {
        if let Some(prev) = std::mem::replace(&mut self.on_screen, next) {
            CropStore::release(&prev);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Analyzer {
    /// Must be called from within a tokio runtime; work is spawned onto it.
    pub fn new(
        cfg: PipelineConfig,
        vehicle_model: Box<dyn Classifier>,
        plate_model: Box<dyn Classifier>,
        store: CropStore,
        recognizer: Arc<dyn PlateRecognizer>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PipelineEvent>)> {
        let runtime = Handle::try_current().context("analyzer needs a tokio runtime")?;
        anyhow::ensure!(cfg.model_input_size > 0, "pipeline.model_input_size must be positive");

        let (events, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            enabled: AtomicBool::new(cfg.enabled),
            busy: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            transform: Mutex::new(None),
            vehicle_model: Arc::new(Mutex::new(vehicle_model)),
            plate_model: Arc::new(Mutex::new(plate_model)),
            store,
            recognizer,
            pending: Mutex::new(HashMap::new()),
            screen: Mutex::new(Screen::default()),
            events,
            runtime,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            cfg,
        };
        Ok((Self { shared: Arc::new(shared) }, rx))
    }

    pub fn on_frame(&self, frame: Frame) {
        let s = &self.shared;
        if !s.enabled.load(Ordering::Acquire) || s.cancel.is_cancelled() {
            return;
        }

        let seq = s.seq.fetch_add(1, Ordering::Relaxed) + 1;
        s.emit(PipelineEvent::OverlayInvalidate);

        if s.busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            debug!("pipeline: dropping frame {}", seq);
            return;
        }

        let pair = match s.transform_for(&frame) {
            Ok(p) => p,
            Err(e) => {
                warn!("pipeline: frame {} rejected: {:#}", seq, e);
                s.busy.store(false, Ordering::Release);
                return;
            }
        };

        let shared = self.shared.clone();
        s.tasks.spawn_on(shared.run_frame(seq, frame, pair), &s.runtime);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Release);
        info!("pipeline: analysis {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Frames seen while enabled, including dropped ones.
    pub fn frames_seen(&self) -> u64 {
        self.shared.seq.load(Ordering::Relaxed)
    }

    pub fn pending_uploads(&self) -> Vec<(Uuid, PendingUpload)> {
        lock(&self.shared.pending).iter().map(|(id, p)| (*id, *p)).collect()
    }

    pub fn showing_alert(&self) -> Option<DetectedVehicle> {
        lock(&self.shared.screen).queue.showing().cloned()
    }

    /// The consumer closed the current display. Its crops are deleted and the
    /// next queued alert, if any, is returned and announced as `Display(Show)`.
    pub fn dismiss_alert(&self) -> Option<DetectedVehicle> {
        let mut screen = lock(&self.shared.screen);
        let next = screen.queue.dismiss();
        screen.put(next.clone());
        if let Some(v) = &next {
            self.shared.emit(PipelineEvent::Display(DisplayAction::Show(v.clone())));
        }
        next
    }

    /// Deletes the crops of a vehicle the consumer is done with.
    pub fn release(&self, vehicle: &DetectedVehicle) {
        let mut screen = lock(&self.shared.screen);
        if screen.on_screen.as_ref().map(|v| v.id) == Some(vehicle.id) {
            screen.on_screen = None;
        }
        CropStore::release(vehicle);
    }

    /// Stops accepting frames, cancels in-flight inference and uploads, and
    /// waits for every spawned task to finish.
    pub async fn shutdown(&self) {
        let s = &self.shared;
        s.enabled.store(false, Ordering::Release);
        s.cancel.cancel();
        s.tasks.close();
        s.tasks.wait().await;
        info!("pipeline: stopped after {} frames", self.frames_seen());
    }
}

impl Shared {
    fn emit(&self, ev: PipelineEvent) {
        // consumer may be gone
        let _ = self.events.send(ev);
    }

    fn status(&self, msg: &str) {
        self.emit(PipelineEvent::Status(msg.to_string()));
    }

    fn transform_for(&self, frame: &Frame) -> Result<TransformPair> {
        let rotation = frame.rotation - self.cfg.screen_rotation;
        let mut cached = lock(&self.transform);
        if let Some(pair) = cached.as_ref().filter(|p| p.matches(frame.width, frame.height, rotation)) {
            return Ok(*pair);
        }

        let pair = TransformPair::new(frame.width, frame.height, self.cfg.model_input_size, rotation)?;
        info!("pipeline: frame geometry {}x{} rotation {}", frame.width, frame.height, rotation);
        *cached = Some(pair);
        self.emit(PipelineEvent::FrameGeometryKnown {
            width: frame.width,
            height: frame.height,
            sensor_orientation: rotation,
        });
        Ok(pair)
    }

    async fn run_frame(self: Arc<Self>, seq: u64, frame: Frame, pair: TransformPair) {
        tokio::select! {
            () = self.cancel.cancelled() => {
                debug!("pipeline: frame {} cancelled", seq);
                return;
            }
            res = self.detect(seq, frame, pair) => {
                if let Err(e) = res {
                    warn!("pipeline: frame {} failed: {:#}", seq, e);
                    self.status("");
                }
            }
        }

        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = tokio::time::sleep(self.cfg.settle_delay()) => {}
        }
        self.busy.store(false, Ordering::Release);
    }

    async fn detect(self: &Arc<Self>, seq: u64, frame: Frame, pair: TransformPair) -> Result<()> {
        self.status(STATUS_VEHICLE);
        let model = self.vehicle_model.clone();
        let size = self.cfg.model_input_size;
        let (image, detections) = tokio::task::spawn_blocking(move || -> Result<(RgbImage, Vec<Detection>)> {
            let image = frame.into_image()?;
            let input = project(&image, &pair.crop_to_frame, size, size);
            let detections = lock(&model).recognize(&input).context("vehicle classifier")?;
            Ok((image, detections))
        })
        .await
        .map_err(|e| anyhow!("vehicle task: {}", e))??;

        let Some(best) = rank_vehicles(&detections, &self.cfg.rank) else {
            debug!("pipeline: frame {} has no vehicle candidate ({} raw)", seq, detections.len());
            self.status("");
            return Ok(());
        };

        if best.confidence > self.cfg.interest_confidence {
            self.emit(PipelineEvent::ObjectDetected {
                label: best.label.clone(),
                confidence_percent: (best.confidence * 100.0).round() as u32,
                detections: detections
                    .iter()
                    .map(|d| Detection { location: pair.crop_to_frame.map_rect(&d.location), ..d.clone() })
                    .collect(),
                frame_seq: seq,
            });
            self.emit(PipelineEvent::ObjectOfInterest { hide_after: self.cfg.overlay_hide() });
        }

        if best.confidence < self.cfg.min_accept_confidence {
            self.status("");
            return Ok(());
        }

        let vehicle_rect = pair.crop_to_frame.map_rect(&best.location);
        let vehicle = match crop(&image, &vehicle_rect) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                debug!("pipeline: frame {} vehicle crop skipped: {}", seq, e);
                self.status("");
                return Ok(());
            }
        };
        self.emit(PipelineEvent::LiveCrop { vehicle: vehicle.clone(), plate: None });

        self.status(STATUS_PLATE);
        let model = self.plate_model.clone();
        let crop_in = vehicle.clone();
        let plates = tokio::task::spawn_blocking(move || -> Result<Vec<Detection>> {
            let plates = lock(&model).recognize(&crop_in).context("plate classifier")?;
            Ok(plates)
        })
        .await
        .map_err(|e| anyhow!("plate task: {}", e))??;

        let plate = match judge_plate(&plates, self.cfg.plate_min_area) {
            PlateVerdict::Accepted(d) => d,
            PlateVerdict::Rejected(why) => {
                debug!("pipeline: frame {} plate rejected: {:?}", seq, why);
                self.status("");
                return Ok(());
            }
        };

        let plate_rect = plate.location.offset_by(&vehicle_rect);
        let plate_crop = match crop(&image, &plate_rect) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                debug!("pipeline: frame {} plate crop skipped: {}", seq, e);
                self.status("");
                return Ok(());
            }
        };

        let id = Uuid::new_v4();
        let store = self.store.clone();
        let (v, p) = (vehicle.clone(), plate_crop.clone());
        let saved = tokio::task::spawn_blocking(move || store.save(id, &v, &p))
            .await
            .map_err(|e| anyhow!("save task: {}", e))??;

        self.emit(PipelineEvent::LiveCrop { vehicle, plate: Some(plate_crop) });
        info!("pipeline: frame {} plate candidate {} ({:.0}px²)", seq, id, plate.location.area());

        self.start_upload(id, seq, saved);
        Ok(())
    }

    fn start_upload(self: &Arc<Self>, id: Uuid, seq: u64, saved: SavedCrops) {
        lock(&self.pending).insert(id, PendingUpload { frame_seq: seq, started: Instant::now() });
        self.status(STATUS_PLATE_NUMBER);

        let me = self.clone();
        self.tasks.spawn_on(
            async move {
                let file_name = saved
                    .plate_file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{}_lp_image.jpg", id));

                let reading = tokio::select! {
                    () = me.cancel.cancelled() => {
                        lock(&me.pending).remove(&id);
                        CropStore::discard(&saved);
                        debug!("pipeline: upload {} cancelled", id);
                        return;
                    }
                    r = me.recognizer.submit(saved.plate_jpeg.clone(), &file_name, id) => r,
                };
                me.finish_upload(id, seq, saved, reading);
            },
            &self.runtime,
        );
    }

    fn finish_upload(&self, id: Uuid, seq: u64, saved: SavedCrops, reading: Option<PlateReading>) {
        if let Some(p) = lock(&self.pending).remove(&id) {
            debug!("pipeline: upload {} resolved in {}ms", id, p.started.elapsed().as_millis());
        }

        let (plate_number, alert) = match reading {
            Some(r) => (Some(r.plate_number), r.alert),
            None => (None, false),
        };
        let vehicle = DetectedVehicle {
            id,
            frame_seq: seq,
            vehicle_file: saved.vehicle_file,
            plate_file: saved.plate_file,
            plate_number,
            alert,
        };
        self.emit(PipelineEvent::PlateDetected(vehicle.clone()));

        let mut screen = lock(&self.screen);
        let action = screen.queue.offer(vehicle.clone());
        match &action {
            DisplayAction::Show(v) => screen.put(Some(v.clone())),
            DisplayAction::Queued(_) => {}
            DisplayAction::Dropped(_) | DisplayAction::Discarded(_) => CropStore::release(&vehicle),
        }
        self.emit(PipelineEvent::Display(action));
        drop(screen);
        self.status("");
    }
}
