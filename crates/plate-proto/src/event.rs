use image::RgbImage;
use plate_vision::Detection;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::vehicle::DetectedVehicle;

/// What the alert queue decided for a finished vehicle.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayAction {
    /// Put this vehicle on screen now.
    Show(DetectedVehicle),
    /// An alert is showing; this one waits its turn.
    Queued(Uuid),
    /// Same plate already queued or on screen; crops deleted.
    Dropped(Uuid),
    /// Informational vehicle arrived during an alert; crops deleted.
    Discarded(Uuid),
}

/// Everything the pipeline tells its consumer.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ObjectDetected {
        label: String,
        confidence_percent: u32,
        detections: Vec<Detection>,
        frame_seq: u64,
    },
    Status(String),
    ObjectOfInterest { hide_after: Duration },
    OverlayInvalidate,
    FrameGeometryKnown { width: u32, height: u32, sensor_orientation: i32 },
    LiveCrop { vehicle: Arc<RgbImage>, plate: Option<Arc<RgbImage>> },
    PlateDetected(DetectedVehicle),
    Display(DisplayAction),
}
