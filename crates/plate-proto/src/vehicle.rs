use std::path::PathBuf;
use uuid::Uuid;

/// A vehicle whose plate went through recognition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedVehicle {
    /// Correlation id shared by the crops, the upload and dedup.
    pub id: Uuid,
    /// Sequence number of the frame the crops came from. Uploads finish out of
    /// order, so this is the only reliable ordering key.
    pub frame_seq: u64,
    pub vehicle_file: PathBuf,
    pub plate_file: PathBuf,
    pub plate_number: Option<String>,
    pub alert: bool,
}
