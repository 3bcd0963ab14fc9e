pub mod alert;
pub mod analyzer;
pub mod config;
pub mod doctor;
pub mod storage;

pub use alert::AlertQueue;
pub use analyzer::{Analyzer, PendingUpload};
pub use config::{PipelineConfig, StorageConfig};
pub use storage::{CropStore, SavedCrops};

pub const STATUS_VEHICLE: &str = "Detecting Vehicle";
pub const STATUS_PLATE: &str = "Detecting LP";
pub const STATUS_PLATE_NUMBER: &str = "Detecting LP Number";
