pub mod event;
pub mod recognition;
pub mod vehicle;

pub use event::{DisplayAction, PipelineEvent};
pub use recognition::{AccessResponse, PlateReading, SubmitLpResponse};
pub use vehicle::DetectedVehicle;
pub use uuid::Uuid;
