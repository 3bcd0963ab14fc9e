use plate_vision::rank::RankPolicy;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Display rotation subtracted from the sensor rotation of every frame.
    #[serde(default)]
    pub screen_rotation: i32,
    /// Must match `vision.input_size`.
    #[serde(default = "default_input_size")]
    pub model_input_size: u32,
    #[serde(default = "default_min_accept")]
    pub min_accept_confidence: f32,
    #[serde(default = "default_interest")]
    pub interest_confidence: f32,
    /// Plates with an area at or below this (frame px²) are ignored.
    #[serde(default = "default_plate_min_area")]
    pub plate_min_area: f32,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_overlay_ms")]
    pub overlay_hide_ms: u64,
    #[serde(default)]
    pub rank: RankPolicy,
}

fn default_true() -> bool { true }
fn default_input_size() -> u32 { 300 }
fn default_min_accept() -> f32 { 0.5 }
fn default_interest() -> f32 { 0.7 }
fn default_plate_min_area() -> f32 { 200.0 }
fn default_settle_ms() -> u64 { 500 }
fn default_overlay_ms() -> u64 { 500 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            screen_rotation: 0,
            model_input_size: default_input_size(),
            min_accept_confidence: default_min_accept(),
            interest_confidence: default_interest(),
            plate_min_area: default_plate_min_area(),
            settle_ms: default_settle_ms(),
            overlay_hide_ms: default_overlay_ms(),
            rank: RankPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn overlay_hide(&self) -> Duration {
        Duration::from_millis(self.overlay_hide_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub crop_dir: String,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_jpeg_quality() -> u8 { 90 }
