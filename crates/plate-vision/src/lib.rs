mod nms;
pub mod camera;
pub mod decode;
pub mod frame;
pub mod geometry;
pub mod rank;
#[cfg(feature = "vision-tflite")]
pub mod tflite;

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

pub use nms::{iou, suppress};

/// Axis-aligned box in pixels of whatever space produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self { left, top, width, height }
    }

    pub fn from_ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, width: right - left, height: bottom - top }
    }

    pub fn right(&self) -> f32 { self.left + self.width }
    pub fn bottom(&self) -> f32 { self.top + self.height }
    pub fn area(&self) -> f32 { self.width * self.height }

    /// Moves this box by the origin of `outer`, turning coordinates relative to
    /// a crop into coordinates of the image the crop was taken from.
    pub fn offset_by(&self, outer: &Rect) -> Rect {
        Rect { left: outer.left + self.left, top: outer.top + self.top, ..*self }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub location: Rect,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_backend")]
    pub backend: String, // "tflite"
    pub vehicle_model_path: String,
    pub plate_model_path: String,
    pub labels_path: String,

    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_true")]
    pub vehicle_quantized: bool,
    #[serde(default = "default_threads")]
    pub num_threads: i32,
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,

    #[serde(default = "default_plate_threshold")]
    pub plate_threshold: f32,
    #[serde(default = "default_plate_nms_iou")]
    pub plate_nms_iou: f32,
}

fn default_backend() -> String { "tflite".into() }
fn default_input_size() -> u32 { 300 }
fn default_true() -> bool { true }
fn default_threads() -> i32 { 4 }
fn default_max_detections() -> usize { 10 }
fn default_plate_threshold() -> f32 { 0.5 }
fn default_plate_nms_iou() -> f32 { 0.1 }

/// One object-class model. Results come back sorted by descending confidence.
pub trait Classifier: Send {
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        (**self).recognize(image)
    }
}

pub fn load_labels(path: &str) -> Result<Vec<String>> {
    use anyhow::Context;
    let s = std::fs::read_to_string(path).with_context(|| format!("read labels {}", path))?;
    Ok(s.lines().map(|l| l.trim().to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_moves_origin_only() {
        let plate = Rect::new(10.0, 20.0, 40.0, 12.0);
        let vehicle = Rect::new(100.0, 200.0, 300.0, 250.0);
        let r = plate.offset_by(&vehicle);
        assert_eq!(r, Rect::new(110.0, 220.0, 40.0, 12.0));
    }

    #[test]
    fn ltrb_round_trip() {
        let r = Rect::from_ltrb(5.0, 6.0, 25.0, 16.0);
        assert_eq!(r.width, 20.0);
        assert_eq!(r.height, 10.0);
        assert_eq!(r.right(), 25.0);
        assert_eq!(r.bottom(), 16.0);
        assert_eq!(r.area(), 200.0);
    }

    #[test]
    fn vision_config_defaults() {
        let cfg: VisionConfig = toml::from_str(
            r#"
            vehicle_model_path = "models/detect_v.tflite"
            plate_model_path = "models/lp_detect.tflite"
            labels_path = "models/labelmap.txt"
            "#,
        ).unwrap();
        assert_eq!(cfg.input_size, 300);
        assert_eq!(cfg.backend, "tflite");
        assert!(cfg.vehicle_quantized);
        assert_eq!(cfg.plate_threshold, 0.5);
    }
}
