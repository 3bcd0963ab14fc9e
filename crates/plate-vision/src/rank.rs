use serde::Deserialize;

use crate::Detection;

/// Thresholds for picking the one vehicle worth cropping per frame.
/// Sizes are in model-input pixels.
#[derive(Debug, Clone, Deserialize)]
pub struct RankPolicy {
    #[serde(default = "default_min_aspect")]
    pub min_aspect: f32, // height / width
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_min_side")]
    pub min_side: f32,
}

fn default_min_aspect() -> f32 { 0.8 }
fn default_min_confidence() -> f32 { 0.8 }
fn default_min_side() -> f32 { 50.0 }

impl Default for RankPolicy {
    fn default() -> Self {
        Self {
            min_aspect: default_min_aspect(),
            min_confidence: default_min_confidence(),
            min_side: default_min_side(),
        }
    }
}

/// Returns the largest-area detection passing all filters. Among equal areas the
/// earliest one in `dets` wins, i.e. the most confident for classifier output.
pub fn rank_vehicles(dets: &[Detection], policy: &RankPolicy) -> Option<Detection> {
    dets.iter()
        .filter(|d| d.location.width > 0.0 && d.location.height / d.location.width > policy.min_aspect)
        .filter(|d| d.confidence > policy.min_confidence)
        .filter(|d| d.location.height > policy.min_side && d.location.width > policy.min_side)
        .fold(None::<&Detection>, |best, d| match best {
            Some(b) if b.location.area() >= d.location.area() => Some(b),
            _ => Some(d),
        })
        .cloned()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    NoPlate,
    TooSmall { area: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlateVerdict {
    Accepted(Detection),
    Rejected(Rejection),
}

/// Keeps the most confident plate box if its area is strictly above `min_area`.
pub fn judge_plate(dets: &[Detection], min_area: f32) -> PlateVerdict {
    let best = dets.iter().fold(None::<&Detection>, |best, d| match best {
        Some(b) if b.confidence >= d.confidence => Some(b),
        _ => Some(d),
    });
    match best {
        None => PlateVerdict::Rejected(Rejection::NoPlate),
        Some(d) if d.location.area() <= min_area => {
            PlateVerdict::Rejected(Rejection::TooSmall { area: d.location.area() })
        }
        Some(d) => PlateVerdict::Accepted(d.clone()),
    }
}
