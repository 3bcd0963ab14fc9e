//! Model output decoding, kept apart from the interpreter so it can be tested
//! without the native runtime.

use crate::{suppress, Detection, Rect};

/// Object Detection API SSD head: `locations` is `[n][4]` normalized
/// `[ymin, xmin, ymax, xmax]`, `classes` are indices into `labels` shifted by
/// one (index 0 is the background class), `scores` are already sigmoid.
/// Boxes come back in pixels of the `input_size` square.
pub fn decode_ssd(
    locations: &[f32],
    classes: &[f32],
    scores: &[f32],
    count: usize,
    labels: &[String],
    input_size: u32,
) -> Vec<Detection> {
    let size = input_size as f32;
    let n = count.min(scores.len()).min(classes.len()).min(locations.len() / 4);

    let mut out: Vec<Detection> = (0..n)
        .map(|i| {
            let loc = &locations[i * 4..i * 4 + 4];
            let class = classes[i].max(0.0) as usize + 1;
            let label = labels.get(class).cloned().unwrap_or_else(|| format!("class{}", class));
            Detection {
                label,
                confidence: scores[i],
                location: Rect::from_ltrb(loc[1] * size, loc[0] * size, loc[3] * size, loc[2] * size),
            }
        })
        .collect();

    out.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    out
}

pub const WPOD_STRIDE: u32 = 16;
const WPOD_SIDE: f32 = 288.0;
const WPOD_MAX_DIM: u32 = 608;
const WPOD_CHANNELS: usize = 8;
const WPOD_ALPHA: f32 = 7.75;

/// Network input size for a plate search over a `w`x`h` vehicle crop: the short
/// side grows with the aspect ratio (capped at 608) and both sides round up to
/// the network stride.
pub fn wpod_input_dims(w: u32, h: u32) -> (u32, u32) {
    let (w, h) = (w.max(1), h.max(1));
    let ratio = w.max(h) as f32 / w.min(h) as f32;
    let side = (ratio * WPOD_SIDE) as u32;
    let bound_dim = (side + side % WPOD_STRIDE).min(WPOD_MAX_DIM);
    let factor = bound_dim as f32 / w.min(h) as f32;

    let round_up = |v: u32| {
        let rem = v % WPOD_STRIDE;
        if rem == 0 { v } else { v + WPOD_STRIDE - rem }
    };
    (round_up((w as f32 * factor) as u32), round_up((h as f32 * factor) as u32))
}

/// Decodes a WPOD-style plate grid of `rows`x`cols` cells with 8 channels
/// each: `[prob, _, a00, a01, a02, a10, a11, a12]`. Each cell above
/// `threshold` yields the bounding box of its affine-warped unit square,
/// scaled to `image_w`x`image_h`. Overlapping boxes are suppressed at `nms_iou`.
pub fn decode_wpod(
    raw: &[f32],
    rows: usize,
    cols: usize,
    image_w: u32,
    image_h: u32,
    threshold: f32,
    nms_iou: f32,
) -> Vec<Detection> {
    const BASE: [(f32, f32); 4] = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];
    let mut found = Vec::new();

    for i in 0..rows {
        for j in 0..cols {
            let base = (i * cols + j) * WPOD_CHANNELS;
            let Some(cell) = raw.get(base..base + WPOD_CHANNELS) else { continue };
            let prob = cell[0];
            if prob < threshold {
                continue;
            }

            let a = [cell[2].max(0.0), cell[3], cell[4], cell[5], cell[6].max(0.0), cell[7]];
            let (m, n) = (j as f32 + 0.5, i as f32 + 0.5);

            let mut tl = (f32::INFINITY, f32::INFINITY);
            let mut br = (f32::NEG_INFINITY, f32::NEG_INFINITY);
            for (bx, by) in BASE {
                let x = ((a[0] * bx + a[1] * by + a[2]) * WPOD_ALPHA + m) / cols as f32;
                let y = ((a[3] * bx + a[4] * by + a[5]) * WPOD_ALPHA + n) / rows as f32;
                tl = (tl.0.min(x), tl.1.min(y));
                br = (br.0.max(x), br.1.max(y));
            }

            found.push(Detection {
                label: "LP".into(),
                confidence: prob,
                location: Rect::from_ltrb(
                    tl.0 * image_w as f32,
                    tl.1 * image_h as f32,
                    br.0 * image_w as f32,
                    br.1 * image_h as f32,
                ),
            });
        }
    }

    suppress(found, nms_iou)
}
