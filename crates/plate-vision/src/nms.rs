use crate::{Detection, Rect};

/// Degenerate boxes never overlap anything (negative result), so they are never
/// suppressed and never suppress.
pub fn iou(a: &Rect, b: &Rect) -> f32 {
    if a.width <= 0.0 || a.height <= 0.0 || b.width <= 0.0 || b.height <= 0.0 {
        return -1.0;
    }
    let iw = (a.right().min(b.right()) - a.left.max(b.left)).max(0.0);
    let ih = (a.bottom().min(b.bottom()) - a.top.max(b.top)).max(0.0);
    let inter = iw * ih;
    let union = a.area() + b.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Greedy NMS: sort by confidence, keep a box unless it overlaps a kept one above `iou_th`.
pub fn suppress(mut dets: Vec<Detection>, iou_th: f32) -> Vec<Detection> {
    dets.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<Detection> = Vec::new();

    'outer: for d in dets {
        for k in &kept {
            if iou(&d.location, &k.location) > iou_th {
                continue 'outer;
            }
        }
        kept.push(d);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(conf: f32, l: f32, t: f32, w: f32, h: f32) -> Detection {
        Detection { label: "LP".into(), confidence: conf, location: Rect::new(l, t, w, h) }
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 0.0, 10.0, 10.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(iou(&a, &Rect::new(20.0, 20.0, 5.0, 5.0)), 0.0);
    }

    #[test]
    fn suppress_keeps_strongest_of_a_cluster() {
        let out = suppress(
            vec![
                det(0.6, 1.0, 1.0, 10.0, 10.0),
                det(0.9, 0.0, 0.0, 10.0, 10.0),
                det(0.7, 50.0, 50.0, 10.0, 10.0),
            ],
            0.1,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].confidence, 0.9);
        assert_eq!(out[1].confidence, 0.7);
    }
}
