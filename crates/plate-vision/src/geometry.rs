use anyhow::Result;

use crate::Rect;

/// 2x3 affine matrix in image coordinates (y grows downwards):
///   x' = sx*x + kx*y + tx
///   y' = ky*x + sy*y + ty
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub sx: f64,
    pub kx: f64,
    pub tx: f64,
    pub ky: f64,
    pub sy: f64,
    pub ty: f64,
}

impl Affine {
    pub const IDENTITY: Affine = Affine { sx: 1.0, kx: 0.0, tx: 0.0, ky: 0.0, sy: 1.0, ty: 0.0 };

    pub fn translate(dx: f64, dy: f64) -> Self {
        Self { tx: dx, ty: dy, ..Self::IDENTITY }
    }

    pub fn scale(fx: f64, fy: f64) -> Self {
        Self { sx: fx, sy: fy, ..Self::IDENTITY }
    }

    /// Clockwise on screen. Quarter turns use exact sin/cos so boxes stay axis-aligned.
    pub fn rotate(degrees: f64) -> Self {
        let (sin, cos) = match degrees.rem_euclid(360.0) {
            d if d == 0.0 => (0.0, 1.0),
            d if d == 90.0 => (1.0, 0.0),
            d if d == 180.0 => (0.0, -1.0),
            d if d == 270.0 => (-1.0, 0.0),
            d => d.to_radians().sin_cos(),
        };
        Self { sx: cos, kx: -sin, tx: 0.0, ky: sin, sy: cos, ty: 0.0 }
    }

    /// `self` first, then `next`.
    pub fn then(self, next: Affine) -> Affine {
        Affine {
            sx: next.sx * self.sx + next.kx * self.ky,
            kx: next.sx * self.kx + next.kx * self.sy,
            tx: next.sx * self.tx + next.kx * self.ty + next.tx,
            ky: next.ky * self.sx + next.sy * self.ky,
            sy: next.ky * self.kx + next.sy * self.sy,
            ty: next.ky * self.tx + next.sy * self.ty + next.ty,
        }
    }

    pub fn determinant(&self) -> f64 {
        self.sx * self.sy - self.kx * self.ky
    }

    pub fn invert(&self) -> Option<Affine> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let sx = self.sy / det;
        let kx = -self.kx / det;
        let ky = -self.ky / det;
        let sy = self.sx / det;
        Some(Affine {
            sx, kx, ky, sy,
            tx: -(sx * self.tx + kx * self.ty),
            ty: -(ky * self.tx + sy * self.ty),
        })
    }

    pub fn map_point(&self, x: f64, y: f64) -> (f64, f64) {
        (self.sx * x + self.kx * y + self.tx, self.ky * x + self.sy * y + self.ty)
    }

    /// Maps all four corners and returns their axis-aligned bounds.
    pub fn map_rect(&self, r: &Rect) -> Rect {
        let (l, t) = (r.left as f64, r.top as f64);
        let (rr, b) = (r.right() as f64, r.bottom() as f64);
        let corners = [
            self.map_point(l, t),
            self.map_point(rr, t),
            self.map_point(rr, b),
            self.map_point(l, b),
        ];
        let mut min = (f64::INFINITY, f64::INFINITY);
        let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in corners {
            min = (min.0.min(x), min.1.min(y));
            max = (max.0.max(x), max.1.max(y));
        }
        Rect::from_ltrb(min.0 as f32, min.1 as f32, max.0 as f32, max.1 as f32)
    }
}

/// Builds the sensor -> model-input mapping: rotate about the source centre,
/// scale the (possibly transposed) source onto `dst`, recentre on `dst`.
pub fn compute_transform(
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
    rotation_deg: i32,
    maintain_aspect: bool,
) -> Affine {
    let mut m = Affine::IDENTITY;

    if rotation_deg != 0 {
        m = m
            .then(Affine::translate(-(src_w as f64) / 2.0, -(src_h as f64) / 2.0))
            .then(Affine::rotate(rotation_deg as f64));
    }

    let transpose = (rotation_deg.abs() + 90) % 180 == 0;
    let (in_w, in_h) = if transpose { (src_h, src_w) } else { (src_w, src_h) };

    if in_w != dst_w || in_h != dst_h {
        let fx = dst_w as f64 / in_w as f64;
        let fy = dst_h as f64 / in_h as f64;
        m = if maintain_aspect {
            let f = fx.max(fy);
            m.then(Affine::scale(f, f))
        } else {
            m.then(Affine::scale(fx, fy))
        };
    }

    if rotation_deg != 0 {
        m = m.then(Affine::translate(dst_w as f64 / 2.0, dst_h as f64 / 2.0));
    }
    m
}

/// Forward (frame -> crop) and inverse (crop -> frame) transforms for one
/// frame geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformPair {
    pub frame_to_crop: Affine,
    pub crop_to_frame: Affine,
    pub frame_w: u32,
    pub frame_h: u32,
    pub rotation_deg: i32,
}

impl TransformPair {
    pub fn new(frame_w: u32, frame_h: u32, input_size: u32, rotation_deg: i32) -> Result<Self> {
        anyhow::ensure!(frame_w > 0 && frame_h > 0, "empty frame {}x{}", frame_w, frame_h);
        let frame_to_crop = compute_transform(frame_w, frame_h, input_size, input_size, rotation_deg, false);
        let inverse = frame_to_crop.invert();
        debug_assert!(inverse.is_some(), "scale+rotate transform must be invertible");
        let crop_to_frame = inverse.ok_or_else(|| anyhow::anyhow!("frame transform is not invertible"))?;
        Ok(Self { frame_to_crop, crop_to_frame, frame_w, frame_h, rotation_deg })
    }

    pub fn matches(&self, frame_w: u32, frame_h: u32, rotation_deg: i32) -> bool {
        self.frame_w == frame_w && self.frame_h == frame_h && self.rotation_deg == rotation_deg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &Rect, b: &Rect) -> bool {
        let eps = 1e-3;
        (a.left - b.left).abs() < eps
            && (a.top - b.top).abs() < eps
            && (a.width - b.width).abs() < eps
            && (a.height - b.height).abs() < eps
    }

    #[test]
    fn inverse_undoes_forward_for_quarter_turns() {
        let r = Rect::new(412.0, 233.0, 180.0, 96.0);
        for rot in [0, 90, 180, 270] {
            let pair = TransformPair::new(1920, 1080, 300, rot).unwrap();
            let there = pair.frame_to_crop.map_rect(&r);
            let back = pair.crop_to_frame.map_rect(&there);
            assert!(close(&r, &back), "rot={} got {:?}", rot, back);
        }
    }

    #[test]
    fn negative_rotation_is_a_valid_quarter_turn() {
        // sensor 90 minus screen 180
        let pair = TransformPair::new(640, 480, 300, -90).unwrap();
        let r = Rect::new(10.0, 10.0, 50.0, 20.0);
        let back = pair.crop_to_frame.map_rect(&pair.frame_to_crop.map_rect(&r));
        assert!(close(&r, &back));
    }

    #[test]
    fn quarter_turn_maps_frame_onto_crop() {
        let m = compute_transform(1920, 1080, 300, 300, 90, false);
        let full = Rect::new(0.0, 0.0, 1920.0, 1080.0);
        let mapped = m.map_rect(&full);
        assert!(close(&mapped, &Rect::new(0.0, 0.0, 300.0, 300.0)), "{:?}", mapped);

        // top-left of the sensor ends up at the top-right of the crop
        let (x, y) = m.map_point(0.0, 0.0);
        assert!((x - 300.0).abs() < 1e-9 && y.abs() < 1e-9);
    }

    #[test]
    fn unrotated_transform_is_a_plain_stretch() {
        let m = compute_transform(600, 300, 300, 300, 0, false);
        assert_eq!(m, Affine::scale(0.5, 1.0));
    }

    #[test]
    fn maintain_aspect_uses_the_larger_factor() {
        let m = compute_transform(600, 300, 300, 300, 0, true);
        assert_eq!(m, Affine::scale(1.0, 1.0));
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        assert!(Affine::scale(0.0, 1.0).invert().is_none());
    }

    #[test]
    fn composition_order() {
        let m = Affine::translate(10.0, 0.0).then(Affine::scale(2.0, 2.0));
        assert_eq!(m.map_point(1.0, 1.0), (22.0, 2.0));
    }
}
