use anyhow::{Context, Result};
use image::{imageops, Rgb, RgbImage};
use thiserror::Error;

use crate::geometry::Affine;
use crate::Rect;

/// One camera image as delivered by a frame source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB8, row-major.
    pub pixels: Vec<u8>,
    /// Sensor rotation in degrees at capture time.
    pub rotation: i32,
}

impl Frame {
    pub fn from_image(img: RgbImage, rotation: i32) -> Self {
        let (width, height) = img.dimensions();
        Self { width, height, pixels: img.into_raw(), rotation }
    }

    pub fn from_jpeg(jpeg: &[u8], rotation: i32) -> Result<Self> {
        let img = image::load_from_memory(jpeg).context("decode jpeg")?;
        Ok(Self::from_image(img.to_rgb8(), rotation))
    }

    /// Consumes the frame; its buffer becomes the full-resolution RGB image.
    pub fn into_image(self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels)
            .with_context(|| format!("pixel buffer does not match {}x{}", self.width, self.height))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CropError {
    #[error("crop {rect:?} is empty")]
    Empty { rect: Rect },
    #[error("crop {rect:?} falls outside {width}x{height}")]
    OutOfBounds { rect: Rect, width: u32, height: u32 },
}

/// Cuts `rect` out of `img`. Coordinates truncate towards zero; the rectangle
/// must lie fully inside the image.
pub fn crop(img: &RgbImage, rect: &Rect) -> Result<RgbImage, CropError> {
    let left = rect.left as i64;
    let top = rect.top as i64;
    let w = rect.width as i64;
    let h = rect.height as i64;
    if w <= 0 || h <= 0 {
        return Err(CropError::Empty { rect: *rect });
    }
    let (iw, ih) = (img.width() as i64, img.height() as i64);
    if left < 0 || top < 0 || left + w > iw || top + h > ih {
        return Err(CropError::OutOfBounds { rect: *rect, width: img.width(), height: img.height() });
    }
    Ok(imageops::crop_imm(img, left as u32, top as u32, w as u32, h as u32).to_image())
}

/// Fills a `dst_w`x`dst_h` image by pulling every destination pixel centre
/// back through `crop_to_frame` (nearest neighbour; outside the source stays black).
pub fn project(src: &RgbImage, crop_to_frame: &Affine, dst_w: u32, dst_h: u32) -> RgbImage {
    let (sw, sh) = (src.width() as f64, src.height() as f64);
    let mut out = RgbImage::new(dst_w, dst_h);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let (fx, fy) = crop_to_frame.map_point(x as f64 + 0.5, y as f64 + 0.5);
        if fx < 0.0 || fy < 0.0 || fx >= sw || fy >= sh {
            *px = Rgb([0, 0, 0]);
            continue;
        }
        *px = *src.get_pixel(fx as u32, fy as u32);
    }
    out
}
