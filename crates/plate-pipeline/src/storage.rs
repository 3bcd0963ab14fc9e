use anyhow::{Context, Result};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use plate_proto::DetectedVehicle;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::StorageConfig;

/// Crop files written for one vehicle.
#[derive(Debug, Clone)]
pub struct SavedCrops {
    pub vehicle_file: PathBuf,
    pub plate_file: PathBuf,
    /// Encoded plate JPEG, the body of the recognition upload.
    pub plate_jpeg: Bytes,
}

/// Directory of vehicle and plate crops, named by correlation id.
#[derive(Debug, Clone)]
pub struct CropStore {
    dir: PathBuf,
    quality: u8,
}

impl CropStore {
    pub fn open(cfg: &StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&cfg.crop_dir).with_context(|| format!("create crop dir {}", cfg.crop_dir))?;
        Ok(Self { dir: PathBuf::from(&cfg.crop_dir), quality: cfg.jpeg_quality.clamp(1, 100) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vehicle_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}_vehicle.jpg", id))
    }

    pub fn plate_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}_lp_image.jpg", id))
    }

    /// Blocking; call from the blocking pool.
    pub fn save(&self, id: Uuid, vehicle: &RgbImage, plate: &RgbImage) -> Result<SavedCrops> {
        let vehicle_jpeg = encode_jpeg(vehicle, self.quality)?;
        let plate_jpeg = encode_jpeg(plate, self.quality)?;

        let vehicle_file = self.vehicle_path(id);
        let plate_file = self.plate_path(id);
        std::fs::write(&vehicle_file, &vehicle_jpeg).with_context(|| format!("write {}", vehicle_file.display()))?;
        if let Err(e) = std::fs::write(&plate_file, &plate_jpeg) {
            let _ = std::fs::remove_file(&vehicle_file);
            return Err(e).with_context(|| format!("write {}", plate_file.display()));
        }

        debug!("storage: saved crops for {}", id);
        Ok(SavedCrops { vehicle_file, plate_file, plate_jpeg: Bytes::from(plate_jpeg) })
    }

    /// Deletes the crop files behind `vehicle`. Missing files are not an error.
    pub fn release(vehicle: &DetectedVehicle) {
        remove_quiet(&vehicle.vehicle_file);
        remove_quiet(&vehicle.plate_file);
    }

    pub fn discard(saved: &SavedCrops) {
        remove_quiet(&saved.vehicle_file);
        remove_quiet(&saved.plate_file);
    }
}

fn remove_quiet(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("storage: could not delete {}: {}", path.display(), e),
    }
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(img)
        .context("encode jpeg")?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn store(dir: &Path) -> CropStore {
        CropStore::open(&StorageConfig { crop_dir: dir.join("crops").to_string_lossy().into_owned(), jpeg_quality: 85 }).unwrap()
    }

    #[test]
    fn save_names_files_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path());
        let id = Uuid::new_v4();
        let saved = s
            .save(id, &RgbImage::from_pixel(40, 30, Rgb([1, 2, 3])), &RgbImage::from_pixel(20, 10, Rgb([9, 9, 9])))
            .unwrap();

        assert_eq!(saved.vehicle_file.file_name().unwrap().to_string_lossy(), format!("{}_vehicle.jpg", id));
        assert_eq!(saved.plate_file.file_name().unwrap().to_string_lossy(), format!("{}_lp_image.jpg", id));
        assert_eq!(std::fs::read(&saved.plate_file).unwrap(), saved.plate_jpeg.to_vec());

        let decoded = image::load_from_memory(&saved.plate_jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 10));
    }

    #[test]
    fn release_removes_files_and_tolerates_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path());
        let id = Uuid::new_v4();
        let img = RgbImage::new(8, 8);
        let saved = s.save(id, &img, &img).unwrap();

        let v = DetectedVehicle {
            id,
            frame_seq: 1,
            vehicle_file: saved.vehicle_file.clone(),
            plate_file: saved.plate_file.clone(),
            plate_number: None,
            alert: false,
        };
        CropStore::release(&v);
        assert!(!saved.vehicle_file.exists());
        assert!(!saved.plate_file.exists());
        CropStore::release(&v);
    }
}
