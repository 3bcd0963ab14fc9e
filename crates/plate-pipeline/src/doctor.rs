use anyhow::{Context, Result};
use std::path::Path;

use crate::PipelineConfig;

/// The crop directory must exist (or be creatable) and accept writes.
pub fn check_crop_dir(crop_dir: &str) -> Result<()> {
    let p = Path::new(crop_dir);
    if p.exists() {
        anyhow::ensure!(p.is_dir(), "storage.crop_dir is not a dir: {}", crop_dir);
    } else {
        std::fs::create_dir_all(p).with_context(|| format!("create storage.crop_dir {}", crop_dir))?;
    }
    let probe = p.join(".platewatch-probe");
    std::fs::write(&probe, b"ok").with_context(|| format!("storage.crop_dir not writable: {}", crop_dir))?;
    std::fs::remove_file(&probe).ok();
    Ok(())
}

pub fn check_thresholds(cfg: &PipelineConfig, vision_input_size: u32) -> Result<()> {
    let unit = |v: f32| (0.0..=1.0).contains(&v);
    anyhow::ensure!(unit(cfg.min_accept_confidence), "pipeline.min_accept_confidence must be within 0..=1");
    anyhow::ensure!(unit(cfg.interest_confidence), "pipeline.interest_confidence must be within 0..=1");
    anyhow::ensure!(unit(cfg.rank.min_confidence), "pipeline.rank.min_confidence must be within 0..=1");
    anyhow::ensure!(cfg.rank.min_aspect > 0.0, "pipeline.rank.min_aspect must be positive");
    anyhow::ensure!(cfg.plate_min_area >= 0.0, "pipeline.plate_min_area must not be negative");
    anyhow::ensure!(cfg.screen_rotation % 90 == 0, "pipeline.screen_rotation must be a multiple of 90");
    anyhow::ensure!(
        cfg.model_input_size == vision_input_size,
        "pipeline.model_input_size {} != vision.input_size {}",
        cfg.model_input_size,
        vision_input_size
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_dir_is_created_and_probed() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a/b");
        check_crop_dir(dir.to_str().unwrap()).unwrap();
        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn crop_dir_must_not_be_a_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        assert!(check_crop_dir(tmp.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn thresholds() {
        let mut cfg = PipelineConfig::default();
        assert!(check_thresholds(&cfg, 300).is_ok());
        assert!(check_thresholds(&cfg, 320).is_err());
        cfg.interest_confidence = 1.5;
        assert!(check_thresholds(&cfg, 300).is_err());
        cfg.interest_confidence = 0.7;
        cfg.screen_rotation = 45;
        assert!(check_thresholds(&cfg, 300).is_err());
    }
}
