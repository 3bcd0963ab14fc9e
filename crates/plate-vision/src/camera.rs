use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use crate::frame::Frame;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CameraConfig {
    pub mode: String, // "libcamera-jpeg" | "v4l2-mjpeg" | "replay"
    #[serde(default)]
    pub device: String, // /dev/video0 (v4l2)
    #[serde(default)]
    pub replay_dir: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Sensor mounting rotation in degrees, reported with every frame.
    #[serde(default = "default_rotation")]
    pub rotation: i32,
}

fn default_rotation() -> i32 { 90 }

/// Single-shot JPEG capture through an external tool:
/// `libcamera-still` for CSI cameras, `ffmpeg` reading MJPEG from a v4l2 device.
pub async fn capture_jpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let mut cmd = capture_command(cfg)?;
    debug!("camera: capture via {}", cfg.mode);
    let out = cmd.output().await.with_context(|| format!("run {} capture", cfg.mode))?;
    anyhow::ensure!(
        out.status.success(),
        "{} capture failed: {}",
        cfg.mode,
        String::from_utf8_lossy(&out.stderr).trim()
    );
    anyhow::ensure!(!out.stdout.is_empty(), "{} capture returned no data", cfg.mode);
    Ok(out.stdout)
}

fn capture_command(cfg: &CameraConfig) -> Result<Command> {
    let size = format!("{}x{}", cfg.width, cfg.height);
    let mut cmd = match cfg.mode.as_str() {
        "libcamera-jpeg" => {
            let mut c = Command::new("libcamera-still");
            c.args(["-n", "-t", "1", "--immediate", "--encoding", "jpg"])
                .args(["--width", &cfg.width.to_string(), "--height", &cfg.height.to_string()])
                .args(["-o", "-"]);
            c
        }
        "v4l2-mjpeg" => {
            let device = if cfg.device.is_empty() { "/dev/video0" } else { cfg.device.as_str() };
            let mut c = Command::new("ffmpeg");
            c.args(["-hide_banner", "-loglevel", "error"])
                .args(["-f", "video4linux2", "-input_format", "mjpeg", "-video_size", &size, "-i", device])
                .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "mjpeg", "-"]);
            c
        }
        other => anyhow::bail!("camera.mode {} has no single-shot capture", other),
    };
    cmd.kill_on_drop(true);
    Ok(cmd)
}

/// Paced frame producer over a live camera or a directory of JPEG files.
pub struct FrameSource {
    cfg: CameraConfig,
    replay: Option<std::vec::IntoIter<PathBuf>>,
    interval: tokio::time::Interval,
}

impl FrameSource {
    pub fn open(cfg: CameraConfig) -> Result<Self> {
        let replay = if cfg.mode == "replay" {
            let dir = cfg.replay_dir.as_ref().context("camera.replay_dir missing (mode=replay)")?;
            let files = replay_files(dir)?;
            info!("camera: replaying {} images from {}", files.len(), dir);
            Some(files.into_iter())
        } else {
            None
        };

        let period = std::time::Duration::from_secs_f64(1.0 / cfg.fps.max(1) as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        Ok(Self { cfg, replay, interval })
    }

    /// Next frame at camera cadence, or `None` once a replay is exhausted.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.interval.tick().await;
        let jpeg = match self.replay.as_mut() {
            Some(files) => match files.next() {
                Some(path) => tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("read {}", path.display()))?,
                None => return Ok(None),
            },
            None => capture_jpeg(&self.cfg).await?,
        };
        Ok(Some(Frame::from_jpeg(&jpeg, self.cfg.rotation)?))
    }
}

/// Sorted `*.jpg`/`*.jpeg`/`*.png` files in `dir`.
pub fn replay_files(dir: &str) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read replay dir {}", dir))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}
