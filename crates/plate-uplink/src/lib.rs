pub mod doctor;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use plate_proto::{AccessResponse, PlateReading, SubmitLpResponse};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct UplinkConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    /// Sent verbatim with every request (api-key, access-token, client, uid, ...).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_timeout_s() -> u64 { 10 }

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("server returned {0}")]
    Status(StatusCode),
    #[error("unreadable response body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Turns a plate crop into plate text. Every failure is `None`; callers never retry.
#[async_trait]
pub trait PlateRecognizer: Send + Sync {
    async fn submit(&self, image: Bytes, file_name: &str, id: Uuid) -> Option<PlateReading>;
}

#[derive(Debug, Clone, Default)]
pub struct LinkHealth {
    pub rtt_ms: Option<u32>,
    pub consecutive_failures: u32,
    pub submitted: u64,
    pub recognized: u64,
}

pub struct RecognitionClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    health: Mutex<LinkHealth>,
}

impl RecognitionClient {
    pub fn new(cfg: &UplinkConfig) -> Result<Self> {
        let url = reqwest::Url::parse(&cfg.base_url).with_context(|| format!("uplink.base_url {}", cfg.base_url))?;
        anyhow::ensure!(matches!(url.scheme(), "http" | "https"), "uplink.base_url must be http(s)");

        let mut headers = HeaderMap::new();
        for (k, v) in &cfg.headers {
            let name = HeaderName::from_bytes(k.as_bytes()).with_context(|| format!("bad header name {}", k))?;
            let value = HeaderValue::from_str(v).with_context(|| format!("bad value for header {}", k))?;
            headers.insert(name, value);
        }

        let timeout = Duration::from_secs(cfg.timeout_s.max(1));
        Ok(Self::with_client(
            reqwest::Client::builder()
                .timeout(timeout)
                .default_headers(headers)
                .build()
                .context("build http client")?,
            &cfg.base_url,
            timeout,
        ))
    }

    /// Uses a prepared client; `timeout` is only used for reporting.
    pub fn with_client(http: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            health: Mutex::new(LinkHealth::default()),
        }
    }

    pub fn link_health(&self) -> LinkHealth {
        self.health.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// `POST /ocr/read_lp` with `request_code` and the `image` file part.
    pub async fn read_lp(&self, image: Bytes, file_name: &str, id: Uuid) -> Result<SubmitLpResponse, UploadError> {
        let image = Part::bytes(image.to_vec())
            .file_name(file_name.to_string())
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .text("request_code", id.to_string())
            .part("image", image);

        let resp = self
            .http
            .post(format!("{}/ocr/read_lp", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UploadError::Status(status));
        }
        let body = resp.bytes().await.map_err(|e| self.classify(e))?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// `GET /ocr/is_allowed`; a missing flag counts as not allowed.
    pub async fn is_allowed(&self) -> Result<bool> {
        let resp = self
            .http
            .get(format!("{}/ocr/is_allowed", self.base_url))
            .send()
            .await
            .context("access check request")?;
        anyhow::ensure!(resp.status().is_success(), "access check returned {}", resp.status());
        let body: AccessResponse = resp.json().await.context("parse access check body")?;
        Ok(body.is_allowed.unwrap_or(false))
    }

    fn classify(&self, e: reqwest::Error) -> UploadError {
        if e.is_timeout() { UploadError::Timeout(self.timeout) } else { UploadError::Http(e) }
    }

    fn record(&self, ok: bool, recognized: bool, rtt: Duration) {
        if let Ok(mut h) = self.health.lock() {
            h.submitted += 1;
            if ok {
                h.rtt_ms = Some(rtt.as_millis() as u32);
                h.consecutive_failures = 0;
            } else {
                h.consecutive_failures += 1;
            }
            if recognized {
                h.recognized += 1;
            }
        }
    }
}

#[async_trait]
impl PlateRecognizer for RecognitionClient {
    async fn submit(&self, image: Bytes, file_name: &str, id: Uuid) -> Option<PlateReading> {
        let start = Instant::now();
        debug!("uplink: submitting {} ({} bytes)", file_name, image.len());

        match self.read_lp(image, file_name, id).await {
            Ok(resp) => {
                let reading = resp.into_reading();
                self.record(true, reading.is_some(), start.elapsed());
                match &reading {
                    Some(r) => info!("uplink: {} read as {} (alert={}, {}ms)", id, r.plate_number, r.alert, start.elapsed().as_millis()),
                    None => info!("uplink: {} not recognized", id),
                }
                reading
            }
            Err(e) => {
                self.record(false, false, start.elapsed());
                warn!("uplink: could not upload {}: {:#}", file_name, e);
                None
            }
        }
    }
}
