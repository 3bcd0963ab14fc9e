use anyhow::{Context, Result};

use crate::UplinkConfig;

pub fn check_endpoint(cfg: &UplinkConfig) -> Result<()> {
    let url = reqwest::Url::parse(&cfg.base_url).with_context(|| format!("uplink.base_url invalid: {}", cfg.base_url))?;
    anyhow::ensure!(matches!(url.scheme(), "http" | "https"), "uplink.base_url must be http(s): {}", cfg.base_url);
    anyhow::ensure!(url.host_str().is_some(), "uplink.base_url has no host");
    anyhow::ensure!(cfg.timeout_s >= 1 && cfg.timeout_s <= 120, "uplink.timeout_s out of range (1..=120)");
    for (k, v) in &cfg.headers {
        anyhow::ensure!(!v.trim().is_empty(), "uplink.headers.{} is empty", k);
    }
    Ok(())
}
