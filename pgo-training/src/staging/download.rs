// Remote downloads (plain HTTP(S), no checksum verification).

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use std::path::Path;
use std::time::Instant;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch `url` into `dest`, returning the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pgo-training/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let started = Instant::now();
        let parsed = url::Url::parse(url).with_context(|| format!("Invalid URL '{}'", url))?;

        let mut resp = self
            .client
            .get(parsed)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        if !resp.status().is_success() {
            return Err(anyhow::anyhow!("GET {} returned HTTP {}", url, resp.status()));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {:?}", dest))?;

        let mut total: u64 = 0;
        while let Some(chunk) = resp
            .chunk()
            .await
            .with_context(|| format!("Reading body of {} failed", url))?
        {
            file.write_all(&chunk).await?;
            total = total.saturating_add(chunk.len() as u64);
        }
        file.flush().await?;

        info!(
            "[PHASE: staging] [STEP: download] Downloaded {} -> {:?} (bytes={}, duration_ms={})",
            url,
            dest,
            total,
            started.elapsed().as_millis()
        );
        Ok(total)
    }
}
