// Artifact harvesting: fetch the rendered front page and persist the in-domain URLs as the job
// file the training run replays.

pub mod matcher;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::error::CaseError;
use crate::models::ServiceEndpoint;
use crate::services::ServiceCoordinator;

pub use matcher::UrlMatcher;

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Plain GET; returns the body as text.
    async fn get(&self, url: &str) -> Result<String>;
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pgo-training/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn get(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned an error status", url))?;
        resp.text()
            .await
            .with_context(|| format!("Reading body of {} failed", url))
    }
}

/// Persists artifact bytes; returns how many bytes actually landed.
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    async fn write(&self, path: &Path, bytes: &[u8]) -> std::io::Result<usize>;
}

pub struct FsArtifactWriter;

#[async_trait]
impl ArtifactWriter for FsArtifactWriter {
    async fn write(&self, path: &Path, bytes: &[u8]) -> std::io::Result<usize> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut f = tokio::fs::File::create(path).await?;
        f.write_all(bytes).await?;
        f.flush().await?;
        f.sync_all().await?;
        let len = tokio::fs::metadata(path).await?.len();
        Ok(len as usize)
    }
}

/// Ordered, de-duplicated URL list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobArtifact {
    urls: Vec<String>,
}

impl JobArtifact {
    /// Keeps the first occurrence of each URL.
    pub fn from_urls<I: IntoIterator<Item = String>>(urls: I) -> Self {
        let mut seen = std::collections::HashSet::new();
        let urls = urls.into_iter().filter(|u| seen.insert(u.clone())).collect();
        Self { urls }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Newline-joined, no trailing delimiter.
    pub fn serialize(&self) -> String {
        self.urls.join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub job_file: PathBuf,
    pub artifact: JobArtifact,
    /// No URL matched; the (empty) job file was still written.
    pub empty: bool,
}

pub struct ArtifactHarvester {
    endpoint: ServiceEndpoint,
    matcher: UrlMatcher,
    fetcher: Arc<dyn PageFetcher>,
    writer: Arc<dyn ArtifactWriter>,
}

impl ArtifactHarvester {
    pub fn new(
        endpoint: ServiceEndpoint,
        fetcher: Arc<dyn PageFetcher>,
        writer: Arc<dyn ArtifactWriter>,
    ) -> Result<Self, CaseError> {
        let matcher = UrlMatcher::for_endpoint(&endpoint)?;
        Ok(Self {
            endpoint,
            matcher,
            fetcher,
            writer,
        })
    }

    /// Bring services up, fetch the front page, bring them down, then extract and write.
    pub async fn harvest(
        &self,
        services: &ServiceCoordinator,
        job_file: &Path,
    ) -> Result<HarvestOutcome, CaseError> {
        let url = self.endpoint.base_url();
        let body = services
            .with_services_up("harvest", async {
                self.fetcher
                    .get(&url)
                    .await
                    .map_err(|source| CaseError::Fetch {
                        url: url.clone(),
                        source,
                    })
            })
            .await?;

        info!("[PHASE: harvest] [STEP: urls] Generating training urls.");
        let artifact = JobArtifact::from_urls(self.matcher.extract(&body));
        let empty = artifact.is_empty();
        if empty {
            warn!(
                "[PHASE: harvest] [STEP: urls] WARNING: Training URL list is empty, check the pattern! (endpoint={}, body_bytes={})",
                self.endpoint,
                body.len()
            );
        }

        write_artifact(self.writer.as_ref(), job_file, &artifact).await?;
        info!(
            "[PHASE: harvest] [STEP: write] Wrote {} urls to {:?}",
            artifact.urls().len(),
            job_file
        );

        Ok(HarvestOutcome {
            job_file: job_file.to_path_buf(),
            artifact,
            empty,
        })
    }
}

/// Write the serialized artifact; a short or failed write is `ArtifactWrite`.
pub async fn write_artifact(
    writer: &dyn ArtifactWriter,
    path: &Path,
    artifact: &JobArtifact,
) -> Result<(), CaseError> {
    let content = artifact.serialize();
    let expected = content.len();
    let written = match writer.write(path, content.as_bytes()).await {
        Ok(n) => n,
        Err(e) => {
            warn!(
                "[PHASE: harvest] [STEP: write] Writing {:?} failed: {}",
                path, e
            );
            // A failed write is fatal even when nothing was expected.
            return Err(CaseError::ArtifactWrite {
                path: path.to_path_buf(),
                expected,
                written: 0,
            });
        }
    };
    if written != expected {
        return Err(CaseError::ArtifactWrite {
            path: path.to_path_buf(),
            expected,
            written,
        });
    }
    Ok(())
}
