// Distribution staging: management tool, fixture content set, workload skeleton.
//
// Every `ensure_*` is presence-based: if the canonical path already exists nothing is fetched,
// unpacked or run. Downloads always land in a temporary location first and are removed on every
// path (success or failure), so a partial download never looks "present".

pub mod download;
pub mod unpack;

use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

use crate::config::SourcesConfig;
use crate::error::CaseError;
use crate::installation::files::{ensure_dir, install_file, remove_file_best_effort};
use crate::installation::{ManagementTool, ProcessRunner};
use crate::models::WorkspacePaths;

pub use download::{Downloader, HttpDownloader};
pub use unpack::{Unpacker, ZipUnpacker};

/// What an `ensure_*` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageAction {
    /// Canonical path already present; nothing done.
    Present,
    /// Fetched / unpacked / materialized during this call.
    Staged,
}

pub struct DistributionFetcher {
    paths: WorkspacePaths,
    sources: SourcesConfig,
    downloader: Arc<dyn Downloader>,
    unpacker: Arc<dyn Unpacker>,
    runner: Arc<dyn ProcessRunner>,
    /// The tool bound to the host PHP; the case runtime is not usable before install.
    host_tool: ManagementTool,
}

impl DistributionFetcher {
    pub fn new(
        paths: WorkspacePaths,
        sources: SourcesConfig,
        downloader: Arc<dyn Downloader>,
        unpacker: Arc<dyn Unpacker>,
        runner: Arc<dyn ProcessRunner>,
        host_tool: ManagementTool,
    ) -> Self {
        Self {
            paths,
            sources,
            downloader,
            unpacker,
            runner,
            host_tool,
        }
    }

    /// Run all three checks in order.
    pub async fn stage_all(&self) -> Result<(), CaseError> {
        self.ensure_tool().await?;
        self.ensure_fixture().await?;
        self.ensure_workspace().await?;
        Ok(())
    }

    pub async fn ensure_tool(&self) -> Result<StageAction, CaseError> {
        let tool = self.paths.tool_path();
        if tool.exists() {
            return Ok(StageAction::Present);
        }

        let url = &self.sources.tool_url;
        let tmp = self.paths.tool_download_path();
        info!("[PHASE: staging] [STEP: tool] Fetching '{}'", url);
        self.download_to_tmp(url, &tmp).await?;

        let installed = install_file(&tmp, &tool, "install_tool").await;
        remove_file_best_effort(&tmp, "tool_tmp_cleanup").await;
        installed.map_err(|source| CaseError::Fetch {
            url: url.clone(),
            source,
        })?;

        info!("[PHASE: staging] [STEP: tool] Installed {:?}", tool);
        Ok(StageAction::Staged)
    }

    pub async fn ensure_fixture(&self) -> Result<StageAction, CaseError> {
        let fixture_dir = self.paths.fixture_dir();
        if fixture_dir.exists() {
            return Ok(StageAction::Present);
        }

        let url = &self.sources.fixture_url;
        let tmp = self.paths.fixture_download_path();
        info!("[PHASE: staging] [STEP: fixture] Fetching '{}'", url);
        self.download_to_tmp(url, &tmp).await?;

        let unpack_root = &self.paths.fixtures_dir;
        info!(
            "[PHASE: staging] [STEP: fixture] Unpacking to '{}'",
            unpack_root.display()
        );
        let unpacked = async {
            ensure_dir(unpack_root, "ensure_fixtures_dir").await?;
            self.unpacker.unpack(&tmp, unpack_root).await
        }
        .await;
        let top = match unpacked {
            Ok(top) => top,
            Err(source) => {
                remove_file_best_effort(&tmp, "fixture_tmp_cleanup").await;
                return Err(CaseError::Fetch {
                    url: url.clone(),
                    source,
                });
            }
        };

        let unpacked_dir = unpack_root.join(&top);
        if unpacked_dir != fixture_dir {
            if let Err(source) = tokio::fs::rename(&unpacked_dir, &fixture_dir).await {
                remove_file_best_effort(&tmp, "fixture_tmp_cleanup").await;
                return Err(CaseError::Rename {
                    from: unpacked_dir,
                    to: fixture_dir,
                    source,
                });
            }
        }

        remove_file_best_effort(&tmp, "fixture_tmp_cleanup").await;
        info!(
            "[PHASE: staging] [STEP: fixture] Fixture ready at {:?}",
            fixture_dir
        );
        Ok(StageAction::Staged)
    }

    pub async fn ensure_workspace(&self) -> Result<StageAction, CaseError> {
        let work_dir = &self.paths.work_dir;
        if work_dir.is_dir() {
            return Ok(StageAction::Present);
        }

        info!(
            "[PHASE: staging] [STEP: workspace] Setting up in '{}'",
            work_dir.display()
        );
        if let Some(parent) = work_dir.parent() {
            ensure_dir(parent, "ensure_work_root").await?;
        }
        let args = ["core", "download", "--force"].map(String::from);
        self.host_tool
            .invoke(self.runner.as_ref(), "core download", &args, work_dir)
            .await?;
        Ok(StageAction::Staged)
    }

    async fn download_to_tmp(&self, url: &str, tmp: &Path) -> Result<(), CaseError> {
        if let Err(source) = self.downloader.download(url, tmp).await {
            warn!(
                "[PHASE: staging] [STEP: download] Download of '{}' failed: {:#}",
                url, source
            );
            remove_file_best_effort(tmp, "download_tmp_cleanup").await;
            return Err(CaseError::Fetch {
                url: url.to_string(),
                source,
            });
        }
        Ok(())
    }
}
