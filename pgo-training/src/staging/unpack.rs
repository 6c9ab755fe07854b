//! Archive unpacking.
//!
//! The unpacker reports the top-level directory name of what it extracted (taken from the first
//! archive entry), so the caller can move it to its canonical name.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

#[async_trait]
pub trait Unpacker: Send + Sync {
    /// Extract `archive` into `dest_dir`; returns the top-level entry name.
    async fn unpack(&self, archive: &Path, dest_dir: &Path) -> Result<String>;
}

pub struct ZipUnpacker;

#[async_trait]
impl Unpacker for ZipUnpacker {
    async fn unpack(&self, archive: &Path, dest_dir: &Path) -> Result<String> {
        let archive = archive.to_path_buf();
        let dest_dir = dest_dir.to_path_buf();
        tokio::task::spawn_blocking(move || extract_zip(&archive, &dest_dir))
            .await
            .context("unzip task join failed")?
    }
}

fn top_level_name(entry: &Path) -> Option<String> {
    entry.components().find_map(|c| match c {
        Component::Normal(s) => Some(s.to_string_lossy().to_string()),
        _ => None,
    })
}

fn extract_zip(archive: &Path, dest_dir: &Path) -> Result<String> {
    let file = fs::File::open(archive).with_context(|| format!("Failed to open {:?}", archive))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("{:?} is not a readable zip archive", archive))?;
    if zip.is_empty() {
        return Err(anyhow::anyhow!("Archive {:?} is empty", archive));
    }

    let mut top: Option<String> = None;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let rel: PathBuf = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow::anyhow!("Unsafe path in archive: {}", entry.name()))?;
        if i == 0 {
            top = top_level_name(&rel);
        }

        let out = dest_dir.join(&rel);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::File::create(&out).with_context(|| format!("Failed to create {:?}", out))?;
        io::copy(&mut entry, &mut f)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = fs::set_permissions(&out, fs::Permissions::from_mode(mode));
            }
        }
    }

    let top = top.ok_or_else(|| anyhow::anyhow!("Archive {:?} has no top-level entry", archive))?;
    debug!(
        "[PHASE: staging] [STEP: unpack] Extracted {} entries from {:?} (top_level={})",
        zip.len(),
        archive,
        top
    );
    Ok(top)
}
