//! File helpers for staging.
//!
//! Goals:
//! - Async I/O only (tokio)
//! - Timeout directory and copy operations
//! - Preserve permissions on Unix best-effort
//! - Never fail silently (log with context)

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::time::{timeout, Duration};

const FS_OP_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn ensure_dir(path: &Path, label: &str) -> Result<()> {
    let started = Instant::now();
    match timeout(FS_OP_TIMEOUT, tokio::fs::create_dir_all(path)).await {
        Ok(Ok(())) => {
            debug!(
                "[PHASE: staging] [STEP: fs] {} ok (path={:?}, duration_ms={})",
                label,
                path,
                started.elapsed().as_millis()
            );
            Ok(())
        }
        Ok(Err(e)) => Err(anyhow::Error::new(e))
            .with_context(|| format!("{}: create_dir_all failed: {:?}", label, path)),
        Err(_) => Err(anyhow::anyhow!(
            "{}: create_dir_all timed out: {:?}",
            label,
            path
        )),
    }
}

/// Sibling of `dst` that a copy lands in before it is renamed onto `dst`.
pub fn staging_sibling(dst: &Path) -> PathBuf {
    let mut name = dst
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    dst.with_file_name(name)
}

/// Copy `src` to `dst` (parent created on demand), preserving Unix permissions.
///
/// The bytes go to `staging_sibling(dst)` first and are renamed into place, so `dst` either
/// holds the complete file or does not exist.
pub async fn install_file(src: &Path, dst: &Path, label: &str) -> Result<u64> {
    let started = Instant::now();
    if let Some(parent) = dst.parent() {
        ensure_dir(parent, label).await?;
    }

    let sibling = staging_sibling(dst);
    let copied = copy_then_rename(src, &sibling, dst, label).await;
    let n = match copied {
        Ok(n) => n,
        Err(e) => {
            remove_file_best_effort(&sibling, label).await;
            return Err(e);
        }
    };

    debug!(
        "[PHASE: staging] [STEP: fs] {} ok (src={:?}, dst={:?}, bytes={}, duration_ms={})",
        label,
        src,
        dst,
        n,
        started.elapsed().as_millis()
    );
    Ok(n)
}

async fn copy_then_rename(src: &Path, sibling: &Path, dst: &Path, label: &str) -> Result<u64> {
    let n = match timeout(FS_OP_TIMEOUT, tokio::fs::copy(src, sibling)).await {
        Ok(res) => {
            res.with_context(|| format!("{}: copy {:?} -> {:?} failed", label, src, sibling))?
        }
        Err(_) => {
            return Err(anyhow::anyhow!(
                "{}: copy timed out after {}s",
                label,
                FS_OP_TIMEOUT.as_secs()
            ))
        }
    };

    // Best-effort permissions preservation.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = tokio::fs::metadata(src).await {
            let mode = meta.permissions().mode();
            let _ =
                tokio::fs::set_permissions(sibling, std::fs::Permissions::from_mode(mode)).await;
        }
    }

    tokio::fs::rename(sibling, dst)
        .await
        .with_context(|| format!("{}: rename {:?} -> {:?} failed", label, sibling, dst))?;
    Ok(n)
}

/// Remove a temporary file; a missing file is fine, anything else is logged and swallowed.
pub async fn remove_file_best_effort(path: &Path, label: &str) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(
            "[PHASE: staging] [STEP: fs] {} removed {:?}",
            label, path
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "[PHASE: staging] [STEP: fs] {} could not remove {:?}: {}",
            label, path, e
        ),
    }
}
