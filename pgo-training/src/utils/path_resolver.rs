use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Resolve log folder (absolute path), creating it if needed.
///
/// Relative folders are anchored at the current working directory.
pub fn resolve_log_folder(configured: &Path) -> Result<PathBuf> {
    let dir = if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        cwd.join(configured)
    };

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log folder: {:?}", dir))?;
    Ok(dir)
}

/// Path rendered into web-server configuration: separators normalized to `/`.
pub fn normalize_for_template(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
