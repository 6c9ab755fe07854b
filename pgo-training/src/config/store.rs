//! Persistent per-case settings (`[<case>]` sections in a TOML state file).
//!
//! Generated site-admin credentials are written here as soon as they exist, so a later run
//! (or an operator) can log into the installed workload.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[async_trait]
pub trait SectionStore: Send + Sync {
    async fn set_section_item(&self, section: &str, key: &str, value: &str) -> Result<()>;

    async fn section_item(&self, section: &str, key: &str) -> Result<Option<String>>;
}

/// TOML-file backed store. Writes go to a sibling temp file and are renamed into place.
pub struct TomlSectionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TomlSectionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_table(&self) -> Result<toml::Table> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text
                .parse::<toml::Table>()
                .with_context(|| format!("State file is not valid TOML: {:?}", self.path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(toml::Table::new()),
            Err(e) => Err(anyhow::Error::new(e))
                .with_context(|| format!("Failed to read state file: {:?}", self.path)),
        }
    }
}

#[async_trait]
impl SectionStore for TomlSectionStore {
    async fn set_section_item(&self, section: &str, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut table = self.read_table().await?;

        let entry = table
            .entry(section.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let section_table = entry
            .as_table_mut()
            .ok_or_else(|| anyhow::anyhow!("State entry '{}' is not a section", section))?;
        section_table.insert(key.to_string(), toml::Value::String(value.to_string()));

        let text = toml::to_string_pretty(&table).context("Failed to serialize state file")?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create state dir: {:?}", parent))?;
            }
        }
        let tmp = self.path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, text)
            .await
            .with_context(|| format!("Failed to write state file: {:?}", tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace state file: {:?}", self.path))?;

        debug!(
            "[PHASE: lifecycle] [STEP: state] Stored {}.{} in {:?}",
            section, key, self.path
        );
        Ok(())
    }

    async fn section_item(&self, section: &str, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        let table = self.read_table().await?;
        Ok(table
            .get(section)
            .and_then(|s| s.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }
}
