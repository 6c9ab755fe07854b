// Run configuration
//
// Loaded once per run (TOML file + `PGO__`-prefixed environment overrides) and handed to every
// component at construction. Nothing reads configuration globally.

pub mod store;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use store::{SectionStore, TomlSectionStore};

/// Default remote location of the management tool.
pub const DEFAULT_TOOL_URL: &str = "https://raw.github.com/wp-cli/builds/gh-pages/phar/wp-cli.phar";
/// Default remote location of the sample-content fixture archive.
pub const DEFAULT_FIXTURE_URL: &str = "https://github.com/manovotny/wptest/archive/master.zip";

const APP_DIR: &str = "pgo-training";

fn cache_base() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

/// `templates/` next to the executable when shipped that way, else the crate's own copy.
fn default_templates_dir() -> PathBuf {
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("templates")))
        .filter(|dir| dir.is_dir());
    beside_exe.unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("templates"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default = "default_process_timeout_secs")]
    pub process_timeout_secs: u64,
}

fn default_process_timeout_secs() -> u64 {
    600
}

impl Default for CaseConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            runtime: RuntimeConfig::default(),
            services: ServicesConfig::default(),
            sources: SourcesConfig::default(),
            process_timeout_secs: default_process_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub tools_dir: PathBuf,
    /// Shared across cases; the unpacked fixture lives under it.
    pub fixtures_dir: PathBuf,
    /// Per-case work directories are `<work_root>/<case>`.
    pub work_root: PathBuf,
    pub job_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub state_file: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = cache_base();
        Self {
            tools_dir: base.join("tools"),
            fixtures_dir: base.join("tools"),
            work_root: base.join("work"),
            job_dir: base.join("jobs"),
            templates_dir: default_templates_dir(),
            tmp_dir: std::env::temp_dir(),
            state_file: base.join("state.toml"),
            log_dir: base.join("logs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    /// Command-line client used to run statements.
    pub client: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            pass: String::new(),
            client: "mysql".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Host-side PHP; resolved from PATH when unset.
    pub host_php: Option<PathBuf>,
    /// PHP provisioned for the case; falls back to the host runtime.
    pub case_php: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn resolve_host_php(&self) -> Result<PathBuf> {
        match &self.host_php {
            Some(p) => Ok(p.clone()),
            None => which::which("php").context("Host PHP not configured and not found on PATH"),
        }
    }

    pub fn resolve_case_php(&self) -> Result<PathBuf> {
        match &self.case_php {
            Some(p) => Ok(p.clone()),
            None => self.resolve_host_php(),
        }
    }
}

/// Argument lists (program first) for bringing a service up and down.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceCommands {
    pub up: Vec<String>,
    pub down: Vec<String>,
    #[serde(default)]
    pub force_down: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebServiceConfig {
    pub up: Vec<String>,
    pub down: Vec<String>,
    #[serde(default)]
    pub force_down: Option<Vec<String>>,
    /// Directory the rendered virtual-host fragments are written to.
    pub conf_dir: PathBuf,
}

impl WebServiceConfig {
    pub fn commands(&self) -> ServiceCommands {
        ServiceCommands {
            up: self.up.clone(),
            down: self.down.clone(),
            force_down: self.force_down.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub web: Option<WebServiceConfig>,
    pub database: Option<ServiceCommands>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub tool_url: String,
    pub fixture_url: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            tool_url: DEFAULT_TOOL_URL.to_string(),
            fixture_url: DEFAULT_FIXTURE_URL.to_string(),
        }
    }
}

impl CaseConfig {
    /// Load from an optional TOML file, then apply `PGO__SECTION__KEY` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(p) = path {
            builder = builder.add_source(
                config::File::from(p)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix("PGO")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: CaseConfig = builder
            .build()
            .with_context(|| format!("Failed to load configuration (file={:?})", path))?
            .try_deserialize()
            .context("Configuration has an invalid shape")?;

        log::debug!(
            "[PHASE: lifecycle] [STEP: config] Configuration loaded (file={:?}, http={}:{}, db={}:{}, web_service={}, db_service={})",
            path,
            cfg.http.host,
            cfg.http.port,
            cfg.database.host,
            cfg.database.port,
            cfg.services.web.is_some(),
            cfg.services.database.is_some()
        );
        Ok(cfg)
    }
}

/// Template variable key for a case-scoped role, e.g. `("wordpress", "docroot")` ->
/// `PGO_WORDPRESS_DOCROOT`.
pub fn build_tpl_var_name(case: &str, role: &str) -> String {
    format!("PGO_{}_{}", case, role)
        .to_ascii_uppercase()
        .replace(['-', '.', ' '], "_")
}
