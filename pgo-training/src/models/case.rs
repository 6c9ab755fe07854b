// Case data model: identity, workspace layout, endpoints, credentials, template variables.
//
// Everything here except `Credentials` is derived once from `CaseConfig` at construction and
// never mutated afterwards.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{build_tpl_var_name, CaseConfig};
use crate::error::CaseError;
use crate::utils::path_resolver::normalize_for_template;

/// File name of the management tool inside the tools directory.
pub const TOOL_FILE_NAME: &str = "wp-cli.phar";
/// Canonical directory name of the unpacked fixture content set.
pub const FIXTURE_DIR_NAME: &str = "wptest";
/// Content file imported from the fixture directory.
pub const FIXTURE_FILE_NAME: &str = "wptest.xml";
/// Web-server fragment template, relative to `<templates_dir>/<case>/`.
pub const WEB_TEMPLATE_FILE_NAME: &str = "nginx.partial.conf";

/// Stable name of a training case.
///
/// Used verbatim as database name, work-directory suffix and job-file stem. Keeping it
/// identifier-safe is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaseIdentity(String);

impl CaseIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Filesystem layout for one case.
///
/// The existence of `work_dir` is the "already staged" signal for the workload skeleton.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub tools_dir: PathBuf,
    pub fixtures_dir: PathBuf,
    pub work_dir: PathBuf,
    pub job_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub templates_dir: PathBuf,
}

impl WorkspacePaths {
    pub fn for_case(config: &CaseConfig, case: &CaseIdentity) -> Self {
        let p = &config.paths;
        Self {
            tools_dir: p.tools_dir.clone(),
            fixtures_dir: p.fixtures_dir.clone(),
            work_dir: case_work_dir(&p.work_root, case),
            job_dir: p.job_dir.clone(),
            tmp_dir: p.tmp_dir.clone(),
            templates_dir: p.templates_dir.clone(),
        }
    }

    pub fn tool_path(&self) -> PathBuf {
        self.tools_dir.join(TOOL_FILE_NAME)
    }

    /// Temporary download location of the tool before it is installed into `tool_path()`.
    pub fn tool_download_path(&self) -> PathBuf {
        self.tmp_dir.join(format!("{}.part", TOOL_FILE_NAME))
    }

    pub fn fixture_dir(&self) -> PathBuf {
        self.fixtures_dir.join(FIXTURE_DIR_NAME)
    }

    pub fn fixture_file(&self) -> PathBuf {
        self.fixture_dir().join(FIXTURE_FILE_NAME)
    }

    pub fn fixture_download_path(&self) -> PathBuf {
        self.tmp_dir.join(format!("{}.zip", FIXTURE_DIR_NAME))
    }

    pub fn job_file(&self, case: &CaseIdentity) -> PathBuf {
        self.job_dir.join(format!("{}.txt", case.as_str()))
    }

    pub fn web_template(&self, case: &CaseIdentity) -> PathBuf {
        self.templates_dir
            .join(case.as_str())
            .join(WEB_TEMPLATE_FILE_NAME)
    }
}

/// Host + port of a service. Resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    host: String,
    port: u16,
}

impl ServiceEndpoint {
    pub fn new(host: &str, port: u16) -> Result<Self, CaseError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(CaseError::Configuration("Endpoint host is empty".to_string()));
        }
        url::Url::parse(&format!("http://{}:{}/", host, port)).map_err(|e| {
            CaseError::Configuration(format!("Invalid endpoint '{}:{}': {}", host, port, e))
        })?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, exactly as it appears inside URLs served by the workload.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.authority())
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Generated site-admin login plus the configured database login.
#[derive(Clone)]
pub struct Credentials {
    pub admin_user: String,
    pub admin_pass: String,
    pub db_user: String,
    pub db_pass: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("admin_user", &self.admin_user)
            .field("admin_pass", &"***")
            .field("db_user", &self.db_user)
            .field("db_pass", &"***")
            .finish()
    }
}

/// Insertion-ordered placeholder name -> value mapping for the web-server template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVariables {
    entries: Vec<(String, String)>,
}

impl TemplateVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables a case contributes to its web-server fragment.
    pub fn for_case(case: &CaseIdentity, paths: &WorkspacePaths) -> Self {
        let mut vars = Self::new();
        vars.insert(
            build_tpl_var_name(case.as_str(), "docroot"),
            normalize_for_template(&paths.work_dir),
        );
        vars
    }

    /// Insert or replace; a replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Substitute every `{{KEY}}` placeholder, in insertion order.
    pub fn render(&self, template: &str) -> String {
        let mut out = template.to_string();
        for (k, v) in self.iter() {
            out = out.replace(&format!("{{{{{}}}}}", k), v);
        }
        out
    }
}

/// `<work_root>/<case>`.
pub fn case_work_dir(work_root: &Path, case: &CaseIdentity) -> PathBuf {
    work_root.join(case.as_str())
}
