// Stub collaborators for unit tests. Each stub records what it was asked to do.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{CaseConfig, SectionStore};
use crate::harvest::{ArtifactWriter, PageFetcher};
use crate::installation::{CommandOutput, ProcessRunner};
use crate::models::{CaseIdentity, TemplateVariables, WorkspacePaths};
use crate::services::{DatabaseServer, Server, WebServer};
use crate::staging::{Downloader, Unpacker};

/// Rows the simulated `import` step adds to the case database.
pub const IMPORTED_ROWS: u32 = 10;

pub fn test_paths(root: &Path, case: &str) -> WorkspacePaths {
    WorkspacePaths::for_case(&test_config(root, "127.0.0.1", 8080), &CaseIdentity::new(case))
}

pub fn test_config(root: &Path, host: &str, port: u16) -> CaseConfig {
    let mut cfg = CaseConfig::default();
    cfg.paths.tools_dir = root.join("tools");
    cfg.paths.fixtures_dir = root.join("tools");
    cfg.paths.work_root = root.join("work");
    cfg.paths.job_dir = root.join("jobs");
    cfg.paths.templates_dir = root.join("templates");
    cfg.paths.tmp_dir = root.join("tmp");
    cfg.paths.state_file = root.join("state.toml");
    cfg.paths.log_dir = root.join("logs");
    cfg.http.host = host.to_string();
    cfg.http.port = port;
    cfg.runtime.host_php = Some(PathBuf::from("/usr/bin/php"));
    cfg
}

/// Shared, ordered record of service events.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().expect("call log poisoned").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("call log poisoned").clone()
    }
}

pub struct FakeWebServer {
    log: CallLog,
    fail_up: AtomicBool,
    fail_down: AtomicBool,
}

impl FakeWebServer {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_up: AtomicBool::new(false),
            fail_down: AtomicBool::new(false),
        }
    }

    pub fn fail_up(&self) {
        self.fail_up.store(true, Ordering::SeqCst);
    }

    pub fn fail_down(&self) {
        self.fail_down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Server for FakeWebServer {
    fn name(&self) -> &str {
        "web"
    }

    async fn up(&self) -> Result<()> {
        self.log.push("web:up");
        if self.fail_up.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("address already in use"));
        }
        Ok(())
    }

    async fn down(&self, force: bool) -> Result<()> {
        self.log.push(format!("web:down(force={})", force));
        if self.fail_down.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("pid file missing"));
        }
        Ok(())
    }
}

#[async_trait]
impl WebServer for FakeWebServer {
    async fn add_server(&self, _template: &Path, _vars: &TemplateVariables) -> Result<()> {
        self.log.push("web:add_server");
        Ok(())
    }
}

/// In-memory database server: database name -> row count.
pub struct FakeDatabase {
    log: CallLog,
    databases: Mutex<HashMap<String, u32>>,
    statements: Mutex<Vec<String>>,
}

impl FakeDatabase {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            databases: Mutex::new(HashMap::new()),
            statements: Mutex::new(Vec::new()),
        }
    }

    pub fn seed(&self, name: &str, rows: u32) {
        self.databases
            .lock()
            .expect("db poisoned")
            .insert(name.to_string(), rows);
    }

    pub fn row_count(&self, name: &str) -> Option<u32> {
        self.databases.lock().expect("db poisoned").get(name).copied()
    }

    /// Returns false when the database does not exist.
    pub fn add_rows(&self, name: &str, rows: u32) -> bool {
        match self.databases.lock().expect("db poisoned").get_mut(name) {
            Some(n) => {
                *n += rows;
                true
            }
            None => false,
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().expect("db poisoned").clone()
    }
}

#[async_trait]
impl Server for FakeDatabase {
    fn name(&self) -> &str {
        "db"
    }

    async fn up(&self) -> Result<()> {
        self.log.push("db:up");
        Ok(())
    }

    async fn down(&self, force: bool) -> Result<()> {
        self.log.push(format!("db:down(force={})", force));
        Ok(())
    }
}

#[async_trait]
impl DatabaseServer for FakeDatabase {
    async fn query(&self, statement: &str) -> Result<()> {
        self.statements
            .lock()
            .expect("db poisoned")
            .push(statement.to_string());
        let mut dbs = self.databases.lock().expect("db poisoned");
        if let Some(name) = statement.strip_prefix("DROP DATABASE IF EXISTS ") {
            dbs.remove(name.trim());
            return Ok(());
        }
        if let Some(name) = statement.strip_prefix("CREATE DATABASE ") {
            let name = name.trim().to_string();
            if dbs.contains_key(&name) {
                return Err(anyhow::anyhow!("database exists: {}", name));
            }
            dbs.insert(name, 0);
            return Ok(());
        }
        Err(anyhow::anyhow!("unsupported statement: {}", statement))
    }
}

enum RunnerBehavior {
    Plain,
    /// `core download` creates its `--path=` directory.
    MaterializeWorkspaces,
    /// Also: `core config` selects `--dbname=`, `import` adds rows to it.
    Site(Arc<FakeDatabase>),
}

pub struct RecordingRunner {
    behavior: RunnerBehavior,
    calls: Mutex<Vec<(String, Vec<String>)>>,
    failures: Mutex<Vec<(String, i32)>>,
    dbname: Mutex<Option<String>>,
}

impl RecordingRunner {
    fn with_behavior(behavior: RunnerBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            dbname: Mutex::new(None),
        }
    }

    pub fn new() -> Self {
        Self::with_behavior(RunnerBehavior::Plain)
    }

    pub fn materializing_workspaces() -> Self {
        Self::with_behavior(RunnerBehavior::MaterializeWorkspaces)
    }

    pub fn simulating_site(db: Arc<FakeDatabase>) -> Self {
        Self::with_behavior(RunnerBehavior::Site(db))
    }

    /// Any command line containing `needle` exits with `code`.
    pub fn fail_when(&self, needle: &str, code: i32) {
        self.failures
            .lock()
            .expect("runner poisoned")
            .push((needle.to_string(), code));
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().expect("runner poisoned").clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|(p, a)| {
                if a.is_empty() {
                    p
                } else {
                    format!("{} {}", p, a.join(" "))
                }
            })
            .collect()
    }

    fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
        let prefix = format!("--{}=", name);
        args.iter().find_map(|a| a.strip_prefix(prefix.as_str()))
    }

    fn simulate(&self, args: &[String]) -> i32 {
        let has = |w: &str| args.iter().any(|a| a == w);
        let db = match &self.behavior {
            RunnerBehavior::Plain => return 0,
            RunnerBehavior::MaterializeWorkspaces => None,
            RunnerBehavior::Site(db) => Some(db),
        };

        if has("core") && has("download") {
            if let Some(path) = Self::flag(args, "path") {
                if std::fs::create_dir_all(path).is_err() {
                    return 1;
                }
            }
        }
        if let Some(db) = db {
            if has("core") && has("config") {
                *self.dbname.lock().expect("runner poisoned") =
                    Self::flag(args, "dbname").map(str::to_string);
            }
            if has("import") {
                let name = self.dbname.lock().expect("runner poisoned").clone();
                match name {
                    Some(n) if db.add_rows(&n, IMPORTED_ROWS) => {}
                    _ => return 1,
                }
            }
        }
        0
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[String], _operation: &str) -> Result<CommandOutput> {
        self.calls
            .lock()
            .expect("runner poisoned")
            .push((program.to_string(), args.to_vec()));

        let line = format!("{} {}", program, args.join(" "));
        let forced = self
            .failures
            .lock()
            .expect("runner poisoned")
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, code)| *code);

        let exit_code = match forced {
            Some(code) => code,
            None => self.simulate(args),
        };
        Ok(CommandOutput {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "Error: simulated failure".to_string()
            },
            duration_ms: 0,
        })
    }
}

pub struct StubDownloader {
    payload: Vec<u8>,
    calls: AtomicU32,
    fail_partial: AtomicBool,
}

impl StubDownloader {
    pub fn new(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            calls: AtomicU32::new(0),
            fail_partial: AtomicBool::new(false),
        }
    }

    /// Write half the payload, then fail.
    pub fn fail_after_partial_write(&self) {
        self.fail_partial.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for StubDownloader {
    async fn download(&self, _url: &str, dest: &Path) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if self.fail_partial.load(Ordering::SeqCst) {
            std::fs::write(dest, &self.payload[..self.payload.len() / 2])?;
            return Err(anyhow::anyhow!("connection reset by peer"));
        }
        std::fs::write(dest, &self.payload)?;
        Ok(self.payload.len() as u64)
    }
}

pub struct StubUnpacker {
    top: Option<String>,
    error: String,
    calls: AtomicU32,
    also_create: Mutex<Option<PathBuf>>,
}

impl StubUnpacker {
    /// Creates `<dest>/<top>/wptest.xml`.
    pub fn producing(top: &str) -> Self {
        Self {
            top: Some(top.to_string()),
            error: String::new(),
            calls: AtomicU32::new(0),
            also_create: Mutex::new(None),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            top: None,
            error: error.to_string(),
            calls: AtomicU32::new(0),
            also_create: Mutex::new(None),
        }
    }

    /// Also create this file while unpacking.
    pub fn also_create(&self, path: PathBuf) {
        *self.also_create.lock().expect("unpacker poisoned") = Some(path);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Unpacker for StubUnpacker {
    async fn unpack(&self, _archive: &Path, dest_dir: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(top) = &self.top else {
            return Err(anyhow::anyhow!("{}", self.error));
        };
        let dir = dest_dir.join(top);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("wptest.xml"), b"<rss/>")?;

        let extra = self.also_create.lock().expect("unpacker poisoned").clone();
        if let Some(extra) = extra {
            if let Some(parent) = extra.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(extra, b"x")?;
        }
        Ok(top.clone())
    }
}

pub struct StubPageFetcher {
    body: String,
    log: Option<CallLog>,
    fail: bool,
}

impl StubPageFetcher {
    pub fn new(body: &str) -> Self {
        Self {
            body: body.to_string(),
            log: None,
            fail: false,
        }
    }

    pub fn logging(body: &str, log: CallLog) -> Self {
        Self {
            body: body.to_string(),
            log: Some(log),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            body: String::new(),
            log: None,
            fail: true,
        }
    }
}

#[async_trait]
impl PageFetcher for StubPageFetcher {
    async fn get(&self, url: &str) -> Result<String> {
        if let Some(log) = &self.log {
            log.push(format!("fetch:{}", url));
        }
        if self.fail {
            return Err(anyhow::anyhow!("connection refused"));
        }
        Ok(self.body.clone())
    }
}

/// Reports at most `keep` bytes written.
pub struct TruncatingWriter {
    pub keep: usize,
}

#[async_trait]
impl ArtifactWriter for TruncatingWriter {
    async fn write(&self, _path: &Path, bytes: &[u8]) -> std::io::Result<usize> {
        Ok(bytes.len().min(self.keep))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.items
            .lock()
            .expect("store poisoned")
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl SectionStore for MemoryStore {
    async fn set_section_item(&self, section: &str, key: &str, value: &str) -> Result<()> {
        self.items
            .lock()
            .expect("store poisoned")
            .insert((section.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn section_item(&self, section: &str, key: &str) -> Result<Option<String>> {
        Ok(self.get(section, key))
    }
}
