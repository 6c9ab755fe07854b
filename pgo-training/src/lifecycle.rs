// Training-case lifecycle
//
//   Created -> Staged -> Configured -> Installed -> Harvested -> Done
//   any non-terminal state -> Aborted (on the first fatal error)
//
// Run-to-completion: `init()` is valid exactly once per case object; there is no built-in retry.

use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{CaseConfig, SectionStore, TomlSectionStore};
use crate::error::CaseError;
use crate::harvest::{
    ArtifactHarvester, ArtifactWriter, FsArtifactWriter, HarvestOutcome, HttpPageFetcher,
    PageFetcher,
};
use crate::installation::{
    HostProcessRunner, InstallPlan, InstallationOrchestrator, ManagementTool, ProcessRunner,
};
use crate::models::{CaseIdentity, ServiceEndpoint, TemplateVariables, WorkspacePaths};
use crate::services::{
    CliDatabaseServer, CommandServer, DatabaseServer, ServiceCoordinator, TemplateWebServer,
    WebServer,
};
use crate::staging::{DistributionFetcher, Downloader, HttpDownloader, Unpacker, ZipUnpacker};

/// Name of the training case this crate provisions.
pub const CASE_NAME: &str = "wordpress";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseState {
    Created,
    Staged,
    Configured,
    Installed,
    Harvested,
    Done,
    Aborted,
}

impl CaseState {
    fn successor(self) -> Option<CaseState> {
        match self {
            CaseState::Created => Some(CaseState::Staged),
            CaseState::Staged => Some(CaseState::Configured),
            CaseState::Configured => Some(CaseState::Installed),
            CaseState::Installed => Some(CaseState::Harvested),
            CaseState::Harvested => Some(CaseState::Done),
            CaseState::Done | CaseState::Aborted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CaseState::Done | CaseState::Aborted)
    }

    /// Advance to `next`, which must be the direct successor (or `Aborted`).
    fn advance(&mut self, next: CaseState) -> Result<(), CaseError> {
        let allowed = match next {
            CaseState::Aborted => !self.is_terminal(),
            _ => self.successor() == Some(next),
        };
        if !allowed {
            return Err(CaseError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        info!(
            "[PHASE: lifecycle] [STEP: transition] {:?} -> {:?}",
            self, next
        );
        *self = next;
        Ok(())
    }
}

/// External collaborators a case is built from.
pub struct Collaborators {
    pub runner: Arc<dyn ProcessRunner>,
    pub downloader: Arc<dyn Downloader>,
    pub unpacker: Arc<dyn Unpacker>,
    pub web: Option<Arc<dyn WebServer>>,
    pub db: Option<Arc<dyn DatabaseServer>>,
    pub page_fetcher: Arc<dyn PageFetcher>,
    pub artifact_writer: Arc<dyn ArtifactWriter>,
    pub store: Arc<dyn SectionStore>,
}

impl Collaborators {
    /// Host process runner, HTTP(S) fetchers, zip unpacker, command-driven services.
    pub fn production(config: &CaseConfig) -> Result<Self, CaseError> {
        let runner: Arc<dyn ProcessRunner> = Arc::new(HostProcessRunner::new(
            std::time::Duration::from_secs(config.process_timeout_secs),
        ));

        let web: Option<Arc<dyn WebServer>> = config.services.web.as_ref().map(|w| {
            Arc::new(TemplateWebServer::new(
                CommandServer::new("web", w.commands(), runner.clone()),
                CASE_NAME,
                w.conf_dir.clone(),
            )) as Arc<dyn WebServer>
        });

        let db_endpoint = ServiceEndpoint::new(&config.database.host, config.database.port)?;
        let db: Option<Arc<dyn DatabaseServer>> = config.services.database.as_ref().map(|c| {
            Arc::new(CliDatabaseServer::new(
                CommandServer::new("database", c.clone(), runner.clone()),
                &config.database.client,
                db_endpoint.clone(),
                &config.database.user,
                &config.database.pass,
            )) as Arc<dyn DatabaseServer>
        });

        Ok(Self {
            runner,
            downloader: Arc::new(HttpDownloader::new()?),
            unpacker: Arc::new(ZipUnpacker),
            web,
            db,
            page_fetcher: Arc::new(HttpPageFetcher::new()?),
            artifact_writer: Arc::new(FsArtifactWriter),
            store: Arc::new(TomlSectionStore::new(config.paths.state_file.clone())),
        })
    }
}

/// Human-readable completion report.
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub case: String,
    pub endpoint: ServiceEndpoint,
    pub job_file: PathBuf,
    pub url_count: usize,
    pub lines: Vec<String>,
}

pub struct TrainingCase {
    identity: CaseIdentity,
    paths: WorkspacePaths,
    http: ServiceEndpoint,
    db: ServiceEndpoint,
    db_user: String,
    db_pass: String,
    fetcher: DistributionFetcher,
    services: ServiceCoordinator,
    installer: InstallationOrchestrator,
    harvester: ArtifactHarvester,
    state: CaseState,
}

impl TrainingCase {
    pub fn new(config: &CaseConfig, parts: Collaborators) -> Result<Self, CaseError> {
        Self::with_name(CASE_NAME, config, parts)
    }

    pub fn with_name(
        name: &str,
        config: &CaseConfig,
        parts: Collaborators,
    ) -> Result<Self, CaseError> {
        let services = ServiceCoordinator::new(parts.web, parts.db)?;

        let identity = CaseIdentity::new(name);
        let paths = WorkspacePaths::for_case(config, &identity);
        let http = ServiceEndpoint::new(&config.http.host, config.http.port)?;
        let db = ServiceEndpoint::new(&config.database.host, config.database.port)?;

        let host_php = config
            .runtime
            .resolve_host_php()
            .map_err(|e| CaseError::Configuration(format!("{:#}", e)))?;
        let case_php = config
            .runtime
            .resolve_case_php()
            .map_err(|e| CaseError::Configuration(format!("{:#}", e)))?;

        let fetcher = DistributionFetcher::new(
            paths.clone(),
            config.sources.clone(),
            parts.downloader,
            parts.unpacker,
            parts.runner.clone(),
            ManagementTool::new(host_php, paths.tool_path()),
        );
        let installer = InstallationOrchestrator::new(
            parts.runner,
            ManagementTool::new(case_php, paths.tool_path()),
            parts.store,
        );
        let harvester =
            ArtifactHarvester::new(http.clone(), parts.page_fetcher, parts.artifact_writer)?;

        Ok(Self {
            identity,
            paths,
            http,
            db,
            db_user: config.database.user.clone(),
            db_pass: config.database.pass.clone(),
            fetcher,
            services,
            installer,
            harvester,
            state: CaseState::Created,
        })
    }

    pub fn name(&self) -> &str {
        self.identity.as_str()
    }

    pub fn state(&self) -> CaseState {
        self.state
    }

    /// Whole-case runs allowed per invocation.
    pub fn max_runs(&self) -> u32 {
        1
    }

    pub fn job_file(&self) -> PathBuf {
        self.paths.job_file(&self.identity)
    }

    pub fn work_dir(&self) -> &Path {
        &self.paths.work_dir
    }

    /// Stage, configure + install, harvest, report. Any fatal error leaves the case `Aborted`.
    pub async fn init(&mut self) -> Result<CaseReport, CaseError> {
        if self.state != CaseState::Created {
            return Err(CaseError::InvalidTransition {
                from: self.state,
                to: CaseState::Staged,
            });
        }

        let run_id = uuid::Uuid::new_v4();
        let started = Instant::now();
        info!(
            "[PHASE: lifecycle] [STEP: init] Initializing {} (run_id={})",
            self.identity, run_id
        );

        match self.run_stages().await {
            Ok(report) => {
                info!(
                    "[PHASE: lifecycle] [STEP: done] {} finished (run_id={}, duration_ms={})",
                    self.identity,
                    run_id,
                    started.elapsed().as_millis()
                );
                Ok(report)
            }
            Err(e) => {
                error!(
                    "[PHASE: lifecycle] [STEP: abort] {} aborted in state {:?} (run_id={}): {}",
                    self.identity, self.state, run_id, e
                );
                if let Err(transition) = self.state.advance(CaseState::Aborted) {
                    warn!("[PHASE: lifecycle] [STEP: abort] {}", transition);
                }
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<CaseReport, CaseError> {
        self.fetcher.stage_all().await?;
        self.state.advance(CaseState::Staged)?;

        self.configure_and_install().await?;

        let outcome = self
            .harvester
            .harvest(&self.services, &self.paths.job_file(&self.identity))
            .await?;
        self.state.advance(CaseState::Harvested)?;

        let report = self.report(&outcome);
        for line in &report.lines {
            info!("[PHASE: lifecycle] [STEP: report] {}", line);
        }
        self.state.advance(CaseState::Done)?;
        Ok(report)
    }

    async fn configure_and_install(&mut self) -> Result<(), CaseError> {
        let vars = TemplateVariables::for_case(&self.identity, &self.paths);
        self.services
            .register_site(&self.paths.web_template(&self.identity), &vars)
            .await?;

        let fixture_file = self.paths.fixture_file();
        let plan = InstallPlan {
            case: &self.identity,
            work_dir: &self.paths.work_dir,
            fixture_file: &fixture_file,
            http: &self.http,
            db: &self.db,
            db_user: &self.db_user,
            db_pass: &self.db_pass,
        };

        let services = &self.services;
        let installer = &self.installer;
        let identity = &self.identity;
        let state = &mut self.state;
        services
            .with_services_up("install", async {
                services.reset_database(identity).await?;
                state.advance(CaseState::Configured)?;
                installer.run(&plan).await?;
                state.advance(CaseState::Installed)
            })
            .await
    }

    fn report(&self, outcome: &HarvestOutcome) -> CaseReport {
        let lines = vec![
            format!("{} initialization done.", self.identity),
            format!(
                "{} site configured to run under {}:{}",
                self.identity,
                self.http.host(),
                self.http.port()
            ),
        ];
        CaseReport {
            case: self.identity.to_string(),
            endpoint: self.http.clone(),
            job_file: outcome.job_file.clone(),
            url_count: outcome.artifact.urls().len(),
            lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        test_config, CallLog, FakeDatabase, FakeWebServer, MemoryStore, RecordingRunner,
        StubDownloader, StubPageFetcher, StubUnpacker,
    };

    struct Harness {
        dir: tempfile::TempDir,
        config: CaseConfig,
        log: CallLog,
        db: Arc<FakeDatabase>,
        runner: Arc<RecordingRunner>,
        downloader: Arc<StubDownloader>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let config = test_config(dir.path(), "127.0.0.1", 8080);
            let log = CallLog::default();
            let db = Arc::new(FakeDatabase::new(log.clone()));
            let runner = Arc::new(RecordingRunner::simulating_site(db.clone()));
            Self {
                dir,
                config,
                log,
                db,
                runner,
                downloader: Arc::new(StubDownloader::new(b"payload")),
            }
        }

        fn parts(&self, page: &str) -> Collaborators {
            Collaborators {
                runner: self.runner.clone(),
                downloader: self.downloader.clone(),
                unpacker: Arc::new(StubUnpacker::producing("wptest-master")),
                web: Some(Arc::new(FakeWebServer::new(self.log.clone()))),
                db: Some(self.db.clone()),
                page_fetcher: Arc::new(StubPageFetcher::new(page)),
                artifact_writer: Arc::new(FsArtifactWriter),
                store: Arc::new(MemoryStore::default()),
            }
        }
    }

    #[tokio::test]
    async fn end_to_end_demo_case_writes_single_url() {
        let h = Harness::new();
        let mut case = TrainingCase::with_name(
            "demo",
            &h.config,
            h.parts(r#"<a href="http://127.0.0.1:8080/p1">"#),
        )
        .expect("case");

        let report = case.init().await.expect("init");

        assert_eq!(case.state(), CaseState::Done);
        assert_eq!(report.job_file, h.dir.path().join("jobs").join("demo.txt"));
        assert_eq!(
            std::fs::read_to_string(&report.job_file).expect("job file"),
            "http://127.0.0.1:8080/p1"
        );
        assert_eq!(report.url_count, 1);
        assert_eq!(
            report.lines,
            vec![
                "demo initialization done.".to_string(),
                "demo site configured to run under 127.0.0.1:8080".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn services_are_paired_around_install_and_harvest() {
        let h = Harness::new();
        let mut case = TrainingCase::new(&h.config, h.parts("")).expect("case");
        case.init().await.expect("init");

        let entries = h.log.entries();
        let ups = entries.iter().filter(|e| e.ends_with(":up")).count();
        let downs = entries.iter().filter(|e| e.contains(":down(force=true)")).count();
        assert_eq!(ups, 4);
        assert_eq!(downs, 4);
        // Site registration happens before the first bring-up.
        assert_eq!(entries.first().map(String::as_str), Some("web:add_server"));
        assert_eq!(
            h.db.statements()[..2],
            [
                "DROP DATABASE IF EXISTS wordpress".to_string(),
                "CREATE DATABASE wordpress".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn rerun_against_populated_database_yields_same_row_count() {
        let h = Harness::new();

        let mut first = TrainingCase::new(&h.config, h.parts("")).expect("case");
        first.init().await.expect("first run");
        let after_first = h.db.row_count(CASE_NAME);

        let mut second = TrainingCase::new(&h.config, h.parts("")).expect("case");
        second.init().await.expect("second run");
        let after_second = h.db.row_count(CASE_NAME);

        assert!(after_first.unwrap_or(0) > 0);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn second_run_reuses_staged_distribution() {
        let h = Harness::new();
        TrainingCase::new(&h.config, h.parts(""))
            .expect("case")
            .init()
            .await
            .expect("first");
        TrainingCase::new(&h.config, h.parts(""))
            .expect("case")
            .init()
            .await
            .expect("second");

        // tool + fixture fetched once; workspace materialized once.
        assert_eq!(h.downloader.calls(), 2);
        let core_downloads = h
            .runner
            .command_lines()
            .iter()
            .filter(|l| l.contains("core download"))
            .count();
        assert_eq!(core_downloads, 1);
    }

    #[tokio::test]
    async fn install_failure_aborts_and_still_tears_down() {
        let h = Harness::new();
        h.runner.fail_when("core install", 1);
        let mut case = TrainingCase::new(&h.config, h.parts("")).expect("case");

        let err = case.init().await.expect_err("must fail");

        assert!(matches!(err, CaseError::InstallationStep { .. }));
        assert_eq!(case.state(), CaseState::Aborted);
        assert_eq!(
            h.log.entries().last().map(String::as_str),
            Some("db:down(force=true)")
        );
        assert!(!case.job_file().exists());
    }

    #[tokio::test]
    async fn harvest_failure_after_install_aborts() {
        let h = Harness::new();
        let mut parts = h.parts("");
        parts.page_fetcher = Arc::new(StubPageFetcher::failing());
        let mut case = TrainingCase::new(&h.config, parts).expect("case");

        let err = case.init().await.expect_err("fetch fails");

        assert!(matches!(err, CaseError::Fetch { .. }));
        assert_eq!(case.state(), CaseState::Aborted);
        assert!(!case.job_file().exists());
    }

    #[tokio::test]
    async fn init_is_not_reentrant() {
        let h = Harness::new();
        let mut case = TrainingCase::new(&h.config, h.parts("")).expect("case");
        case.init().await.expect("first");
        let err = case.init().await.expect_err("second init");
        assert!(matches!(err, CaseError::InvalidTransition { .. }));
        assert_eq!(case.state(), CaseState::Done);
        assert_eq!(case.max_runs(), 1);
    }

    #[test]
    fn missing_web_service_fails_construction() {
        let h = Harness::new();
        let mut parts = h.parts("");
        parts.web = None;
        let err = TrainingCase::new(&h.config, parts).err().expect("must fail");
        assert!(matches!(err, CaseError::Configuration(_)));
    }

    #[test]
    fn state_machine_rejects_skipped_states() {
        let mut s = CaseState::Created;
        assert!(s.advance(CaseState::Installed).is_err());
        s.advance(CaseState::Staged).expect("staged");
        s.advance(CaseState::Aborted).expect("abort");
        assert!(s.advance(CaseState::Aborted).is_err());
    }
}
