// Installation pipeline
//
// Runs the management tool against the staged workload, strictly in order:
//   core config -> core install -> plugin install (importer) -> import fixture
//
// `core install` is NOT repeatable against existing state; callers must reset the database
// first. The first failing step aborts the rest; applied steps are not rolled back.

use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::{ManagementTool, ProcessRunner};
use crate::config::SectionStore;
use crate::error::CaseError;
use crate::models::{CaseIdentity, Credentials, ServiceEndpoint};
use crate::security::crypto::{generate_token, secret_fingerprint};

const SITE_TITLE: &str = "hello";
const SITE_ADMIN_EMAIL: &str = "ostc@test.abc";
const IMPORTER_PLUGIN: &str = "wordpress-importer";
const GENERATED_SECRET_LEN: usize = 8;

pub const ADMIN_USER_KEY: &str = "site_admin_user";
pub const ADMIN_PASS_KEY: &str = "site_admin_pass";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    CoreConfig,
    CoreInstall,
    EnableImporter,
    ImportFixture,
}

impl InstallStep {
    pub const PIPELINE: [InstallStep; 4] = [
        InstallStep::CoreConfig,
        InstallStep::CoreInstall,
        InstallStep::EnableImporter,
        InstallStep::ImportFixture,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStep::CoreConfig => "core config",
            InstallStep::CoreInstall => "core install",
            InstallStep::EnableImporter => "plugin install",
            InstallStep::ImportFixture => "import",
        }
    }
}

/// Everything the pipeline needs to know about the case.
#[derive(Debug, Clone, Copy)]
pub struct InstallPlan<'a> {
    pub case: &'a CaseIdentity,
    pub work_dir: &'a Path,
    pub fixture_file: &'a Path,
    pub http: &'a ServiceEndpoint,
    pub db: &'a ServiceEndpoint,
    pub db_user: &'a str,
    pub db_pass: &'a str,
}

/// Subcommand arguments for one step (the tool path and `--path=` are added by the tool).
pub fn step_args(
    step: InstallStep,
    plan: &InstallPlan<'_>,
    creds: Option<&Credentials>,
) -> Vec<String> {
    match step {
        InstallStep::CoreConfig => vec![
            "core".to_string(),
            "config".to_string(),
            "--force".to_string(),
            format!("--dbname={}", plan.case.as_str()),
            format!("--dbuser={}", plan.db_user),
            format!("--dbpass={}", plan.db_pass),
            format!("--dbhost={}", plan.db.authority()),
        ],
        InstallStep::CoreInstall => {
            let (user, pass) = creds
                .map(|c| (c.admin_user.as_str(), c.admin_pass.as_str()))
                .unwrap_or_default();
            vec![
                "core".to_string(),
                "install".to_string(),
                format!("--url={}", plan.http.authority()),
                format!("--title={}", SITE_TITLE),
                format!("--admin_user={}", user),
                format!("--admin_password={}", pass),
                format!("--admin_email={}", SITE_ADMIN_EMAIL),
                "--skip-email".to_string(),
            ]
        }
        InstallStep::EnableImporter => vec![
            "plugin".to_string(),
            "install".to_string(),
            IMPORTER_PLUGIN.to_string(),
            "--activate".to_string(),
            "--allow-root".to_string(),
        ],
        InstallStep::ImportFixture => vec![
            "import".to_string(),
            plan.fixture_file.to_string_lossy().to_string(),
            "--authors=create".to_string(),
            "--allow-root".to_string(),
        ],
    }
}

pub struct InstallationOrchestrator {
    runner: Arc<dyn ProcessRunner>,
    tool: ManagementTool,
    store: Arc<dyn SectionStore>,
}

impl InstallationOrchestrator {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        tool: ManagementTool,
        store: Arc<dyn SectionStore>,
    ) -> Self {
        Self {
            runner,
            tool,
            store,
        }
    }

    /// Run the full pipeline. Services must already be up.
    pub async fn run(&self, plan: &InstallPlan<'_>) -> Result<Credentials, CaseError> {
        let started = Instant::now();
        let mut creds: Option<Credentials> = None;

        for step in InstallStep::PIPELINE {
            if step == InstallStep::CoreInstall {
                creds = Some(self.generate_credentials(plan).await?);
            }

            let args = step_args(step, plan, creds.as_ref());
            info!(
                "[PHASE: installation] [STEP: {}] Running (case={})",
                step.as_str(),
                plan.case
            );
            self.tool
                .invoke(self.runner.as_ref(), step.as_str(), &args, plan.work_dir)
                .await
                .map_err(|e| {
                    warn!(
                        "[PHASE: installation] [STEP: {}] Aborting pipeline: {}",
                        step.as_str(),
                        e
                    );
                    e
                })?;
        }

        info!(
            "[PHASE: installation] [STEP: done] Pipeline complete (case={}, duration_ms={})",
            plan.case,
            started.elapsed().as_millis()
        );
        creds.ok_or_else(|| {
            CaseError::Other(anyhow::anyhow!("Pipeline finished without credentials"))
        })
    }

    /// Generate the site-admin login and persist it before anything uses it.
    async fn generate_credentials(&self, plan: &InstallPlan<'_>) -> Result<Credentials, CaseError> {
        let admin_user = generate_token(GENERATED_SECRET_LEN)?;
        let admin_pass = generate_token(GENERATED_SECRET_LEN)?;

        let section = plan.case.as_str();
        self.store
            .set_section_item(section, ADMIN_USER_KEY, &admin_user)
            .await?;
        self.store
            .set_section_item(section, ADMIN_PASS_KEY, &admin_pass)
            .await?;

        info!(
            "[PHASE: installation] [STEP: credentials] Generated site admin '{}' (pass_fp={})",
            admin_user,
            secret_fingerprint(&admin_pass)
        );
        Ok(Credentials {
            admin_user,
            admin_pass,
            db_user: plan.db_user.to_string(),
            db_pass: plan.db_pass.to_string(),
        })
    }
}
