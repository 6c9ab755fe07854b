// Web + database service coordination.
//
// The two services are case-exclusive shared resources. Every block that needs them reachable
// goes through `ServiceCoordinator::with_services_up`, which brings both up, runs the block
// and then forces both down on every exit path, including errors.

pub mod command;

use anyhow::Result;
use async_trait::async_trait;
use log::{error, info, warn};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use crate::error::CaseError;
use crate::models::{CaseIdentity, TemplateVariables};

pub use command::{CliDatabaseServer, CommandServer, TemplateWebServer};

/// Anything that can be brought up and down.
#[async_trait]
pub trait Server: Send + Sync {
    fn name(&self) -> &str;

    async fn up(&self) -> Result<()>;

    /// Stop the service. Stopping an already-stopped service is not an error.
    async fn down(&self, force: bool) -> Result<()>;
}

#[async_trait]
pub trait WebServer: Server {
    /// Render `template` with `vars` and register the result as a virtual host.
    async fn add_server(&self, template: &Path, vars: &TemplateVariables) -> Result<()>;
}

#[async_trait]
pub trait DatabaseServer: Server {
    async fn query(&self, statement: &str) -> Result<()>;
}

pub struct ServiceCoordinator {
    web: Arc<dyn WebServer>,
    db: Option<Arc<dyn DatabaseServer>>,
}

impl std::fmt::Debug for ServiceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCoordinator")
            .field("web", &self.web.name())
            .field("db", &self.db.as_ref().map(|d| d.name().to_string()))
            .finish()
    }
}

impl ServiceCoordinator {
    /// The workload cannot be configured without a web service, so a missing one is fatal here.
    pub fn new(
        web: Option<Arc<dyn WebServer>>,
        db: Option<Arc<dyn DatabaseServer>>,
    ) -> Result<Self, CaseError> {
        let web = web.ok_or_else(|| {
            CaseError::Configuration("Invalid web service: no handle supplied".to_string())
        })?;
        Ok(Self { web, db })
    }

    fn database(&self) -> Result<&Arc<dyn DatabaseServer>, CaseError> {
        self.db.as_ref().ok_or_else(|| {
            CaseError::Configuration("No database service configured for this case".to_string())
        })
    }

    /// Database first, then web. If the web service fails to start, the database is stopped
    /// again before the error propagates.
    pub async fn up(&self) -> Result<(), CaseError> {
        if let Some(db) = &self.db {
            info!("[PHASE: services] [STEP: up] Starting {}", db.name());
            db.up()
                .await
                .map_err(|e| CaseError::service(db.name(), "start", e))?;
        }

        info!("[PHASE: services] [STEP: up] Starting {}", self.web.name());
        if let Err(e) = self.web.up().await {
            if let Some(db) = &self.db {
                if let Err(down_err) = db.down(true).await {
                    warn!(
                        "[PHASE: services] [STEP: up] Rollback of {} failed: {:#}",
                        db.name(),
                        down_err
                    );
                }
            }
            return Err(CaseError::service(self.web.name(), "start", e));
        }
        Ok(())
    }

    /// Web first, then database. Both are attempted; the first failure is returned.
    pub async fn down(&self, force: bool) -> Result<(), CaseError> {
        let mut first_err: Option<CaseError> = None;

        info!(
            "[PHASE: services] [STEP: down] Stopping {} (force={})",
            self.web.name(),
            force
        );
        if let Err(e) = self.web.down(force).await {
            error!(
                "[PHASE: services] [STEP: down] {} failed to stop: {:#}",
                self.web.name(),
                e
            );
            first_err = Some(CaseError::service(self.web.name(), "stop", e));
        }

        if let Some(db) = &self.db {
            info!(
                "[PHASE: services] [STEP: down] Stopping {} (force={})",
                db.name(),
                force
            );
            if let Err(e) = db.down(force).await {
                error!(
                    "[PHASE: services] [STEP: down] {} failed to stop: {:#}",
                    db.name(),
                    e
                );
                if first_err.is_none() {
                    first_err = Some(CaseError::service(db.name(), "stop", e));
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn query(&self, statement: &str) -> Result<(), CaseError> {
        let db = self.database()?;
        db.query(statement)
            .await
            .map_err(|e| CaseError::service(db.name(), "query", e))
    }

    /// Register the case's virtual-host fragment. Must run before the services come up.
    pub async fn register_site(
        &self,
        template: &Path,
        vars: &TemplateVariables,
    ) -> Result<(), CaseError> {
        info!(
            "[PHASE: services] [STEP: register] Registering {:?} with {} ({} vars)",
            template,
            self.web.name(),
            vars.len()
        );
        self.web
            .add_server(template, vars)
            .await
            .map_err(|e| CaseError::service(self.web.name(), "register site", e))
    }

    /// Drop and recreate the case database, unconditionally.
    pub async fn reset_database(&self, case: &CaseIdentity) -> Result<(), CaseError> {
        info!(
            "[PHASE: services] [STEP: db_reset] Recreating database '{}'",
            case
        );
        self.query(&format!("DROP DATABASE IF EXISTS {}", case.as_str()))
            .await?;
        self.query(&format!("CREATE DATABASE {}", case.as_str()))
            .await
    }

    /// Run `block` with both services up; they are forced down afterwards on every path.
    ///
    /// A block error wins over a teardown error (the teardown error is logged).
    pub async fn with_services_up<T, F>(&self, label: &str, block: F) -> Result<T, CaseError>
    where
        F: Future<Output = Result<T, CaseError>>,
    {
        self.up().await?;
        info!("[PHASE: services] [STEP: {}] Services up", label);

        let result = block.await;
        let teardown = self.down(true).await;

        match (result, teardown) {
            (Ok(v), Ok(())) => Ok(v),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(down_err)) => {
                warn!(
                    "[PHASE: services] [STEP: {}] Teardown after failure also failed: {}",
                    label, down_err
                );
                Err(e)
            }
        }
    }
}
