// Command-driven service handles
//
// The actual web/database server managers are external; these handles only run the configured
// start/stop command lines through the process runner and, for the web service, drop rendered
// virtual-host fragments into its include directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{DatabaseServer, Server, WebServer};
use crate::config::ServiceCommands;
use crate::installation::ProcessRunner;
use crate::models::{ServiceEndpoint, TemplateVariables};

/// Runs configured command lines to start/stop one service.
pub struct CommandServer {
    name: String,
    commands: ServiceCommands,
    runner: Arc<dyn ProcessRunner>,
}

impl CommandServer {
    pub fn new(name: &str, commands: ServiceCommands, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            name: name.to_string(),
            commands,
            runner,
        }
    }

    async fn run_line(&self, line: &[String], operation: &str) -> Result<()> {
        let (program, args) = line.split_first().ok_or_else(|| {
            anyhow::anyhow!("No '{}' command configured for {}", operation, self.name)
        })?;

        let out = self.runner.run(program, args, operation).await?;
        if !out.success() {
            return Err(anyhow::anyhow!(
                "'{}' exited with {:?}: {}",
                program,
                out.exit_code,
                out.stderr.trim()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Server for CommandServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn up(&self) -> Result<()> {
        self.run_line(&self.commands.up, &format!("{}_up", self.name))
            .await
    }

    async fn down(&self, force: bool) -> Result<()> {
        let line = match (&self.commands.force_down, force) {
            (Some(forced), true) => forced,
            _ => &self.commands.down,
        };
        self.run_line(line, &format!("{}_down", self.name)).await
    }
}

/// Render a virtual-host fragment from template text (pure, testable).
pub fn render_site_config(template_text: &str, vars: &TemplateVariables) -> String {
    vars.render(template_text)
}

/// Web service whose virtual hosts are rendered template fragments in `conf_dir`.
pub struct TemplateWebServer {
    inner: CommandServer,
    site: String,
    conf_dir: PathBuf,
}

impl TemplateWebServer {
    pub fn new(inner: CommandServer, site: &str, conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            site: site.to_string(),
            conf_dir: conf_dir.into(),
        }
    }

    pub fn site_config_path(&self) -> PathBuf {
        self.conf_dir.join(format!("{}.conf", self.site))
    }
}

#[async_trait]
impl Server for TemplateWebServer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn up(&self) -> Result<()> {
        self.inner.up().await
    }

    async fn down(&self, force: bool) -> Result<()> {
        self.inner.down(force).await
    }
}

#[async_trait]
impl WebServer for TemplateWebServer {
    async fn add_server(&self, template: &Path, vars: &TemplateVariables) -> Result<()> {
        let text = tokio::fs::read_to_string(template)
            .await
            .with_context(|| format!("Failed to read web template {:?}", template))?;
        let rendered = render_site_config(&text, vars);

        tokio::fs::create_dir_all(&self.conf_dir)
            .await
            .with_context(|| format!("Failed to create {:?}", self.conf_dir))?;
        let dest = self.site_config_path();
        tokio::fs::write(&dest, rendered.as_bytes())
            .await
            .with_context(|| format!("Failed to write site config {:?}", dest))?;

        info!(
            "[PHASE: services] [STEP: register] Wrote site config {:?} ({} bytes)",
            dest,
            rendered.len()
        );
        Ok(())
    }
}

/// Database service driven by a command-line client (`mysql`-compatible flags).
pub struct CliDatabaseServer {
    inner: CommandServer,
    client: String,
    endpoint: ServiceEndpoint,
    user: String,
    pass: String,
}

impl CliDatabaseServer {
    pub fn new(
        inner: CommandServer,
        client: &str,
        endpoint: ServiceEndpoint,
        user: &str,
        pass: &str,
    ) -> Self {
        Self {
            inner,
            client: client.to_string(),
            endpoint,
            user: user.to_string(),
            pass: pass.to_string(),
        }
    }

    /// Client argv for one statement; the password travels as a single `--password=` arg.
    pub fn query_args(&self, statement: &str) -> Vec<String> {
        let mut args = vec![
            format!("--host={}", self.endpoint.host()),
            format!("--port={}", self.endpoint.port()),
            format!("--user={}", self.user),
        ];
        if !self.pass.is_empty() {
            args.push(format!("--password={}", self.pass));
        }
        args.push(format!("--execute={}", statement));
        args
    }
}

#[async_trait]
impl Server for CliDatabaseServer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn up(&self) -> Result<()> {
        self.inner.up().await
    }

    async fn down(&self, force: bool) -> Result<()> {
        self.inner.down(force).await
    }
}

#[async_trait]
impl DatabaseServer for CliDatabaseServer {
    async fn query(&self, statement: &str) -> Result<()> {
        debug!(
            "[PHASE: services] [STEP: query] {} (endpoint={})",
            statement, self.endpoint
        );
        let out = self
            .inner
            .runner
            .run(&self.client, &self.query_args(statement), "db_query")
            .await?;
        if !out.success() {
            return Err(anyhow::anyhow!(
                "Statement failed (exit_code={:?}): {}",
                out.exit_code,
                out.stderr.trim()
            ));
        }
        Ok(())
    }
}
