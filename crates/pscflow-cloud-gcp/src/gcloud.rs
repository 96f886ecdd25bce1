//! gcloud CLI wrapper
//!
//! Wraps the gcloud commands the orchestrator needs: project context
//! switching, out-of-band API enablement and the PSC status query.

use crate::error::{GcpError, Result};
use pscflow_cloud::{CloudError, CommandRunner, CommandSpec};
use std::sync::Arc;
use std::time::Duration;

/// Deadline for short control-plane calls
const GCLOUD_TIMEOUT: Duration = Duration::from_secs(120);

const PSC_ENABLED_FORMAT: &str = "value(settings.ipConfiguration.pscConfig.pscEnabled)";

/// gcloud CLI wrapper
#[derive(Clone)]
pub struct Gcloud {
    bin: String,
    runner: Arc<dyn CommandRunner>,
}

impl Gcloud {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            bin: "gcloud".to_string(),
            runner,
        }
    }

    pub fn with_binary(mut self, bin: impl Into<String>) -> Self {
        self.bin = bin.into();
        self
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.bin).args(args).timeout(GCLOUD_TIMEOUT)
    }

    /// Check that gcloud is installed, returning its version banner
    pub async fn check_installed(&self) -> Result<String> {
        match self.runner.run(&self.command(["version"])).await {
            Ok(out) if out.success() => Ok(out.stdout.lines().next().unwrap_or_default().to_string()),
            Ok(out) => Err(GcpError::CommandFailed(out.diagnostic().trim().to_string())),
            Err(CloudError::ProcessError { .. }) => Err(GcpError::ToolNotFound(self.bin.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Make `project_id` the active project for subsequent commands
    pub async fn set_project(&self, project_id: &str) -> Result<()> {
        tracing::info!("Switching gcloud project to: {}", project_id);

        let spec = self.command(["config", "set", "project", project_id]);
        let out = self.runner.run(&spec).await?;
        if !out.success() {
            return Err(CloudError::ContextSwitchFailed {
                project: project_id.to_string(),
                diagnostic: out.diagnostic().trim().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// `gcloud services enable`, or `None` when there is nothing to enable
    pub fn enable_services_command(&self, project_id: &str, apis: &[String]) -> Option<CommandSpec> {
        if apis.is_empty() {
            return None;
        }
        Some(
            self.command(["services", "enable"])
                .args(apis.iter().cloned())
                .args(["--project", project_id]),
        )
    }

    pub fn describe_psc_command(&self, instance: &str, project_id: &str) -> CommandSpec {
        self.command([
            "sql",
            "instances",
            "describe",
            instance,
            "--project",
            project_id,
        ])
        .arg(format!("--format={}", PSC_ENABLED_FORMAT))
    }

    /// Whether PSC is enabled on a Cloud SQL instance.
    ///
    /// `None` when gcloud printed nothing recognizable (field not populated yet).
    pub async fn sql_psc_enabled(&self, instance: &str, project_id: &str) -> Result<Option<bool>> {
        let out = self
            .runner
            .run(&self.describe_psc_command(instance, project_id))
            .await?;
        if !out.success() {
            return Err(GcpError::CommandFailed(out.diagnostic().trim().to_string()));
        }
        Ok(parse_flag(&out.stdout))
    }
}

fn parse_flag(stdout: &str) -> Option<bool> {
    match stdout.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
