//! terraform CLI wrapper

use crate::error::Result;
use pscflow_cloud::{
    ApplyRequest, CloudError, CommandRunner, CommandSpec, DEFAULT_COMMAND_TIMEOUT, Variables,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const TFVARS_FILE: &str = "terraform.tfvars.json";

/// terraform CLI wrapper bound to a runner
#[derive(Clone)]
pub struct Terraform {
    bin: String,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl Terraform {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            bin: "terraform".to_string(),
            runner,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_binary(mut self, bin: impl Into<String>) -> Self {
        self.bin = bin.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Environment overlay carrying the project and region to the configuration
    pub fn env_for(request: &ApplyRequest) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(project) = request.project_id() {
            env.insert("TF_VAR_project_id".to_string(), project.to_string());
        }
        if let Some(region) = request.region() {
            env.insert("TF_VAR_region".to_string(), region.to_string());
        }
        env
    }

    /// Write the request variables as `terraform.tfvars.json` in `dir`
    pub async fn write_tfvars(&self, dir: &Path, request: &ApplyRequest) -> Result<PathBuf> {
        let path = dir.join(TFVARS_FILE);
        tokio::fs::write(&path, request.tfvars_json()?).await?;
        tracing::debug!("Generated {}", path.display());
        Ok(path)
    }

    /// Previously written variables, if any
    pub async fn read_tfvars(&self, dir: &Path) -> Option<Variables> {
        let content = tokio::fs::read_to_string(dir.join(TFVARS_FILE)).await.ok()?;
        serde_json::from_str(&content).ok()
    }

    fn command(&self, dir: &Path, env: &BTreeMap<String, String>) -> CommandSpec {
        CommandSpec::new(&self.bin)
            .current_dir(dir)
            .envs(env)
            .timeout(self.timeout)
    }

    pub fn init_command(&self, dir: &Path, env: &BTreeMap<String, String>) -> CommandSpec {
        self.command(dir, env).args(["init", "-input=false"])
    }

    /// `terraform apply`, restricted to `targets` when non-empty
    pub fn apply_command(
        &self,
        dir: &Path,
        env: &BTreeMap<String, String>,
        targets: &[String],
    ) -> CommandSpec {
        self.command(dir, env)
            .args(["apply", "-auto-approve", "-input=false"])
            .args(targets.iter().map(|t| format!("-target={}", t)))
    }

    /// Steps of one apply attempt: init, then apply
    pub fn init_and_apply(
        &self,
        dir: &Path,
        env: &BTreeMap<String, String>,
        targets: &[String],
    ) -> Vec<CommandSpec> {
        vec![
            self.init_command(dir, env),
            self.apply_command(dir, env, targets),
        ]
    }

    /// Raw `terraform output -json`
    pub async fn output_json(&self, dir: &Path) -> Result<String> {
        let spec = self.command(dir, &BTreeMap::new()).args(["output", "-json"]);
        let out = self.runner.run(&spec).await?;
        if !out.success() {
            return Err(CloudError::OutputNotFound(out.diagnostic().trim().to_string()).into());
        }
        Ok(out.stdout)
    }
}
