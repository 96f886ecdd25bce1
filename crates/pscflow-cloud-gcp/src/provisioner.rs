//! Provisioning entry points
//!
//! A [`Provisioner`] deploys one resource folder per call:
//! switch project, write variables, run the two-phase apply, read outputs.

use crate::components::{Component, ConsumerParams, ManagedDefaults, SqlParams};
use crate::error::{GcpError, Result};
use crate::folder::{FolderKind, FolderProfile};
use crate::gcloud::Gcloud;
use crate::terraform::Terraform;
use pscflow_cloud::output;
use pscflow_cloud::{
    ApplyAttempt, ApplyPlan, ApplyRequest, CloudError, CommandRunner, CompletionPoller,
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_PROPAGATION_WAIT, DeployStatus, ErrorCategory, OutputRecord,
    PhaseMachine, PhaseSequencer,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const PSC_ENABLED_MESSAGE: &str = "SQL infrastructure deployed successfully with PSC enabled";
pub const PSC_TIMED_OUT_MESSAGE: &str =
    "SQL infrastructure deployed successfully, but PSC enablement timed out";
pub const PSC_IN_PROGRESS_MESSAGE: &str =
    "SQL infrastructure deployed successfully (PSC in progress)";

#[derive(Debug, Clone)]
pub struct ProvisionerOptions {
    /// Directory holding one sub-folder per resource folder
    pub terraform_root: PathBuf,
    pub terraform_bin: String,
    pub gcloud_bin: String,
    /// Hard deadline for each terraform command
    pub command_timeout: Duration,
    pub propagation_wait: Duration,
    pub poll_interval: Duration,
    pub poll_max_wait: Duration,
}

impl Default for ProvisionerOptions {
    fn default() -> Self {
        Self {
            terraform_root: PathBuf::from("terraform"),
            terraform_bin: "terraform".to_string(),
            gcloud_bin: "gcloud".to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            propagation_wait: DEFAULT_PROPAGATION_WAIT,
            poll_interval: pscflow_cloud::poll::DEFAULT_CHECK_INTERVAL,
            poll_max_wait: pscflow_cloud::poll::DEFAULT_MAX_WAIT,
        }
    }
}

/// Result of a successful deploy
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub folder: FolderKind,
    pub project_id: String,
    pub output: OutputRecord,

    /// Set when the provider accepted the work but had not finished it
    pub caveat: Option<ErrorCategory>,

    pub attempts: Vec<ApplyAttempt>,
}

impl DeployReport {
    pub fn status(&self) -> DeployStatus {
        match self.caveat {
            Some(_) => DeployStatus::Accepted,
            None => DeployStatus::Succeeded,
        }
    }
}

/// A failed deploy, with the apply attempts made before it failed
#[derive(Error, Debug)]
#[error("{error}")]
pub struct DeployFailure {
    pub error: GcpError,
    pub attempts: Vec<ApplyAttempt>,
}

impl DeployFailure {
    pub fn category(&self) -> Option<ErrorCategory> {
        self.error.category()
    }
}

impl From<GcpError> for DeployFailure {
    fn from(error: GcpError) -> Self {
        Self {
            error,
            attempts: Vec::new(),
        }
    }
}

/// Result of the SQL deploy followed by PSC convergence polling
#[derive(Debug, Clone, Serialize)]
pub struct SqlDeployReport {
    pub message: String,
    pub psc_enabled: bool,
    pub report: DeployReport,
}

pub struct Provisioner {
    runner: Arc<dyn CommandRunner>,
    terraform: Terraform,
    gcloud: Gcloud,
    options: ProvisionerOptions,
    profiles: BTreeMap<FolderKind, FolderProfile>,
}

impl Provisioner {
    pub fn new(runner: Arc<dyn CommandRunner>, options: ProvisionerOptions) -> Self {
        let terraform = Terraform::new(runner.clone())
            .with_binary(&options.terraform_bin)
            .with_timeout(options.command_timeout);
        let gcloud = Gcloud::new(runner.clone()).with_binary(&options.gcloud_bin);
        let profiles = FolderKind::ALL
            .into_iter()
            .map(|kind| (kind, FolderProfile::for_kind(kind)))
            .collect();

        Self {
            runner,
            terraform,
            gcloud,
            options,
            profiles,
        }
    }

    /// Replace the built-in profile of `profile.kind`
    pub fn with_profile(mut self, profile: FolderProfile) -> Self {
        self.profiles.insert(profile.kind, profile);
        self
    }

    pub fn profile(&self, kind: FolderKind) -> FolderProfile {
        self.profiles
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| FolderProfile::for_kind(kind))
    }

    pub fn options(&self) -> &ProvisionerOptions {
        &self.options
    }

    pub fn gcloud(&self) -> &Gcloud {
        &self.gcloud
    }

    pub fn folder_dir(&self, kind: FolderKind) -> PathBuf {
        self.options.terraform_root.join(kind.name())
    }

    /// Apply one resource folder and return its outputs
    pub async fn deploy(&self, request: &ApplyRequest) -> std::result::Result<DeployReport, DeployFailure> {
        let kind: FolderKind = request.resource_folder().parse()?;
        let profile = self.profile(kind);
        let dir = self.folder_dir(kind);
        if !dir.is_dir() {
            return Err(GcpError::FolderMissing(dir).into());
        }
        let project_id = request
            .project_id()
            .ok_or_else(|| GcpError::MissingParameter("project_id".to_string()))?
            .to_string();

        tracing::info!("Deploying {} to project {}", kind, project_id);

        self.gcloud.set_project(&project_id).await?;
        self.terraform.write_tfvars(&dir, request).await?;

        let skip_capabilities = request.are_capabilities_enabled()
            || profile.capabilities_already_enabled
            || profile.capability_targets.is_empty();
        if skip_capabilities {
            tracing::info!("Creating infrastructure (APIs already enabled)");
        }

        let env = Terraform::env_for(request);
        let plan = ApplyPlan {
            capabilities: if skip_capabilities {
                Vec::new()
            } else {
                self.terraform
                    .init_and_apply(&dir, &env, &profile.capability_targets)
            },
            resources: self.terraform.init_and_apply(&dir, &env, &[]),
            activation: self.gcloud.enable_services_command(&project_id, &profile.apis),
            long_running: profile.long_running,
        };

        let machine = PhaseMachine::new(
            skip_capabilities,
            profile.retry,
            self.options.propagation_wait,
        );
        let outcome = PhaseSequencer::new(self.runner.clone(), machine)
            .run(&plan)
            .await
            .map_err(|failure| DeployFailure {
                error: failure.error.into(),
                attempts: failure.history.into_vec(),
            })?;

        let known = known_inputs(request, &profile);
        let output = match self.terraform.output_json(&dir).await {
            Ok(raw) => output::parse(&raw, &profile.schema, &known),
            Err(e) => {
                tracing::warn!("Could not read terraform outputs: {}", e);
                output::fallback(&known)
            }
        };

        tracing::info!("{} deployed", kind);
        Ok(DeployReport {
            folder: kind,
            project_id,
            output,
            caveat: outcome.caveat,
            attempts: outcome.history.into_vec(),
        })
    }

    /// Outputs of the last successful apply of `folder`
    pub async fn get_last_output(&self, folder: &str) -> Result<OutputRecord> {
        let kind: FolderKind = folder.parse()?;
        let dir = self.folder_dir(kind);
        if !dir.is_dir() {
            return Err(CloudError::OutputNotFound(format!("{} has not been deployed", folder)).into());
        }

        let raw = self.terraform.output_json(&dir).await?;
        if !output::raw_outputs(&raw).is_some_and(|map| !map.is_empty()) {
            return Err(CloudError::OutputNotFound(format!("{} has no recorded outputs", folder)).into());
        }

        let known = match self.terraform.read_tfvars(&dir).await {
            Some(vars) => known_inputs(&ApplyRequest::new(folder).vars(vars), &self.profile(kind)),
            None => BTreeMap::new(),
        };
        Ok(output::parse(&raw, &self.profile(kind).schema, &known))
    }

    /// Poll until PSC is enabled on the SQL instance `identifier` or `max_wait` elapses
    pub async fn await_async_completion(
        &self,
        identifier: &str,
        project_id: &str,
        max_wait: Duration,
    ) -> bool {
        tracing::info!(
            "Waiting up to {}m for PSC on {} to be enabled",
            max_wait.as_secs() / 60,
            identifier
        );
        let gcloud = &self.gcloud;
        CompletionPoller::new(self.options.poll_interval, max_wait)
            .poll_until(move || gcloud.sql_psc_enabled(identifier, project_id))
            .await
    }

    /// Deploy the consumer side for a producer published elsewhere
    pub async fn deploy_managed(
        &self,
        service_attachment_uri: &str,
        defaults: &ManagedDefaults,
    ) -> std::result::Result<DeployReport, DeployFailure> {
        let request = ConsumerParams::managed(service_attachment_uri, defaults)?.into_request()?;
        self.deploy(&request).await
    }

    /// Deploy Cloud SQL, then wait for PSC to come up on the instance
    pub async fn deploy_sql_with_psc(
        &self,
        params: SqlParams,
        capabilities_enabled: bool,
    ) -> std::result::Result<SqlDeployReport, DeployFailure> {
        let project_id = params.producer_project_id.clone();
        let instance_id = params.instance_id.clone();
        let request = params
            .into_request()?
            .capabilities_already_enabled(capabilities_enabled);
        let report = self.deploy(&request).await?;

        if report.caveat.is_some() {
            return Ok(SqlDeployReport {
                message: PSC_IN_PROGRESS_MESSAGE.to_string(),
                psc_enabled: false,
                report,
            });
        }

        let instance = report
            .output
            .non_empty("instance_name")
            .unwrap_or(&instance_id)
            .to_string();
        let psc_enabled = self
            .await_async_completion(&instance, &project_id, self.options.poll_max_wait)
            .await;

        Ok(SqlDeployReport {
            message: if psc_enabled {
                PSC_ENABLED_MESSAGE
            } else {
                PSC_TIMED_OUT_MESSAGE
            }
            .to_string(),
            psc_enabled,
            report,
        })
    }
}

/// Caller-known inputs that feed output defaults
fn known_inputs(request: &ApplyRequest, profile: &FolderProfile) -> BTreeMap<String, String> {
    let mut known = BTreeMap::new();
    if let Some(project) = request.project_id() {
        known.insert("project_id".to_string(), project.to_string());
    }
    if let Some(region) = request.region() {
        known.insert("region".to_string(), region.to_string());
    }
    for key in &profile.echo_inputs {
        if let Some(value) = request.string_var(key) {
            known.insert(key.clone(), value.to_string());
        }
    }
    known
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{ProducerParams, VmParams};
    use pscflow_cloud::Phase;
    use pscflow_cloud::testing::{Reply, ScriptedRunner};
    use tempfile::{TempDir, tempdir};

    const SA_URI: &str = "projects/p-1/regions/us-central1/serviceAttachments/producer-sa";

    fn workspace() -> TempDir {
        let root = tempdir().unwrap();
        for kind in FolderKind::ALL {
            std::fs::create_dir_all(root.path().join(kind.name())).unwrap();
        }
        root
    }

    fn provisioner(root: &TempDir, runner: Arc<ScriptedRunner>) -> Provisioner {
        Provisioner::new(
            runner,
            ProvisionerOptions {
                terraform_root: root.path().to_path_buf(),
                poll_max_wait: Duration::from_secs(120),
                ..ProvisionerOptions::default()
            },
        )
    }

    fn producer_request() -> ApplyRequest {
        ProducerParams::new("p-1", vec!["c-1".to_string()])
            .into_request()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_producer_deploy_runs_both_phases() {
        let root = workspace();
        let runner = Arc::new(ScriptedRunner::new().on(
            "output -json",
            vec![Reply::stdout(format!(
                r#"{{"service_attachment_uri": {{"value": "{}"}}}}"#,
                SA_URI
            ))],
        ));
        let report = provisioner(&root, runner.clone())
            .deploy(&producer_request())
            .await
            .unwrap();

        let lines: Vec<String> = runner.calls().iter().map(|c| c.display()).collect();
        assert_eq!(lines[0], "gcloud config set project p-1");
        assert_eq!(lines[1], "terraform init -input=false");
        assert!(lines[2].ends_with("-target=google_project_service.apis"));
        assert_eq!(lines[4], "terraform apply -auto-approve -input=false");
        assert_eq!(lines[5], "terraform output -json");

        assert_eq!(report.status(), DeployStatus::Succeeded);
        assert_eq!(report.output.get_str("service_attachment_uri"), Some(SA_URI));
        assert_eq!(report.output.get_str("project_id"), Some("p-1"));
        assert_eq!(report.output.get_str("region"), Some("us-central1"));
        assert!(root.path().join("producer/terraform.tfvars.json").exists());
    }

    #[tokio::test]
    async fn test_capability_phase_skipped_by_profile_or_request() {
        let root = workspace();
        let runner = Arc::new(ScriptedRunner::new());
        let p = provisioner(&root, runner.clone()).with_profile(FolderProfile {
            capabilities_already_enabled: true,
            ..FolderProfile::for_kind(FolderKind::Producer)
        });
        p.deploy(&producer_request()).await.unwrap();
        assert_eq!(runner.count("-target="), 0);

        let runner = Arc::new(ScriptedRunner::new());
        provisioner(&root, runner.clone())
            .deploy(&producer_request().capabilities_already_enabled(true))
            .await
            .unwrap();
        assert_eq!(runner.count("-target="), 0);
        assert_eq!(runner.count("apply -auto-approve"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_phase2_failure_keeps_attempts() {
        let root = workspace();
        let runner = Arc::new(ScriptedRunner::new().on(
            "apply -auto-approve",
            vec![Reply::ok(), Reply::fail("Error: Invalid CIDR range 10.0.0.0/33")],
        ));
        let failure = provisioner(&root, runner.clone())
            .deploy(&producer_request())
            .await
            .unwrap_err();

        assert_eq!(failure.category(), Some(ErrorCategory::Unclassified));
        assert!(failure.to_string().contains("Invalid CIDR range"));
        assert_eq!(failure.attempts.len(), 2);
        assert_eq!(failure.attempts[1].phase, Phase::Resources);
        assert_eq!(runner.count("output -json"), 0);
    }

    #[tokio::test]
    async fn test_context_switch_failure_stops_before_terraform() {
        let root = workspace();
        let runner = Arc::new(
            ScriptedRunner::new().on("config set project", vec![Reply::fail("not found")]),
        );
        let failure = provisioner(&root, runner.clone())
            .deploy(&producer_request())
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            GcpError::CloudError(CloudError::ContextSwitchFailed { .. })
        ));
        assert_eq!(runner.count("terraform"), 0);
    }

    #[tokio::test]
    async fn test_missing_and_unknown_folders() {
        let root = tempdir().unwrap();
        let p = provisioner(&root, Arc::new(ScriptedRunner::new()));

        let failure = p.deploy(&producer_request()).await.unwrap_err();
        assert!(matches!(failure.error, GcpError::FolderMissing(_)));

        let failure = p.deploy(&ApplyRequest::new("staging")).await.unwrap_err();
        assert!(matches!(failure.error, GcpError::UnknownFolder(_)));
    }

    #[tokio::test]
    async fn test_unreadable_output_falls_back() {
        let root = workspace();
        let runner = Arc::new(
            ScriptedRunner::new().on("output -json", vec![Reply::stdout("Warning: no outputs")]),
        );
        let report = provisioner(&root, runner)
            .deploy(&VmParams::new("c-1").into_request().unwrap())
            .await
            .unwrap();

        assert!(report.output.fallback);
        assert_eq!(report.output.get_str("project_id"), Some("c-1"));
        assert_eq!(report.output.get_str("instance_name"), Some("consumer-vm"));
    }

    #[tokio::test]
    async fn test_vm_schema_defaults() {
        let root = workspace();
        let runner = Arc::new(ScriptedRunner::new().on(
            "output -json",
            vec![Reply::stdout(r#"{"internal_ip": {"value": "10.0.1.2"}}"#)],
        ));
        let report = provisioner(&root, runner.clone())
            .deploy(&VmParams::new("c-1").into_request().unwrap())
            .await
            .unwrap();

        assert_eq!(report.output.get_str("internal_ip"), Some("10.0.1.2"));
        assert_eq!(report.output.get_str("zone"), Some("us-central1-a"));
        assert_eq!(report.output.get_str("subnet_name"), Some("vm-subnet"));
        assert_eq!(report.output.get_str("machine_type"), Some("e2-micro"));
        assert_eq!(runner.count("-target="), 0);
    }

    #[tokio::test]
    async fn test_get_last_output() {
        let root = workspace();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(
                    "output -json",
                    vec![
                        Reply::stdout("{}"),
                        Reply::stdout(r#"{"private_ip_address": {"value": "10.1.0.5"}}"#),
                    ],
                ),
        );
        let p = provisioner(&root, runner);
        std::fs::write(
            root.path().join("create-sql/terraform.tfvars.json"),
            r#"{"producer_project_id": "prod-1", "region": "europe-west1", "instance_id": "orders-db"}"#,
        )
        .unwrap();

        let err = tokio_test::assert_err!(p.get_last_output("create-sql").await);
        assert!(matches!(
            err,
            GcpError::CloudError(CloudError::OutputNotFound(_))
        ));

        let record = tokio_test::assert_ok!(p.get_last_output("create-sql").await);
        assert_eq!(record.get_str("private_ip_address"), Some("10.1.0.5"));
        assert_eq!(record.get_str("instance_name"), Some("orders-db"));
        assert_eq!(record.get_str("project_id"), Some("prod-1"));
        assert_eq!(record.get_str("database_name"), Some("postgres"));
    }

    #[tokio::test]
    async fn test_get_last_output_not_deployed() {
        let root = tempdir().unwrap();
        let p = provisioner(&root, Arc::new(ScriptedRunner::new()));
        assert!(matches!(
            p.get_last_output("consumer").await,
            Err(GcpError::CloudError(CloudError::OutputNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_managed_rejects_bad_uri_without_running_anything() {
        let root = workspace();
        let runner = Arc::new(ScriptedRunner::new());
        let failure = provisioner(&root, runner.clone())
            .deploy_managed("projects/p/global/networks/default", &ManagedDefaults::new("c-1"))
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            GcpError::InvalidServiceAttachmentUri(_)
        ));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_managed_deploys_consumer() {
        let root = workspace();
        let runner = Arc::new(ScriptedRunner::new().on("output -json", vec![Reply::stdout("{}")]));
        let report = provisioner(&root, runner)
            .deploy_managed(SA_URI, &ManagedDefaults::new("c-1"))
            .await
            .unwrap();

        assert_eq!(report.folder, FolderKind::Consumer);
        assert_eq!(report.output.get_str("service_attachment_uri"), Some(SA_URI));
        assert_eq!(report.output.get_str("vpc_name"), Some("consumer-vpc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sql_with_psc_enabled() {
        let root = workspace();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(
                    "output -json",
                    vec![Reply::stdout(r#"{"instance_name": {"value": "producer-sql"}}"#)],
                )
                .on(
                    "sql instances describe producer-sql",
                    vec![Reply::stdout(""), Reply::stdout("True")],
                ),
        );
        let report = provisioner(&root, runner.clone())
            .deploy_sql_with_psc(SqlParams::new("prod-1"), false)
            .await
            .unwrap();

        assert!(report.psc_enabled);
        assert_eq!(report.message, PSC_ENABLED_MESSAGE);
        assert_eq!(runner.count("sql instances describe"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sql_with_psc_timeout_is_not_an_error() {
        let root = workspace();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("sql instances describe", vec![Reply::stdout("False")]),
        );
        let report = provisioner(&root, runner.clone())
            .deploy_sql_with_psc(SqlParams::new("prod-1"), false)
            .await
            .unwrap();

        assert!(!report.psc_enabled);
        assert_eq!(report.message, PSC_TIMED_OUT_MESSAGE);
        // 30s interval over a 2 minute ceiling
        assert_eq!(runner.count("sql instances describe"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sql_accepted_in_background_skips_polling() {
        let root = workspace();
        let runner = Arc::new(ScriptedRunner::new().on(
            "apply -auto-approve",
            vec![Reply::fail(
                "Error waiting for Update Instance: operation is running in the background",
            )],
        ));
        let report = provisioner(&root, runner.clone())
            .deploy_sql_with_psc(SqlParams::new("prod-1"), false)
            .await
            .unwrap();

        assert_eq!(report.report.status(), DeployStatus::Accepted);
        assert_eq!(report.message, PSC_IN_PROGRESS_MESSAGE);
        assert_eq!(runner.count("sql instances describe"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sql_with_psc_honors_capabilities_enabled() {
        let root = workspace();
        let runner = Arc::new(
            ScriptedRunner::new().on("sql instances describe", vec![Reply::stdout("True")]),
        );
        let sql = provisioner(&root, runner.clone()).with_profile(FolderProfile {
            capabilities_already_enabled: false,
            capability_targets: vec!["google_project_service.apis".to_string()],
            ..FolderProfile::for_kind(FolderKind::CreateSql)
        });

        let report = sql
            .deploy_sql_with_psc(SqlParams::new("prod-1"), true)
            .await
            .unwrap();
        assert!(report.psc_enabled);
        assert_eq!(runner.count("-target="), 0);
        assert_eq!(runner.count("terraform apply"), 1);

        // Without the flag the capability phase runs first
        sql.deploy_sql_with_psc(SqlParams::new("prod-1"), false)
            .await
            .unwrap();
        assert_eq!(runner.count("-target="), 1);
    }
}
