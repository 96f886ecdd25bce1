//! Google Cloud provider for pscflow
//!
//! Drives `terraform` configurations for a Private Service Connect
//! producer/consumer topology and uses `gcloud` for project switching, API
//! enablement and PSC status checks.
//!
//! # Resource folders
//!
//! - `producer`: internal load balancer published through a service attachment
//! - `consumer`: PSC endpoint and consumer network
//! - `create-vm`: consumer VM
//! - `create-sql`: Cloud SQL instance with PSC
//!
//! # Requirements
//!
//! - `terraform` and `gcloud` must be installed
//! - gcloud must be authenticated with access to the target projects
//!
//! # Example
//!
//! ```ignore
//! use pscflow_cloud::TokioCommandRunner;
//! use pscflow_cloud_gcp::{Component, Provisioner, ProvisionerOptions, VmParams};
//! use std::sync::Arc;
//!
//! let provisioner = Provisioner::new(Arc::new(TokioCommandRunner::new()), ProvisionerOptions::default());
//! let report = provisioner.deploy(&VmParams::new("consumer-project").into_request()?).await?;
//! println!("{:?}", report.output.get_str("internal_ip"));
//! ```

pub mod components;
pub mod error;
pub mod folder;
pub mod gcloud;
pub mod provisioner;
pub mod terraform;

pub use components::{
    Component, ConsumerParams, DEFAULT_REGION, ManagedDefaults, ProducerParams, SqlParams,
    VmParams, validate_service_attachment_uri,
};
pub use error::{GcpError, Result};
pub use folder::{FolderKind, FolderProfile};
pub use gcloud::Gcloud;
pub use provisioner::{
    DeployFailure, DeployReport, PSC_ENABLED_MESSAGE, PSC_IN_PROGRESS_MESSAGE,
    PSC_TIMED_OUT_MESSAGE, Provisioner, ProvisionerOptions, SqlDeployReport,
};
pub use terraform::{TFVARS_FILE, Terraform};
