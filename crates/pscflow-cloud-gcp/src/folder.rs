//! Resource folder profiles
//!
//! Each terraform configuration folder has a fixed profile: whether its APIs
//! are expected to be enabled already, whether it provisions long-running
//! resources, its retry policy and the outputs it is expected to produce.

use crate::error::GcpError;
use pscflow_cloud::{OutputDefault, OutputSchema, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Known resource folders
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FolderKind {
    /// PSC service producer (internal load balancer + service attachment)
    Producer,
    /// PSC consumer endpoint and network
    Consumer,
    /// Consumer VM in the consumer network
    CreateVm,
    /// Cloud SQL instance published over PSC
    CreateSql,
}

impl FolderKind {
    pub const ALL: [FolderKind; 4] = [
        FolderKind::Producer,
        FolderKind::Consumer,
        FolderKind::CreateVm,
        FolderKind::CreateSql,
    ];

    /// Folder name under the terraform root
    pub fn name(&self) -> &'static str {
        match self {
            FolderKind::Producer => "producer",
            FolderKind::Consumer => "consumer",
            FolderKind::CreateVm => "create-vm",
            FolderKind::CreateSql => "create-sql",
        }
    }
}

impl std::fmt::Display for FolderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FolderKind {
    type Err = GcpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FolderKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| GcpError::UnknownFolder(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderProfile {
    pub kind: FolderKind,

    /// Phase 1 is skipped by default
    pub capabilities_already_enabled: bool,

    /// Contains resources whose creation routinely outlives the apply
    pub long_running: bool,

    pub retry: RetryPolicy,

    /// APIs enabled out-of-band before the first retry
    pub apis: Vec<String>,

    /// Resource addresses applied in phase 1
    pub capability_targets: Vec<String>,

    /// Request variables echoed into the output defaults and fallback record
    pub echo_inputs: Vec<String>,

    pub schema: OutputSchema,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn project_and_region() -> OutputSchema {
    OutputSchema::new()
        .field("project_id", OutputDefault::Input("project_id".to_string()))
        .field("region", OutputDefault::Input("region".to_string()))
}

impl FolderProfile {
    pub fn for_kind(kind: FolderKind) -> Self {
        match kind {
            FolderKind::Producer => Self {
                kind,
                capabilities_already_enabled: false,
                long_running: false,
                retry: RetryPolicy::new(3, 60),
                apis: strings(&["compute.googleapis.com", "servicenetworking.googleapis.com"]),
                capability_targets: strings(&["google_project_service.apis"]),
                echo_inputs: Vec::new(),
                schema: project_and_region()
                    .text("vpc_name")
                    .text("subnet_name")
                    .text("psc_subnet_name")
                    .text("instance_name")
                    .field("port", OutputDefault::Literal(serde_json::json!(0)))
                    .text("instance_group_name")
                    .text("backend_service_name")
                    .text("health_check_name")
                    .text("forwarding_rule_name")
                    .text("service_attachment_name")
                    .text("service_attachment_uri")
                    .field(
                        "allowed_consumer_project_ids",
                        OutputDefault::Literal(serde_json::json!([])),
                    )
                    .text("psc_ip_range")
                    .text("psc_ip_range_name")
                    .text("vpc_self_link")
                    .text("subnet_self_link"),
            },
            FolderKind::Consumer => Self {
                kind,
                capabilities_already_enabled: false,
                long_running: false,
                retry: RetryPolicy::new(3, 60),
                apis: strings(&["compute.googleapis.com", "dns.googleapis.com"]),
                capability_targets: strings(&["google_project_service.apis"]),
                echo_inputs: strings(&["service_attachment_uri"]),
                schema: project_and_region()
                    .field("vpc_name", OutputDefault::text("consumer-vpc"))
                    .text("vm_subnet_name")
                    .text("psc_subnet_name")
                    .text("vm_instance_name")
                    .text("vm_internal_ip")
                    .field(
                        "service_attachment_uri",
                        OutputDefault::Input("service_attachment_uri".to_string()),
                    )
                    .text("vpc_self_link")
                    .text("vm_subnet_self_link")
                    .text("psc_subnet_self_link"),
            },
            FolderKind::CreateVm => Self {
                kind,
                capabilities_already_enabled: true,
                long_running: false,
                retry: RetryPolicy::no_retry(),
                apis: strings(&["compute.googleapis.com"]),
                capability_targets: Vec::new(),
                echo_inputs: strings(&["instance_name", "machine_type", "os_image"]),
                schema: project_and_region()
                    .field(
                        "zone",
                        OutputDefault::InputWithSuffix("region".to_string(), "-a".to_string()),
                    )
                    .field("instance_name", OutputDefault::Input("instance_name".to_string()))
                    .text("instance_id")
                    .text("internal_ip")
                    .field("machine_type", OutputDefault::Input("machine_type".to_string()))
                    .field("os_image", OutputDefault::Input("os_image".to_string()))
                    .field("vpc_name", OutputDefault::text("consumer-vpc"))
                    .field("subnet_name", OutputDefault::text("vm-subnet")),
            },
            FolderKind::CreateSql => Self {
                kind,
                capabilities_already_enabled: true,
                long_running: true,
                retry: RetryPolicy::new(3, 60),
                apis: strings(&["sqladmin.googleapis.com", "compute.googleapis.com"]),
                capability_targets: Vec::new(),
                echo_inputs: strings(&["instance_id", "allowed_consumer_project_id"]),
                schema: project_and_region()
                    .field("instance_name", OutputDefault::Input("instance_id".to_string()))
                    .text("instance_connection_name")
                    .text("private_ip_address")
                    .field("database_name", OutputDefault::text("postgres"))
                    .field("user_name", OutputDefault::text("postgres"))
                    .field(
                        "allowed_consumer_project_id",
                        OutputDefault::Input("allowed_consumer_project_id".to_string()),
                    )
                    .text("service_attachment_uri"),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_names_round_trip() {
        for kind in FolderKind::ALL {
            assert_eq!(kind.name().parse::<FolderKind>().unwrap(), kind);
        }
        assert!(matches!(
            "staging".parse::<FolderKind>(),
            Err(GcpError::UnknownFolder(_))
        ));
    }

    #[test]
    fn test_profiles_match_folder_behaviour() {
        let vm = FolderProfile::for_kind(FolderKind::CreateVm);
        assert!(vm.capabilities_already_enabled);
        assert_eq!(vm.retry.max_attempts, 1);

        let sql = FolderProfile::for_kind(FolderKind::CreateSql);
        assert!(sql.capabilities_already_enabled);
        assert!(sql.long_running);
        assert_eq!(sql.retry, RetryPolicy::new(3, 60));

        for kind in [FolderKind::Producer, FolderKind::Consumer] {
            let profile = FolderProfile::for_kind(kind);
            assert!(!profile.capabilities_already_enabled);
            assert!(!profile.long_running);
            assert!(!profile.capability_targets.is_empty());
        }
    }

    #[test]
    fn test_sql_schema_never_echoes_password() {
        let sql = FolderProfile::for_kind(FolderKind::CreateSql);
        assert!(!sql.echo_inputs.iter().any(|k| k.contains("password")));
    }
}
