//! Parameter sets for each resource folder
//!
//! Each component validates its parameters and renders them as an
//! [`ApplyRequest`]. Optional parameters are only sent to terraform when set,
//! so the configuration's own variable defaults apply otherwise.

use crate::error::{GcpError, Result};
use crate::folder::FolderKind;
use pscflow_cloud::ApplyRequest;
use serde::{Deserialize, Serialize};

pub const DEFAULT_REGION: &str = "us-central1";

/// A validated parameter set for one resource folder
pub trait Component {
    const FOLDER: FolderKind;

    fn validate(&self) -> Result<()>;

    /// Variables for the apply, assuming the parameters are valid
    fn to_request(&self) -> ApplyRequest;

    fn into_request(self) -> Result<ApplyRequest>
    where
        Self: Sized,
    {
        self.validate()?;
        Ok(self.to_request())
    }
}

fn base_request(kind: FolderKind) -> ApplyRequest {
    ApplyRequest::new(kind.name())
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GcpError::MissingParameter(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerParams {
    pub project_id: String,
    pub region: String,
    pub allowed_consumer_project_ids: Vec<String>,
    pub internal_firewall_source_ranges: Option<Vec<String>>,
    pub psc_ip_range_prefix_length: Option<u32>,
}

impl ProducerParams {
    pub fn new(project_id: impl Into<String>, allowed_consumer_project_ids: Vec<String>) -> Self {
        Self {
            project_id: project_id.into(),
            region: DEFAULT_REGION.to_string(),
            allowed_consumer_project_ids,
            internal_firewall_source_ranges: None,
            psc_ip_range_prefix_length: None,
        }
    }
}

impl Component for ProducerParams {
    const FOLDER: FolderKind = FolderKind::Producer;

    fn validate(&self) -> Result<()> {
        require("project_id", &self.project_id)?;
        if self.allowed_consumer_project_ids.is_empty() {
            return Err(GcpError::MissingParameter(
                "allowed_consumer_project_ids".to_string(),
            ));
        }
        match self.psc_ip_range_prefix_length {
            Some(len) if !(8..=29).contains(&len) => {
                return Err(GcpError::invalid(
                    "psc_ip_range_prefix_length",
                    format!("{} is not a usable subnet prefix length (8-29)", len),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    fn to_request(&self) -> ApplyRequest {
        base_request(Self::FOLDER)
            .var("project_id", self.project_id.as_str())
            .var("region", self.region.as_str())
            .var(
                "allowed_consumer_project_ids",
                self.allowed_consumer_project_ids.clone(),
            )
            .var_opt(
                "internal_firewall_source_ranges",
                self.internal_firewall_source_ranges.clone(),
            )
            .var_opt("psc_ip_range_prefix_length", self.psc_ip_range_prefix_length)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerParams {
    pub project_id: String,
    pub region: String,
    pub service_attachment_uri: String,
    pub consumer_vpc_name: Option<String>,
    pub vm_subnet_name: Option<String>,
    pub psc_subnet_name: Option<String>,
    pub vm_subnet_cidr_range: Option<String>,
    pub psc_subnet_cidr_range: Option<String>,
    pub internal_firewall_source_ranges: Option<Vec<String>>,
    pub postgres_egress_destination_ranges: Option<Vec<String>>,
    pub psc_endpoint_name: Option<String>,
}

/// Values used for the consumer side of a managed producer deploy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedDefaults {
    pub project_id: String,
    pub region: String,
    pub consumer_vpc_name: String,
    pub vm_subnet_name: String,
    pub psc_endpoint_name: String,
}

impl ManagedDefaults {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            region: DEFAULT_REGION.to_string(),
            consumer_vpc_name: "consumer-vpc".to_string(),
            vm_subnet_name: "consumer-subnet".to_string(),
            psc_endpoint_name: "psc-endpoint".to_string(),
        }
    }
}

impl ConsumerParams {
    pub fn new(project_id: impl Into<String>, service_attachment_uri: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            region: DEFAULT_REGION.to_string(),
            service_attachment_uri: service_attachment_uri.into(),
            ..Self::default()
        }
    }

    /// Consumer parameters for a producer whose service attachment already exists
    pub fn managed(service_attachment_uri: impl Into<String>, defaults: &ManagedDefaults) -> Result<Self> {
        let uri = service_attachment_uri.into();
        validate_service_attachment_uri(&uri)?;
        Ok(Self {
            project_id: defaults.project_id.clone(),
            region: defaults.region.clone(),
            service_attachment_uri: uri,
            consumer_vpc_name: Some(defaults.consumer_vpc_name.clone()),
            vm_subnet_name: Some(defaults.vm_subnet_name.clone()),
            psc_endpoint_name: Some(defaults.psc_endpoint_name.clone()),
            ..Self::default()
        })
    }
}

pub fn validate_service_attachment_uri(uri: &str) -> Result<()> {
    if !uri.contains("/serviceAttachments/") {
        return Err(GcpError::InvalidServiceAttachmentUri(uri.to_string()));
    }
    Ok(())
}

impl Component for ConsumerParams {
    const FOLDER: FolderKind = FolderKind::Consumer;

    fn validate(&self) -> Result<()> {
        require("project_id", &self.project_id)?;
        require("service_attachment_uri", &self.service_attachment_uri)
    }

    fn to_request(&self) -> ApplyRequest {
        base_request(Self::FOLDER)
            .var("project_id", self.project_id.as_str())
            .var("region", self.region.as_str())
            .var("service_attachment_uri", self.service_attachment_uri.as_str())
            .var_opt("consumer_vpc_name", self.consumer_vpc_name.clone())
            .var_opt("vm_subnet_name", self.vm_subnet_name.clone())
            .var_opt("psc_subnet_name", self.psc_subnet_name.clone())
            .var_opt("vm_subnet_cidr_range", self.vm_subnet_cidr_range.clone())
            .var_opt("psc_subnet_cidr_range", self.psc_subnet_cidr_range.clone())
            .var_opt(
                "internal_firewall_source_ranges",
                self.internal_firewall_source_ranges.clone(),
            )
            .var_opt(
                "postgres_egress_destination_ranges",
                self.postgres_egress_destination_ranges.clone(),
            )
            .var_opt("psc_endpoint_name", self.psc_endpoint_name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmParams {
    pub project_id: String,
    pub region: String,
    pub consumer_vpc_name: Option<String>,
    pub vm_subnet_name: Option<String>,
    pub instance_name: String,
    pub machine_type: String,
    pub os_image: String,
}

impl VmParams {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            region: DEFAULT_REGION.to_string(),
            consumer_vpc_name: None,
            vm_subnet_name: None,
            instance_name: "consumer-vm".to_string(),
            machine_type: "e2-micro".to_string(),
            os_image: "debian-cloud/debian-12".to_string(),
        }
    }
}

impl Component for VmParams {
    const FOLDER: FolderKind = FolderKind::CreateVm;

    fn validate(&self) -> Result<()> {
        require("project_id", &self.project_id)?;
        require("instance_name", &self.instance_name)?;
        require("machine_type", &self.machine_type)?;
        require("os_image", &self.os_image)
    }

    fn to_request(&self) -> ApplyRequest {
        base_request(Self::FOLDER)
            .var("project_id", self.project_id.as_str())
            .var("region", self.region.as_str())
            .var("instance_name", self.instance_name.as_str())
            .var("machine_type", self.machine_type.as_str())
            .var("os_image", self.os_image.as_str())
            .var_opt("consumer_vpc_name", self.consumer_vpc_name.clone())
            .var_opt("vm_subnet_name", self.vm_subnet_name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlParams {
    pub producer_project_id: String,
    pub region: String,
    pub instance_id: String,
    pub default_password: String,
    pub allowed_consumer_project_id: Option<String>,
    pub tier: String,
    pub database_version: String,
    pub deletion_protection: bool,
    pub backup_enabled: bool,
    /// `HH:MM`, 24-hour clock
    pub backup_start_time: String,
    /// 1 (Sunday) to 7 (Saturday)
    pub maintenance_day: u32,
    pub maintenance_hour: u32,
    pub maintenance_update_track: String,
}

impl SqlParams {
    pub fn new(producer_project_id: impl Into<String>) -> Self {
        Self {
            producer_project_id: producer_project_id.into(),
            region: DEFAULT_REGION.to_string(),
            instance_id: "producer-sql".to_string(),
            default_password: "postgres".to_string(),
            allowed_consumer_project_id: None,
            tier: "db-f1-micro".to_string(),
            database_version: "POSTGRES_17".to_string(),
            deletion_protection: false,
            backup_enabled: true,
            backup_start_time: "02:00".to_string(),
            maintenance_day: 7,
            maintenance_hour: 2,
            maintenance_update_track: "stable".to_string(),
        }
    }
}

fn is_hh_mm(value: &str) -> bool {
    let Some((h, m)) = value.split_once(':') else {
        return false;
    };
    h.len() == 2
        && m.len() == 2
        && h.parse::<u32>().is_ok_and(|h| h < 24)
        && m.parse::<u32>().is_ok_and(|m| m < 60)
}

impl Component for SqlParams {
    const FOLDER: FolderKind = FolderKind::CreateSql;

    fn validate(&self) -> Result<()> {
        require("producer_project_id", &self.producer_project_id)?;
        require("instance_id", &self.instance_id)?;
        if !(1..=7).contains(&self.maintenance_day) {
            return Err(GcpError::invalid(
                "maintenance_day",
                "must be a number between 1 and 7 (1=Sunday, 7=Saturday)",
            ));
        }
        if self.maintenance_hour > 23 {
            return Err(GcpError::invalid(
                "maintenance_hour",
                "must be a number between 0 and 23",
            ));
        }
        if !is_hh_mm(&self.backup_start_time) {
            return Err(GcpError::invalid(
                "backup_start_time",
                "must be a time in HH:MM 24-hour format (e.g. 02:00)",
            ));
        }
        Ok(())
    }

    fn to_request(&self) -> ApplyRequest {
        base_request(Self::FOLDER)
            .var("producer_project_id", self.producer_project_id.as_str())
            .var("region", self.region.as_str())
            .var("instance_id", self.instance_id.as_str())
            .var("default_password", self.default_password.as_str())
            .var_opt(
                "allowed_consumer_project_id",
                self.allowed_consumer_project_id.clone(),
            )
            .var("tier", self.tier.as_str())
            .var("database_version", self.database_version.as_str())
            .var("deletion_protection", self.deletion_protection)
            .var("backup_enabled", self.backup_enabled)
            .var("backup_start_time", self.backup_start_time.as_str())
            .var("maintenance_day", self.maintenance_day)
            .var("maintenance_hour", self.maintenance_hour)
            .var("maintenance_update_track", self.maintenance_update_track.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pscflow_cloud::VarValue;

    #[test]
    fn test_producer_requires_consumers() {
        let err = ProducerParams::new("p-1", Vec::new())
            .into_request()
            .unwrap_err();
        assert!(matches!(err, GcpError::MissingParameter(ref p) if p == "allowed_consumer_project_ids"));
    }

    #[test]
    fn test_producer_optional_vars_omitted() {
        let request = ProducerParams::new("p-1", vec!["c-1".to_string()])
            .into_request()
            .unwrap();
        assert_eq!(request.resource_folder(), "producer");
        assert!(!request.are_capabilities_enabled());
        assert!(!request.variables().contains_key("psc_ip_range_prefix_length"));
        assert!(!request.variables().contains_key("internal_firewall_source_ranges"));
    }

    #[test]
    fn test_consumer_managed_validates_uri() {
        let defaults = ManagedDefaults::new("c-1");
        assert!(matches!(
            ConsumerParams::managed("projects/p/regions/r/forwardingRules/x", &defaults),
            Err(GcpError::InvalidServiceAttachmentUri(_))
        ));

        let params = ConsumerParams::managed(
            "projects/p/regions/us-central1/serviceAttachments/sa",
            &defaults,
        )
        .unwrap();
        let request = params.into_request().unwrap();
        assert_eq!(request.string_var("consumer_vpc_name"), Some("consumer-vpc"));
        assert_eq!(request.string_var("psc_endpoint_name"), Some("psc-endpoint"));
        assert_eq!(request.project_id(), Some("c-1"));
    }

    #[test]
    fn test_vm_defaults() {
        let request = VmParams::new("c-1").into_request().unwrap();
        assert_eq!(request.resource_folder(), "create-vm");
        assert_eq!(request.string_var("instance_name"), Some("consumer-vm"));
        assert_eq!(request.string_var("machine_type"), Some("e2-micro"));
        assert_eq!(request.string_var("os_image"), Some("debian-cloud/debian-12"));
        assert!(!request.variables().contains_key("consumer_vpc_name"));
    }

    #[test]
    fn test_sql_defaults() {
        let request = SqlParams::new("prod-1").into_request().unwrap();
        assert_eq!(request.project_id(), Some("prod-1"));
        assert_eq!(request.string_var("database_version"), Some("POSTGRES_17"));
        assert_eq!(
            request.variables().get("maintenance_day"),
            Some(&VarValue::Int(7))
        );
        assert_eq!(
            request.variables().get("deletion_protection"),
            Some(&VarValue::Bool(false))
        );
    }

    #[test]
    fn test_sql_validation() {
        let mut params = SqlParams::new("prod-1");
        params.maintenance_day = 0;
        assert!(params.validate().is_err());

        let mut params = SqlParams::new("prod-1");
        params.maintenance_hour = 24;
        assert!(params.validate().is_err());

        let mut params = SqlParams::new("prod-1");
        params.backup_start_time = "2am".to_string();
        assert!(params.validate().is_err());

        let mut params = SqlParams::new("prod-1");
        params.backup_start_time = "23:59".to_string();
        params.maintenance_hour = 0;
        params.maintenance_day = 1;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_blank_project_rejected() {
        assert!(matches!(
            VmParams::new("  ").into_request(),
            Err(GcpError::MissingParameter(_))
        ));
    }
}
