//! VsphereCloudConfig CRD
//!
//! Identity and connectivity descriptor for one vCenter endpoint. The status
//! is owned by the VsphereCloudConfig reconciler and records whether the last
//! live login with these credentials and datacenters succeeded.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// VsphereCloudConfig CRD
// =============================================================================

/// VsphereCloudConfig describes how to reach and authenticate against a vCenter.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vdo.vmware.com",
    version = "v1alpha1",
    kind = "VsphereCloudConfig",
    plural = "vspherecloudconfigs",
    shortname = "vcc",
    status = "VsphereCloudConfigStatus",
    printcolumn = r#"{"name": "VC", "type": "string", "jsonPath": ".spec.vcIp"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.config"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VsphereCloudConfigSpec {
    /// vCenter address (IP or FQDN, optionally with port)
    pub vc_ip: String,

    /// Insecure flag written into the CPI and CSI driver configs
    #[serde(default)]
    pub insecure_flag: bool,

    /// Name of a Secret in the same namespace with `username` and `password` keys
    #[serde(default)]
    pub credentials: String,

    /// SHA-1 thumbprint of the vCenter certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbprint: Option<String>,

    /// Datacenters the drivers should operate in
    #[serde(default)]
    pub datacenters: Vec<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Result of the last connection attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConfigStatus {
    #[default]
    Unverified,
    Verified,
    Failed,
}

impl std::fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigStatus::Unverified => write!(f, "unverified"),
            ConfigStatus::Verified => write!(f, "verified"),
            ConfigStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a VsphereCloudConfig
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VsphereCloudConfigStatus {
    /// Verification state
    #[serde(default)]
    pub config: ConfigStatus,

    /// Human readable detail, empty once verified
    #[serde(default)]
    pub message: String,
}

impl VsphereCloudConfig {
    /// Current verification state, `Unverified` when no status was written yet
    pub fn config_status(&self) -> ConfigStatus {
        self.status.as_ref().map(|s| s.config).unwrap_or_default()
    }

    /// Status message, empty when absent
    pub fn status_message(&self) -> &str {
        self.status.as_ref().map(|s| s.message.as_str()).unwrap_or("")
    }
}
