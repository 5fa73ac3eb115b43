//! VDOConfig CRD
//!
//! Desired state for the vSphere cloud provider (CPI) and storage (CSI)
//! drivers on this cluster. Each driver has its own phase track in status so
//! a failure in one pipeline never hides progress in the other.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// VDOConfig CRD
// =============================================================================

/// VDOConfig selects which VsphereCloudConfigs each driver uses and how the
/// drivers are configured.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vdo.vmware.com",
    version = "v1alpha1",
    kind = "VDOConfig",
    plural = "vdoconfigs",
    shortname = "vdo",
    status = "VDOConfigStatus",
    printcolumn = r#"{"name": "CPI", "type": "string", "jsonPath": ".status.cpi.phase"}"#,
    printcolumn = r#"{"name": "CSI", "type": "string", "jsonPath": ".status.csi.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VDOConfigSpec {
    /// Cloud provider (CPI) configuration
    #[serde(default)]
    pub cloud_provider: CloudProviderConfig,

    /// Storage provider (CSI) configuration
    #[serde(default)]
    pub storage_provider: StorageProviderConfig,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// CPI configuration, may span several vCenters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudProviderConfig {
    /// Names of VsphereCloudConfig resources, one per vCenter
    #[serde(default)]
    pub vsphere_cloud_configs: Vec<String>,

    /// Zone/region topology labels
    #[serde(default)]
    pub topology: TopologyInfo,
}

/// Topology labels handed to the cloud provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopologyInfo {
    #[serde(default)]
    pub zone: String,

    #[serde(default)]
    pub region: String,
}

/// CSI configuration, bound to a single vCenter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageProviderConfig {
    /// Name of the VsphereCloudConfig used by the storage driver
    #[serde(default)]
    pub vsphere_cloud_config: String,

    /// Kubernetes distribution tag passed through to the driver
    #[serde(default)]
    pub cluster_distribution: String,

    /// vSAN file service settings
    #[serde(default)]
    pub file_volumes: FileVolumes,
}

/// vSAN file volume settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileVolumes {
    /// Datastore URLs eligible for file shares
    #[serde(default)]
    pub vsan_datastore_urls: Vec<String>,

    /// Client network access rules
    #[serde(default)]
    pub net_permissions: Vec<NetPermission>,
}

/// Access rule for a client IP range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetPermission {
    /// IP address or subnet
    pub ip: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<NetPermissionAccess>,

    #[serde(default)]
    pub root_squash: bool,
}

/// File share access level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetPermissionAccess {
    ReadOnly,
    ReadWrite,
}

impl std::fmt::Display for NetPermissionAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetPermissionAccess::ReadOnly => write!(f, "READ_ONLY"),
            NetPermissionAccess::ReadWrite => write!(f, "READ_WRITE"),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Phase of a driver pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum VDOPhase {
    Deploying,
    Deployed,
    Configuring,
    Configured,
    Failed,
}

impl std::fmt::Display for VDOPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VDOPhase::Deploying => write!(f, "Deploying"),
            VDOPhase::Deployed => write!(f, "Deployed"),
            VDOPhase::Configuring => write!(f, "Configuring"),
            VDOPhase::Configured => write!(f, "Configured"),
            VDOPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Per-node CPI initialisation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Failed,
    Ready,
}

/// CPI pipeline status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CPIStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<VDOPhase>,

    #[serde(default)]
    pub status_msg: String,

    /// Node name to initialisation state
    #[serde(default)]
    pub node_status: BTreeMap<String, NodeStatus>,
}

/// CSI pipeline status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CSIStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<VDOPhase>,

    #[serde(default)]
    pub status_msg: String,
}

/// Status of a VDOConfig
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VDOConfigStatus {
    #[serde(default)]
    pub cpi: CPIStatus,

    #[serde(default)]
    pub csi: CSIStatus,
}

impl VDOConfig {
    /// CPI status, default when none was written yet
    pub fn cpi_status(&self) -> CPIStatus {
        self.status.as_ref().map(|s| s.cpi.clone()).unwrap_or_default()
    }

    /// CSI status, default when none was written yet
    pub fn csi_status(&self) -> CSIStatus {
        self.status.as_ref().map(|s| s.csi.clone()).unwrap_or_default()
    }

    /// Mutable status, created on first access
    pub fn status_mut(&mut self) -> &mut VDOConfigStatus {
        self.status.get_or_insert_with(VDOConfigStatus::default)
    }
}
