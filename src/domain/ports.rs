//! Domain Ports - Core trait definitions for the drivers operator
//!
//! These traits define the boundaries between the reconciliation logic and
//! external systems: the Kubernetes object store, vCenter and manifest hosts.
//! Adapters implement these traits to provide concrete functionality.

use crate::crd::{VDOConfig, VsphereCloudConfig};
use crate::error::Result;
use crate::manifest::GenericResource;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Pod, Secret};
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Generic Apply
// =============================================================================

/// Action performed on a generic object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApplyAction {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyAction::Create => write!(f, "CREATE"),
            ApplyAction::Update => write!(f, "UPDATE"),
            ApplyAction::Delete => write!(f, "DELETE"),
        }
    }
}

/// Port used by the manifest engine to act on decoded objects
///
/// `Create` on an existing object must fail with `Error::ResourceExists`.
#[async_trait]
pub trait ResourceApplier: Send + Sync {
    async fn apply(&self, resource: &GenericResource, action: ApplyAction) -> Result<()>;
}

// =============================================================================
// Cluster Store Port
// =============================================================================

/// Port for the Kubernetes object store
///
/// Getters return `Ok(None)` for missing objects. Creates report existing
/// objects with `Error::ResourceExists`; replaces carrying a stale resource
/// version fail with `Error::Conflict`.
#[async_trait]
pub trait ClusterStore: ResourceApplier {
    // --- custom resources -------------------------------------------------

    async fn get_vsphere_cloud_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VsphereCloudConfig>>;

    /// Write the status subresource, returning the stored object
    async fn replace_vsphere_cloud_config_status(
        &self,
        config: &VsphereCloudConfig,
    ) -> Result<VsphereCloudConfig>;

    async fn list_vdo_configs(&self, namespace: &str) -> Result<Vec<VDOConfig>>;

    /// Write the status subresource, returning the stored object
    async fn replace_vdo_config_status(&self, config: &VDOConfig) -> Result<VDOConfig>;

    // --- secrets and config maps ------------------------------------------

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret>;

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<()>;

    // --- cluster state ----------------------------------------------------

    async fn list_nodes(&self) -> Result<Vec<Node>>;

    async fn replace_node(&self, node: &Node) -> Result<Node>;

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>>;

    /// List pods matching an equality label selector (`key=value[,key=value]`)
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    async fn list_csi_nodes(&self) -> Result<Vec<CSINode>>;

    async fn list_csi_drivers(&self) -> Result<Vec<CSIDriver>>;

    /// Kubernetes server version, e.g. `1.29.2`
    async fn server_version(&self) -> Result<String>;
}

// =============================================================================
// vCenter Ports
// =============================================================================

/// Resolved connection target for a vCenter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Endpoint as configured by the user
    pub server: String,
    /// Base URL derived from the endpoint
    pub url: reqwest::Url,
    /// Pinned certificate thumbprint, insecure transport when absent
    pub thumbprint: Option<String>,
}

/// Resolved datacenter handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datacenter {
    /// Managed object id (e.g. `datacenter-3`)
    pub id: String,
    pub name: String,
}

/// Port for establishing authenticated vCenter connections
#[async_trait]
pub trait VcenterConnector: Send + Sync {
    /// Log in, failing with `Error::Auth` when credentials are rejected
    async fn login(
        &self,
        target: &ConnectTarget,
        username: &str,
        password: &str,
    ) -> Result<Arc<dyn VcenterClient>>;
}

/// An authenticated vCenter connection
#[async_trait]
pub trait VcenterClient: Send + Sync {
    /// Ask the server whether this session is still active
    async fn is_active(&self) -> Result<bool>;

    /// Look up a datacenter by name
    async fn find_datacenter(&self, name: &str) -> Result<Option<Datacenter>>;

    /// vCenter version negotiated at login
    fn server_version(&self) -> &str;
}

// =============================================================================
// Manifest Fetcher Port
// =============================================================================

/// Port for reading manifests and compatibility documents
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    /// Read `file://` paths or `http(s)://` URLs; non-200 responses are errors
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterStoreRef = Arc<dyn ClusterStore>;
pub type VcenterConnectorRef = Arc<dyn VcenterConnector>;
pub type ManifestFetcherRef = Arc<dyn ManifestFetcher>;
