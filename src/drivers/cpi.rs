//! vSphere cloud provider (CPI) configuration
//!
//! Builds the `vsphere.conf` YAML document and the shared credentials secret
//! consumed by the cloud controller manager.

use crate::crd::{VDOConfig, VsphereCloudConfig};
use crate::drivers::{bytes, Credentials};
use crate::error::Result;
use k8s_openapi::ByteString;
use serde::Serialize;
use std::collections::BTreeMap;

// =============================================================================
// Well-known Names
// =============================================================================

/// Namespace the cloud controller manager runs in
pub const CPI_NAMESPACE: &str = "kube-system";

/// Secret with per-vCenter credentials
pub const CPI_SECRET_NAME: &str = "cpi-global-secret";

/// ConfigMap carrying the cloud config
pub const CPI_CONFIG_MAP_NAME: &str = "cloud-config";

/// ConfigMap key of the cloud config
pub const CPI_CONFIG_KEY: &str = "vsphere.conf";

/// Daemonset of the cloud controller manager
pub const CPI_DAEMONSET_NAME: &str = "vsphere-cloud-controller-manager";

/// Pod selector of the cloud controller manager
pub const CPI_POD_SELECTOR: &str = "k8s-app=vsphere-cloud-controller-manager";

/// Port the cloud provider connects to
pub const VCENTER_PORT: u16 = 443;

/// Coordinates of the credentials secret referenced from the cloud config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub name: String,
    pub namespace: String,
}

impl Default for SecretRef {
    fn default() -> Self {
        Self {
            name: CPI_SECRET_NAME.to_string(),
            namespace: CPI_NAMESPACE.to_string(),
        }
    }
}

// =============================================================================
// Cloud Config Document
// =============================================================================

#[derive(Debug, Serialize)]
struct CloudConfigFile<'a> {
    vcenter: BTreeMap<&'a str, VcenterBlock<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<Labels<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VcenterBlock<'a> {
    server: &'a str,
    datacenters: &'a [String],
    insecure_flag: bool,
    port: u16,
    secret_name: &'a str,
    secret_namespace: &'a str,
}

#[derive(Debug, Serialize)]
struct Labels<'a> {
    region: &'a str,
    zone: &'a str,
}

/// Build the CPI cloud config with one block per vCenter, keyed by endpoint.
///
/// The `labels` section is only written when a region or zone is configured.
pub fn build_cpi_config(
    vdo: &VDOConfig,
    cloud_configs: &[VsphereCloudConfig],
    secret: &SecretRef,
) -> Result<String> {
    let vcenter = cloud_configs
        .iter()
        .map(|vcc| {
            let spec = &vcc.spec;
            (
                spec.vc_ip.as_str(),
                VcenterBlock {
                    server: &spec.vc_ip,
                    datacenters: &spec.datacenters,
                    insecure_flag: spec.insecure_flag,
                    port: VCENTER_PORT,
                    secret_name: &secret.name,
                    secret_namespace: &secret.namespace,
                },
            )
        })
        .collect();

    let topology = &vdo.spec.cloud_provider.topology;
    let labels = if topology.region.is_empty() && topology.zone.is_empty() {
        None
    } else {
        Some(Labels {
            region: &topology.region,
            zone: &topology.zone,
        })
    };

    Ok(serde_yaml::to_string(&CloudConfigFile { vcenter, labels })?)
}

/// Build the credentials secret data: `<vc>.username` and `<vc>.password`
pub fn build_cpi_secret_data<'a, I>(credentials: I) -> BTreeMap<String, ByteString>
where
    I: IntoIterator<Item = (&'a str, &'a Credentials)>,
{
    let mut data = BTreeMap::new();
    for (vc_ip, creds) in credentials {
        data.insert(format!("{}.username", vc_ip), bytes(&creds.username));
        data.insert(format!("{}.password", vc_ip), bytes(&creds.password));
    }
    data
}
