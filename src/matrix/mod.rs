//! Version Matrix Resolver
//!
//! The compatibility matrix maps each CSI and CPI driver version to the
//! vSphere and Kubernetes versions it supports and to its deployment
//! manifests. The resolver filters the matrix by the versions running in the
//! cluster and picks the latest remaining driver version.

use crate::domain::ports::{ClusterStore, ManifestFetcher};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// ConfigMap in the operator namespace pointing at the matrix document
pub const MATRIX_CONFIG_MAP_NAME: &str = "compat-matrix-config";

/// ConfigMap key holding the matrix location
pub const MATRIX_URL_KEY: &str = "versionConfigURL";

/// Starting point of the latest-version scan
const BASE_VERSION: &str = "0.0.0";

// =============================================================================
// Matrix Document
// =============================================================================

/// Inclusive version range
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    #[serde(default)]
    pub min: String,
    #[serde(default)]
    pub max: String,
}

/// CSI Kubernetes constraint
pub type K8sRange = VersionRange;

/// CPI Kubernetes constraint: the minor release it was built for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sSkew {
    #[serde(default)]
    pub skew_version: String,
}

/// One CSI driver version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsiVersionInfo {
    #[serde(rename = "vSphere", default)]
    pub vsphere: VersionRange,
    #[serde(rename = "k8s", default)]
    pub k8s: K8sRange,
    #[serde(rename = "isCPIRequired", default)]
    pub is_cpi_required: bool,
    #[serde(default)]
    pub deployment_path: Vec<String>,
}

/// One CPI driver version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpiVersionInfo {
    #[serde(rename = "vSphere", default)]
    pub vsphere: VersionRange,
    #[serde(rename = "k8s", default)]
    pub k8s: K8sSkew,
    #[serde(default)]
    pub deployment_path: Vec<String>,
}

/// The compatibility matrix document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompatMatrix {
    #[serde(rename = "CSI", default)]
    pub csi: BTreeMap<String, CsiVersionInfo>,
    #[serde(rename = "CPI", default)]
    pub cpi: BTreeMap<String, CpiVersionInfo>,
}

impl CompatMatrix {
    /// Decode a JSON or YAML matrix document
    pub fn from_slice(document: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(document)
            .map_err(|e| Error::ManifestParse(format!("invalid compatibility matrix: {}", e)))
    }
}

/// Read the matrix named by the `versionConfigURL` key of `config_map`.
///
/// A missing ConfigMap or an empty key means no matrix is configured.
pub async fn load_matrix(
    store: &dyn ClusterStore,
    fetcher: &dyn ManifestFetcher,
    namespace: &str,
    config_map: &str,
) -> Result<Option<CompatMatrix>> {
    let Some(cm) = store.get_config_map(namespace, config_map).await? else {
        debug!("No compatibility matrix ConfigMap {}/{}", namespace, config_map);
        return Ok(None);
    };
    let locator = cm
        .data
        .as_ref()
        .and_then(|d| d.get(MATRIX_URL_KEY))
        .map(|l| l.trim())
        .filter(|l| !l.is_empty());
    let Some(locator) = locator else {
        debug!("ConfigMap {}/{} has no {}", namespace, config_map, MATRIX_URL_KEY);
        return Ok(None);
    };

    let document = fetcher.fetch(locator).await?;
    let matrix = CompatMatrix::from_slice(&document)?;
    info!(
        "Loaded compatibility matrix from {} ({} CSI, {} CPI versions)",
        locator,
        matrix.csi.len(),
        matrix.cpi.len()
    );
    Ok(Some(matrix))
}

/// Versions running in the cluster; unknown versions disable that filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterVersions {
    pub vsphere: Option<String>,
    pub kubernetes: Option<String>,
}

/// Anything carrying deployment manifests
pub trait DeploymentPaths {
    fn deployment_paths(&self) -> &[String];
}

impl DeploymentPaths for CsiVersionInfo {
    fn deployment_paths(&self) -> &[String] {
        &self.deployment_path
    }
}

impl DeploymentPaths for CpiVersionInfo {
    fn deployment_paths(&self) -> &[String] {
        &self.deployment_path
    }
}

// =============================================================================
// Selection
// =============================================================================

/// Manifests of the latest CSI version compatible with `versions`
pub fn resolve_csi_paths(matrix: &CompatMatrix, versions: &ClusterVersions) -> Vec<String> {
    let candidates: BTreeMap<String, CsiVersionInfo> = matrix
        .csi
        .iter()
        .filter(|(_, info)| {
            in_range(versions.vsphere.as_deref(), &info.vsphere)
                && in_range(versions.kubernetes.as_deref(), &info.k8s)
        })
        .map(|(v, info)| (v.clone(), info.clone()))
        .collect();
    select_latest(&candidates)
}

/// Manifests of the latest CPI version compatible with `versions`
pub fn resolve_cpi_paths(matrix: &CompatMatrix, versions: &ClusterVersions) -> Vec<String> {
    let candidates: BTreeMap<String, CpiVersionInfo> = matrix
        .cpi
        .iter()
        .filter(|(_, info)| {
            in_range(versions.vsphere.as_deref(), &info.vsphere)
                && matches_skew(versions.kubernetes.as_deref(), &info.k8s.skew_version)
        })
        .map(|(v, info)| (v.clone(), info.clone()))
        .collect();
    select_latest(&candidates)
}

/// Pick the deployment paths of the latest version in `matrix`.
///
/// Starting from `0.0.0`, each version replaces the running best as soon as
/// one of its components is larger than the best's component at the same
/// position. Smaller components do not stop the scan, and only positions
/// present in both versions are compared. An empty matrix yields no paths.
pub fn select_latest<T: DeploymentPaths>(matrix: &BTreeMap<String, T>) -> Vec<String> {
    let mut best = BASE_VERSION;

    for version in matrix.keys() {
        let candidate = components(version);
        let current = components(best);
        if candidate
            .iter()
            .zip(current.iter())
            .any(|(c, b)| c > b)
        {
            best = version;
        }
    }

    debug!("Selected version {} from {} candidates", best, matrix.len());
    matrix
        .get(best)
        .map(|info| info.deployment_paths().to_vec())
        .unwrap_or_default()
}

/// Numeric components; non-numeric parts count as zero
fn components(version: &str) -> Vec<u64> {
    version
        .trim_start_matches('v')
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect()
}

/// Proper component-wise comparison, missing trailing components are zero
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a, b) = (components(a), components(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let (x, y) = (a.get(i).copied().unwrap_or(0), b.get(i).copied().unwrap_or(0));
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn in_range(version: Option<&str>, range: &VersionRange) -> bool {
    let Some(version) = version else {
        return true;
    };
    let above_min =
        range.min.is_empty() || compare_versions(version, &range.min) != Ordering::Less;
    let below_max =
        range.max.is_empty() || compare_versions(version, &range.max) != Ordering::Greater;
    above_min && below_max
}

/// CPI releases track Kubernetes minors: `1.22` matches any `1.22.x`
fn matches_skew(version: Option<&str>, skew: &str) -> bool {
    let Some(version) = version else {
        return true;
    };
    if skew.is_empty() {
        return true;
    }
    let cluster = components(version);
    let wanted = components(skew);
    cluster.iter().zip(wanted.iter()).all(|(c, w)| c == w)
}
