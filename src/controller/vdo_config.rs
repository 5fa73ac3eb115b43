//! VDOConfig reconciler
//!
//! Checks the singleton, loads the compatibility matrix once per pass and
//! runs the CPI and CSI pipelines. The pipelines track their state
//! separately; a failure in one never stops the other.

use crate::controller::cpi::reconcile_cpi;
use crate::controller::csi::reconcile_csi;
use crate::controller::vsphere_cloud_config::open_session;
use crate::controller::{requeue_action, Context};
use crate::crd::{ConfigStatus, VDOConfig, VDOPhase, VsphereCloudConfig};
use crate::error::{Error, Result};
use crate::matrix::{
    load_matrix, resolve_cpi_paths, resolve_csi_paths, ClusterVersions, CompatMatrix,
};
use crate::metrics::VDO_CONFIG_CONTROLLER;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// Compatibility Matrix
// =============================================================================

/// Outcome of loading the compatibility matrix for one pass
#[derive(Debug, Clone)]
pub enum MatrixState {
    /// No matrix configured; nothing is deployed
    Missing,
    Loaded(CompatMatrix),
    /// The matrix is configured but could not be read
    Unavailable(String),
}

impl MatrixState {
    /// Load the matrix named by the operator's matrix ConfigMap
    pub async fn load(ctx: &Context) -> Self {
        match load_matrix(
            ctx.store.as_ref(),
            ctx.fetcher.as_ref(),
            &ctx.config.namespace,
            &ctx.config.matrix_config_map,
        )
        .await
        {
            Ok(Some(matrix)) => MatrixState::Loaded(matrix),
            Ok(None) => MatrixState::Missing,
            Err(e) => {
                warn!("Compatibility matrix unavailable: {}", e);
                MatrixState::Unavailable(e.to_string())
            }
        }
    }

    /// CPI manifests compatible with the cluster and `vcc`'s vCenter.
    ///
    /// The CPI pipeline passes its first referenced VsphereCloudConfig; other
    /// vCenters of a multi-vCenter setup do not narrow the choice.
    pub async fn cpi_paths(&self, ctx: &Context, vcc: &VsphereCloudConfig) -> Result<Vec<String>> {
        let matrix = match self.matrix(ctx)? {
            Some(matrix) => matrix,
            None => return Ok(Vec::new()),
        };
        let versions = cluster_versions(ctx, vcc).await;
        Ok(resolve_cpi_paths(matrix, &versions))
    }

    /// CSI manifests compatible with the cluster and `vcc`'s vCenter
    pub async fn csi_paths(&self, ctx: &Context, vcc: &VsphereCloudConfig) -> Result<Vec<String>> {
        let matrix = match self.matrix(ctx)? {
            Some(matrix) => matrix,
            None => return Ok(Vec::new()),
        };
        let versions = cluster_versions(ctx, vcc).await;
        Ok(resolve_csi_paths(matrix, &versions))
    }

    fn matrix(&self, ctx: &Context) -> Result<Option<&CompatMatrix>> {
        match self {
            MatrixState::Missing => Ok(None),
            MatrixState::Loaded(matrix) => Ok(Some(matrix)),
            MatrixState::Unavailable(reason) => Err(Error::ManifestFetch {
                locator: format!(
                    "{}/{}",
                    ctx.config.namespace, ctx.config.matrix_config_map
                ),
                reason: reason.clone(),
            }),
        }
    }
}

/// Versions running in the cluster; an unknown version disables its filter
async fn cluster_versions(ctx: &Context, vcc: &VsphereCloudConfig) -> ClusterVersions {
    let kubernetes = match ctx.store.server_version().await {
        Ok(version) => Some(version).filter(|v| !v.is_empty()),
        Err(e) => {
            warn!("Could not read the Kubernetes version: {}", e);
            None
        }
    };
    let vsphere = match open_session(ctx, vcc).await {
        Ok(session) => Some(session.version.clone()).filter(|v| !v.is_empty()),
        Err(e) => {
            warn!("Could not read the vCenter version of {}: {}", vcc.spec.vc_ip, e);
            None
        }
    };
    debug!(
        "Cluster versions: kubernetes={:?} vsphere={:?}",
        kubernetes, vsphere
    );
    ClusterVersions {
        vsphere,
        kubernetes,
    }
}

// =============================================================================
// Shared Pipeline Steps
// =============================================================================

/// Fetch a referenced VsphereCloudConfig
pub async fn resolve_cloud_config(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<VsphereCloudConfig> {
    ctx.store
        .get_vsphere_cloud_config(namespace, name)
        .await?
        .ok_or_else(|| Error::ResourceNotFound {
            kind: "VsphereCloudConfig".to_string(),
            name: format!("{}/{}", namespace, name),
        })
}

/// Only verified descriptors are used to configure drivers
pub fn ensure_verified(vcc: &VsphereCloudConfig) -> Result<()> {
    match vcc.config_status() {
        ConfigStatus::Verified => Ok(()),
        ConfigStatus::Failed => Err(Error::Validation(format!(
            "VsphereCloudConfig {} failed verification: {}",
            vcc.name_any(),
            vcc.status_message()
        ))),
        ConfigStatus::Unverified => Err(Error::Validation(format!(
            "VsphereCloudConfig {} is not verified yet",
            vcc.name_any()
        ))),
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Reconcile the cluster's VDOConfig
pub async fn reconcile(vdo: Arc<VDOConfig>, ctx: Arc<Context>) -> Result<Action> {
    let name = vdo.name_any();
    let namespace = vdo.namespace().unwrap_or_else(|| ctx.config.namespace.clone());
    ctx.metrics.reconciled(VDO_CONFIG_CONTROLLER);
    debug!("Reconciling VDOConfig {}/{}", namespace, name);

    let configs = ctx.store.list_vdo_configs(&namespace).await?;
    if configs.len() > 1 {
        return Err(Error::Configuration(format!(
            "found {} VDOConfig resources in {}, expected exactly one",
            configs.len(),
            namespace
        )));
    }
    let Some(mut current) = configs.into_iter().find(|c| c.name_any() == name) else {
        debug!("VDOConfig {}/{} no longer exists", namespace, name);
        return Ok(Action::await_change());
    };

    let matrix = MatrixState::load(&ctx).await;

    let cpi = reconcile_cpi(&ctx, &mut current, &matrix).await;
    let csi = reconcile_csi(&ctx, &mut current, &matrix).await;
    cpi?;
    csi?;

    let cpi_phase = current.cpi_status().phase;
    let csi_phase = current.csi_status().phase;
    let settled = matches!(cpi_phase, None | Some(VDOPhase::Configured))
        && matches!(csi_phase, None | Some(VDOPhase::Deployed));

    if settled {
        info!("VDOConfig {} is settled", name);
        Ok(Action::requeue(ctx.config.settled_requeue_interval))
    } else {
        Ok(Action::requeue(ctx.config.requeue_interval))
    }
}

/// Requeue policy for a failed VDOConfig reconcile
pub fn error_policy(vdo: Arc<VDOConfig>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("VDOConfig {} reconcile failed: {}", vdo.name_any(), error);
    ctx.metrics.failed(VDO_CONFIG_CONTROLLER);
    requeue_action(error, &ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{
        credentials_secret, csi_driver, csi_node, daemon_set, node, pod, vdo_config,
        vsphere_cloud_config, Harness, MapFetcher, NAMESPACE,
    };
    use crate::crd::{CloudProviderConfig, StorageProviderConfig, VDOConfigSpec};
    use crate::drivers::{
        CPI_DAEMONSET_NAME, CPI_NAMESPACE, CPI_POD_SELECTOR, CSI_DAEMONSET_NAME, CSI_NAMESPACE,
        CSI_POD_SELECTOR,
    };
    use crate::matrix::{CpiVersionInfo, K8sSkew, MATRIX_CONFIG_MAP_NAME, MATRIX_URL_KEY};
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn spec(cpi: &[&str], csi: &str) -> VDOConfigSpec {
        VDOConfigSpec {
            cloud_provider: CloudProviderConfig {
                vsphere_cloud_configs: cpi.iter().map(|r| r.to_string()).collect(),
                ..Default::default()
            },
            storage_provider: StorageProviderConfig {
                vsphere_cloud_config: csi.to_string(),
                ..Default::default()
            },
        }
    }

    fn seed(h: &Harness) {
        h.store.insert(credentials_secret("vc-creds", "admin", "pass"));
        h.store
            .insert(vsphere_cloud_config("vc1", "1.1.1.1", ConfigStatus::Verified));
        h.store.insert(node("node-1", Some("vsphere://4201")));
    }

    fn healthy_drivers(h: &Harness) {
        h.store.insert(daemon_set(CPI_NAMESPACE, CPI_DAEMONSET_NAME, 0));
        h.store.insert(pod(CPI_NAMESPACE, "ccm-1", CPI_POD_SELECTOR, "Running"));
        h.store.insert(daemon_set(CSI_NAMESPACE, CSI_DAEMONSET_NAME, 0));
        h.store.insert(pod(CSI_NAMESPACE, "csi-1", CSI_POD_SELECTOR, "Running"));
        h.store.insert(csi_node("node-1"));
        h.store.insert(csi_driver("csi.vsphere.vmware.com"));
    }

    fn stored(h: &Harness) -> VDOConfig {
        h.store.get(NAMESPACE, "vdo-config").unwrap()
    }

    #[tokio::test]
    async fn test_both_pipelines_settle() {
        let h = Harness::new();
        seed(&h);
        healthy_drivers(&h);
        let vdo = h.store.insert(vdo_config(spec(&["vc1"], "vc1")));

        let action = reconcile(Arc::new(vdo), h.ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(h.ctx.config.settled_requeue_interval));

        let vdo = stored(&h);
        assert_eq!(vdo.cpi_status().phase, Some(VDOPhase::Configured));
        assert_eq!(vdo.csi_status().phase, Some(VDOPhase::Deployed));
    }

    #[tokio::test]
    async fn test_cpi_failure_does_not_block_csi() {
        let h = Harness::new();
        seed(&h);
        healthy_drivers(&h);
        let vdo = h.store.insert(vdo_config(spec(&["missing"], "vc1")));

        let result = reconcile(Arc::new(vdo), h.ctx.clone()).await;
        assert_matches!(result, Err(Error::ResourceNotFound { .. }));

        let vdo = stored(&h);
        assert_eq!(vdo.cpi_status().phase, Some(VDOPhase::Failed));
        assert_eq!(vdo.csi_status().phase, Some(VDOPhase::Deployed));
    }

    #[tokio::test]
    async fn test_second_vdo_config_is_rejected() {
        let h = Harness::new();
        let vdo = h.store.insert(vdo_config(spec(&[], "")));
        let mut other = vdo_config(spec(&[], ""));
        other.metadata.name = Some("second".into());
        h.store.insert(other);

        let result = reconcile(Arc::new(vdo), h.ctx.clone()).await;
        assert_matches!(result, Err(Error::Configuration(msg)) if msg.contains("found 2"));
        assert_eq!(h.store.writes("VDOConfig"), 0);
    }

    #[tokio::test]
    async fn test_deleted_vdo_config_awaits_change() {
        let h = Harness::new();
        let vdo = vdo_config(spec(&["vc1"], ""));

        let action = reconcile(Arc::new(vdo), h.ctx.clone()).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_unreadable_matrix_fails_deployment() {
        let h = Harness::new();
        seed(&h);
        healthy_drivers(&h);
        h.store.insert(ConfigMap {
            metadata: ObjectMeta {
                name: Some(MATRIX_CONFIG_MAP_NAME.into()),
                namespace: Some(NAMESPACE.into()),
                ..Default::default()
            },
            data: Some(
                [(MATRIX_URL_KEY.to_string(), "https://example.invalid/matrix.yaml".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        });
        let vdo = h.store.insert(vdo_config(spec(&[], "vc1")));

        let result = reconcile(Arc::new(vdo), h.ctx.clone()).await;
        assert_matches!(result, Err(Error::ManifestFetch { .. }));
        assert_eq!(stored(&h).csi_status().phase, Some(VDOPhase::Failed));
    }

    #[tokio::test]
    async fn test_matrix_state_missing_yields_no_paths() {
        let h = Harness::with_fetcher(MapFetcher::default());
        let vcc = vsphere_cloud_config("vc1", "1.1.1.1", ConfigStatus::Verified);

        let paths = MatrixState::Missing.csi_paths(&h.ctx, &vcc).await.unwrap();
        assert!(paths.is_empty());
        assert_eq!(h.connector.login_calls(), 0);
    }

    #[tokio::test]
    async fn test_cpi_paths_follow_kubernetes_minor() {
        let h = Harness::new();
        h.store.insert(credentials_secret("vc-creds", "admin", "pass"));
        let vcc = vsphere_cloud_config("vc1", "1.1.1.1", ConfigStatus::Verified);

        let mut matrix = CompatMatrix::default();
        for (version, skew, path) in [
            ("1.27.0", "1.27", "cpi-1.27.yaml"),
            ("1.29.0", "1.29", "cpi-1.29.yaml"),
        ] {
            matrix.cpi.insert(
                version.into(),
                CpiVersionInfo {
                    k8s: K8sSkew {
                        skew_version: skew.into(),
                    },
                    deployment_path: vec![path.into()],
                    ..Default::default()
                },
            );
        }
        let state = MatrixState::Loaded(matrix);

        assert_eq!(state.cpi_paths(&h.ctx, &vcc).await.unwrap(), ["cpi-1.29.yaml"]);

        h.store.set_server_version("1.27.4");
        assert_eq!(state.cpi_paths(&h.ctx, &vcc).await.unwrap(), ["cpi-1.27.yaml"]);
    }

    #[test]
    fn test_ensure_verified() {
        let verified = vsphere_cloud_config("vc1", "1.1.1.1", ConfigStatus::Verified);
        assert!(ensure_verified(&verified).is_ok());

        let unverified = vsphere_cloud_config("vc1", "1.1.1.1", ConfigStatus::Unverified);
        assert_matches!(ensure_verified(&unverified), Err(Error::Validation(msg)) if msg.contains("not verified"));

        let mut failed = vsphere_cloud_config("vc1", "1.1.1.1", ConfigStatus::Failed);
        failed.status.as_mut().unwrap().message = "bad password".into();
        assert_matches!(ensure_verified(&failed), Err(Error::Validation(msg)) if msg.contains("bad password"));
    }

    #[test]
    fn test_error_policy_counts_failures() {
        let h = Harness::new();
        let vdo = Arc::new(vdo_config(spec(&[], "")));

        let action = error_policy(vdo, &Error::Configuration("x".into()), h.ctx.clone());
        assert_eq!(action, Action::await_change());
        let failures = h
            .ctx
            .metrics
            .reconcile_failures
            .with_label_values(&[VDO_CONFIG_CONTROLLER])
            .get();
        assert_eq!(failures, 1);
    }
}
