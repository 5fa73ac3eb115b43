//! Controller runner
//!
//! Wires the reconcilers into `kube` controllers for a live cluster, or runs
//! a single pass over an in-memory store for standalone dry runs.

use crate::config::OperatorConfig;
use crate::controller::watch::{map_node_to_vdo_config, requests_for_matrix_change};
use crate::controller::{vdo_config, vsphere_cloud_config, Context};
use crate::crd::{VDOConfig, VsphereCloudConfig};
use crate::error::Result;
use crate::manifest::HttpFetcher;
use crate::metrics::Metrics;
use crate::session::{RestConnector, SessionCache};
use crate::store::{KubeStore, MemoryStore};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Build the live context: Kubernetes store, vCenter REST sessions and
/// HTTP manifest fetcher
pub fn live_context(client: Client, config: OperatorConfig, metrics: Metrics) -> Result<Context> {
    let store = Arc::new(KubeStore::new(client));
    let connector = Arc::new(RestConnector::new(config.http_timeout));
    let fetcher = Arc::new(HttpFetcher::new(config.http_timeout)?);
    let sessions = Arc::new(SessionCache::new(connector, metrics.vcenter_logins.clone()));
    Ok(Context::new(store, sessions, fetcher, config, metrics))
}

/// Run both controllers until a shutdown signal arrives
pub async fn run_controllers(client: Client, ctx: Arc<Context>) {
    let namespace = ctx.config.namespace.clone();
    let matrix_name = ctx.config.matrix_config_map.clone();

    let vdo_configs: Api<VDOConfig> = Api::namespaced(client.clone(), &namespace);
    let cloud_configs: Api<VsphereCloudConfig> = Api::namespaced(client.clone(), &namespace);
    let nodes: Api<Node> = Api::all(client.clone());
    let config_maps: Api<ConfigMap> = Api::namespaced(client, &namespace);

    info!("- VDOConfig controller");
    let vdo_controller = Controller::new(vdo_configs, WatcherConfig::default());
    let known_for_matrix = vdo_controller.store();
    let known_for_cloud_configs = vdo_controller.store();

    let node_namespace = namespace.clone();
    let matrix_namespace = namespace.clone();
    let matrix_fields = format!("metadata.name={}", matrix_name);

    let vdo_controller = vdo_controller
        .watches(nodes, WatcherConfig::default(), move |node| {
            map_node_to_vdo_config(&node, &node_namespace)
        })
        .watches(
            config_maps,
            WatcherConfig::default().fields(&matrix_fields),
            move |config_map| {
                requests_for_matrix_change(
                    &config_map,
                    &known_for_matrix.state(),
                    &matrix_name,
                    &matrix_namespace,
                )
            },
        )
        .watches(cloud_configs.clone(), WatcherConfig::default(), move |_| {
            known_for_cloud_configs
                .state()
                .iter()
                .map(|vdo| ObjectRef::from_obj(vdo.as_ref()))
                .collect::<Vec<_>>()
        })
        .shutdown_on_signal()
        .run(vdo_config::reconcile, vdo_config::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!("Reconciled VDOConfig {}", obj.name),
                Err(e) => warn!("VDOConfig controller: {}", e),
            }
        });

    info!("- VsphereCloudConfig controller");
    let cloud_config_controller = Controller::new(cloud_configs, WatcherConfig::default())
        .shutdown_on_signal()
        .run(
            vsphere_cloud_config::reconcile,
            vsphere_cloud_config::error_policy,
            ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!("Reconciled VsphereCloudConfig {}", obj.name),
                Err(e) => warn!("VsphereCloudConfig controller: {}", e),
            }
        });

    futures::join!(vdo_controller, cloud_config_controller);
    info!("Controllers stopped");
}

/// Reconcile every VsphereCloudConfig, then every VDOConfig, once.
///
/// Errors are logged and counted; the stored statuses carry the outcome.
pub async fn reconcile_once(ctx: Arc<Context>, store: &MemoryStore) -> usize {
    let mut failures = 0;

    for vcc in store.list::<VsphereCloudConfig>() {
        let name = vcc.name_any();
        if let Err(e) = vsphere_cloud_config::reconcile(Arc::new(vcc), ctx.clone()).await {
            warn!("VsphereCloudConfig {}: {}", name, e);
            failures += 1;
        }
    }

    for vdo in store.list::<VDOConfig>() {
        let name = vdo.name_any();
        if let Err(e) = vdo_config::reconcile(Arc::new(vdo), ctx.clone()).await {
            warn!("VDOConfig {}: {}", name, e);
            failures += 1;
        }
    }

    info!("Dry run finished with {} failure(s)", failures);
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{credentials_secret, vdo_config, Harness, NAMESPACE};
    use crate::crd::{ConfigStatus, StorageProviderConfig, VDOConfigSpec, VDOPhase};

    #[tokio::test]
    async fn test_reconcile_once_verifies_before_configuring() {
        let h = Harness::new();
        h.store.insert(credentials_secret("vc-creds", "admin", "pass"));
        let document = format!(
            r#"
apiVersion: vdo.vmware.com/v1alpha1
kind: VsphereCloudConfig
metadata:
  name: vc1
  namespace: {ns}
spec:
  vcIp: "1.1.1.1"
  insecureFlag: true
  credentials: vc-creds
  datacenters: [dc1]
"#,
            ns = NAMESPACE
        );
        h.store.seed(document.as_bytes()).unwrap();
        h.store.insert(vdo_config(VDOConfigSpec {
            storage_provider: StorageProviderConfig {
                vsphere_cloud_config: "vc1".into(),
                ..Default::default()
            },
            ..Default::default()
        }));

        // No CSI daemonset exists, so only the storage pipeline fails
        let failures = reconcile_once(h.ctx.clone(), &h.store).await;
        assert_eq!(failures, 1);

        let vcc: VsphereCloudConfig = h.store.get(NAMESPACE, "vc1").unwrap();
        assert_eq!(vcc.config_status(), ConfigStatus::Verified);
        let vdo: VDOConfig = h.store.get(NAMESPACE, "vdo-config").unwrap();
        assert_eq!(vdo.csi_status().phase, Some(VDOPhase::Failed));
        assert!(vdo.csi_status().status_msg.contains("vsphere-csi-node"));
        assert_eq!(h.connector.login_calls(), 1);
    }
}
