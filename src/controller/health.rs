//! Driver deployment health checks
//!
//! Each check returns `Error::DeploymentHealth` while the driver is still
//! rolling out; [`wait_until_healthy`] retries those with exponential
//! backoff until the configured timeout runs out.

use crate::domain::ports::ClusterStore;
use crate::error::{Error, Result};
use backoff::ExponentialBackoffBuilder;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const RUNNING: &str = "Running";

/// Retry `check` while it reports a health error, for at most `timeout`
pub async fn wait_until_healthy<F, Fut>(timeout: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs(1))
        .with_max_interval(Duration::from_secs(15))
        .with_max_elapsed_time(Some(timeout))
        .build();

    backoff::future::retry(policy, || {
        let attempt = check();
        async move {
            attempt.await.map_err(|e| match e {
                Error::DeploymentHealth(_) => {
                    debug!("Waiting for deployment: {}", e);
                    backoff::Error::transient(e)
                }
                other => backoff::Error::permanent(other),
            })
        }
    })
    .await
}

/// A daemonset exists, has no unavailable replicas and all its pods run
pub async fn check_daemon_set(
    store: &dyn ClusterStore,
    namespace: &str,
    name: &str,
    pod_selector: &str,
) -> Result<()> {
    let daemon_set = store.get_daemon_set(namespace, name).await?.ok_or_else(|| {
        Error::DeploymentHealth(format!("daemonset {}/{} not found", namespace, name))
    })?;

    let unavailable = daemon_set
        .status
        .as_ref()
        .and_then(|s| s.number_unavailable)
        .unwrap_or(0);
    if unavailable > 0 {
        return Err(Error::DeploymentHealth(format!(
            "daemonset {}/{} has {} unavailable replicas",
            namespace, name, unavailable
        )));
    }

    let pods = store.list_pods(namespace, pod_selector).await?;
    if let Some(pod) = pods.iter().find(|p| !is_running(p)) {
        return Err(Error::DeploymentHealth(format!(
            "pod {}/{} is {}",
            namespace,
            pod.metadata.name.as_deref().unwrap_or_default(),
            pod_phase(pod)
        )));
    }
    Ok(())
}

/// Every node has registered with the storage driver and a driver exists
pub async fn check_csi_registration(store: &dyn ClusterStore) -> Result<()> {
    let registered: BTreeSet<String> = store
        .list_csi_nodes()
        .await?
        .into_iter()
        .filter_map(|n| n.metadata.name)
        .collect();

    let missing: Vec<String> = store
        .list_nodes()
        .await?
        .into_iter()
        .filter_map(|n| n.metadata.name)
        .filter(|name| !registered.contains(name))
        .collect();
    if !missing.is_empty() {
        return Err(Error::DeploymentHealth(format!(
            "nodes not registered with the CSI driver: {}",
            missing.join(", ")
        )));
    }

    if store.list_csi_drivers().await?.is_empty() {
        return Err(Error::DeploymentHealth(
            "no CSIDriver registered".to_string(),
        ));
    }
    Ok(())
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

fn is_running(pod: &Pod) -> bool {
    pod_phase(pod) == RUNNING
}
