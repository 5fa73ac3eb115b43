//! Cloud provider (CPI) pipeline
//!
//! Steps run in order and the first failure marks the CPI track `Failed`:
//! resolve and verify the referenced VsphereCloudConfigs, write the
//! credentials secret and cloud config, taint and label nodes, apply the
//! driver manifests, wait for the cloud controller manager, then derive the
//! per-node status from provider IDs.

use crate::controller::health::{check_daemon_set, wait_until_healthy};
use crate::controller::nodes::{node_statuses, reconcile_node_label, reconcile_node_taint};
use crate::controller::resources::{reconcile_config_map, reconcile_secret};
use crate::controller::status::{persist, phase, record_failure, transition, Driver};
use crate::controller::vdo_config::{ensure_verified, resolve_cloud_config, MatrixState};
use crate::controller::vsphere_cloud_config::load_credentials;
use crate::controller::Context;
use crate::crd::{NodeStatus, VDOConfig, VDOPhase};
use crate::domain::ports::ApplyAction;
use crate::drivers::{
    build_cpi_config, build_cpi_secret_data, SecretRef, CPI_CONFIG_KEY, CPI_CONFIG_MAP_NAME,
    CPI_DAEMONSET_NAME, CPI_NAMESPACE, CPI_POD_SELECTOR, CPI_SECRET_NAME,
};
use crate::error::Result;
use crate::manifest::apply_locations;
use kube::ResourceExt;
use tracing::debug;

/// Run the CPI pipeline. A VDOConfig without cloud configs is left alone.
pub async fn reconcile_cpi(ctx: &Context, vdo: &mut VDOConfig, matrix: &MatrixState) -> Result<()> {
    if vdo.spec.cloud_provider.vsphere_cloud_configs.is_empty() {
        debug!("VDOConfig {} configures no cloud provider", vdo.name_any());
        return Ok(());
    }

    if let Err(e) = run(ctx, vdo, matrix).await {
        record_failure(ctx, vdo, Driver::Cpi, &e).await;
        return Err(e);
    }
    Ok(())
}

async fn run(ctx: &Context, vdo: &mut VDOConfig, matrix: &MatrixState) -> Result<()> {
    let store = ctx.store.as_ref();
    let namespace = vdo.namespace().unwrap_or_else(|| ctx.config.namespace.clone());

    let mut configs = Vec::new();
    for name in &vdo.spec.cloud_provider.vsphere_cloud_configs {
        configs.push(resolve_cloud_config(ctx, &namespace, name).await?);
    }
    for config in &configs {
        ensure_verified(config)?;
    }

    let mut credentials = Vec::with_capacity(configs.len());
    for config in &configs {
        credentials.push((config.spec.vc_ip.clone(), load_credentials(ctx, config).await?));
    }
    let secret_data =
        build_cpi_secret_data(credentials.iter().map(|(vc, creds)| (vc.as_str(), creds)));
    if reconcile_secret(store, CPI_NAMESPACE, CPI_SECRET_NAME, secret_data).await? {
        transition(ctx, vdo, Driver::Cpi, VDOPhase::Configuring, "").await?;
    }

    let cloud_config = build_cpi_config(vdo, &configs, &SecretRef::default())?;
    if reconcile_config_map(
        store,
        CPI_NAMESPACE,
        CPI_CONFIG_MAP_NAME,
        CPI_CONFIG_KEY,
        cloud_config,
    )
    .await?
    {
        transition(ctx, vdo, Driver::Cpi, VDOPhase::Configuring, "").await?;
    }

    let mut nodes = store.list_nodes().await?;
    reconcile_node_taint(store, &mut nodes).await?;
    reconcile_node_label(store, &mut nodes, &vdo.name_any()).await?;

    // CPI manifests are resolved against the first referenced vCenter only
    let paths = matrix.cpi_paths(ctx, &configs[0]).await?;
    if !paths.is_empty()
        && apply_locations(ctx.fetcher.as_ref(), store, &paths, "", ApplyAction::Create).await?
    {
        transition(ctx, vdo, Driver::Cpi, VDOPhase::Deploying, "").await?;
    }

    wait_until_healthy(ctx.config.health_timeout, || {
        check_daemon_set(store, CPI_NAMESPACE, CPI_DAEMONSET_NAME, CPI_POD_SELECTOR)
    })
    .await?;

    if matches!(
        phase(vdo, Driver::Cpi),
        None | Some(VDOPhase::Deploying) | Some(VDOPhase::Failed)
    ) {
        transition(ctx, vdo, Driver::Cpi, VDOPhase::Deployed, "").await?;
    }

    update_node_status(ctx, vdo).await
}

/// Derive node readiness from provider IDs, writing status only on change
async fn update_node_status(ctx: &Context, vdo: &mut VDOConfig) -> Result<()> {
    let nodes = ctx.store.list_nodes().await?;
    let node_status = node_statuses(&nodes);
    let pending = node_status
        .values()
        .filter(|s| **s == NodeStatus::Pending)
        .count();

    let current = vdo.cpi_status();
    let mut desired = current.clone();
    desired.node_status = node_status;
    if pending > 0 {
        desired.phase = Some(VDOPhase::Configuring);
        desired.status_msg = format!("{} node(s) waiting for a provider ID", pending);
    } else {
        desired.phase = Some(VDOPhase::Configured);
        desired.status_msg = String::new();
    }

    if desired == current {
        debug!("CPI status of VDOConfig {} unchanged", vdo.name_any());
        return Ok(());
    }
    vdo.status_mut().cpi = desired;
    persist(ctx, vdo).await
}
