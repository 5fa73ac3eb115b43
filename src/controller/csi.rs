//! Storage (CSI) pipeline
//!
//! Resolves and verifies the single VsphereCloudConfig the storage driver
//! uses, writes the INI configuration secret, applies the driver manifests
//! and waits until every node has registered with the driver.

use crate::controller::health::{check_csi_registration, check_daemon_set, wait_until_healthy};
use crate::controller::resources::{ensure_namespace, reconcile_secret};
use crate::controller::status::{record_failure, transition, Driver};
use crate::controller::vdo_config::{ensure_verified, resolve_cloud_config, MatrixState};
use crate::controller::vsphere_cloud_config::load_credentials;
use crate::controller::Context;
use crate::crd::{VDOConfig, VDOPhase};
use crate::domain::ports::ApplyAction;
use crate::drivers::{
    build_csi_secret_config, bytes, CSI_CONFIG_KEY, CSI_DAEMONSET_NAME, CSI_NAMESPACE,
    CSI_POD_SELECTOR, CSI_SECRET_NAME,
};
use crate::error::Result;
use crate::manifest::apply_locations;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::debug;

/// Run the CSI pipeline. A VDOConfig without a storage config is left alone.
pub async fn reconcile_csi(ctx: &Context, vdo: &mut VDOConfig, matrix: &MatrixState) -> Result<()> {
    if vdo.spec.storage_provider.vsphere_cloud_config.is_empty() {
        debug!("VDOConfig {} configures no storage provider", vdo.name_any());
        return Ok(());
    }

    if let Err(e) = run(ctx, vdo, matrix).await {
        record_failure(ctx, vdo, Driver::Csi, &e).await;
        return Err(e);
    }
    Ok(())
}

async fn run(ctx: &Context, vdo: &mut VDOConfig, matrix: &MatrixState) -> Result<()> {
    let store = ctx.store.as_ref();
    let namespace = vdo.namespace().unwrap_or_else(|| ctx.config.namespace.clone());

    let config =
        resolve_cloud_config(ctx, &namespace, &vdo.spec.storage_provider.vsphere_cloud_config)
            .await?;
    ensure_verified(&config)?;

    ensure_namespace(store, CSI_NAMESPACE).await?;

    let credentials = load_credentials(ctx, &config).await?;
    let ini = build_csi_secret_config(vdo, &config, &credentials.username, &credentials.password);
    let data: BTreeMap<_, _> = [(CSI_CONFIG_KEY.to_string(), bytes(&ini))]
        .into_iter()
        .collect();
    if reconcile_secret(store, CSI_NAMESPACE, CSI_SECRET_NAME, data).await? {
        transition(ctx, vdo, Driver::Csi, VDOPhase::Configuring, "").await?;
    }

    let paths = matrix.csi_paths(ctx, &config).await?;
    if !paths.is_empty()
        && apply_locations(ctx.fetcher.as_ref(), store, &paths, "", ApplyAction::Create).await?
    {
        transition(ctx, vdo, Driver::Csi, VDOPhase::Deploying, "").await?;
    }

    wait_until_healthy(ctx.config.health_timeout, || async {
        check_daemon_set(store, CSI_NAMESPACE, CSI_DAEMONSET_NAME, CSI_POD_SELECTOR).await?;
        check_csi_registration(store).await
    })
    .await?;

    transition(ctx, vdo, Driver::Csi, VDOPhase::Deployed, "").await
}
