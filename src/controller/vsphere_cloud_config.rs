//! VsphereCloudConfig reconciler
//!
//! Verifies a vCenter connection descriptor by logging in through the
//! session cache and records the outcome in status. Status is written on
//! every pass, whatever the outcome.

use crate::controller::{requeue_action, Context};
use crate::crd::{ConfigStatus, VsphereCloudConfig, VsphereCloudConfigStatus};
use crate::drivers::Credentials;
use crate::error::{Error, Result};
use crate::metrics::VSPHERE_CLOUD_CONFIG_CONTROLLER;
use crate::session::{Session, SessionRequest};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reconcile a VsphereCloudConfig
pub async fn reconcile(vcc: Arc<VsphereCloudConfig>, ctx: Arc<Context>) -> Result<Action> {
    let name = vcc.name_any();
    ctx.metrics.reconciled(VSPHERE_CLOUD_CONFIG_CONTROLLER);
    debug!("Reconciling VsphereCloudConfig {}", name);

    let outcome = verify(&ctx, &vcc).await;
    let status = match &outcome {
        Ok(session) => {
            info!(
                "VsphereCloudConfig {} verified against vCenter {} ({})",
                name, vcc.spec.vc_ip, session.version
            );
            VsphereCloudConfigStatus {
                config: ConfigStatus::Verified,
                message: String::new(),
            }
        }
        Err(e) => {
            warn!("VsphereCloudConfig {} failed verification: {}", name, e);
            VsphereCloudConfigStatus {
                config: ConfigStatus::Failed,
                message: e.to_string(),
            }
        }
    };

    let mut updated = (*vcc).clone();
    updated.status = Some(status);
    ctx.store.replace_vsphere_cloud_config_status(&updated).await?;

    outcome.map(|_| Action::requeue(ctx.config.settled_requeue_interval))
}

/// Requeue policy for a failed VsphereCloudConfig reconcile
pub fn error_policy(vcc: Arc<VsphereCloudConfig>, error: &Error, ctx: Arc<Context>) -> Action {
    debug!("VsphereCloudConfig {} will be retried: {}", vcc.name_any(), error);
    ctx.metrics.failed(VSPHERE_CLOUD_CONFIG_CONTROLLER);
    requeue_action(error, &ctx)
}

/// Log in with the descriptor's credentials and confirm the session is live
async fn verify(ctx: &Context, vcc: &VsphereCloudConfig) -> Result<Arc<Session>> {
    let session = open_session(ctx, vcc).await?;
    if !session.client.is_active().await? {
        return Err(Error::Connection {
            server: vcc.spec.vc_ip.clone(),
            reason: "session is not active".to_string(),
        });
    }
    Ok(session)
}

/// Session for a descriptor, scoped to its first datacenter
pub async fn open_session(ctx: &Context, vcc: &VsphereCloudConfig) -> Result<Arc<Session>> {
    let credentials = load_credentials(ctx, vcc).await?;
    let datacenters: Vec<String> = vcc.spec.datacenters.iter().take(1).cloned().collect();

    ctx.sessions
        .get_or_create(SessionRequest {
            endpoint: &vcc.spec.vc_ip,
            datacenters: &datacenters,
            username: &credentials.username,
            password: &credentials.password,
            thumbprint: vcc.spec.thumbprint.as_deref(),
        })
        .await
}

/// Read the credentials secret referenced by a descriptor
pub async fn load_credentials(ctx: &Context, vcc: &VsphereCloudConfig) -> Result<Credentials> {
    if vcc.spec.credentials.is_empty() {
        return Ok(Credentials::new("", ""));
    }
    let namespace = vcc.namespace().unwrap_or_else(|| ctx.config.namespace.clone());
    let secret = ctx
        .store
        .get_secret(&namespace, &vcc.spec.credentials)
        .await?
        .ok_or_else(|| Error::ResourceNotFound {
            kind: "Secret".to_string(),
            name: format!("{}/{}", namespace, vcc.spec.credentials),
        })?;
    Credentials::from_secret(&secret)
}
