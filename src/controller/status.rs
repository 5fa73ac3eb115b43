//! VDOConfig status bookkeeping
//!
//! Both pipelines write their phase through [`transition`], which only
//! touches the API server when the phase or message actually changes, and
//! keeps the in-memory object at the stored resource version.

use crate::controller::Context;
use crate::crd::{VDOConfig, VDOPhase};
use crate::error::{Error, Result};
use kube::ResourceExt;
use tracing::{info, warn};

/// The two driver pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Cpi,
    Csi,
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Driver::Cpi => write!(f, "CPI"),
            Driver::Csi => write!(f, "CSI"),
        }
    }
}

/// Current phase of a pipeline
pub fn phase(vdo: &VDOConfig, driver: Driver) -> Option<VDOPhase> {
    match driver {
        Driver::Cpi => vdo.cpi_status().phase,
        Driver::Csi => vdo.csi_status().phase,
    }
}

/// Write the status subresource and adopt the stored copy
pub async fn persist(ctx: &Context, vdo: &mut VDOConfig) -> Result<()> {
    *vdo = ctx.store.replace_vdo_config_status(vdo).await?;
    Ok(())
}

/// Move a pipeline to `next`, persisting only when something changed
pub async fn transition(
    ctx: &Context,
    vdo: &mut VDOConfig,
    driver: Driver,
    next: VDOPhase,
    message: &str,
) -> Result<()> {
    let status = vdo.status_mut();
    let (current, current_message) = match driver {
        Driver::Cpi => (&mut status.cpi.phase, &mut status.cpi.status_msg),
        Driver::Csi => (&mut status.csi.phase, &mut status.csi.status_msg),
    };
    if *current == Some(next) && current_message.as_str() == message {
        return Ok(());
    }
    *current = Some(next);
    *current_message = message.to_string();

    info!("VDOConfig {} {} phase: {}", vdo.name_any(), driver, next);
    persist(ctx, vdo).await
}

/// Record a pipeline failure; a failing status write is only logged
pub async fn record_failure(ctx: &Context, vdo: &mut VDOConfig, driver: Driver, error: &Error) {
    warn!("VDOConfig {} {} pipeline failed: {}", vdo.name_any(), driver, error);
    if let Err(e) = transition(ctx, vdo, driver, VDOPhase::Failed, &error.to_string()).await {
        warn!(
            "Could not record {} failure on VDOConfig {}: {}",
            driver,
            vdo.name_any(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{vdo_config, Harness, NAMESPACE};
    use crate::crd::VDOConfigSpec;

    #[tokio::test]
    async fn test_transition_skips_unchanged_writes() {
        let h = Harness::new();
        let mut vdo = h.store.insert(vdo_config(VDOConfigSpec::default()));

        transition(&h.ctx, &mut vdo, Driver::Csi, VDOPhase::Configuring, "")
            .await
            .unwrap();
        transition(&h.ctx, &mut vdo, Driver::Csi, VDOPhase::Configuring, "")
            .await
            .unwrap();
        assert_eq!(h.store.writes("VDOConfig"), 1);

        transition(&h.ctx, &mut vdo, Driver::Cpi, VDOPhase::Deploying, "")
            .await
            .unwrap();
        assert_eq!(h.store.writes("VDOConfig"), 2);

        let stored: VDOConfig = h.store.get(NAMESPACE, "vdo-config").unwrap();
        assert_eq!(phase(&stored, Driver::Csi), Some(VDOPhase::Configuring));
        assert_eq!(phase(&stored, Driver::Cpi), Some(VDOPhase::Deploying));
    }

    #[tokio::test]
    async fn test_record_failure_keeps_message() {
        let h = Harness::new();
        let mut vdo = h.store.insert(vdo_config(VDOConfigSpec::default()));

        let error = Error::Validation("vc1 is not verified".into());
        record_failure(&h.ctx, &mut vdo, Driver::Cpi, &error).await;

        let stored: VDOConfig = h.store.get(NAMESPACE, "vdo-config").unwrap();
        assert_eq!(stored.cpi_status().phase, Some(VDOPhase::Failed));
        assert!(stored.cpi_status().status_msg.contains("vc1 is not verified"));
        assert_eq!(stored.csi_status().phase, None);
    }
}
