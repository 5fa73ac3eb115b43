//! Operator metrics
//!
//! Prometheus counters kept in a dedicated registry so tests can build
//! isolated instances. The metrics server encodes [`Metrics::encode`].

use crate::error::{Error, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Label value for the VDOConfig controller
pub const VDO_CONFIG_CONTROLLER: &str = "vdoconfig";

/// Label value for the VsphereCloudConfig controller
pub const VSPHERE_CLOUD_CONFIG_CONTROLLER: &str = "vspherecloudconfig";

/// Operator counters
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Reconcile passes by controller
    pub reconciliations: IntCounterVec,
    /// Failed reconcile passes by controller
    pub reconcile_failures: IntCounterVec,
    /// Successful vCenter logins
    pub vcenter_logins: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new("vdo_reconciliations_total", "Total reconcile passes"),
            &["controller"],
        )
        .map_err(metrics_error)?;
        let reconcile_failures = IntCounterVec::new(
            Opts::new("vdo_reconcile_failures_total", "Reconcile passes that returned an error"),
            &["controller"],
        )
        .map_err(metrics_error)?;
        let vcenter_logins = IntCounter::new(
            "vdo_vcenter_logins_total",
            "Sessions created against vCenter endpoints",
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(reconciliations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(reconcile_failures.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(vcenter_logins.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            reconciliations,
            reconcile_failures,
            vcenter_logins,
        })
    }

    /// Count one reconcile pass
    pub fn reconciled(&self, controller: &str) {
        self.reconciliations.with_label_values(&[controller]).inc();
    }

    /// Count one failed reconcile pass
    pub fn failed(&self, controller: &str) {
        self.reconcile_failures.with_label_values(&[controller]).inc();
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}
