//! Operator configuration
//!
//! Built from command line arguments in `main`; tests use the defaults.

use crate::matrix::MATRIX_CONFIG_MAP_NAME;
use std::time::Duration;

/// Namespace the operator and its custom resources live in
pub const DEFAULT_NAMESPACE: &str = "vmware-system-vdo";

/// Runtime configuration shared by the controllers
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace holding VDOConfig, VsphereCloudConfig and the matrix ConfigMap
    pub namespace: String,
    /// Name of the ConfigMap pointing at the compatibility matrix
    pub matrix_config_map: String,
    /// How long to wait for driver daemonsets to become healthy
    pub health_timeout: Duration,
    /// Requeue interval while a pipeline is still converging
    pub requeue_interval: Duration,
    /// Requeue interval once every pipeline is settled
    pub settled_requeue_interval: Duration,
    /// Requeue interval for errors retried with backoff
    pub error_requeue_interval: Duration,
    /// Timeout of vCenter and manifest HTTP requests
    pub http_timeout: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            matrix_config_map: MATRIX_CONFIG_MAP_NAME.to_string(),
            health_timeout: Duration::from_secs(120),
            requeue_interval: Duration::from_secs(30),
            settled_requeue_interval: Duration::from_secs(300),
            error_requeue_interval: Duration::from_secs(15),
            http_timeout: Duration::from_secs(30),
        }
    }
}
