//! Error types for the vSphere Drivers Operator
//!
//! Provides structured error types for the reconcilers, the vCenter session
//! cache, the manifest engine and the collaborator adapters.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Object Store Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Conflicting update on {kind}/{name}, resource version is stale")]
    Conflict { kind: String, name: String },

    // =========================================================================
    // Dependent Resource Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // vCenter Session Errors
    // =========================================================================
    #[error("Failed to connect to vCenter {server}: {reason}")]
    Connection { server: String, reason: String },

    #[error("vCenter {server} rejected the supplied credentials")]
    Auth { server: String },

    #[error("Datacenter {datacenter} not found on vCenter {server}")]
    DatacenterNotFound { server: String, datacenter: String },

    // =========================================================================
    // Manifest Errors
    // =========================================================================
    #[error("Manifest parse error: {0}")]
    ManifestParse(String),

    #[error("Failed to fetch manifest {locator}: {reason}")]
    ManifestFetch { locator: String, reason: String },

    // =========================================================================
    // Deployment Health Errors
    // =========================================================================
    #[error("Deployment not healthy: {0}")]
    DeploymentHealth(String),

    // =========================================================================
    // Transport / Parse Errors
    // =========================================================================
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::Http(_)
            | Error::Conflict { .. }
            | Error::Connection { .. } => ErrorAction::RequeueWithBackoff,

            // Drivers still rolling out - check again shortly
            Error::DeploymentHealth(_) => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Dependent resources not ready yet - medium retry
            Error::ResourceNotFound { .. } | Error::Validation(_) => {
                ErrorAction::RequeueAfter(Duration::from_secs(60))
            }

            // Bad credentials or datacenters need a user edit, which re-triggers us
            Error::Auth { .. } | Error::DatacenterNotFound { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(300))
            }

            // Configuration errors - don't retry automatically
            Error::Configuration(_) | Error::ManifestParse(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::Http(_) | Error::Conflict { .. } | Error::Connection { .. }
        )
    }

    /// Check if this error reports an object that already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::ResourceExists { .. })
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
