//! Shared context for the controllers
//!
//! Everything a reconcile pass needs is reached through the ports held here,
//! so the same reconcilers run against a live cluster or in-memory doubles.

use crate::config::OperatorConfig;
use crate::domain::ports::{ClusterStoreRef, ManifestFetcherRef};
use crate::metrics::Metrics;
use crate::session::SessionCache;
use std::sync::Arc;

/// Shared context for both reconcilers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes object store
    pub store: ClusterStoreRef,
    /// vCenter sessions, shared across reconciles
    pub sessions: Arc<SessionCache>,
    /// Reader for manifests and the compatibility matrix
    pub fetcher: ManifestFetcherRef,
    pub config: OperatorConfig,
    pub metrics: Metrics,
}

impl Context {
    pub fn new(
        store: ClusterStoreRef,
        sessions: Arc<SessionCache>,
        fetcher: ManifestFetcherRef,
        config: OperatorConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            sessions,
            fetcher,
            config,
            metrics,
        }
    }
}
