//! Fixtures shared by the controller tests

use crate::config::OperatorConfig;
use crate::controller::Context;
use crate::crd::{
    ConfigStatus, VDOConfig, VDOConfigSpec, VsphereCloudConfig, VsphereCloudConfigSpec,
    VsphereCloudConfigStatus,
};
use crate::domain::ports::ManifestFetcher;
use crate::drivers::{bytes, PASSWORD_KEY, USERNAME_KEY};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::session::cache::tests::FakeConnector;
use crate::session::SessionCache;
use crate::store::MemoryStore;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetStatus};
use k8s_openapi::api::core::v1::{Node, NodeSpec, Pod, PodStatus, Secret};
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode};
use kube::api::ObjectMeta;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "vmware-system-vdo";

/// Fetcher serving documents from a map, recording every locator read
#[derive(Default)]
pub struct MapFetcher {
    pub documents: Mutex<BTreeMap<String, Vec<u8>>>,
    pub fetched: Mutex<Vec<String>>,
}

impl MapFetcher {
    pub fn with(self, locator: &str, document: &str) -> Self {
        self.documents
            .lock()
            .insert(locator.to_string(), document.as_bytes().to_vec());
        self
    }
}

#[async_trait]
impl ManifestFetcher for MapFetcher {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        self.fetched.lock().push(locator.to_string());
        self.documents
            .lock()
            .get(locator)
            .cloned()
            .ok_or_else(|| Error::ManifestFetch {
                locator: locator.to_string(),
                reason: "404 Not Found".to_string(),
            })
    }
}

/// Everything a reconciler test needs
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub connector: Arc<FakeConnector>,
    pub fetcher: Arc<MapFetcher>,
    pub ctx: Arc<Context>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_fetcher(MapFetcher::default())
    }

    pub fn with_fetcher(fetcher: MapFetcher) -> Self {
        let store = Arc::new(MemoryStore::new());
        let connector = Arc::new(FakeConnector::new("admin", "pass", &["dc1", "dc2"]));
        let fetcher = Arc::new(fetcher);
        let metrics = Metrics::new().unwrap();
        let sessions = Arc::new(SessionCache::new(
            connector.clone(),
            metrics.vcenter_logins.clone(),
        ));
        let config = OperatorConfig {
            health_timeout: Duration::ZERO,
            ..Default::default()
        };
        let ctx = Arc::new(Context::new(
            store.clone(),
            sessions,
            fetcher.clone(),
            config,
            metrics,
        ));

        Self {
            store,
            connector,
            fetcher,
            ctx,
        }
    }
}

pub fn meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

pub fn credentials_secret(name: &str, username: &str, password: &str) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(USERNAME_KEY.to_string(), bytes(username));
    data.insert(PASSWORD_KEY.to_string(), bytes(password));
    Secret {
        metadata: meta(Some(NAMESPACE), name),
        data: Some(data),
        ..Default::default()
    }
}

pub fn vsphere_cloud_config(name: &str, vc_ip: &str, status: ConfigStatus) -> VsphereCloudConfig {
    let mut vcc = VsphereCloudConfig::new(
        name,
        VsphereCloudConfigSpec {
            vc_ip: vc_ip.to_string(),
            insecure_flag: true,
            credentials: "vc-creds".to_string(),
            thumbprint: None,
            datacenters: vec!["dc1".to_string()],
        },
    );
    vcc.metadata.namespace = Some(NAMESPACE.to_string());
    vcc.status = Some(VsphereCloudConfigStatus {
        config: status,
        message: String::new(),
    });
    vcc
}

pub fn vdo_config(spec: VDOConfigSpec) -> VDOConfig {
    let mut vdo = VDOConfig::new("vdo-config", spec);
    vdo.metadata.namespace = Some(NAMESPACE.to_string());
    vdo
}

pub fn node(name: &str, provider_id: Option<&str>) -> Node {
    Node {
        metadata: meta(None, name),
        spec: Some(NodeSpec {
            provider_id: provider_id.map(str::to_string),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn daemon_set(namespace: &str, name: &str, unavailable: i32) -> DaemonSet {
    DaemonSet {
        metadata: meta(Some(namespace), name),
        status: Some(DaemonSetStatus {
            number_unavailable: Some(unavailable),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod labelled with a single `key=value` selector term
pub fn pod(namespace: &str, name: &str, selector: &str, phase: &str) -> Pod {
    let mut metadata = meta(Some(namespace), name);
    if let Some((key, value)) = selector.split_once('=') {
        metadata.labels = Some([(key.to_string(), value.to_string())].into_iter().collect());
    }
    Pod {
        metadata,
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn csi_node(name: &str) -> CSINode {
    CSINode {
        metadata: meta(None, name),
        ..Default::default()
    }
}

pub fn csi_driver(name: &str) -> CSIDriver {
    CSIDriver {
        metadata: meta(None, name),
        ..Default::default()
    }
}
