//! In-memory cluster store
//!
//! Keeps typed objects in ordered maps behind a single lock and emulates the
//! API server's optimistic concurrency with a global resource version
//! counter. Used by tests and by standalone dry runs.

use crate::crd::{VDOConfig, VsphereCloudConfig};
use crate::domain::ports::{ApplyAction, ClusterStore, ResourceApplier};
use crate::error::{Error, Result};
use crate::manifest::{parse_manifests, GenericResource};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Pod, Secret};
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode};
use kube::Resource;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// `(namespace, name)`; cluster-scoped objects use an empty namespace
pub type ObjectKey = (String, String);

type GenericKey = (String, String, String);

// =============================================================================
// Tables
// =============================================================================

/// Object tables of a [`MemoryStore`]
#[derive(Default)]
pub struct Tables {
    vsphere_cloud_configs: BTreeMap<ObjectKey, VsphereCloudConfig>,
    vdo_configs: BTreeMap<ObjectKey, VDOConfig>,
    secrets: BTreeMap<ObjectKey, Secret>,
    config_maps: BTreeMap<ObjectKey, ConfigMap>,
    namespaces: BTreeMap<ObjectKey, Namespace>,
    nodes: BTreeMap<ObjectKey, Node>,
    daemon_sets: BTreeMap<ObjectKey, DaemonSet>,
    pods: BTreeMap<ObjectKey, Pod>,
    csi_nodes: BTreeMap<ObjectKey, CSINode>,
    csi_drivers: BTreeMap<ObjectKey, CSIDriver>,
}

/// Types the memory store can hold
pub trait StoredObject: Resource<DynamicType = ()> + Clone + Send + Sync + 'static {
    fn table(tables: &mut Tables) -> &mut BTreeMap<ObjectKey, Self>;
}

macro_rules! stored_object {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl StoredObject for $ty {
                fn table(tables: &mut Tables) -> &mut BTreeMap<ObjectKey, Self> {
                    &mut tables.$field
                }
            }
        )*
    };
}

stored_object! {
    VsphereCloudConfig => vsphere_cloud_configs,
    VDOConfig => vdo_configs,
    Secret => secrets,
    ConfigMap => config_maps,
    Namespace => namespaces,
    Node => nodes,
    DaemonSet => daemon_sets,
    Pod => pods,
    CSINode => csi_nodes,
    CSIDriver => csi_drivers,
}

fn key_of<K: Resource>(object: &K) -> ObjectKey {
    let meta = object.meta();
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn kind_of<K: StoredObject>() -> String {
    K::kind(&()).to_string()
}

struct Inner {
    tables: Tables,
    generic: BTreeMap<GenericKey, GenericResource>,
    server_version: String,
    resource_version: u64,
    writes: BTreeMap<String, usize>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn record_write(&mut self, kind: String) {
        *self.writes.entry(kind).or_default() += 1;
    }

    fn create<K: StoredObject>(&mut self, object: &K) -> Result<K> {
        let key = key_of(object);
        if K::table(&mut self.tables).contains_key(&key) {
            return Err(Error::ResourceExists {
                kind: kind_of::<K>(),
                name: key.1,
            });
        }
        let mut stored = object.clone();
        stored.meta_mut().resource_version = Some(self.next_version());
        K::table(&mut self.tables).insert(key, stored.clone());
        self.record_write(kind_of::<K>());
        Ok(stored)
    }

    /// Replace an object, letting `merge` pick what is taken from `object`
    fn replace<K, F>(&mut self, object: &K, merge: F) -> Result<K>
    where
        K: StoredObject,
        F: FnOnce(&mut K, &K),
    {
        let key = key_of(object);
        let version = self.next_version();
        let table = K::table(&mut self.tables);
        let current = table.get_mut(&key).ok_or_else(|| Error::ResourceNotFound {
            kind: kind_of::<K>(),
            name: key.1.clone(),
        })?;

        if let Some(expected) = &object.meta().resource_version {
            if current.meta().resource_version.as_ref() != Some(expected) {
                return Err(Error::Conflict {
                    kind: kind_of::<K>(),
                    name: key.1.clone(),
                });
            }
        }

        merge(current, object);
        current.meta_mut().resource_version = Some(version);
        let stored = current.clone();
        self.record_write(kind_of::<K>());
        Ok(stored)
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// Cluster store kept entirely in memory
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                tables: Tables::default(),
                generic: BTreeMap::new(),
                server_version: "1.29.0".to_string(),
                resource_version: 0,
                writes: BTreeMap::new(),
            }),
        }
    }

    /// Store an object as-is, overwriting any previous copy
    pub fn insert<K: StoredObject>(&self, object: K) -> K {
        let mut inner = self.inner.write();
        let mut stored = object;
        stored.meta_mut().resource_version = Some(inner.next_version());
        K::table(&mut inner.tables).insert(key_of(&stored), stored.clone());
        stored
    }

    pub fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let mut inner = self.inner.write();
        K::table(&mut inner.tables)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn list<K: StoredObject>(&self) -> Vec<K> {
        let mut inner = self.inner.write();
        K::table(&mut inner.tables).values().cloned().collect()
    }

    /// Objects written through the manifest applier
    pub fn applied(&self) -> Vec<GenericResource> {
        self.inner.read().generic.values().cloned().collect()
    }

    /// Number of create/replace calls made through the store API for `kind`
    pub fn writes(&self, kind: &str) -> usize {
        self.inner.read().writes.get(kind).copied().unwrap_or(0)
    }

    /// Kubernetes version reported by `server_version`
    pub fn set_server_version(&self, version: &str) {
        self.inner.write().server_version = version.to_string();
    }

    /// Load every object of a manifest stream. Kinds without a table are
    /// kept as applied generic objects. Returns the number of objects.
    pub fn seed(&self, document: &[u8]) -> Result<usize> {
        let resources = parse_manifests(document)?;
        for resource in &resources {
            match resource.kind.as_str() {
                "VsphereCloudConfig" => self.seed_typed::<VsphereCloudConfig>(resource)?,
                "VDOConfig" => self.seed_typed::<VDOConfig>(resource)?,
                "Secret" => self.seed_typed::<Secret>(resource)?,
                "ConfigMap" => self.seed_typed::<ConfigMap>(resource)?,
                "Namespace" => self.seed_typed::<Namespace>(resource)?,
                "Node" => self.seed_typed::<Node>(resource)?,
                "DaemonSet" => self.seed_typed::<DaemonSet>(resource)?,
                "Pod" => self.seed_typed::<Pod>(resource)?,
                "CSINode" => self.seed_typed::<CSINode>(resource)?,
                "CSIDriver" => self.seed_typed::<CSIDriver>(resource)?,
                _ => {
                    let key = (
                        resource.kind.clone(),
                        resource.namespace.clone().unwrap_or_default(),
                        resource.name.clone(),
                    );
                    self.inner.write().generic.insert(key, resource.clone());
                }
            }
        }
        Ok(resources.len())
    }

    fn seed_typed<K>(&self, resource: &GenericResource) -> Result<()>
    where
        K: StoredObject + DeserializeOwned,
    {
        let object: K = serde_json::from_value(Value::Object(resource.payload.clone()))?;
        self.insert(object);
        Ok(())
    }
}

/// Match an equality selector such as `app=a,tier=b`
fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.and_then(|l| l.get(key.trim())).map(String::as_str)
                == Some(value.trim()),
            None => labels.map_or(false, |l| l.contains_key(term)),
        })
}

#[async_trait]
impl ResourceApplier for MemoryStore {
    async fn apply(&self, resource: &GenericResource, action: ApplyAction) -> Result<()> {
        let key = (
            resource.kind.clone(),
            resource.namespace.clone().unwrap_or_default(),
            resource.name.clone(),
        );
        let mut inner = self.inner.write();

        match action {
            ApplyAction::Create => {
                if inner.generic.contains_key(&key) {
                    return Err(Error::ResourceExists {
                        kind: resource.kind.clone(),
                        name: resource.name.clone(),
                    });
                }
                inner.generic.insert(key, resource.clone());
            }
            ApplyAction::Update => {
                inner.generic.insert(key, resource.clone());
            }
            ApplyAction::Delete => {
                inner.generic.remove(&key);
            }
        }
        debug!("Memory store {} {}", action, resource);
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get_vsphere_cloud_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VsphereCloudConfig>> {
        Ok(self.get(namespace, name))
    }

    async fn replace_vsphere_cloud_config_status(
        &self,
        config: &VsphereCloudConfig,
    ) -> Result<VsphereCloudConfig> {
        self.inner
            .write()
            .replace(config, |current, desired| current.status = desired.status.clone())
    }

    async fn list_vdo_configs(&self, namespace: &str) -> Result<Vec<VDOConfig>> {
        Ok(self
            .list::<VDOConfig>()
            .into_iter()
            .filter(|c| c.metadata.namespace.as_deref() == Some(namespace))
            .collect())
    }

    async fn replace_vdo_config_status(&self, config: &VDOConfig) -> Result<VDOConfig> {
        self.inner
            .write()
            .replace(config, |current, desired| current.status = desired.status.clone())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.get(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        self.inner.write().create(secret)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret> {
        self.inner
            .write()
            .replace(secret, |current, desired| *current = desired.clone())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.get(namespace, name))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        self.inner.write().create(config_map)
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        self.inner
            .write()
            .replace(config_map, |current, desired| *current = desired.clone())
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<()> {
        self.inner.write().create(namespace).map(|_| ())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.list())
    }

    async fn replace_node(&self, node: &Node) -> Result<Node> {
        self.inner
            .write()
            .replace(node, |current, desired| *current = desired.clone())
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>> {
        Ok(self.get(namespace, name))
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        Ok(self
            .list::<Pod>()
            .into_iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| selector_matches(label_selector, p.metadata.labels.as_ref()))
            .collect())
    }

    async fn list_csi_nodes(&self) -> Result<Vec<CSINode>> {
        Ok(self.list())
    }

    async fn list_csi_drivers(&self) -> Result<Vec<CSIDriver>> {
        Ok(self.list())
    }

    async fn server_version(&self) -> Result<String> {
        Ok(self.inner.read().server_version.clone())
    }
}
