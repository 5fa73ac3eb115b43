//! Secrets, config maps and namespaces written by the pipelines
//!
//! Each helper compares the stored artifact with the desired one and only
//! writes on drift. The return value says whether anything was written.

use crate::domain::ports::ClusterStore;
use crate::error::Result;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, info};

const OPAQUE: &str = "Opaque";

/// Make the secret's data equal to `data`
pub async fn reconcile_secret(
    store: &dyn ClusterStore,
    namespace: &str,
    name: &str,
    data: BTreeMap<String, ByteString>,
) -> Result<bool> {
    match store.get_secret(namespace, name).await? {
        None => {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                data: Some(data),
                type_: Some(OPAQUE.to_string()),
                ..Default::default()
            };
            store.create_secret(&secret).await?;
            info!("Created secret {}/{}", namespace, name);
            Ok(true)
        }
        Some(existing) if existing.data.as_ref() == Some(&data) => {
            debug!("Secret {}/{} is up to date", namespace, name);
            Ok(false)
        }
        Some(mut existing) => {
            existing.data = Some(data);
            existing.string_data = None;
            store.replace_secret(&existing).await?;
            info!("Updated secret {}/{}", namespace, name);
            Ok(true)
        }
    }
}

/// Make `key` of the config map hold `value`, leaving other keys alone
pub async fn reconcile_config_map(
    store: &dyn ClusterStore,
    namespace: &str,
    name: &str,
    key: &str,
    value: String,
) -> Result<bool> {
    match store.get_config_map(namespace, name).await? {
        None => {
            let config_map = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                data: Some([(key.to_string(), value)].into_iter().collect()),
                ..Default::default()
            };
            store.create_config_map(&config_map).await?;
            info!("Created config map {}/{}", namespace, name);
            Ok(true)
        }
        Some(existing)
            if existing.data.as_ref().and_then(|d| d.get(key)) == Some(&value) =>
        {
            debug!("Config map {}/{} is up to date", namespace, name);
            Ok(false)
        }
        Some(mut existing) => {
            existing
                .data
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value);
            store.replace_config_map(&existing).await?;
            info!("Updated config map {}/{}", namespace, name);
            Ok(true)
        }
    }
}

/// Create a namespace unless it already exists
pub async fn ensure_namespace(store: &dyn ClusterStore, name: &str) -> Result<()> {
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match store.create_namespace(&namespace).await {
        Ok(()) => {
            info!("Created namespace {}", name);
            Ok(())
        }
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::bytes;
    use crate::store::MemoryStore;

    fn data(value: &str) -> BTreeMap<String, ByteString> {
        [("key".to_string(), bytes(value))].into_iter().collect()
    }

    #[tokio::test]
    async fn test_secret_create_noop_update() {
        let store = MemoryStore::new();

        assert!(reconcile_secret(&store, "ns", "s", data("a")).await.unwrap());
        assert!(!reconcile_secret(&store, "ns", "s", data("a")).await.unwrap());
        assert!(reconcile_secret(&store, "ns", "s", data("b")).await.unwrap());

        let stored: Secret = store.get("ns", "s").unwrap();
        assert_eq!(stored.data.unwrap()["key"].0, b"b");
        assert_eq!(store.writes("Secret"), 2);
    }

    #[tokio::test]
    async fn test_config_map_keeps_other_keys() {
        let store = MemoryStore::new();
        store.insert(ConfigMap {
            metadata: ObjectMeta {
                name: Some("cm".into()),
                namespace: Some("ns".into()),
                ..Default::default()
            },
            data: Some([("other".to_string(), "x".to_string())].into_iter().collect()),
            ..Default::default()
        });

        assert!(reconcile_config_map(&store, "ns", "cm", "conf", "v1".into())
            .await
            .unwrap());
        assert!(!reconcile_config_map(&store, "ns", "cm", "conf", "v1".into())
            .await
            .unwrap());

        let stored: ConfigMap = store.get("ns", "cm").unwrap();
        let data = stored.data.unwrap();
        assert_eq!(data["conf"], "v1");
        assert_eq!(data["other"], "x");
    }

    #[tokio::test]
    async fn test_ensure_namespace_tolerates_existing() {
        let store = MemoryStore::new();
        ensure_namespace(&store, "vmware-system-csi").await.unwrap();
        ensure_namespace(&store, "vmware-system-csi").await.unwrap();
        assert_eq!(store.writes("Namespace"), 1);
    }
}
